//! Terminal chat front-end.
//!
//! Run with: `CHATLINE_BASE_URL=http://localhost:3000 cargo run -p chat-tui`
//!
//! Type `/login <user> <password>` or `/signup <user> <password>`; any other
//! line is sent to the room. Set `CHATLINE_LOG=<file>` to capture logs.

use std::{io, sync::Arc, time::Duration};

use anyhow::Context;
use chatline_core::ClientConfig;
use chatline_session::{ChatClient, ConnectionState};
use chatline_transport::{HttpChatApi, WsPushChannel};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use tokio::sync::mpsc;

type Client = ChatClient<HttpChatApi, WsPushChannel>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let config = ClientConfig::from_env().context("loading client config")?;
    let api = HttpChatApi::new(config.clone()).context("building HTTP client")?;
    let channel = WsPushChannel::new(config.push_url.clone());
    tracing::info!(base = %config.base_url, push = %config.push_url, room = %config.room_id, "Starting chat client");
    let client = Arc::new(ChatClient::new(config, api, channel));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, client).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    // stdout belongs to the TUI, so logs only go to a file
    let Ok(path) = std::env::var("CHATLINE_LOG") else {
        return Ok(());
    };
    let file = std::fs::File::create(&path).with_context(|| format!("creating log file {path}"))?;
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Outcome of a background action, shown in the status bar.
enum Notice {
    Info(String),
    Error(String),
    /// Content that was persisted.
    Sent(String),
}

struct App {
    input: String,
    scroll_back: u16,
    notice: Option<Notice>,
}

impl App {
    const fn new() -> Self {
        Self {
            input: String::new(),
            scroll_back: 0,
            notice: None,
        }
    }

    /// Record a notice. A completed send clears the input only if it still
    /// holds the submitted text, so anything typed after Enter survives.
    fn apply(&mut self, notice: Notice) {
        if matches!(&notice, Notice::Sent(content) if *content == self.input) {
            self.input.clear();
        }
        self.notice = Some(notice);
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    client: Arc<Client>,
) -> anyhow::Result<()> {
    let mut app = App::new();
    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<Notice>();

    loop {
        while let Ok(notice) = notice_rx.try_recv() {
            app.apply(notice);
        }

        terminal.draw(|f| ui(f, &app, &client))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match key {
            KeyEvent {
                code: KeyCode::Char('c'),
                modifiers: KeyModifiers::CONTROL,
                ..
            } => return Ok(()),
            KeyEvent {
                code: KeyCode::Char(c),
                modifiers: KeyModifiers::NONE | KeyModifiers::SHIFT,
                ..
            } => app.input.push(c),
            KeyEvent {
                code: KeyCode::Backspace,
                ..
            } => {
                app.input.pop();
            }
            KeyEvent {
                code: KeyCode::Enter,
                ..
            } => submit(&app.input, &client, &notice_tx),
            KeyEvent {
                code: KeyCode::PageUp,
                ..
            } => app.scroll_back = app.scroll_back.saturating_add(10),
            KeyEvent {
                code: KeyCode::PageDown,
                ..
            } => app.scroll_back = app.scroll_back.saturating_sub(10),
            _ => {}
        }
    }
}

fn submit(input: &str, client: &Arc<Client>, notices: &mpsc::UnboundedSender<Notice>) {
    let client = Arc::clone(client);
    let notices = notices.clone();
    let mut words = input.split_whitespace();

    match words.next() {
        Some("/login") => {
            let (Some(user), Some(pass)) = (words.next(), words.next()) else {
                let _ = notices.send(Notice::Error("usage: /login <user> <password>".into()));
                return;
            };
            let (user, pass) = (user.to_string(), pass.to_string());
            tokio::spawn(async move {
                let notice = match client.login(&user, &pass).await {
                    Ok(active) => Notice::Info(format!("Logged in as {}", active.session.username)),
                    Err(e) => Notice::Error(e.to_string()),
                };
                let _ = notices.send(notice);
            });
        }
        Some("/signup") => {
            let (Some(user), Some(pass)) = (words.next(), words.next()) else {
                let _ = notices.send(Notice::Error("usage: /signup <user> <password>".into()));
                return;
            };
            let (user, pass) = (user.to_string(), pass.to_string());
            tokio::spawn(async move {
                let notice = match client.signup(&user, &pass).await {
                    Ok(()) => Notice::Info("User created successfully".into()),
                    Err(e) => Notice::Error(format!("User creation failed: {e}")),
                };
                let _ = notices.send(notice);
            });
        }
        _ => {
            let content = input.to_string();
            tokio::spawn(async move {
                let notice = match client.send(content).await {
                    Ok(message) => Notice::Sent(message.content().to_string()),
                    Err(e) => Notice::Error(e.to_string()),
                };
                let _ = notices.send(notice);
            });
        }
    }
}

fn ui(f: &mut Frame, app: &App, client: &Client) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Timeline
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(f.area());

    // Timeline, pinned to the bottom unless scrolled back
    let lines: Vec<Line> = client
        .snapshot()
        .iter()
        .map(|m| Line::from(m.to_string()))
        .collect();
    let visible = chunks[0].height.saturating_sub(2);
    let total = u16::try_from(lines.len()).unwrap_or(u16::MAX);
    let scroll = total.saturating_sub(visible).saturating_sub(app.scroll_back);

    let timeline = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Chat Box"))
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(timeline, chunks[0]);

    // Input
    let (title, style) = match (client.session(), client.send_in_flight()) {
        (None, _) => ("Login to send message", Style::default().fg(Color::DarkGray)),
        (Some(_), true) => ("Sending...", Style::default().fg(Color::DarkGray)),
        (Some(_), false) => ("Type your message", Style::default().fg(Color::Yellow)),
    };
    let input = Paragraph::new(app.input.as_str())
        .style(style)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(input, chunks[1]);

    let cursor = u16::try_from(app.input.chars().count()).unwrap_or(u16::MAX);
    f.set_cursor_position((chunks[1].x + cursor.saturating_add(1), chunks[1].y + 1));

    // Status bar
    let (who, who_style) = client.session().map_or_else(
        || ("logged out".to_string(), Style::default().fg(Color::Yellow)),
        |s| (s.username, Style::default().fg(Color::Green)),
    );
    let link = match client.connection_state() {
        ConnectionState::Idle => "offline",
        ConnectionState::Connecting { .. } => "connecting",
        ConnectionState::Open { .. } => "live",
    };
    let mut spans = vec![
        Span::raw(" "),
        Span::styled(who, who_style),
        Span::raw(format!(" | {link} | ")),
    ];
    match &app.notice {
        Some(Notice::Info(text)) => spans.push(Span::styled(text.clone(), Style::default().fg(Color::Green))),
        Some(Notice::Error(text)) => spans.push(Span::styled(text.clone(), Style::default().fg(Color::Red))),
        Some(Notice::Sent(_)) | None => {
            spans.push(Span::styled("Ctrl+C", Style::default().fg(Color::Yellow)));
            spans.push(Span::raw(" quit "));
        }
    }
    f.render_widget(Paragraph::new(Line::from(spans)), chunks[2]);
}
