//! Client configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::RoomId;

/// Default delay before the send guard is released after a send settles.
pub const DEFAULT_SEND_RELEASE_MS: u64 = 100;

/// Default timeout applied to REST calls.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid URL for {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        source: url::ParseError,
    },
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// Connection settings shared by every component of the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the REST API.
    pub base_url: Url,

    /// WebSocket URL of the push channel.
    pub push_url: Url,

    /// The single room every message is posted to.
    #[serde(default)]
    pub room_id: RoomId,

    /// Send guard release delay in milliseconds.
    #[serde(default = "default_send_release_ms")]
    pub send_release_ms: u64,

    /// REST request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

const fn default_send_release_ms() -> u64 {
    DEFAULT_SEND_RELEASE_MS
}

const fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

impl ClientConfig {
    /// Create a config for a server, deriving the push URL from the base URL.
    ///
    /// # Errors
    /// Returns error if the base URL is not `http` or `https`.
    pub fn new(base_url: Url) -> Result<Self, ConfigError> {
        let push_url = derive_push_url(&base_url)?;
        Ok(Self {
            base_url,
            push_url,
            room_id: RoomId::default(),
            send_release_ms: DEFAULT_SEND_RELEASE_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        })
    }

    /// Build a config from `CHATLINE_BASE_URL`, `CHATLINE_PUSH_URL` and `CHATLINE_ROOM_ID`.
    ///
    /// # Errors
    /// Returns error if the base URL is missing or any value does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        const BASE: &str = "CHATLINE_BASE_URL";
        const PUSH: &str = "CHATLINE_PUSH_URL";
        const ROOM: &str = "CHATLINE_ROOM_ID";

        let base = lookup(BASE).ok_or(ConfigError::Missing(BASE))?;
        let base_url =
            Url::parse(&base).map_err(|source| ConfigError::InvalidUrl { name: BASE, source })?;
        let mut config = Self::new(base_url)?;

        if let Some(push) = lookup(PUSH) {
            config.push_url =
                Url::parse(&push).map_err(|source| ConfigError::InvalidUrl { name: PUSH, source })?;
        }
        if let Some(room) = lookup(ROOM) {
            let id = room
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name: ROOM, value: room.clone() })?;
            config.room_id = RoomId(id);
        }
        Ok(config)
    }

    /// Send guard release delay.
    #[must_use]
    pub const fn send_release_delay(&self) -> Duration {
        Duration::from_millis(self.send_release_ms)
    }

    /// REST request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve an API path against the base URL.
    ///
    /// # Errors
    /// Returns error if the joined URL is invalid.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{}", path.trim_start_matches('/')))
    }
}

fn derive_push_url(base: &Url) -> Result<Url, ConfigError> {
    let scheme = match base.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    let mut push = base.clone();
    push.set_scheme(scheme)
        .map_err(|()| ConfigError::UnsupportedScheme(scheme.to_string()))?;
    let path = format!("{}/ws", base.path().trim_end_matches('/'));
    push.set_path(&path);
    Ok(push)
}
