//! REST client for the chat server.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use chatline_core::{
    AuthError, ChatApi, ClientConfig, Credentials, Message, RoomId, Session, TransportError,
    WireMessage, traits::{CreateMessage, UserRecord},
};

const LOGIN_PATH: &str = "auth/login";
const SIGNUP_PATH: &str = "auth/signup";
const MESSAGES_PATH: &str = "message/all";
const CREATE_PATH: &str = "message/create";

/// [`ChatApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpChatApi {
    /// Create a client for the server described by `config`.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        self.config
            .endpoint(path)
            .map_err(|e| TransportError::Http(format!("invalid endpoint {path}: {e}")))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let body = response
        .bytes()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn login(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let url = self
            .url(LOGIN_PATH)
            .map_err(|e| AuthError::Unexpected(e.to_string()))?;
        let response = self
            .client
            .post(url)
            .json(credentials)
            .send()
            .await
            .map_err(|e| AuthError::Unexpected(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(AuthError::NotFound),
            StatusCode::UNAUTHORIZED => return Err(AuthError::InvalidCredentials),
            status if !status.is_success() => {
                tracing::error!("Login failed with status: {status}");
                return Err(AuthError::Unexpected(format!("status {}", status.as_u16())));
            }
            _ => {}
        }

        let user: UserRecord = decode(response)
            .await
            .map_err(|e| AuthError::Unexpected(e.to_string()))?;
        Ok(user.into())
    }

    async fn signup(&self, credentials: &Credentials) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(SIGNUP_PATH)?)
            .json(credentials)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }

    async fn fetch_messages(&self, room: RoomId) -> Result<Vec<Message>, TransportError> {
        // The backlog endpoint is not room-scoped.
        tracing::trace!(%room, "Fetching message backlog");
        let response = self
            .client
            .get(self.url(MESSAGES_PATH)?)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        let wire: Vec<WireMessage> = decode(response).await?;
        Ok(wire.into_iter().map(Message::from).collect())
    }

    async fn create_message(&self, request: &CreateMessage) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.url(CREATE_PATH)?)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(response.status().as_u16()))
        }
    }
}
