//! REST client for the chat service.
//!
//! The runtime executes fetch actions through the [`ChatApi`] trait so tests
//! can substitute an in-memory backend. [`HttpChatApi`] is the production
//! implementation: bearer-authenticated JSON over HTTPS.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use showroom_proto::{
    BearerToken, MessageHistory, RealtimeEndpoint, RoomId, RoomSummary, UnreadCounts,
};
use thiserror::Error;

/// REST failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Token missing, expired or refused.
    #[error("unauthorized")]
    Unauthorized,

    /// Non-success status.
    #[error("http {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// Response body did not match the expected shape.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Chat REST surface.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /chat/rooms`: rooms the user participates in.
    async fn fetch_rooms(&self, token: &BearerToken) -> Result<Vec<RoomSummary>, ApiError>;

    /// `GET /chat/unread`: unread baseline.
    async fn fetch_unread(&self, token: &BearerToken) -> Result<UnreadCounts, ApiError>;

    /// `GET /chat/rooms/{id}/messages`: full history of one room.
    async fn fetch_history(
        &self,
        token: &BearerToken,
        room_id: &RoomId,
    ) -> Result<MessageHistory, ApiError>;

    /// `GET /chat/realtime`: WebSocket endpoint of the real-time service.
    async fn realtime_url(&self, token: &BearerToken) -> Result<String, ApiError>;
}

/// reqwest-backed [`ChatApi`].
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: String,
    realtime_url: Option<String>,
}

impl HttpChatApi {
    /// Client for the service at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: Client::new(), base_url: base_url.into(), realtime_url: None }
    }

    /// Use a fixed real-time URL instead of discovering it.
    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = Some(url.into());
        self
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &BearerToken,
        path: &str,
    ) -> Result<T, ApiError> {
        let url = self.url(path);
        tracing::debug!(%url, "GET");

        let resp = self
            .client
            .get(&url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let text =
            resp.text().await.map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized);
        }
        if !status.is_success() {
            return Err(ApiError::Http { status: status.as_u16(), body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_rooms(&self, token: &BearerToken) -> Result<Vec<RoomSummary>, ApiError> {
        self.get_json(token, "/chat/rooms").await
    }

    async fn fetch_unread(&self, token: &BearerToken) -> Result<UnreadCounts, ApiError> {
        self.get_json(token, "/chat/unread").await
    }

    async fn fetch_history(
        &self,
        token: &BearerToken,
        room_id: &RoomId,
    ) -> Result<MessageHistory, ApiError> {
        self.get_json(token, &history_path(room_id)).await
    }

    async fn realtime_url(&self, token: &BearerToken) -> Result<String, ApiError> {
        if let Some(url) = &self.realtime_url {
            return Ok(url.clone());
        }
        let endpoint: RealtimeEndpoint = self.get_json(token, "/chat/realtime").await?;
        Ok(endpoint.url)
    }
}

/// Room ids are opaque, so the id is percent-encoded as a single segment.
fn history_path(room_id: &RoomId) -> String {
    format!("/chat/rooms/{}/messages", urlencoding::encode(room_id.as_str()))
}
