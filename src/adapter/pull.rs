//! Pull transport: stateless HTTP request/response against the game endpoint.
//!
//! Every operation is one request to `{base_url}/api/autobus` with an `op`
//! query parameter naming it. Reads are `GET`, actions are `POST` with an
//! optional JSON body. Each request carries the host's credential in a
//! header. A response whose body is `{"error": "..."}` is a rejection,
//! whatever its status code.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{ConnectionState, SyncTransport, TransportKind};
use crate::error::{Result, SyncError};
use crate::protocol::{ActionReply, ErrorBody, GameAction, GameId, LobbyListing, Snapshot};

/// Header that carries the credential unless configured otherwise.
pub const DEFAULT_CREDENTIAL_HEADER: &str = "x-telegram-init-data";

/// Path of the game endpoint below the base URL.
pub const ENDPOINT_PATH: &str = "/api/autobus";

/// Configuration for [`PullAdapter`].
#[derive(Debug, Clone)]
pub struct PullConfig {
    /// Origin of the game service, e.g. `https://example.invalid`.
    pub base_url: String,
    /// Opaque credential supplied by the host application.
    pub credential: String,
    /// Header name the credential is sent in.
    pub credential_header: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl PullConfig {
    /// Default per-request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(base_url: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            credential: credential.into(),
            credential_header: DEFAULT_CREDENTIAL_HEADER.to_string(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Send the credential in `header` instead of the default one.
    #[must_use]
    pub fn with_credential_header(mut self, header: impl Into<String>) -> Self {
        self.credential_header = header.into();
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// HTTP-backed [`SyncTransport`].
#[derive(Debug, Clone)]
pub struct PullAdapter {
    client: Client,
    config: PullConfig,
}

impl PullAdapter {
    /// Build an adapter with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] if the HTTP client cannot be built.
    pub fn new(config: PullConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Http(e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Build an adapter sharing an existing HTTP client.
    pub fn with_client(client: Client, config: PullConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &PullConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            ENDPOINT_PATH
        )
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(
            self.config.credential_header.as_str(),
            self.config.credential.as_str(),
        )
    }

    async fn get<T: DeserializeOwned>(&self, query: &[(&str, String)]) -> Result<T> {
        let request = self.authorize(self.client.get(self.endpoint()).query(query));
        execute(request).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let mut request = self.authorize(self.client.post(self.endpoint()).query(query));
        if let Some(body) = body {
            request = request.json(&body);
        }
        execute(request).await
    }
}

async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await.map_err(request_error)?;
    let status = response.status();
    let text = response.text().await.map_err(request_error)?;

    // Rejections come back as `{"error": "..."}`, sometimes with a 2xx status.
    if let Ok(ErrorBody { error }) = serde_json::from_str::<ErrorBody>(&text) {
        debug!(%status, %error, "pull: request rejected");
        return Err(SyncError::ActionRejected { message: error });
    }
    if !status.is_success() {
        return Err(SyncError::Http(format!("status {}", status.as_u16())));
    }
    Ok(serde_json::from_str(&text)?)
}

fn request_error(error: reqwest::Error) -> SyncError {
    if error.is_timeout() {
        SyncError::Timeout
    } else {
        SyncError::Http(error.to_string())
    }
}

#[async_trait]
impl SyncTransport for PullAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Pull
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Ready
    }

    async fn fetch_snapshot(&self, game_id: GameId) -> Result<Snapshot> {
        self.get(&[("op", "state".to_string()), ("id", game_id.to_string())])
            .await
    }

    async fn fetch_lobby(&self) -> Result<LobbyListing> {
        self.get(&[("op", "lobby".to_string())]).await
    }

    async fn send_action(&self, action: &GameAction) -> Result<ActionReply> {
        let mut query = vec![("op", action.kind().as_str().to_string())];
        if let Some(game_id) = action.game_id() {
            query.push(("id", game_id.to_string()));
        }
        debug!(action = %action.kind(), "pull: sending action");
        self.post(&query, action.body()).await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_builders() {
        let config = PullConfig::new("https://example.invalid/", "init-data")
            .with_request_timeout(Duration::from_secs(3));
        assert_eq!(config.credential_header, DEFAULT_CREDENTIAL_HEADER);
        assert_eq!(config.request_timeout, Duration::from_secs(3));

        let config = config.with_credential_header("authorization");
        assert_eq!(config.credential_header, "authorization");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let adapter = PullAdapter::new(PullConfig::new("https://example.invalid/", "x")).unwrap();
        assert_eq!(adapter.endpoint(), "https://example.invalid/api/autobus");
        assert_eq!(adapter.kind(), TransportKind::Pull);
        assert!(adapter.is_ready());
    }
}
