//! WebSocket transport for the push channel, using `tokio-tungstenite`.
//!
//! [`WebSocketTransport`] carries push messages as WebSocket text frames.
//! Both `ws://` and `wss://` URLs are supported; TLS is handled by
//! [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
//! [`WebSocketConnector`] dials a new transport for every (re)connect
//! attempt of the push adapter.
//!
//! # Feature gate
//!
//! Only available with the `transport-websocket` feature (on by default).

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::SyncError;
use crate::transport::{Connector, Transport};

/// Type alias for the underlying WebSocket stream.
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by a WebSocket connection.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: dropping its future before it
/// completes does not lose a message.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the URL is invalid or the connection
    /// cannot be established. The I/O [`ErrorKind`](std::io::ErrorKind) is
    /// kept when there is one.
    pub async fn connect(url: &str) -> Result<Self, SyncError> {
        tracing::debug!(url = %url, "connecting to push channel");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            SyncError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(url = %url, "push channel established");

        Ok(Self::from_stream(stream))
    }

    /// Wrap an already-established WebSocket stream (custom TLS, headers, …).
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Like [`connect`](Self::connect) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Timeout`] if the deadline elapses, or any error
    /// [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(url: &str, timeout: Duration) -> Result<Self, SyncError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| SyncError::Timeout)?
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SyncError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    tracing::debug!(?frame, "received close frame");
                    return None;
                }
                // tungstenite queues the pong reply itself.
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::warn!("unexpected binary frame on push channel, skipping");
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| SyncError::TransportSend(e.to_string()))
    }
}

/// [`Connector`] that dials a WebSocket URL with a connect timeout.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Default timeout for a single dial attempt.
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a connector for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: Self::DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the timeout of a single dial attempt.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL this connector dials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, SyncError> {
        let transport = WebSocketTransport::connect_with_timeout(&self.url, self.connect_timeout).await?;
        Ok(Box::new(transport))
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
    use tokio::net::TcpListener;

    /// Start a local WebSocket server that runs `handler` on the accepted
    /// connection and returns the address to connect to.
    async fn start_mock_server<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });

        format!("ws://{addr}")
    }

    #[test]
    fn websocket_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<WebSocketTransport>();
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, SyncError::Io(_)));
    }

    #[tokio::test]
    async fn recv_skips_binary_and_returns_text() {
        let url = start_mock_server(|mut ws| async move {
            ws.send(Message::Binary(vec![0xDE, 0xAD].into())).await.unwrap();
            ws.send(Message::Text("snapshot".into())).await.unwrap();
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "snapshot");
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_returns_transport_closed() {
        let url =
            start_mock_server(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} })
                .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();

        let err = transport.send("late".to_string()).await.unwrap_err();
        assert!(matches!(err, SyncError::TransportClosed));
    }

    #[tokio::test]
    async fn connector_dials_a_fresh_transport() {
        let url = start_mock_server(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let connector = WebSocketConnector::new(url.clone());
        assert_eq!(connector.url(), url);
        let mut transport = connector.connect().await.unwrap();
        transport.send("echo".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().unwrap(), "echo");
    }

    #[tokio::test]
    async fn connector_times_out() {
        let connector = WebSocketConnector::new("ws://192.0.2.1:1")
            .with_connect_timeout(Duration::from_millis(50));
        let err = connector.connect().await.err().unwrap();
        assert!(matches!(err, SyncError::Timeout | SyncError::Io(_)));
    }
}
