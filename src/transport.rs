//! Framed text channel underneath the push adapter.
//!
//! The [`Transport`] trait is a bidirectional text message channel between
//! the client and the game service. Push messages are JSON text, so every
//! transport implementation must handle message framing internally
//! (e.g., WebSocket frames, length-prefixed TCP).
//!
//! # Connection Setup
//!
//! Dialling is not part of [`Transport`]: the push adapter must redial after
//! a drop, so it is handed a [`Connector`] that produces a fresh, connected
//! transport on every call.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use autobus_sync::error::SyncError;
//! use autobus_sync::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn send(&mut self, message: String) -> Result<(), SyncError> {
//!         // Send the JSON text message over your channel
//!         unimplemented!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Return None when the connection is closed cleanly
//!         unimplemented!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         unimplemented!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;

/// A bidirectional text message transport for the push channel.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON message.
/// Each call to [`recv`](Transport::recv) returns one complete JSON message.
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method **MUST** be cancel-safe because it is used
/// inside `tokio::select!`. If `recv` is cancelled before completion, calling it
/// again must not lose data. Channel-based implementations (e.g., wrapping
/// `mpsc::Receiver`) are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSend`] if the message could not be sent.
    async fn send(&mut self, message: String) -> Result<(), SyncError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete message was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations should
    /// still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), SyncError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), SyncError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        (**self).close().await
    }
}

/// Dials a fresh [`Transport`] each time it is called.
///
/// The push adapter calls [`connect`](Connector::connect) once at start-up
/// and again for every reconnect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connected transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established. The push
    /// adapter counts it as one failed attempt.
    async fn connect(&self) -> Result<Box<dyn Transport>, SyncError>;
}
