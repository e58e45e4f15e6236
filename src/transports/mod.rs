//! Push-channel [`Transport`](crate::Transport) implementations.
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! use autobus_sync::{PushAdapter, PushConfig, WebSocketConnector};
//!
//! let connector = WebSocketConnector::new("wss://example.invalid/autobus/ws");
//! let adapter = PushAdapter::start(connector, &host, PushConfig::new());
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::{WebSocketConnector, WebSocketTransport};
