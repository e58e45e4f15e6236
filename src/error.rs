//! Error types for the Autobus sync client.

use thiserror::Error;

/// Errors that can occur while synchronizing game state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to send a message through the push channel.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the push channel.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The push channel was closed before a reply arrived.
    #[error("transport connection closed")]
    TransportClosed,

    /// An HTTP request failed before the server produced a usable reply.
    #[error("http error: {0}")]
    Http(String),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires a ready connection.
    #[error("not connected to server")]
    NotConnected,

    /// The server rejected the action. The message is shown to the user as-is.
    #[error("{message}")]
    ActionRejected {
        /// Human-readable reason supplied by the server.
        message: String,
    },

    /// Another action is still awaiting its result.
    #[error("another action is already in flight")]
    ActionInFlight,

    /// A game-scoped action was issued with no game open.
    #[error("no active game")]
    NoActiveGame,

    /// The push transport gave up after its reconnect budget was spent.
    #[error("reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted {
        /// Number of reconnect attempts made.
        attempts: u32,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns the text to show the user for this error.
    ///
    /// Server-supplied rejection messages pass through unmodified. Every
    /// transport-level failure maps to `fallback`, because no server reply
    /// exists to explain it.
    pub fn user_message<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self {
            Self::ActionRejected { message } if !message.is_empty() => message,
            _ => fallback,
        }
    }

    /// Returns `true` for failures where no request reached the server.
    pub fn is_transport_unavailable(&self) -> bool {
        matches!(
            self,
            Self::TransportSend(_)
                | Self::TransportReceive(_)
                | Self::TransportClosed
                | Self::Http(_)
                | Self::NotConnected
                | Self::Timeout
                | Self::Io(_)
                | Self::ReconnectExhausted { .. }
        )
    }
}

/// A specialized [`Result`] type for sync client operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn rejected_message_passes_through() {
        let err = SyncError::ActionRejected {
            message: "Nije tvoj red".into(),
        };
        assert_eq!(err.user_message("Greska"), "Nije tvoj red");
        assert_eq!(err.to_string(), "Nije tvoj red");
        assert!(!err.is_transport_unavailable());
    }

    #[test]
    fn transport_errors_use_fallback() {
        let err = SyncError::NotConnected;
        assert_eq!(err.user_message("Greska"), "Greska");
        assert!(err.is_transport_unavailable());

        let empty = SyncError::ActionRejected {
            message: String::new(),
        };
        assert_eq!(empty.user_message("Greska"), "Greska");
    }
}
