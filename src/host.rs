//! Host-environment collaborators injected into the engine.
//!
//! The host application owns the viewer's identity and the modal alert
//! surface. The engine receives both through [`Host`] at construction time
//! and never looks them up on its own.

use serde::{Deserialize, Serialize};

use crate::protocol::PlayerId;

/// Identity of the local viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: PlayerId,
    pub display_name: String,
}

impl Viewer {
    /// Create a viewer identity.
    pub fn new(id: PlayerId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Functions supplied by the host application.
pub trait Host: Send + Sync + 'static {
    /// Identity of the local viewer.
    fn viewer(&self) -> Viewer;

    /// Show an error message to the user.
    fn alert(&self, message: &str);
}

/// [`Host`] that writes alerts to the log. Handy for headless clients.
#[derive(Debug, Clone)]
pub struct LoggingHost {
    viewer: Viewer,
}

impl LoggingHost {
    pub fn new(viewer: Viewer) -> Self {
        Self { viewer }
    }
}

impl Host for LoggingHost {
    fn viewer(&self) -> Viewer {
        self.viewer.clone()
    }

    fn alert(&self, message: &str) {
        tracing::warn!(viewer = self.viewer.id, "alert: {message}");
    }
}
