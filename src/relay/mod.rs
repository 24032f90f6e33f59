//! Relay channel — asynchronous, possibly-failing message passing between
//! the capture side, the coordinator and the inspection side.
//!
//! Two primitives: `notify` (fire-and-forget) and `query` (single response).
//! Both may fail; callers handle failure at their own boundary and never
//! let it stop a loop.

pub mod local;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::event::Event;

pub use local::{channel, Incoming, RelayHandle, RelayInbox, Responder};

/// Identifier of a monitored tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every message kind that crosses a context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayMessage {
    /// Capture → coordinator: one classified event.
    AccessibilityEvent { data: Event },
    /// Capture → coordinator: liveness check.
    Ping,
    /// Inspector → coordinator: the inspection surface is attached.
    #[serde(rename_all = "camelCase")]
    DevtoolsReady { tab_id: TabId },
    /// Inspector → coordinator: the inspection surface is going away.
    #[serde(rename_all = "camelCase")]
    DevtoolsClosed { tab_id: TabId },
    /// Inspector → coordinator → capture: tear down and rebuild capture.
    Reinitialize,
    /// Coordinator → capture: open the readiness gate.
    InspectorReady,
    /// Coordinator → capture: close the readiness gate.
    InspectorClosed,
}

impl RelayMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RelayMessage::AccessibilityEvent { .. } => "accessibility-event",
            RelayMessage::Ping => "ping",
            RelayMessage::DevtoolsReady { .. } => "devtools-ready",
            RelayMessage::DevtoolsClosed { .. } => "devtools-closed",
            RelayMessage::Reinitialize => "reinitialize",
            RelayMessage::InspectorReady => "inspector-ready",
            RelayMessage::InspectorClosed => "inspector-closed",
        }
    }
}

/// Reply to a `query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayResponse {
    Ack,
    #[serde(rename_all = "camelCase")]
    Pong {
        /// Whether an inspector has announced itself for the pinging tab.
        inspector_ready: bool,
    },
    Rejected { reason: String },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("no listener on the receiving end")]
    NoListener,

    #[error("channel disconnected before a response arrived")]
    Disconnected,

    #[error("serialization fault: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no response within {0:?}")]
    Timeout(Duration),
}

pub type RelayResult<T> = Result<T, RelayError>;

/// One end of a relay connection.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Send without waiting for a reply.
    async fn notify(&self, message: RelayMessage) -> RelayResult<()>;

    /// Send and wait for exactly one reply.
    async fn query(&self, message: RelayMessage) -> RelayResult<RelayResponse>;
}

/// `notify`, with failure logged and swallowed.
pub async fn notify_logged(channel: &dyn RelayChannel, message: RelayMessage) -> bool {
    let name = message.name();
    match channel.notify(message).await {
        Ok(()) => true,
        Err(e) => {
            warn!(message = name, error = %e, "relay notify failed");
            false
        }
    }
}
