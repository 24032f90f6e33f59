//! In-process transport: tokio channels carrying JSON frames.
//!
//! Frames are serialized on send and decoded on receive, so a message that
//! cannot round-trip fails the same way it would across a real process
//! boundary. Dropping the `RelayInbox` makes every later send fail with
//! `NoListener`; dropping a `Responder` unanswered fails the query with
//! `Disconnected`.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::{RelayChannel, RelayError, RelayMessage, RelayResponse, RelayResult, TabId};

const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(2);

struct Envelope {
    origin: Option<TabId>,
    frame: Vec<u8>,
    respond: Option<oneshot::Sender<Vec<u8>>>,
}

/// Create a connected sender/receiver pair.
pub fn channel() -> (RelayHandle, RelayInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        RelayHandle {
            tx,
            origin: None,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        },
        RelayInbox { rx },
    )
}

/// Sending side. Cheap to clone; each clone may carry its own origin tab.
#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    origin: Option<TabId>,
    query_timeout: Duration,
}

impl RelayHandle {
    /// A handle whose messages are stamped with `tab` as their sender.
    pub fn with_origin(&self, tab: TabId) -> Self {
        Self {
            origin: Some(tab),
            ..self.clone()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn origin(&self) -> Option<TabId> {
        self.origin
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(
        &self,
        message: &RelayMessage,
        respond: Option<oneshot::Sender<Vec<u8>>>,
    ) -> RelayResult<()> {
        let frame = serde_json::to_vec(message)?;
        self.tx
            .send(Envelope {
                origin: self.origin,
                frame,
                respond,
            })
            .map_err(|_| RelayError::NoListener)
    }
}

#[async_trait]
impl RelayChannel for RelayHandle {
    async fn notify(&self, message: RelayMessage) -> RelayResult<()> {
        self.send(&message, None)
    }

    async fn query(&self, message: RelayMessage) -> RelayResult<RelayResponse> {
        let (respond, response) = oneshot::channel();
        self.send(&message, Some(respond))?;
        match tokio::time::timeout(self.query_timeout, response).await {
            Err(_) => Err(RelayError::Timeout(self.query_timeout)),
            Ok(Err(_)) => Err(RelayError::Disconnected),
            Ok(Ok(frame)) => Ok(serde_json::from_slice(&frame)?),
        }
    }
}

/// Receiving side.
pub struct RelayInbox {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

impl RelayInbox {
    /// Next decodable message. Undecodable frames are logged and skipped.
    /// Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Incoming> {
        loop {
            let envelope = self.rx.recv().await?;
            if let Some(incoming) = decode(envelope) {
                return Some(incoming);
            }
        }
    }

    /// Like `recv`, without waiting.
    pub fn try_recv(&mut self) -> Option<Incoming> {
        loop {
            let envelope = self.rx.try_recv().ok()?;
            if let Some(incoming) = decode(envelope) {
                return Some(incoming);
            }
        }
    }
}

fn decode(envelope: Envelope) -> Option<Incoming> {
    match serde_json::from_slice::<RelayMessage>(&envelope.frame) {
        Ok(message) => {
            debug!(message = message.name(), origin = ?envelope.origin, "relay frame");
            Some(Incoming {
                origin: envelope.origin,
                message,
                responder: envelope.respond.map(|tx| Responder { tx }),
            })
        }
        Err(e) => {
            warn!(error = %e, bytes = envelope.frame.len(), "dropping undecodable frame");
            None
        }
    }
}

/// A received message plus the means to answer it.
pub struct Incoming {
    pub origin: Option<TabId>,
    pub message: RelayMessage,
    pub responder: Option<Responder>,
}

impl Incoming {
    /// Answer a query; a no-op for notifications or a gone requester.
    pub fn respond(self, response: RelayResponse) {
        if let Some(responder) = self.responder {
            responder.send(response);
        }
    }
}

pub struct Responder {
    tx: oneshot::Sender<Vec<u8>>,
}

impl Responder {
    pub fn send(self, response: RelayResponse) {
        match serde_json::to_vec(&response) {
            Ok(frame) => {
                if self.tx.send(frame).is_err() {
                    debug!("requester went away before the response");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode relay response"),
        }
    }
}
