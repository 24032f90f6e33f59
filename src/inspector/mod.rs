//! Inspection side: readiness announcement plus the mailbox consumer.

pub mod announce;
pub mod announcer;
pub mod consumer;
pub mod render;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::RelayConfig;
use crate::mailbox::Storage;
use crate::relay::{RelayChannel, RelayMessage, RelayResponse, RelayResult, TabId};

pub use announce::{AnnouncementQueue, DEFAULT_HINT};
pub use announcer::{AnnouncerTiming, ReadinessAnnouncer};
pub use consumer::{MailboxConsumer, SeenSet};
pub use render::{ConnectionStatus, MemoryRenderer, Renderer, StdoutRenderer};

#[derive(Debug, Clone)]
pub struct InspectorOptions {
    pub timing: AnnouncerTiming,
    pub poll_interval: Duration,
    pub seen_capacity: usize,
    pub announcement_min_ms: u64,
}

impl From<&RelayConfig> for InspectorOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            timing: AnnouncerTiming::from(config),
            poll_interval: config.poll_interval(),
            seen_capacity: config.seen_capacity,
            announcement_min_ms: config.announcement_min_ms,
        }
    }
}

/// One inspection surface attached to one tab.
pub struct Inspector {
    tab: TabId,
    relay: Arc<dyn RelayChannel>,
    storage: Arc<Storage>,
    renderer: Arc<dyn Renderer>,
    options: InspectorOptions,
}

impl Inspector {
    pub fn new(
        tab: TabId,
        relay: Arc<dyn RelayChannel>,
        storage: Arc<Storage>,
        renderer: Arc<dyn Renderer>,
        options: InspectorOptions,
    ) -> Self {
        Self {
            tab,
            relay,
            storage,
            renderer,
            options,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    fn announcer(&self) -> ReadinessAnnouncer {
        ReadinessAnnouncer::new(self.tab, self.relay.clone(), self.options.timing)
    }

    /// Announce readiness and consume the mailbox until `cancel` fires.
    /// Returns the number of events rendered.
    pub async fn run(&self, cancel: CancellationToken) -> usize {
        info!(tab = %self.tab, "inspector opened");
        let announcer = self.announcer();
        let mut consumer = MailboxConsumer::new(
            self.tab,
            self.storage.clone(),
            self.renderer.clone(),
            self.options.seen_capacity,
            self.options.announcement_min_ms,
        )
        .with_relay(self.relay.clone());
        let (_, ()) = tokio::join!(
            announcer.run(&cancel),
            consumer.run(self.options.poll_interval, &cancel),
        );
        info!(tab = %self.tab, rendered = consumer.rendered(), "inspector stopped");
        consumer.rendered()
    }

    /// Tell the coordinator this surface is gone.
    pub async fn withdraw(&self) -> bool {
        self.announcer().withdraw().await
    }

    /// Ask the capture side to rebuild its session.
    pub async fn request_reinit(&self) -> RelayResult<RelayResponse> {
        self.relay.query(RelayMessage::Reinitialize).await
    }
}
