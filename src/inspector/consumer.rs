//! Mailbox consumer — the inspection side's poll loop.
//!
//! Each poll takes a snapshot, renders the events whose ids it has not
//! seen, and then consumes every id in the snapshot. Rendering happens at
//! most once per id no matter how often an event is re-read before its
//! acknowledgment lands. A coordinator-side clear between snapshot and
//! consume is harmless: consuming absent ids is a no-op.
//!
//! The connection status is `Connected` only while the mailbox is readable
//! and, when a relay is attached, the coordinator answers a ping.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::announce::AnnouncementQueue;
use super::render::{ConnectionStatus, Renderer};
use crate::event::{now_millis, Event};
use crate::mailbox::{Mailbox, MailboxResult, Storage};
use crate::relay::{RelayChannel, RelayMessage, TabId};

/// Ids already rendered. Oldest ids are forgotten past `capacity`.
#[derive(Debug)]
pub struct SeenSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record `id`; false if it was already present.
    pub fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

pub struct MailboxConsumer {
    tab: TabId,
    storage: Arc<Storage>,
    relay: Option<Arc<dyn RelayChannel>>,
    renderer: Arc<dyn Renderer>,
    seen: SeenSet,
    rendered: usize,
    status: ConnectionStatus,
    announcements: AnnouncementQueue,
    shown: Option<String>,
}

impl MailboxConsumer {
    pub fn new(
        tab: TabId,
        storage: Arc<Storage>,
        renderer: Arc<dyn Renderer>,
        seen_capacity: usize,
        announcement_min_ms: u64,
    ) -> Self {
        Self {
            tab,
            storage,
            relay: None,
            renderer,
            seen: SeenSet::new(seen_capacity),
            rendered: 0,
            status: ConnectionStatus::Connected,
            announcements: AnnouncementQueue::new(announcement_min_ms),
            shown: None,
        }
    }

    /// Also ping the coordinator on every poll and count a failed ping
    /// as a lost connection.
    pub fn with_relay(mut self, relay: Arc<dyn RelayChannel>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Events rendered since creation.
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    /// Queue a status announcement.
    pub fn announce(&mut self, text: impl Into<String>) {
        self.announcements.push(text);
    }

    /// Change the connection status, announcing only actual changes.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        if status == self.status {
            return;
        }
        info!(tab = %self.tab, status = status.label(), "mailbox connection changed");
        self.status = status;
        self.announcements.push(status.label());
    }

    /// One poll. Returns how many events were newly rendered.
    pub async fn poll_once(&mut self, now: u64) -> usize {
        let relay_up = self.relay_reachable().await;
        let (fresh, mailbox_up) = match self.read().await {
            Ok((mailbox, events)) => (self.deliver(mailbox, events).await, true),
            Err(e) => {
                warn!(tab = %self.tab, error = %e, "mailbox snapshot failed");
                (0, false)
            }
        };
        self.set_status(if relay_up && mailbox_up {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        });
        self.refresh_status_line(now);
        fresh
    }

    async fn relay_reachable(&self) -> bool {
        let Some(relay) = &self.relay else {
            return true;
        };
        match relay.query(RelayMessage::Ping).await {
            Ok(_) => true,
            Err(e) => {
                warn!(tab = %self.tab, error = %e, "coordinator unreachable");
                false
            }
        }
    }

    async fn read(&self) -> MailboxResult<(Arc<dyn Mailbox>, Vec<Event>)> {
        let mailbox = self.storage.get_or_open(self.tab)?;
        let events = mailbox.snapshot().await?;
        Ok((mailbox, events))
    }

    async fn deliver(&mut self, mailbox: Arc<dyn Mailbox>, events: Vec<Event>) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut fresh = 0;
        let mut delivered = HashSet::with_capacity(events.len());
        for event in &events {
            if self.seen.insert(event.id()) {
                self.renderer.render(event);
                fresh += 1;
            }
            delivered.insert(event.id().to_string());
        }
        if fresh > 0 {
            self.rendered += fresh;
            self.renderer.update_count(self.rendered);
            debug!(tab = %self.tab, fresh, total = self.rendered, "rendered");
        }
        // A failed consume only means the same ids come back next poll.
        if let Err(e) = mailbox.consume(&delivered).await {
            warn!(tab = %self.tab, error = %e, "mailbox consume failed");
        }
        fresh
    }

    fn refresh_status_line(&mut self, now: u64) {
        let text = self.announcements.display(now);
        if self.shown.as_deref() != Some(text) {
            let text = text.to_string();
            self.renderer.announce(&text);
            self.shown = Some(text);
        }
    }

    /// Poll every `interval` until `cancel` fires, then poll once more.
    pub async fn run(&mut self, interval: Duration, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once(now_millis()).await;
                }
            }
        }
        self.poll_once(now_millis()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailboxBackend;
    use crate::event::{EventDetails, FocusDetails};
    use crate::inspector::announce::DEFAULT_HINT;
    use crate::inspector::render::MemoryRenderer;
    use crate::relay::{self, RelayResponse};

    fn event() -> Event {
        Event::new(
            None,
            EventDetails::Focus(FocusDetails { via_keyboard: true }),
        )
    }

    fn consumer(storage: Arc<Storage>, renderer: Arc<MemoryRenderer>) -> MailboxConsumer {
        MailboxConsumer::new(TabId(1), storage, renderer, 100, 1000)
    }

    #[test]
    fn seen_set_forgets_oldest() {
        let mut seen = SeenSet::new(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        assert!(!seen.contains("a"));
        assert!(seen.contains("b") && seen.contains("c"));
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn renders_in_snapshot_order_then_consumes() {
        let storage = Arc::new(Storage::in_memory(100));
        let renderer = Arc::new(MemoryRenderer::new());
        let mailbox = storage.get_or_open(TabId(1)).unwrap();
        let events: Vec<Event> = (0..3).map(|_| event()).collect();
        for e in &events {
            mailbox.append(e.clone()).await.unwrap();
        }

        let mut c = consumer(storage, renderer.clone());
        assert_eq!(c.poll_once(0).await, 3);
        assert_eq!(renderer.events(), events);
        assert_eq!(renderer.count(), 3);
        assert!(mailbox.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn re_polled_duplicates_render_once() {
        let storage = Arc::new(Storage::in_memory(100));
        let renderer = Arc::new(MemoryRenderer::new());
        let mailbox = storage.get_or_open(TabId(1)).unwrap();
        let e = event();
        mailbox.append(e.clone()).await.unwrap();

        let mut c = consumer(storage, renderer.clone());
        c.poll_once(0).await;
        // Same event re-appended before the acknowledgment was observed.
        mailbox.append(e.clone()).await.unwrap();
        assert_eq!(c.poll_once(10).await, 0);
        assert_eq!(renderer.len(), 1);
        assert!(mailbox.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_mailbox_renders_nothing() {
        let storage = Arc::new(Storage::in_memory(100));
        let renderer = Arc::new(MemoryRenderer::new());
        let mut c = consumer(storage, renderer.clone());
        assert_eq!(c.poll_once(0).await, 0);
        assert!(renderer.is_empty());
        assert_eq!(renderer.announcements(), vec![DEFAULT_HINT.to_string()]);
    }

    #[tokio::test]
    async fn lost_relay_reports_disconnected() {
        let storage = Arc::new(Storage::in_memory(100));
        let mailbox = storage.get_or_open(TabId(1)).unwrap();
        mailbox.append(event()).await.unwrap();
        let (handle, inbox) = relay::channel();
        drop(inbox);
        let renderer = Arc::new(MemoryRenderer::new());
        let mut c = consumer(storage, renderer.clone()).with_relay(Arc::new(handle));

        // The mailbox itself is still drained.
        assert_eq!(c.poll_once(0).await, 1);
        c.poll_once(10).await;
        assert_eq!(c.status(), ConnectionStatus::Disconnected);
        assert_eq!(renderer.announcements(), vec!["Disconnected".to_string()]);
    }

    #[tokio::test]
    async fn answered_ping_keeps_connected() {
        let storage = Arc::new(Storage::in_memory(100));
        let (handle, mut inbox) = relay::channel();
        let server = tokio::spawn(async move {
            let mut pings = 0;
            while let Some(incoming) = inbox.recv().await {
                assert_eq!(incoming.message, RelayMessage::Ping);
                incoming.respond(RelayResponse::Pong {
                    inspector_ready: true,
                });
                pings += 1;
            }
            pings
        });
        let renderer = Arc::new(MemoryRenderer::new());
        let mut c = consumer(storage, renderer.clone()).with_relay(Arc::new(handle));

        c.poll_once(0).await;
        c.poll_once(10).await;
        assert_eq!(c.status(), ConnectionStatus::Connected);
        assert_eq!(renderer.announcements(), vec![DEFAULT_HINT.to_string()]);
        drop(c);
        assert_eq!(server.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unreadable_mailbox_reports_disconnected_once() {
        let dir = tempfile::TempDir::new().unwrap();
        // A file where the log directory should be makes every open fail.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let storage = Arc::new(Storage::new(
            MailboxBackend::Wal {
                dir: blocker.clone(),
            },
            10,
        ));
        let renderer = Arc::new(MemoryRenderer::new());
        let mut c = consumer(storage, renderer.clone());

        c.poll_once(0).await;
        c.poll_once(10).await;
        assert_eq!(c.status(), ConnectionStatus::Disconnected);
        assert_eq!(renderer.announcements(), vec!["Disconnected".to_string()]);

        std::fs::remove_file(&blocker).unwrap();
        c.poll_once(2000).await;
        assert_eq!(c.status(), ConnectionStatus::Connected);
        assert_eq!(
            renderer.announcements(),
            vec!["Disconnected".to_string(), "Connected".to_string()]
        );
    }
}
