//! Coordinator — the relay hub between capture agents and inspectors.
//!
//! Owns the tab registry and writes captured events into each tab's
//! mailbox. Browser-level tab notifications (attach, navigation complete,
//! close, install) arrive on a separate channel as `TabEvent`s.

pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::mailbox::Storage;
use crate::relay::{
    self, RelayChannel, RelayHandle, RelayInbox, RelayMessage, RelayResponse, TabId,
};

pub use registry::{TabConnection, TabRegistry};

/// Host notifications about tab state.
pub enum TabEvent {
    /// A capture agent is running in `tab` and listens on `capture`.
    Attached {
        tab: TabId,
        url: String,
        capture: RelayHandle,
    },
    /// A top-level load finished.
    NavigationCompleted { tab: TabId, url: String },
    Closed { tab: TabId },
    /// The extension was installed or updated.
    Installed,
}

/// Cloneable access to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    relay: RelayHandle,
    tabs: mpsc::UnboundedSender<TabEvent>,
}

impl CoordinatorHandle {
    /// A relay endpoint whose messages are attributed to `tab`.
    pub fn relay_for(&self, tab: TabId) -> RelayHandle {
        self.relay.with_origin(tab)
    }

    /// Deliver a host tab notification. False if the coordinator is gone.
    pub fn tab_event(&self, event: TabEvent) -> bool {
        self.tabs.send(event).is_ok()
    }
}

pub struct Coordinator {
    registry: TabRegistry,
    storage: Arc<Storage>,
    restricted_schemes: Vec<String>,
}

impl Coordinator {
    pub fn new(storage: Arc<Storage>, restricted_schemes: Vec<String>) -> Self {
        Self {
            registry: TabRegistry::new(),
            storage,
            restricted_schemes,
        }
    }

    pub fn registry(&self) -> &TabRegistry {
        &self.registry
    }

    /// Run on a task until `cancel` fires.
    pub fn spawn(
        self,
        query_timeout: Duration,
        cancel: CancellationToken,
    ) -> (CoordinatorHandle, JoinHandle<()>) {
        let (relay, inbox) = relay::channel();
        let (tabs_tx, tabs_rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            relay: relay.with_timeout(query_timeout),
            tabs: tabs_tx,
        };
        let task = tokio::spawn(self.run(inbox, tabs_rx, cancel));
        (handle, task)
    }

    async fn run(
        mut self,
        mut inbox: RelayInbox,
        mut tabs: mpsc::UnboundedReceiver<TabEvent>,
        cancel: CancellationToken,
    ) {
        info!("coordinator running");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(incoming) = inbox.recv() => {
                    let response = self.handle(incoming.origin, incoming.message.clone()).await;
                    incoming.respond(response);
                }
                Some(event) = tabs.recv() => self.on_tab_event(event).await,
                else => break,
            }
        }
        info!("coordinator stopped");
    }

    /// Handle one relay message and produce the reply for queries.
    pub async fn handle(&mut self, origin: Option<TabId>, message: RelayMessage) -> RelayResponse {
        match message {
            RelayMessage::AccessibilityEvent { data } => {
                let Some(tab) = origin else {
                    return rejected("event without an origin tab");
                };
                let id = data.id().to_string();
                match self.storage.get_or_open(tab) {
                    Ok(mailbox) => match mailbox.append(data).await {
                        Ok(()) => {
                            debug!(%tab, event = %id, "event stored");
                            RelayResponse::Ack
                        }
                        Err(e) => {
                            warn!(%tab, event = %id, error = %e, "mailbox append failed");
                            rejected(&e.to_string())
                        }
                    },
                    Err(e) => {
                        warn!(%tab, error = %e, "mailbox unavailable");
                        rejected(&e.to_string())
                    }
                }
            }
            RelayMessage::Ping => RelayResponse::Pong {
                inspector_ready: origin.is_some_and(|tab| self.registry.inspector_ready(tab)),
            },
            RelayMessage::DevtoolsReady { tab_id } => {
                info!(tab = %tab_id, "inspector ready");
                self.registry.set_inspector_ready(tab_id, true);
                self.forward(tab_id, RelayMessage::InspectorReady).await
            }
            RelayMessage::DevtoolsClosed { tab_id } => {
                info!(tab = %tab_id, "inspector closed");
                self.registry.set_inspector_ready(tab_id, false);
                self.forward(tab_id, RelayMessage::InspectorClosed).await;
                RelayResponse::Ack
            }
            RelayMessage::Reinitialize => match origin {
                Some(tab) => self.forward(tab, RelayMessage::Reinitialize).await,
                None => rejected("reinitialize without an origin tab"),
            },
            other @ (RelayMessage::InspectorReady | RelayMessage::InspectorClosed) => {
                warn!(message = other.name(), "capture-bound message sent to coordinator");
                rejected("unexpected message")
            }
        }
    }

    pub async fn on_tab_event(&mut self, event: TabEvent) {
        match event {
            TabEvent::Attached { tab, url, capture } => {
                info!(%tab, %url, "capture attached");
                self.registry.attach_capture(tab, capture, &url);
                if self.registry.inspector_ready(tab) {
                    self.forward(tab, RelayMessage::InspectorReady).await;
                }
            }
            TabEvent::NavigationCompleted { tab, url } => {
                self.on_navigation_complete(tab, &url).await;
            }
            TabEvent::Closed { tab } => self.on_tab_closed(tab).await,
            TabEvent::Installed => self.on_install().await,
        }
    }

    /// Reset the tab's mailbox and, on capturable pages, ask the capture
    /// side to re-establish itself. Returns whether capture was asserted.
    pub async fn on_navigation_complete(&mut self, tab: TabId, url: &str) -> bool {
        self.registry.set_url(tab, url);
        self.clear(tab).await;
        if is_restricted(url, &self.restricted_schemes) {
            info!(%tab, %url, "restricted page, capture skipped");
            return false;
        }
        info!(%tab, %url, "navigation complete, re-asserting capture");
        matches!(
            self.forward(tab, RelayMessage::Reinitialize).await,
            RelayResponse::Ack
        )
    }

    pub async fn on_install(&mut self) {
        info!("install: clearing every mailbox");
        if let Err(e) = self.storage.clear_all().await {
            warn!(error = %e, "failed to clear mailboxes on install");
        }
    }

    /// Explicit clear of one tab's mailbox.
    pub async fn clear(&mut self, tab: TabId) {
        if let Err(e) = self.storage.clear(tab).await {
            warn!(%tab, error = %e, "failed to clear mailbox");
        }
    }

    pub async fn on_tab_closed(&mut self, tab: TabId) {
        info!(%tab, "tab closed");
        self.registry.remove(tab);
        if let Err(e) = self.storage.remove(tab).await {
            warn!(%tab, error = %e, "failed to drop mailbox");
        }
    }

    /// Notify the tab's capture agent. Ack only if the notify went through.
    async fn forward(&self, tab: TabId, message: RelayMessage) -> RelayResponse {
        let Some(capture) = self.registry.capture(tab) else {
            debug!(%tab, message = message.name(), "no capture attached");
            return rejected("no capture attached");
        };
        let name = message.name();
        match capture.notify(message).await {
            Ok(()) => RelayResponse::Ack,
            Err(e) => {
                warn!(%tab, message = name, error = %e, "forward to capture failed");
                rejected(&e.to_string())
            }
        }
    }
}

fn rejected(reason: &str) -> RelayResponse {
    RelayResponse::Rejected {
        reason: reason.to_string(),
    }
}

/// Pages on which capture must not be established. Unparsable URLs count.
pub fn is_restricted(url: &str, schemes: &[String]) -> bool {
    match Url::parse(url) {
        Ok(parsed) => schemes.iter().any(|s| s.eq_ignore_ascii_case(parsed.scheme())),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelayConfig;
    use crate::event::{Event, EventDetails, FocusDetails};

    fn coordinator() -> Coordinator {
        Coordinator::new(
            Arc::new(Storage::in_memory(1000)),
            RelayConfig::default().restricted_schemes,
        )
    }

    fn event() -> Event {
        Event::new(
            None,
            EventDetails::Focus(FocusDetails { via_keyboard: true }),
        )
    }

    async fn stored(c: &Coordinator, tab: TabId) -> usize {
        c.storage
            .get_or_open(tab)
            .unwrap()
            .snapshot()
            .await
            .unwrap()
            .len()
    }

    #[test]
    fn restricted_schemes() {
        let schemes = RelayConfig::default().restricted_schemes;
        assert!(is_restricted("chrome://settings", &schemes));
        assert!(is_restricted("about:blank", &schemes));
        assert!(is_restricted("CHROME-EXTENSION://abc/page.html", &schemes));
        assert!(is_restricted("not a url", &schemes));
        assert!(!is_restricted("https://example.com/", &schemes));
        assert!(!is_restricted("file:///tmp/a.html", &schemes));
    }

    #[tokio::test]
    async fn events_land_in_the_origin_mailbox() {
        let mut c = coordinator();
        let response = c
            .handle(
                Some(TabId(1)),
                RelayMessage::AccessibilityEvent { data: event() },
            )
            .await;
        assert_eq!(response, RelayResponse::Ack);
        assert_eq!(stored(&c, TabId(1)).await, 1);
        assert_eq!(stored(&c, TabId(2)).await, 0);

        let orphan = c
            .handle(None, RelayMessage::AccessibilityEvent { data: event() })
            .await;
        assert!(matches!(orphan, RelayResponse::Rejected { .. }));
    }

    #[tokio::test]
    async fn ping_reports_inspector_readiness() {
        let mut c = coordinator();
        assert_eq!(
            c.handle(Some(TabId(1)), RelayMessage::Ping).await,
            RelayResponse::Pong {
                inspector_ready: false
            }
        );
        c.handle(None, RelayMessage::DevtoolsReady { tab_id: TabId(1) })
            .await;
        assert_eq!(
            c.handle(Some(TabId(1)), RelayMessage::Ping).await,
            RelayResponse::Pong {
                inspector_ready: true
            }
        );
    }

    #[tokio::test]
    async fn ready_is_acked_only_when_forwarded() {
        let mut c = coordinator();
        let before = c
            .handle(None, RelayMessage::DevtoolsReady { tab_id: TabId(1) })
            .await;
        assert!(matches!(before, RelayResponse::Rejected { .. }));

        let (capture, mut capture_inbox) = relay::channel();
        c.on_tab_event(TabEvent::Attached {
            tab: TabId(1),
            url: "https://example.com/".into(),
            capture,
        })
        .await;
        // Readiness announced earlier is forwarded on attach.
        assert_eq!(
            capture_inbox.recv().await.unwrap().message,
            RelayMessage::InspectorReady
        );

        let after = c
            .handle(None, RelayMessage::DevtoolsReady { tab_id: TabId(1) })
            .await;
        assert_eq!(after, RelayResponse::Ack);
        assert_eq!(
            capture_inbox.recv().await.unwrap().message,
            RelayMessage::InspectorReady
        );

        c.handle(None, RelayMessage::DevtoolsClosed { tab_id: TabId(1) })
            .await;
        assert_eq!(
            capture_inbox.recv().await.unwrap().message,
            RelayMessage::InspectorClosed
        );
        assert!(!c.registry().inspector_ready(TabId(1)));
    }

    #[tokio::test]
    async fn navigation_clears_and_reasserts_capture() {
        let mut c = coordinator();
        let (capture, mut capture_inbox) = relay::channel();
        c.on_tab_event(TabEvent::Attached {
            tab: TabId(1),
            url: "https://example.com/".into(),
            capture,
        })
        .await;
        c.handle(
            Some(TabId(1)),
            RelayMessage::AccessibilityEvent { data: event() },
        )
        .await;

        assert!(c.on_navigation_complete(TabId(1), "https://example.com/b").await);
        assert_eq!(stored(&c, TabId(1)).await, 0);
        assert_eq!(
            capture_inbox.recv().await.unwrap().message,
            RelayMessage::Reinitialize
        );
    }

    #[tokio::test]
    async fn restricted_navigation_clears_without_capture() {
        let mut c = coordinator();
        let (capture, mut capture_inbox) = relay::channel();
        c.on_tab_event(TabEvent::Attached {
            tab: TabId(1),
            url: "https://example.com/".into(),
            capture,
        })
        .await;
        c.handle(
            Some(TabId(1)),
            RelayMessage::AccessibilityEvent { data: event() },
        )
        .await;

        assert!(!c.on_navigation_complete(TabId(1), "chrome://newtab").await);
        assert_eq!(stored(&c, TabId(1)).await, 0);
        assert!(capture_inbox.try_recv().is_none());
    }

    #[tokio::test]
    async fn install_clears_every_mailbox() {
        let mut c = coordinator();
        for tab in [TabId(1), TabId(2)] {
            c.handle(Some(tab), RelayMessage::AccessibilityEvent { data: event() })
                .await;
        }
        c.on_tab_event(TabEvent::Installed).await;
        assert_eq!(stored(&c, TabId(1)).await, 0);
        assert_eq!(stored(&c, TabId(2)).await, 0);
    }

    #[tokio::test]
    async fn closing_a_tab_forgets_it() {
        let mut c = coordinator();
        c.handle(None, RelayMessage::DevtoolsReady { tab_id: TabId(3) })
            .await;
        c.handle(
            Some(TabId(3)),
            RelayMessage::AccessibilityEvent { data: event() },
        )
        .await;
        c.on_tab_event(TabEvent::Closed { tab: TabId(3) }).await;
        assert!(c.registry().get(TabId(3)).is_none());
        assert!(c.storage.open_tabs().is_empty());
    }

    #[tokio::test]
    async fn spawned_coordinator_answers_queries() {
        let cancel = CancellationToken::new();
        let (handle, task) = coordinator().spawn(Duration::from_secs(1), cancel.clone());
        let tab = handle.relay_for(TabId(1));
        assert_eq!(
            tab.query(RelayMessage::Ping).await.unwrap(),
            RelayResponse::Pong {
                inspector_ready: false
            }
        );
        cancel.cancel();
        task.await.unwrap();
    }
}
