//! Capture agent — lifecycle and reinit controller for one monitored page.
//!
//! ## States
//!
//! `Uninitialized → Active → Teardown → Active (reinit) …`
//!
//! Reinit is triggered by an explicit instruction from the inspection side,
//! a full or in-page navigation, or a liveness check that finds the
//! session's watchers gone. Teardown stops the session, closes the readiness
//! gate and empties the local queue; after a settle delay a fresh session
//! is attached. The previous session is always stopped before the next one
//! starts, so two watcher generations never coexist.
//!
//! Pages on a restricted scheme are never watched: attaching there leaves
//! the agent torn down until a later navigation brings it back.
//!
//! The periodic ping never forces a reinit by failing. A successful pong
//! that reports an attached inspector re-opens the gate, which is how
//! readiness survives a reinit on the capture side.

pub mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::ClassifierOptions;
use crate::config::RelayConfig;
use crate::coordinator::is_restricted;
use crate::dom::page::{Delivered, DomSignal, NavigationKind, SharedPage};
use crate::queue::ReadinessGate;
use crate::relay::{RelayChannel, RelayHandle, RelayInbox, RelayMessage, RelayResponse, TabId};

pub use session::CaptureSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Active,
    Teardown,
}

/// Why a reinit happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReinitTrigger {
    /// The inspection side (via the coordinator) asked for it.
    Explicit,
    FullNavigation,
    HistoryNavigation,
    /// The session's watchers were found unregistered.
    LivenessCheck,
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub classifier: ClassifierOptions,
    pub queue_capacity: usize,
    pub long_text_threshold: usize,
    pub settle_delay: Duration,
    pub ping_interval: Duration,
    /// URL schemes capture never attaches to.
    pub restricted_schemes: Vec<String>,
}

impl From<&RelayConfig> for CaptureOptions {
    fn from(config: &RelayConfig) -> Self {
        Self {
            classifier: config.classifier_options(),
            queue_capacity: config.queue_capacity,
            long_text_threshold: config.long_text_threshold,
            settle_delay: config.settle_delay(),
            ping_interval: config.ping_interval(),
            restricted_schemes: config.restricted_schemes.clone(),
        }
    }
}

pub struct CaptureAgent {
    tab: TabId,
    page: SharedPage,
    options: CaptureOptions,
    relay: RelayHandle,
    state: LifecycleState,
    session: Option<CaptureSession>,
    gate: ReadinessGate,
    reinits: u64,
}

impl CaptureAgent {
    /// `relay` is this tab's endpoint at the coordinator.
    pub fn new(tab: TabId, page: SharedPage, relay: RelayHandle, options: CaptureOptions) -> Self {
        let gate = ReadinessGate::new(options.queue_capacity, Arc::new(relay.clone()));
        Self {
            tab,
            page,
            options,
            relay,
            state: LifecycleState::Uninitialized,
            session: None,
            gate,
            reinits: 0,
        }
    }

    pub fn tab(&self) -> TabId {
        self.tab
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn session(&self) -> Option<&CaptureSession> {
        self.session.as_ref()
    }

    /// Completed reinit cycles.
    pub fn reinit_count(&self) -> u64 {
        self.reinits
    }

    /// Enter `Active` with a fresh session and an empty, closed gate.
    /// A no-op when already active. On a restricted page no session is
    /// started and the agent stays in `Teardown`.
    pub fn attach(&mut self) {
        if self.state == LifecycleState::Active {
            return;
        }
        self.gate.reset();
        let url = self.page.lock().url().to_string();
        if is_restricted(&url, &self.options.restricted_schemes) {
            self.state = LifecycleState::Teardown;
            info!(tab = %self.tab, %url, "restricted page, capture stays detached");
            return;
        }
        self.session = Some(CaptureSession::start(
            self.page.clone(),
            self.options.classifier.clone(),
            self.options.long_text_threshold,
        ));
        self.state = LifecycleState::Active;
        info!(tab = %self.tab, "capture active");
    }

    /// Stop the session, close the gate and drop queued events.
    pub fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        let dropped = self.gate.queue().len();
        self.gate.reset();
        if self.state != LifecycleState::Uninitialized {
            self.state = LifecycleState::Teardown;
        }
        debug!(tab = %self.tab, dropped, "capture torn down");
    }

    pub async fn reinit(&mut self, trigger: ReinitTrigger) {
        info!(tab = %self.tab, ?trigger, "reinitializing capture");
        self.teardown();
        tokio::time::sleep(self.options.settle_delay).await;
        self.attach();
        self.reinits += 1;
        self.sync_readiness().await;
    }

    /// Apply a control message from the coordinator.
    pub async fn handle_control(&mut self, message: RelayMessage) -> RelayResponse {
        match message {
            RelayMessage::InspectorReady => {
                self.gate.set_ready(true).await;
                RelayResponse::Ack
            }
            RelayMessage::InspectorClosed => {
                self.gate.set_ready(false).await;
                RelayResponse::Ack
            }
            RelayMessage::Reinitialize => {
                self.reinit(ReinitTrigger::Explicit).await;
                RelayResponse::Ack
            }
            other => {
                warn!(tab = %self.tab, message = other.name(), "unexpected control message");
                RelayResponse::Rejected {
                    reason: format!("capture does not handle {}", other.name()),
                }
            }
        }
    }

    /// Classify and submit one signal; navigation signals then reinit.
    pub async fn handle_signal(&mut self, delivered: Delivered) {
        let navigation = match &delivered.signal {
            DomSignal::Navigation { kind, .. } => Some(*kind),
            _ => None,
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(event) = session.handle(delivered) {
            debug!(tab = %self.tab, event = %event.id(), kind = %event.event_type(), "captured");
            self.gate.submit(event).await;
        }
        match navigation {
            Some(NavigationKind::FullLoad) => self.reinit(ReinitTrigger::FullNavigation).await,
            Some(NavigationKind::History) => self.reinit(ReinitTrigger::HistoryNavigation).await,
            None => {}
        }
    }

    /// Ping the coordinator and check the session's watchers. A dead
    /// session triggers a reinit; a failed ping is only logged.
    /// Returns whether the session was found live.
    pub async fn liveness_check(&mut self) -> bool {
        self.sync_readiness().await;
        let live = self.session.as_ref().is_some_and(CaptureSession::is_live);
        if !live && self.state == LifecycleState::Active {
            warn!(tab = %self.tab, "capture watchers missing");
            self.reinit(ReinitTrigger::LivenessCheck).await;
        }
        live
    }

    async fn sync_readiness(&mut self) {
        match self.relay.query(RelayMessage::Ping).await {
            Ok(RelayResponse::Pong { inspector_ready }) => {
                if inspector_ready && !self.gate.is_ready() {
                    debug!(tab = %self.tab, "inspector already attached, reopening gate");
                    self.gate.set_ready(true).await;
                }
            }
            Ok(other) => debug!(tab = %self.tab, response = ?other, "unexpected ping reply"),
            Err(e) => warn!(tab = %self.tab, error = %e, "liveness ping failed"),
        }
    }

    /// Run until `cancel` fires, then tear down.
    pub fn spawn(self, control: RelayInbox, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(control, cancel))
    }

    pub async fn run(mut self, mut control: RelayInbox, cancel: CancellationToken) {
        if self.state == LifecycleState::Uninitialized {
            self.attach();
        }
        self.sync_readiness().await;
        let mut ping = tokio::time::interval(self.options.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(incoming) = control.recv() => {
                    let response = self.handle_control(incoming.message.clone()).await;
                    incoming.respond(response);
                }
                Some(delivered) = next_signal(&mut self.session) => {
                    self.handle_signal(delivered).await;
                }
                _ = ping.tick() => {
                    self.liveness_check().await;
                }
            }
        }
        self.teardown();
        info!(tab = %self.tab, "capture agent stopped");
    }
}

async fn next_signal(session: &mut Option<CaptureSession>) -> Option<Delivered> {
    match session {
        Some(session) => session.next_signal().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::page::{Modifiers, Page, SignalKind};
    use crate::dom::Document;
    use crate::relay::{self, Incoming};

    fn options() -> CaptureOptions {
        CaptureOptions {
            classifier: ClassifierOptions::default(),
            queue_capacity: 100,
            long_text_threshold: 200,
            settle_delay: Duration::from_millis(1),
            ping_interval: Duration::from_secs(60),
            restricted_schemes: vec!["chrome".into(), "about".into()],
        }
    }

    fn page() -> SharedPage {
        let mut doc = Document::new();
        let root = doc.root();
        let h1 = doc.append_element(root, "h1", &[]).unwrap();
        doc.append_text(h1, "Title").unwrap();
        Page::new("https://example.com/", doc).shared()
    }

    /// Agent whose coordinator end answers every ping with `inspector_ready`.
    fn agent_with_pong(
        page: SharedPage,
        inspector_ready: bool,
    ) -> (CaptureAgent, JoinHandle<Vec<RelayMessage>>) {
        let (handle, mut inbox) = relay::channel();
        let agent = CaptureAgent::new(TabId(1), page, handle.with_origin(TabId(1)), options());
        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            while let Some(incoming) = inbox.recv().await {
                let Incoming { message, responder, .. } = incoming;
                if let Some(responder) = responder {
                    responder.send(RelayResponse::Pong { inspector_ready });
                }
                seen.push(message);
            }
            seen
        });
        (agent, server)
    }

    #[tokio::test]
    async fn attach_then_teardown() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page.clone(), false);
        assert_eq!(agent.state(), LifecycleState::Uninitialized);

        agent.attach();
        assert_eq!(agent.state(), LifecycleState::Active);
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());

        agent.teardown();
        assert_eq!(agent.state(), LifecycleState::Teardown);
        assert_eq!(page.lock().listener_count(), 0);
        assert!(!agent.is_ready());
    }

    #[tokio::test]
    async fn reinit_twice_leaves_one_listener_set() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page.clone(), false);
        agent.attach();
        agent.handle_control(RelayMessage::InspectorReady).await;
        assert!(agent.is_ready());

        agent.reinit(ReinitTrigger::Explicit).await;
        agent.reinit(ReinitTrigger::Explicit).await;
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());
        assert_eq!(agent.reinit_count(), 2);
        assert!(!agent.is_ready());
    }

    #[tokio::test]
    async fn reinit_reopens_gate_when_inspector_is_attached() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page, true);
        agent.attach();
        agent.reinit(ReinitTrigger::Explicit).await;
        assert!(agent.is_ready());
    }

    #[tokio::test]
    async fn events_wait_until_ready_then_flow_in_order() {
        let page = page();
        let (mut agent, server) = agent_with_pong(page.clone(), false);
        agent.attach();

        for key in ["Tab", "Escape", "Home"] {
            page.lock().key_down(key, Modifiers::default());
            let delivered = next_signal(&mut agent.session).await.unwrap();
            agent.handle_signal(delivered).await;
        }
        assert_eq!(agent.gate().queue().len(), 3);

        agent.handle_control(RelayMessage::InspectorReady).await;
        assert!(agent.gate().queue().is_empty());
        drop(agent);

        let keys: Vec<String> = server
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| match m {
                RelayMessage::AccessibilityEvent { data } => match data.details() {
                    crate::event::EventDetails::Keyboard(k) => Some(k.key.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["Tab", "Escape", "Home"]);
    }

    #[tokio::test]
    async fn history_navigation_reinits() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page.clone(), false);
        agent.attach();
        page.lock().navigate_history("https://example.com/#section");
        let delivered = next_signal(&mut agent.session).await.unwrap();
        agent.handle_signal(delivered).await;
        assert_eq!(agent.reinit_count(), 1);
        assert_eq!(agent.state(), LifecycleState::Active);
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());
    }

    #[tokio::test]
    async fn full_navigation_to_a_restricted_page_stays_detached() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page.clone(), false);
        agent.attach();
        page.lock().load("chrome://settings", Document::new());
        let delivered = next_signal(&mut agent.session).await.unwrap();
        agent.handle_signal(delivered).await;

        assert_eq!(agent.state(), LifecycleState::Teardown);
        assert!(agent.session().is_none());
        assert_eq!(page.lock().listener_count(), 0);

        // Neither an explicit request nor the liveness check reattaches.
        agent.handle_control(RelayMessage::Reinitialize).await;
        agent.liveness_check().await;
        assert_eq!(page.lock().listener_count(), 0);

        page.lock().load("https://example.com/back", Document::new());
        agent.reinit(ReinitTrigger::Explicit).await;
        assert_eq!(agent.state(), LifecycleState::Active);
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());
    }

    #[tokio::test]
    async fn liveness_check_reattaches_missing_watchers() {
        let page = page();
        let (mut agent, _server) = agent_with_pong(page.clone(), false);
        agent.attach();
        assert!(agent.liveness_check().await);

        page.lock().detach_all();
        assert!(!agent.liveness_check().await);
        assert_eq!(agent.reinit_count(), 1);
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());
    }

    #[tokio::test]
    async fn failed_ping_does_not_reinit() {
        let page = page();
        let (handle, inbox) = relay::channel();
        drop(inbox);
        let mut agent = CaptureAgent::new(TabId(1), page, handle, options());
        agent.attach();
        assert!(agent.liveness_check().await);
        assert_eq!(agent.reinit_count(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let page = page();
        let (agent, _server) = agent_with_pong(page.clone(), false);
        let (_control_handle, control) = relay::channel();
        let cancel = CancellationToken::new();
        let task = agent.spawn(control, cancel.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(page.lock().listener_count(), SignalKind::ALL.len());
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(page.lock().listener_count(), 0);
    }
}
