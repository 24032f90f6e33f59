//! Readiness announcer.
//!
//! Announce `devtools-ready` right away, again after a short confirmation
//! delay, then on a fixed interval until one announcement is acknowledged
//! or the retry window runs out. The confirmation is sent even when the
//! first announcement was acknowledged.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::relay::{notify_logged, RelayChannel, RelayMessage, RelayResponse, TabId};

#[derive(Debug, Clone, Copy)]
pub struct AnnouncerTiming {
    pub confirm_delay: Duration,
    pub retry_interval: Duration,
    pub retry_window: Duration,
}

impl From<&RelayConfig> for AnnouncerTiming {
    fn from(config: &RelayConfig) -> Self {
        Self {
            confirm_delay: Duration::from_millis(config.ready_confirm_delay_ms),
            retry_interval: Duration::from_millis(config.ready_retry_interval_ms),
            retry_window: Duration::from_millis(config.ready_retry_window_ms),
        }
    }
}

pub struct ReadinessAnnouncer {
    tab: TabId,
    relay: Arc<dyn RelayChannel>,
    timing: AnnouncerTiming,
}

impl ReadinessAnnouncer {
    pub fn new(tab: TabId, relay: Arc<dyn RelayChannel>, timing: AnnouncerTiming) -> Self {
        Self { tab, relay, timing }
    }

    /// One announcement; true if acknowledged.
    pub async fn announce(&self) -> bool {
        let message = RelayMessage::DevtoolsReady { tab_id: self.tab };
        match self.relay.query(message).await {
            Ok(RelayResponse::Ack) => true,
            Ok(other) => {
                debug!(tab = %self.tab, response = ?other, "readiness not acknowledged");
                false
            }
            Err(e) => {
                warn!(tab = %self.tab, error = %e, "readiness announcement failed");
                false
            }
        }
    }

    /// Announce until acknowledged, the window elapses, or `cancel` fires.
    /// Returns whether an acknowledgment was observed.
    pub async fn run(&self, cancel: &CancellationToken) -> bool {
        let started = Instant::now();
        let mut acked = self.announce().await;

        tokio::select! {
            _ = cancel.cancelled() => return acked,
            _ = tokio::time::sleep(self.timing.confirm_delay) => {}
        }
        acked |= self.announce().await;
        if acked {
            info!(tab = %self.tab, "readiness acknowledged");
            return true;
        }

        let mut retry = tokio::time::interval_at(
            Instant::now() + self.timing.retry_interval,
            self.timing.retry_interval,
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = retry.tick() => {}
            }
            if started.elapsed() > self.timing.retry_window {
                break;
            }
            if self.announce().await {
                info!(tab = %self.tab, "readiness acknowledged after retry");
                return true;
            }
        }
        warn!(tab = %self.tab, window = ?self.timing.retry_window, "readiness never acknowledged");
        false
    }

    /// Announce that the inspection surface is going away.
    pub async fn withdraw(&self) -> bool {
        notify_logged(
            self.relay.as_ref(),
            RelayMessage::DevtoolsClosed { tab_id: self.tab },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayResult;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Acks the `ack_on`-th readiness query (1-based), rejects the rest.
    struct Scripted {
        ack_on: Option<usize>,
        queries: Mutex<Vec<Instant>>,
        notified: Mutex<Vec<RelayMessage>>,
    }

    impl Scripted {
        fn new(ack_on: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                ack_on,
                queries: Mutex::new(Vec::new()),
                notified: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RelayChannel for Scripted {
        async fn notify(&self, message: RelayMessage) -> RelayResult<()> {
            self.notified.lock().push(message);
            Ok(())
        }

        async fn query(&self, _message: RelayMessage) -> RelayResult<RelayResponse> {
            let mut queries = self.queries.lock();
            queries.push(Instant::now());
            if self.ack_on == Some(queries.len()) {
                Ok(RelayResponse::Ack)
            } else {
                Ok(RelayResponse::Rejected {
                    reason: "no capture attached".into(),
                })
            }
        }
    }

    fn timing() -> AnnouncerTiming {
        AnnouncerTiming {
            confirm_delay: Duration::from_millis(1000),
            retry_interval: Duration::from_millis(2000),
            retry_window: Duration::from_millis(30_000),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_ack_still_sends_confirmation() {
        let relay = Scripted::new(Some(1));
        let announcer = ReadinessAnnouncer::new(TabId(1), relay.clone(), timing());
        assert!(announcer.run(&CancellationToken::new()).await);
        let queries = relay.queries.lock();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[1] - queries[0], Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_interval_until_acked() {
        let relay = Scripted::new(Some(4));
        let announcer = ReadinessAnnouncer::new(TabId(1), relay.clone(), timing());
        assert!(announcer.run(&CancellationToken::new()).await);
        let queries = relay.queries.lock();
        assert_eq!(queries.len(), 4);
        assert_eq!(queries[2] - queries[1], Duration::from_millis(2000));
        assert_eq!(queries[3] - queries[2], Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_window() {
        let relay = Scripted::new(None);
        let announcer = ReadinessAnnouncer::new(TabId(1), relay.clone(), timing());
        assert!(!announcer.run(&CancellationToken::new()).await);
        let queries = relay.queries.lock();
        let first = queries[0];
        let last = *queries.last().unwrap();
        assert!(last - first <= Duration::from_millis(30_000));
        // immediate, confirm at 1s, then 3s, 5s, ... 29s
        assert_eq!(queries.len(), 2 + 14);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_retrying() {
        let relay = Scripted::new(None);
        let announcer = ReadinessAnnouncer::new(TabId(1), relay.clone(), timing());
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!announcer.run(&cancel).await);
        assert_eq!(relay.queries.lock().len(), 1);
    }

    #[tokio::test]
    async fn withdraw_announces_closed() {
        let relay = Scripted::new(None);
        let announcer = ReadinessAnnouncer::new(TabId(9), relay.clone(), timing());
        assert!(announcer.withdraw().await);
        assert_eq!(
            *relay.notified.lock(),
            vec![RelayMessage::DevtoolsClosed { tab_id: TabId(9) }]
        );
    }
}
