//! Local bounded queue and readiness gate.
//!
//! While the inspection side has not announced itself, events wait in a
//! drop-oldest FIFO. The gate drains that FIFO, oldest first, once per
//! not-ready → ready transition. A send that fails while the gate is open
//! closes it again and keeps the event, so transport loss never loses data
//! short of the capacity bound.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::event::Event;
use crate::relay::{RelayChannel, RelayMessage};

/// FIFO with a fixed capacity; a push at capacity evicts the head.
#[derive(Debug)]
pub struct LocalQueue {
    items: VecDeque<Event>,
    capacity: usize,
    evicted: u64,
}

impl LocalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Append at the tail. Returns the evicted head, if any.
    pub fn push(&mut self, event: Event) -> Option<Event> {
        let evicted = if self.items.len() >= self.capacity {
            self.evicted += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(event);
        evicted
    }

    /// Put an event back at the head (a failed drain).
    fn push_front(&mut self, event: Event) {
        if self.items.len() >= self.capacity {
            // The returning event is older than everything queued.
            self.evicted += 1;
            return;
        }
        self.items.push_front(event);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events dropped to make room since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.items.iter()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

/// Routes events straight to the relay when ready, into the queue otherwise.
pub struct ReadinessGate {
    queue: LocalQueue,
    ready: bool,
    channel: Arc<dyn RelayChannel>,
}

impl ReadinessGate {
    pub fn new(capacity: usize, channel: Arc<dyn RelayChannel>) -> Self {
        Self {
            queue: LocalQueue::new(capacity),
            ready: false,
            channel,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn queue(&self) -> &LocalQueue {
        &self.queue
    }

    pub async fn submit(&mut self, event: Event) {
        if !self.ready {
            self.enqueue(event);
            return;
        }
        let id = event.id().to_string();
        let message = RelayMessage::AccessibilityEvent {
            data: event.clone(),
        };
        match self.channel.notify(message).await {
            Ok(()) => debug!(event = %id, "event relayed"),
            Err(e) => {
                warn!(event = %id, error = %e, "relay failed, closing gate and queueing");
                self.ready = false;
                self.enqueue(event);
            }
        }
    }

    /// Open or close the gate. Opening from closed drains the queue.
    pub async fn set_ready(&mut self, ready: bool) {
        match (self.ready, ready) {
            (false, true) => {
                self.ready = true;
                info!(queued = self.queue.len(), "readiness gate opened");
                self.drain_on_ready().await;
            }
            (true, false) => {
                info!("readiness gate closed");
                self.ready = false;
            }
            _ => {}
        }
    }

    /// Forward every queued event, oldest first. Stops at the first relay
    /// failure, keeping that event at the head and closing the gate.
    /// Returns the number forwarded.
    async fn drain_on_ready(&mut self) -> usize {
        let mut forwarded = 0;
        while let Some(event) = self.queue.pop() {
            let message = RelayMessage::AccessibilityEvent {
                data: event.clone(),
            };
            if let Err(e) = self.channel.notify(message).await {
                warn!(error = %e, remaining = self.queue.len() + 1, "drain interrupted");
                self.queue.push_front(event);
                self.ready = false;
                break;
            }
            forwarded += 1;
        }
        debug!(forwarded, "queue drained");
        forwarded
    }

    /// Back to the initial state: not ready, nothing queued.
    pub fn reset(&mut self) {
        self.ready = false;
        self.queue.clear();
    }

    fn enqueue(&mut self, event: Event) {
        if let Some(evicted) = self.queue.push(event) {
            debug!(event = %evicted.id(), "queue full, evicted oldest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventDetails, FocusDetails};
    use crate::relay::{RelayError, RelayResponse, RelayResult};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records delivered event ids; fails once `fail_after` sends succeeded.
    #[derive(Default)]
    struct Recorder {
        ids: Mutex<Vec<String>>,
        fail_after: Mutex<Option<usize>>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl RelayChannel for Recorder {
        async fn notify(&self, message: RelayMessage) -> RelayResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let mut ids = self.ids.lock();
            if self.fail_after.lock().is_some_and(|n| ids.len() >= n) {
                return Err(RelayError::NoListener);
            }
            if let RelayMessage::AccessibilityEvent { data } = message {
                ids.push(data.id().to_string());
            }
            Ok(())
        }

        async fn query(&self, _message: RelayMessage) -> RelayResult<RelayResponse> {
            Ok(RelayResponse::Ack)
        }
    }

    fn event() -> Event {
        Event::new(
            None,
            EventDetails::Focus(FocusDetails { via_keyboard: true }),
        )
    }

    #[test]
    fn push_beyond_capacity_evicts_the_first() {
        let mut queue = LocalQueue::new(3);
        let events: Vec<Event> = (0..4).map(|_| event()).collect();
        for e in &events[..3] {
            assert!(queue.push(e.clone()).is_none());
        }
        let evicted = queue.push(events[3].clone()).unwrap();
        assert_eq!(evicted.id(), events[0].id());
        assert_eq!(queue.len(), 3);
        let ids: Vec<&str> = queue.iter().map(Event::id).collect();
        assert_eq!(
            ids,
            vec![events[1].id(), events[2].id(), events[3].id()]
        );
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn queue_never_exceeds_capacity() {
        let mut queue = LocalQueue::new(100);
        for _ in 0..250 {
            queue.push(event());
            assert!(queue.len() <= 100);
        }
        assert_eq!(queue.evicted(), 150);
    }

    #[tokio::test]
    async fn drain_preserves_submission_order() {
        let recorder = Arc::new(Recorder::default());
        let mut gate = ReadinessGate::new(100, recorder.clone());
        let events: Vec<Event> = (0..5).map(|_| event()).collect();
        for e in &events {
            gate.submit(e.clone()).await;
        }
        assert!(recorder.ids.lock().is_empty());

        gate.set_ready(true).await;
        let expected: Vec<String> = events.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(*recorder.ids.lock(), expected);
        assert!(gate.queue().is_empty());
    }

    #[tokio::test]
    async fn drain_happens_once_per_transition() {
        let recorder = Arc::new(Recorder::default());
        let mut gate = ReadinessGate::new(10, recorder.clone());
        gate.submit(event()).await;
        gate.set_ready(true).await;
        gate.set_ready(true).await;
        assert_eq!(recorder.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ready_gate_forwards_immediately() {
        let recorder = Arc::new(Recorder::default());
        let mut gate = ReadinessGate::new(10, recorder.clone());
        gate.set_ready(true).await;
        let e = event();
        gate.submit(e.clone()).await;
        assert_eq!(*recorder.ids.lock(), vec![e.id().to_string()]);
        assert!(gate.queue().is_empty());
    }

    #[tokio::test]
    async fn failed_send_closes_gate_and_keeps_event() {
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_after.lock() = Some(0);
        let mut gate = ReadinessGate::new(10, recorder.clone());
        gate.set_ready(true).await;

        let e = event();
        gate.submit(e.clone()).await;
        assert!(!gate.is_ready());
        assert_eq!(gate.queue().len(), 1);

        *recorder.fail_after.lock() = None;
        gate.set_ready(true).await;
        assert_eq!(*recorder.ids.lock(), vec![e.id().to_string()]);
    }

    #[tokio::test]
    async fn interrupted_drain_keeps_remaining_in_order() {
        let recorder = Arc::new(Recorder::default());
        *recorder.fail_after.lock() = Some(2);
        let mut gate = ReadinessGate::new(10, recorder.clone());
        let events: Vec<Event> = (0..4).map(|_| event()).collect();
        for e in &events {
            gate.submit(e.clone()).await;
        }

        gate.set_ready(true).await;
        assert!(!gate.is_ready());
        let remaining: Vec<&str> = gate.queue().iter().map(Event::id).collect();
        assert_eq!(remaining, vec![events[2].id(), events[3].id()]);

        *recorder.fail_after.lock() = None;
        gate.set_ready(true).await;
        let expected: Vec<String> = events.iter().map(|e| e.id().to_string()).collect();
        assert_eq!(*recorder.ids.lock(), expected);
    }

    #[tokio::test]
    async fn reset_clears_queue_and_readiness() {
        let recorder = Arc::new(Recorder::default());
        let mut gate = ReadinessGate::new(10, recorder);
        gate.submit(event()).await;
        gate.set_ready(true).await;
        gate.submit(event()).await;
        gate.reset();
        assert!(!gate.is_ready());
        assert!(gate.queue().is_empty());
    }
}
