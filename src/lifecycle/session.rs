//! Capture session — one generation of watchers on a page.
//!
//! A session registers one watcher per signal kind when it starts and is
//! the only thing that can register watchers at all. `stop()` releases
//! every registration it made; dropping the session stops it.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::classifier::{Classifier, ClassifierOptions};
use crate::dom::page::{Delivered, DomSignal, ListenerId, SharedPage, SignalKind};
use crate::event::Event;
use crate::textnav::TextNavigationIndex;

pub struct CaptureSession {
    page: SharedPage,
    listeners: Vec<ListenerId>,
    signals: mpsc::UnboundedReceiver<Delivered>,
    classifier: Classifier,
    index: TextNavigationIndex,
    stopped: bool,
}

impl CaptureSession {
    /// Register watchers for every signal kind and index the current document.
    pub fn start(page: SharedPage, options: ClassifierOptions, long_text_threshold: usize) -> Self {
        let (tx, signals) = mpsc::unbounded_channel();
        let (listeners, index) = {
            let mut guard = page.lock();
            let listeners: Vec<ListenerId> = SignalKind::ALL
                .iter()
                .map(|kind| guard.add_listener(*kind, tx.clone()))
                .collect();
            let index = TextNavigationIndex::build(guard.document(), long_text_threshold);
            (listeners, index)
        };
        debug!(
            listeners = listeners.len(),
            segments = index.len(),
            "capture session started"
        );
        Self {
            page,
            listeners,
            signals,
            classifier: Classifier::new(options),
            index,
            stopped: false,
        }
    }

    /// Next raw signal from the page.
    pub async fn next_signal(&mut self) -> Option<Delivered> {
        self.signals.recv().await
    }

    /// Classify one delivered signal. Signals produced against a document
    /// that has since been replaced are dropped.
    pub fn handle(&mut self, delivered: Delivered) -> Option<Event> {
        if self.stopped {
            return None;
        }
        let page = self.page.lock();
        if delivered.generation != page.generation() {
            trace!(
                signal_generation = delivered.generation,
                page_generation = page.generation(),
                "dropping signal from a replaced document"
            );
            return None;
        }
        let event = self
            .classifier
            .classify(page.document(), &delivered.signal, &mut self.index);
        if matches!(
            delivered.signal,
            DomSignal::SubtreeInsertion { .. } | DomSignal::SubtreeRemoval { .. }
        ) {
            self.index.refresh(page.document());
        }
        event
    }

    /// Whether every watcher this session registered is still registered.
    pub fn is_live(&self) -> bool {
        if self.stopped {
            return false;
        }
        let page = self.page.lock();
        self.listeners.iter().all(|id| page.has_listener(*id))
    }

    pub fn index(&self) -> &TextNavigationIndex {
        &self.index
    }

    /// Release every registration. Idempotent.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let mut page = self.page.lock();
        for id in self.listeners.drain(..) {
            page.remove_listener(id);
        }
        self.signals.close();
        debug!("capture session stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}
