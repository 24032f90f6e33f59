//! Page — the host side of a monitored document.
//!
//! Emulates the browser's native dispatch: input and mutation helpers change
//! the `Document` and then deliver a `DomSignal` to every registered watcher
//! of the matching kind. Watchers are registered only by a capture session
//! (`pub(crate)`), so every live registration belongs to exactly one session.

use std::sync::Arc;

use indextree::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Document, DomResult};

/// Shared handle to a page. Locks are held only for synchronous sections.
pub type SharedPage = Arc<Mutex<Page>>;

/// Event propagation phase as seen by a document-level watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Capture,
    Bubble,
}

/// Modifier keys held during a key press.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
    /// A screen-reader modifier (Insert / CapsLock) is held.
    pub assistive: bool,
}

impl Modifiers {
    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Self::default()
        }
    }

    /// Chords screen readers reserve for their own commands.
    pub fn is_assistive_combo(&self) -> bool {
        self.assistive || (self.ctrl && self.alt)
    }
}

/// How the page changed location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NavigationKind {
    /// A new document replaced the old one.
    FullLoad,
    /// Same document, new URL (history API or fragment change).
    History,
}

/// A raw signal from the page, before classification.
#[derive(Debug, Clone)]
pub enum DomSignal {
    Focus {
        target: NodeId,
        phase: Phase,
    },
    Blur {
        target: NodeId,
        phase: Phase,
    },
    KeyDown {
        key: String,
        modifiers: Modifiers,
        target: Option<NodeId>,
    },
    /// Carries both values as they were when the mutation happened.
    AttributeMutation {
        target: NodeId,
        attribute: String,
        old_value: Option<String>,
        new_value: Option<String>,
    },
    SubtreeInsertion {
        parent: NodeId,
        node: NodeId,
    },
    SubtreeRemoval {
        parent: NodeId,
    },
    Navigation {
        url: String,
        kind: NavigationKind,
    },
}

/// Which watcher a signal is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Focus,
    Blur,
    KeyDown,
    Mutation,
    Navigation,
}

impl SignalKind {
    pub const ALL: [SignalKind; 5] = [
        SignalKind::Focus,
        SignalKind::Blur,
        SignalKind::KeyDown,
        SignalKind::Mutation,
        SignalKind::Navigation,
    ];
}

impl DomSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            DomSignal::Focus { .. } => SignalKind::Focus,
            DomSignal::Blur { .. } => SignalKind::Blur,
            DomSignal::KeyDown { .. } => SignalKind::KeyDown,
            DomSignal::AttributeMutation { .. }
            | DomSignal::SubtreeInsertion { .. }
            | DomSignal::SubtreeRemoval { .. } => SignalKind::Mutation,
            DomSignal::Navigation { .. } => SignalKind::Navigation,
        }
    }
}

/// A signal tagged with the document generation it was produced against.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub generation: u64,
    pub signal: DomSignal,
}

/// Opaque registration handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: SignalKind,
    tx: mpsc::UnboundedSender<Delivered>,
}

/// A monitored page: URL, document, focus and registered watchers.
pub struct Page {
    url: String,
    document: Document,
    focused: Option<NodeId>,
    /// Bumped whenever the document is replaced; stale node ids are detectable.
    generation: u64,
    listeners: Vec<Registration>,
    next_listener: u64,
}

impl Page {
    pub fn new(url: &str, document: Document) -> Self {
        Self {
            url: url.to_string(),
            document,
            focused: None,
            generation: 0,
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn shared(self) -> SharedPage {
        Arc::new(Mutex::new(self))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn focused(&self) -> Option<NodeId> {
        self.focused
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live watcher registrations.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn has_listener(&self, id: ListenerId) -> bool {
        self.listeners.iter().any(|r| r.id == id)
    }

    pub(crate) fn add_listener(
        &mut self,
        kind: SignalKind,
        tx: mpsc::UnboundedSender<Delivered>,
    ) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push(Registration { id, kind, tx });
        id
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|r| r.id != id);
        before != self.listeners.len()
    }

    /// Drop every registration from the host side, as when the page
    /// discards its script context. Returns how many were dropped.
    pub fn detach_all(&mut self) -> usize {
        let dropped = self.listeners.len();
        self.listeners.clear();
        if dropped > 0 {
            warn!(dropped, "all watcher registrations detached");
        }
        dropped
    }

    /// Deliver a signal to every watcher of its kind.
    /// Registrations whose receiver is gone are dropped.
    pub fn dispatch(&mut self, signal: DomSignal) {
        let kind = signal.kind();
        let generation = self.generation;
        self.listeners.retain(|r| {
            if r.kind != kind {
                return true;
            }
            let delivered = Delivered {
                generation,
                signal: signal.clone(),
            };
            if r.tx.send(delivered).is_err() {
                warn!(listener = ?r.id, "dropping registration with closed receiver");
                return false;
            }
            true
        });
    }

    /// Move focus to `node`: blur on the previous target, then focus.
    pub fn focus(&mut self, node: NodeId) {
        if let Some(prev) = self.focused {
            if prev == node {
                return;
            }
            self.dispatch(DomSignal::Blur {
                target: prev,
                phase: Phase::Capture,
            });
        }
        self.focused = Some(node);
        self.dispatch(DomSignal::Focus {
            target: node,
            phase: Phase::Capture,
        });
    }

    /// Drop focus entirely.
    pub fn blur(&mut self) {
        if let Some(prev) = self.focused.take() {
            self.dispatch(DomSignal::Blur {
                target: prev,
                phase: Phase::Capture,
            });
        }
    }

    /// Press a key on the focused element (or the document if none).
    pub fn key_down(&mut self, key: &str, modifiers: Modifiers) {
        let target = self.focused;
        self.dispatch(DomSignal::KeyDown {
            key: key.to_string(),
            modifiers,
            target,
        });
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> DomResult<()> {
        let old_value = self.document.set_attribute(node, name, value)?;
        self.dispatch(DomSignal::AttributeMutation {
            target: node,
            attribute: name.to_ascii_lowercase(),
            old_value,
            new_value: Some(value.to_string()),
        });
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> DomResult<()> {
        let old_value = self.document.remove_attribute(node, name)?;
        if old_value.is_some() {
            self.dispatch(DomSignal::AttributeMutation {
                target: node,
                attribute: name.to_ascii_lowercase(),
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }

    /// Attach an already-built node under `parent`.
    pub fn insert(&mut self, parent: NodeId, node: NodeId) -> DomResult<()> {
        self.document.append_child(parent, node)?;
        self.dispatch(DomSignal::SubtreeInsertion { parent, node });
        Ok(())
    }

    /// Create and attach a text node.
    pub fn insert_text(&mut self, parent: NodeId, text: &str) -> DomResult<NodeId> {
        let node = self.document.create_text(text);
        self.insert(parent, node)?;
        Ok(node)
    }

    /// Build a detached subtree without notifying watchers.
    pub fn build<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce(&mut Document) -> T,
    {
        f(&mut self.document)
    }

    pub fn remove(&mut self, node: NodeId) -> DomResult<()> {
        let parent = self.document.parent(node);
        self.document.remove(node)?;
        if self.focused.is_some_and(|f| !self.document.contains(f)) {
            self.focused = None;
        }
        if let Some(parent) = parent {
            self.dispatch(DomSignal::SubtreeRemoval { parent });
        }
        Ok(())
    }

    /// In-page navigation: the URL changes, the document stays.
    pub fn navigate_history(&mut self, url: &str) {
        debug!(from = %self.url, to = %url, "history navigation");
        self.url = url.to_string();
        self.dispatch(DomSignal::Navigation {
            url: url.to_string(),
            kind: NavigationKind::History,
        });
    }

    /// Full navigation: a new document replaces the old one.
    pub fn load(&mut self, url: &str, document: Document) {
        debug!(from = %self.url, to = %url, "full page load");
        self.url = url.to_string();
        self.document = document;
        self.focused = None;
        self.generation += 1;
        self.dispatch(DomSignal::Navigation {
            url: url.to_string(),
            kind: NavigationKind::FullLoad,
        });
    }
}
