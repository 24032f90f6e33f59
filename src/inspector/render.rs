//! Rendering collaborator interface and the two renderers the crate ships.

use std::io::Write;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::event::Event;

/// Receives the ordered event stream from the consumer.
pub trait Renderer: Send + Sync {
    /// Show one event. Called at most once per id.
    fn render(&self, event: &Event);

    /// Total events rendered so far.
    fn update_count(&self, count: usize);

    /// Replace the status line.
    fn announce(&self, text: &str);
}

/// Mailbox reachability as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

impl ConnectionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
        }
    }
}

/// One JSON line per event on stdout; status through the log.
#[derive(Debug, Default)]
pub struct StdoutRenderer;

impl Renderer for StdoutRenderer {
    fn render(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(e) => {
                warn!(event = %event.id(), error = %e, "failed to encode event");
                return;
            }
        };
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{line}") {
            warn!(error = %e, "stdout write failed");
        }
    }

    fn update_count(&self, count: usize) {
        debug!(count, "events rendered");
    }

    fn announce(&self, text: &str) {
        info!(status = %text, "inspector status");
    }
}

/// Keeps everything it is given. Used to observe a pipeline end to end.
#[derive(Default)]
pub struct MemoryRenderer {
    events: Mutex<Vec<Event>>,
    count: Mutex<usize>,
    announcements: Mutex<Vec<String>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }

    pub fn announcements(&self) -> Vec<String> {
        self.announcements.lock().clone()
    }
}

impl Renderer for MemoryRenderer {
    fn render(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    fn update_count(&self, count: usize) {
        *self.count.lock() = count;
    }

    fn announce(&self, text: &str) {
        self.announcements.lock().push(text.to_string());
    }
}
