//! Events — the immutable unit of relay.
//!
//! An `Event` gets its `id` exactly once, in `Event::new`. There is no
//! setter; every later stage (queue, relay, mailbox, consumer) only moves or
//! clones it, so dedup-by-id downstream stays correct.

pub mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dom::page::{Modifiers, NavigationKind};

pub use snapshot::ElementSnapshot;

/// Kind of captured signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    Focus,
    Blur,
    AriaChange,
    Keyboard,
    LiveRegionUpdate,
    Navigation,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::Focus => "focus",
            EventType::Blur => "blur",
            EventType::AriaChange => "aria-change",
            EventType::Keyboard => "keyboard",
            EventType::LiveRegionUpdate => "live-region-update",
            EventType::Navigation => "navigation",
        };
        f.write_str(name)
    }
}

/// Where a key press moves the reading/focus position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Forward,
    Backward,
    Up,
    Down,
    Left,
    Right,
    Start,
    End,
    PageUp,
    PageDown,
}

/// Which end of a segment an excerpt is taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    Start,
    End,
}

/// Text-cursor context resolved for an arrow key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TextContext {
    /// The cursor moved onto a segment.
    Segment { index: usize, text: String },
    /// The cursor stayed put; an excerpt of the current segment.
    Excerpt {
        index: usize,
        edge: Edge,
        text: String,
    },
    /// Movement was refused at either end, or there is no current segment.
    Boundary { index: Option<usize>, message: String },
}

/// Politeness level of a live region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Politeness {
    Polite,
    Assertive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FocusDetails {
    /// The focus change followed a sequential-navigation key.
    pub via_keyboard: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AriaChangeDetails {
    pub attribute: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyboardDetails {
    pub key: String,
    pub modifiers: Modifiers,
    pub direction: Option<Direction>,
    pub text_context: Option<TextContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveRegionDetails {
    pub politeness: Politeness,
    pub text: String,
    /// The element carrying the live-region marker.
    pub region: Option<ElementSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDetails {
    pub url: String,
    pub navigation_kind: NavigationKind,
}

/// Type-specific payload. The variant determines the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum EventDetails {
    Focus(FocusDetails),
    Blur(FocusDetails),
    AriaChange(AriaChangeDetails),
    Keyboard(KeyboardDetails),
    LiveRegionUpdate(LiveRegionDetails),
    Navigation(NavigationDetails),
}

impl EventDetails {
    pub fn event_type(&self) -> EventType {
        match self {
            EventDetails::Focus(_) => EventType::Focus,
            EventDetails::Blur(_) => EventType::Blur,
            EventDetails::AriaChange(_) => EventType::AriaChange,
            EventDetails::Keyboard(_) => EventType::Keyboard,
            EventDetails::LiveRegionUpdate(_) => EventType::LiveRegionUpdate,
            EventDetails::Navigation(_) => EventType::Navigation,
        }
    }
}

/// One captured interaction or mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: String,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: u64,
    element: Option<ElementSnapshot>,
    details: EventDetails,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(element: Option<ElementSnapshot>, details: EventDetails) -> Self {
        let timestamp = monotonic_millis();
        Self {
            id: make_id(timestamp),
            event_type: details.event_type(),
            timestamp,
            element,
            details,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Capture time, epoch millis.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn element(&self) -> Option<&ElementSnapshot> {
        self.element.as_ref()
    }

    pub fn details(&self) -> &EventDetails {
        &self.details
    }

    /// Copy-on-enrich: a new value with the same id and a different snapshot.
    pub fn with_element(&self, element: ElementSnapshot) -> Self {
        Self {
            element: Some(element),
            ..self.clone()
        }
    }
}

/// Wall-clock epoch millis.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

static LAST_MILLIS: AtomicU64 = AtomicU64::new(0);

/// Epoch millis that never go backwards within this process.
fn monotonic_millis() -> u64 {
    let now = now_millis();
    LAST_MILLIS.fetch_max(now, Ordering::Relaxed).max(now)
}

/// `{millis:x}-{12 random hex}`; the random part breaks same-millisecond ties.
fn make_id(millis: u64) -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("{millis:x}-{}", &random[..12])
}
