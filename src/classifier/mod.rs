//! Event classifier — raw DOM signals in, typed and enriched events out.
//!
//! `classify` yields zero or one event per signal. It never fails: a node
//! that vanished or an attribute that is absent degrades to an empty field
//! or to no event at all.

use indextree::NodeId;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::dom::page::{DomSignal, Modifiers, Phase};
use crate::dom::Document;
use crate::event::snapshot::{collapse_whitespace, is_editable, is_interactive};
use crate::event::{
    AriaChangeDetails, Direction, ElementSnapshot, Event, EventDetails, FocusDetails,
    KeyboardDetails, LiveRegionDetails, NavigationDetails, Politeness,
};
use crate::textnav::TextNavigationIndex;

/// Attribute names whose mutation is reported.
pub const TRACKED_ATTRIBUTES: &[&str] = &[
    "role",
    "aria-activedescendant",
    "aria-busy",
    "aria-checked",
    "aria-current",
    "aria-describedby",
    "aria-disabled",
    "aria-expanded",
    "aria-hidden",
    "aria-invalid",
    "aria-label",
    "aria-labelledby",
    "aria-live",
    "aria-pressed",
    "aria-selected",
    "aria-valuenow",
    "aria-valuetext",
];

/// Which focus changes are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FocusPolicy {
    /// Only focus moves that directly follow Tab / Shift+Tab.
    #[default]
    SequentialOnly,
    /// Every capture-phase focus change.
    Always,
}

/// Tunables the classifier needs.
#[derive(Debug, Clone)]
pub struct ClassifierOptions {
    pub focus_policy: FocusPolicy,
    pub text_snapshot_len: usize,
    pub excerpt_len: usize,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            focus_policy: FocusPolicy::SequentialOnly,
            text_snapshot_len: 100,
            excerpt_len: 50,
        }
    }
}

pub struct Classifier {
    options: ClassifierOptions,
    /// Direction of the last sequential-navigation key, consumed by the
    /// focus change it authorizes and overwritten by every other key.
    last_nav_key: Option<Direction>,
}

impl Classifier {
    pub fn new(options: ClassifierOptions) -> Self {
        Self {
            options,
            last_nav_key: None,
        }
    }

    pub fn options(&self) -> &ClassifierOptions {
        &self.options
    }

    /// Classify one signal against the current document.
    pub fn classify(
        &mut self,
        doc: &Document,
        signal: &DomSignal,
        index: &mut TextNavigationIndex,
    ) -> Option<Event> {
        let event = match signal {
            DomSignal::Focus { target, phase } => self.focus(doc, *target, *phase),
            DomSignal::Blur { target, phase } => self.blur(doc, *target, *phase),
            DomSignal::KeyDown {
                key,
                modifiers,
                target,
            } => self.keyboard(doc, key, *modifiers, *target, index),
            DomSignal::AttributeMutation {
                target,
                attribute,
                old_value,
                new_value,
            } => self.attribute(
                doc,
                *target,
                attribute,
                old_value.as_deref(),
                new_value.as_deref(),
            ),
            DomSignal::SubtreeInsertion { node, .. } => self.insertion(doc, *node),
            DomSignal::SubtreeRemoval { .. } => None,
            DomSignal::Navigation { url, kind } => Some(Event::new(
                None,
                EventDetails::Navigation(NavigationDetails {
                    url: url.clone(),
                    navigation_kind: *kind,
                }),
            )),
        };
        if event.is_none() {
            trace!(kind = ?signal.kind(), "signal judged insignificant");
        }
        event
    }

    fn snapshot(&self, doc: &Document, node: NodeId) -> Option<ElementSnapshot> {
        ElementSnapshot::capture(doc, node, self.options.text_snapshot_len)
    }

    fn focus(&mut self, doc: &Document, target: NodeId, phase: Phase) -> Option<Event> {
        if phase != Phase::Capture {
            return None;
        }
        let via_keyboard = self.last_nav_key.take().is_some();
        if self.options.focus_policy == FocusPolicy::SequentialOnly && !via_keyboard {
            return None;
        }
        Some(Event::new(
            self.snapshot(doc, target),
            EventDetails::Focus(FocusDetails { via_keyboard }),
        ))
    }

    fn blur(&mut self, doc: &Document, target: NodeId, phase: Phase) -> Option<Event> {
        if phase != Phase::Capture {
            return None;
        }
        // Blur precedes the focus it belongs to; leave the key for that focus.
        let via_keyboard = self.last_nav_key.is_some();
        if self.options.focus_policy == FocusPolicy::SequentialOnly && !via_keyboard {
            return None;
        }
        Some(Event::new(
            self.snapshot(doc, target),
            EventDetails::Blur(FocusDetails { via_keyboard }),
        ))
    }

    fn keyboard(
        &mut self,
        doc: &Document,
        key: &str,
        modifiers: Modifiers,
        target: Option<NodeId>,
        index: &mut TextNavigationIndex,
    ) -> Option<Event> {
        let direction = direction_for(key, modifiers);
        self.last_nav_key = match direction {
            Some(d @ (Direction::Forward | Direction::Backward)) => Some(d),
            _ => None,
        };

        let target_interactive = target.is_some_and(|t| is_interactive(doc, t));
        if !is_significant(key, modifiers, target_interactive) {
            return None;
        }

        let editing = target.is_some_and(|t| is_editable(doc, t));
        let text_context = if editing || modifiers.is_assistive_combo() {
            None
        } else {
            index.resolve_arrow(key, self.options.excerpt_len)
        };

        Some(Event::new(
            target.and_then(|t| self.snapshot(doc, t)),
            EventDetails::Keyboard(KeyboardDetails {
                key: key.to_string(),
                modifiers,
                direction,
                text_context,
            }),
        ))
    }

    fn attribute(
        &self,
        doc: &Document,
        target: NodeId,
        attribute: &str,
        old_value: Option<&str>,
        new_value: Option<&str>,
    ) -> Option<Event> {
        let attribute = attribute.to_ascii_lowercase();
        if !TRACKED_ATTRIBUTES.contains(&attribute.as_str()) {
            return None;
        }
        // The document may already hold a later value; report this mutation's.
        if new_value == old_value {
            return None;
        }
        Some(Event::new(
            self.snapshot(doc, target),
            EventDetails::AriaChange(AriaChangeDetails {
                old_value: old_value.map(str::to_string),
                new_value: new_value.map(str::to_string),
                attribute,
            }),
        ))
    }

    fn insertion(&self, doc: &Document, node: NodeId) -> Option<Event> {
        let (region, politeness) = live_region_for(doc, node)?;
        let text = collapse_whitespace(&doc.text_content(node));
        if text.is_empty() {
            return None;
        }
        Some(Event::new(
            self.snapshot(doc, node),
            EventDetails::LiveRegionUpdate(LiveRegionDetails {
                politeness,
                text,
                region: self.snapshot(doc, region),
            }),
        ))
    }
}

/// Nearest inclusive ancestor marked as a live region, walking to the root.
/// `aria-live="off"` ends the search with no region.
pub fn live_region_for(doc: &Document, node: NodeId) -> Option<(NodeId, Politeness)> {
    for ancestor in doc.ancestors(node) {
        if let Some(live) = doc.attribute(ancestor, "aria-live") {
            return match live.trim().to_ascii_lowercase().as_str() {
                "assertive" => Some((ancestor, Politeness::Assertive)),
                "off" => None,
                _ => Some((ancestor, Politeness::Polite)),
            };
        }
        match doc.attribute(ancestor, "role") {
            Some("alert") => return Some((ancestor, Politeness::Assertive)),
            Some("status" | "log") => return Some((ancestor, Politeness::Polite)),
            _ => {}
        }
    }
    None
}

pub fn direction_for(key: &str, modifiers: Modifiers) -> Option<Direction> {
    let direction = match key {
        "Tab" if modifiers.shift => Direction::Backward,
        "Tab" => Direction::Forward,
        "ArrowUp" => Direction::Up,
        "ArrowDown" => Direction::Down,
        "ArrowLeft" => Direction::Left,
        "ArrowRight" => Direction::Right,
        "Home" => Direction::Start,
        "End" => Direction::End,
        "PageUp" => Direction::PageUp,
        "PageDown" => Direction::PageDown,
        _ => return None,
    };
    Some(direction)
}

/// Keys worth reporting: navigation keys, Escape, activation keys on
/// interactive targets, and screen-reader modifier chords.
pub fn is_significant(key: &str, modifiers: Modifiers, target_interactive: bool) -> bool {
    match key {
        "Tab" | "ArrowUp" | "ArrowDown" | "ArrowLeft" | "ArrowRight" | "Home" | "End"
        | "PageUp" | "PageDown" | "Escape" => true,
        "Enter" | " " | "Spacebar" => target_interactive || modifiers.is_assistive_combo(),
        "Insert" | "CapsLock" | "Control" | "Alt" | "Shift" | "Meta" => false,
        _ => modifiers.is_assistive_combo(),
    }
}
