//! Text navigation index — flattened reading order for arrow-key context.
//!
//! Visible, non-script text is split into navigation-sized segments:
//! block-like containers (headings, paragraphs, list items, cells, links,
//! buttons) contribute their whole text as one segment, long running text
//! is split at sentence boundaries, anything else is one segment.
//!
//! A single cursor moves over the segments. `refresh()` rebuilds from the
//! document and puts the cursor back on the first segment; any outside
//! notion of "current line" is lost on structural change.

use indextree::NodeId;
use tracing::debug;

use crate::dom::{Document, NodeKind};
use crate::event::snapshot::collapse_whitespace;
use crate::event::{Edge, TextContext};

pub const START_OF_CONTENT: &str = "Beginning of content";
pub const END_OF_CONTENT: &str = "End of content";
pub const NO_CURRENT_SEGMENT: &str = "No current line";

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "title", "meta", "link",
];

const WHOLE_SEGMENT_TAGS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "p",
    "li",
    "dt",
    "dd",
    "td",
    "th",
    "caption",
    "figcaption",
    "legend",
    "label",
    "summary",
    "option",
    "a",
    "button",
];

const WHOLE_SEGMENT_ROLES: &[&str] = &[
    "heading",
    "listitem",
    "cell",
    "gridcell",
    "columnheader",
    "rowheader",
    "link",
    "button",
    "menuitem",
    "tab",
    "option",
];

/// One navigable piece of text and the node that owns it.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub node: NodeId,
}

/// Which end of the sequence a movement ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Start,
    End,
}

impl Boundary {
    pub fn message(&self) -> &'static str {
        match self {
            Boundary::Start => START_OF_CONTENT,
            Boundary::End => END_OF_CONTENT,
        }
    }
}

/// Result of a cursor movement.
#[derive(Debug, Clone, PartialEq)]
pub enum NavOutcome {
    Moved { index: usize, text: String },
    Boundary(Boundary),
}

#[derive(Debug, Clone)]
pub struct TextNavigationIndex {
    segments: Vec<Segment>,
    cursor: Option<usize>,
    long_text_threshold: usize,
}

impl TextNavigationIndex {
    /// Build from a document with the cursor unset.
    pub fn build(doc: &Document, long_text_threshold: usize) -> Self {
        let mut index = Self {
            segments: Vec::new(),
            cursor: None,
            long_text_threshold,
        };
        index.collect(doc, doc.root());
        index
    }

    /// Build from pre-split segments (cursor unset).
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            cursor: None,
            long_text_threshold: usize::MAX,
        }
    }

    /// Rebuild from the document; the cursor goes to the first segment.
    pub fn refresh(&mut self, doc: &Document) {
        self.segments.clear();
        self.collect(doc, doc.root());
        self.cursor = if self.segments.is_empty() { None } else { Some(0) };
        debug!(segments = self.segments.len(), "text index refreshed");
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Current position; `None` means unset (the "-1" position).
    pub fn cursor(&self) -> Option<usize> {
        self.clamped()
    }

    pub fn current(&self) -> Option<&Segment> {
        self.clamped().and_then(|i| self.segments.get(i))
    }

    /// Advance one segment.
    pub fn next(&mut self) -> NavOutcome {
        let target = match self.clamped() {
            None => 0,
            Some(i) => i + 1,
        };
        self.move_to(target, Boundary::End)
    }

    /// Go back one segment.
    pub fn previous(&mut self) -> NavOutcome {
        match self.clamped() {
            Some(i) if i > 0 => self.move_to(i - 1, Boundary::Start),
            _ => {
                self.cursor = self.clamped();
                NavOutcome::Boundary(Boundary::Start)
            }
        }
    }

    /// Up to `len` characters from one end of the current segment.
    /// The cursor does not move.
    pub fn excerpt(&self, edge: Edge, len: usize) -> Option<(usize, String)> {
        let index = self.clamped()?;
        let text = &self.segments[index].text;
        let count = text.chars().count();
        let excerpt = match edge {
            Edge::Start => text.chars().take(len).collect(),
            Edge::End => text.chars().skip(count.saturating_sub(len)).collect(),
        };
        Some((index, excerpt))
    }

    /// Resolve an arrow key against the index.
    pub fn resolve_arrow(&mut self, key: &str, excerpt_len: usize) -> Option<TextContext> {
        let context = match key {
            "ArrowDown" => outcome_context(self.next(), self.clamped()),
            "ArrowUp" => outcome_context(self.previous(), self.clamped()),
            "ArrowLeft" | "ArrowRight" => {
                let edge = if key == "ArrowLeft" { Edge::Start } else { Edge::End };
                match self.excerpt(edge, excerpt_len) {
                    Some((index, text)) => TextContext::Excerpt { index, edge, text },
                    None => TextContext::Boundary {
                        index: None,
                        message: NO_CURRENT_SEGMENT.to_string(),
                    },
                }
            }
            _ => return None,
        };
        Some(context)
    }

    /// The cursor pulled back into `[-1, len)` if the sequence shrank under it.
    fn clamped(&self) -> Option<usize> {
        match self.cursor {
            Some(_) if self.segments.is_empty() => None,
            Some(i) => Some(i.min(self.segments.len() - 1)),
            None => None,
        }
    }

    fn move_to(&mut self, target: usize, boundary: Boundary) -> NavOutcome {
        match self.segments.get(target) {
            Some(segment) => {
                self.cursor = Some(target);
                NavOutcome::Moved {
                    index: target,
                    text: segment.text.clone(),
                }
            }
            None => {
                self.cursor = self.clamped();
                NavOutcome::Boundary(boundary)
            }
        }
    }

    fn collect(&mut self, doc: &Document, node: NodeId) {
        match doc.kind(node) {
            Some(NodeKind::Document) => {
                for child in doc.children(node) {
                    self.collect(doc, child);
                }
            }
            Some(NodeKind::Element { tag, .. }) => {
                if SKIPPED_TAGS.contains(&tag.as_str()) || doc.is_hidden_self(node) {
                    return;
                }
                if is_whole_segment(doc, node, tag) {
                    let text = collapse_whitespace(&visible_text(doc, node));
                    if !text.is_empty() {
                        self.segments.push(Segment { text, node });
                    }
                    return;
                }
                for child in doc.children(node) {
                    self.collect(doc, child);
                }
            }
            Some(NodeKind::Text { text }) => {
                let text = collapse_whitespace(text);
                if text.is_empty() {
                    return;
                }
                let owner = doc.parent(node).unwrap_or(node);
                if text.chars().count() > self.long_text_threshold {
                    for sentence in split_sentences(&text) {
                        self.segments.push(Segment {
                            text: sentence,
                            node: owner,
                        });
                    }
                } else {
                    self.segments.push(Segment { text, node: owner });
                }
            }
            None => {}
        }
    }
}

fn outcome_context(outcome: NavOutcome, cursor: Option<usize>) -> TextContext {
    match outcome {
        NavOutcome::Moved { index, text } => TextContext::Segment { index, text },
        NavOutcome::Boundary(b) => TextContext::Boundary {
            index: cursor,
            message: b.message().to_string(),
        },
    }
}

fn is_whole_segment(doc: &Document, node: NodeId, tag: &str) -> bool {
    WHOLE_SEGMENT_TAGS.contains(&tag)
        || doc
            .attribute(node, "role")
            .is_some_and(|r| WHOLE_SEGMENT_ROLES.contains(&r))
}

/// Text of the subtree, skipping hidden and non-rendered descendants.
fn visible_text(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(node) {
        match doc.kind(child) {
            Some(NodeKind::Text { text }) => {
                out.push_str(text);
                out.push(' ');
            }
            Some(NodeKind::Element { tag, .. }) => {
                if !SKIPPED_TAGS.contains(&tag.as_str()) && !doc.is_hidden_self(child) {
                    out.push_str(&visible_text(doc, child));
                }
            }
            _ => {}
        }
    }
    out
}

/// Split after `.`, `!` or `?` when followed by whitespace.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let terminal = matches!(c, '.' | '!' | '?');
        if terminal && chars.peek().is_some_and(|n| n.is_whitespace()) {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}
