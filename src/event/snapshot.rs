//! Element snapshots — value copies of an observed node's descriptive state.

use std::collections::BTreeMap;

use indextree::NodeId;
use serde::{Deserialize, Serialize};

use crate::dom::Document;

const INTERACTIVE_TAGS: &[&str] = &[
    "button", "input", "select", "textarea", "summary", "details", "option",
];

const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "checkbox",
    "radio",
    "switch",
    "tab",
    "menuitem",
    "menuitemcheckbox",
    "menuitemradio",
    "option",
    "combobox",
    "textbox",
    "searchbox",
    "slider",
    "spinbutton",
    "treeitem",
];

const NON_TEXT_INPUT_TYPES: &[&str] = &[
    "button", "checkbox", "radio", "submit", "reset", "image", "file", "range", "color",
    "hidden",
];

/// Descriptive state of an element at capture time. Never re-queried.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementSnapshot {
    pub tag: String,
    pub id: Option<String>,
    pub class_name: Option<String>,
    pub role: Option<String>,
    /// `aria-*` attributes, keyed by full attribute name.
    pub aria: BTreeMap<String, String>,
    /// Whitespace-collapsed text content, truncated.
    pub text: String,
    pub value: Option<String>,
    pub focusable: bool,
    pub interactive: bool,
    pub editable: bool,
}

impl ElementSnapshot {
    /// Snapshot the element at `node` (or the parent element of a text node).
    /// Returns `None` when the node no longer exists.
    pub fn capture(doc: &Document, node: NodeId, text_len: usize) -> Option<Self> {
        let element = doc.nearest_element(node)?;
        let tag = doc.tag(element)?.to_string();

        let aria = doc
            .attributes(element)
            .iter()
            .filter(|(k, _)| k.starts_with("aria-"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let value = match tag.as_str() {
            "input" | "textarea" | "select" => doc.attribute(element, "value").map(str::to_string),
            _ => None,
        };

        Some(Self {
            id: doc.attribute(element, "id").map(str::to_string),
            class_name: doc.attribute(element, "class").map(str::to_string),
            role: doc.attribute(element, "role").map(str::to_string),
            aria,
            text: truncate_chars(&collapse_whitespace(&doc.text_content(element)), text_len),
            value,
            focusable: is_focusable(doc, element),
            interactive: is_interactive(doc, element),
            editable: is_editable(doc, element),
            tag,
        })
    }
}

/// Natively or explicitly operable.
pub fn is_interactive(doc: &Document, node: NodeId) -> bool {
    let Some(tag) = doc.tag(node) else {
        return false;
    };
    if INTERACTIVE_TAGS.contains(&tag) {
        return true;
    }
    if tag == "a" && doc.attribute(node, "href").is_some() {
        return true;
    }
    if doc
        .attribute(node, "role")
        .is_some_and(|r| INTERACTIVE_ROLES.contains(&r))
    {
        return true;
    }
    is_editable(doc, node)
        || doc
            .attribute(node, "tabindex")
            .and_then(|t| t.trim().parse::<i32>().ok())
            .is_some_and(|t| t >= 0)
}

/// Reachable by focus at all (including `tabindex="-1"`).
pub fn is_focusable(doc: &Document, node: NodeId) -> bool {
    if doc.attribute(node, "disabled").is_some() {
        return false;
    }
    is_interactive(doc, node) || doc.attribute(node, "tabindex").is_some()
}

/// Accepts typed text, so arrow keys move a caret rather than the reader.
pub fn is_editable(doc: &Document, node: NodeId) -> bool {
    match doc.tag(node) {
        Some("textarea") => true,
        Some("input") => {
            let kind = doc.attribute(node, "type").unwrap_or("text");
            !NON_TEXT_INPUT_TYPES.contains(&kind.to_ascii_lowercase().as_str())
        }
        Some(_) => {
            matches!(doc.attribute(node, "contenteditable"), Some("" | "true"))
                || matches!(doc.attribute(node, "role"), Some("textbox" | "searchbox"))
        }
        None => false,
    }
}

pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
