//! Document model — an arena of element and text nodes.
//!
//! Nodes are addressed by `NodeId` and only ever read through the owning
//! `Document`. Captured events copy what they need into value snapshots,
//! so nothing downstream holds a live reference into the arena.

pub mod page;

use indextree::{Arena, NodeId};
use thiserror::Error;

/// Errors from structural document operations.
#[derive(Debug, Error)]
pub enum DomError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("invalid insertion: {0}")]
    InvalidInsertion(String),

    #[error("not an element: {0}")]
    NotAnElement(String),
}

pub type DomResult<T> = Result<T, DomError>;

/// What a node in the arena holds.
#[derive(Debug, Clone, Default)]
pub enum NodeKind {
    #[default]
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text {
        text: String,
    },
}

/// A single document tree.
#[derive(Debug)]
pub struct Document {
    arena: Arena<NodeKind>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document containing only the root node.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeKind::Document);
        Self { arena, root }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a detached element. Tag names are stored lowercase.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.arena.new_node(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.arena.new_node(NodeKind::Text {
            text: text.to_string(),
        })
    }

    /// Append `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DomResult<()> {
        if !self.contains(parent) {
            return Err(DomError::NodeNotFound(format!("{parent:?}")));
        }
        if matches!(self.kind(parent), Some(NodeKind::Text { .. })) {
            return Err(DomError::InvalidInsertion(
                "text nodes cannot have children".into(),
            ));
        }
        parent
            .checked_append(child, &mut self.arena)
            .map_err(|e| DomError::InvalidInsertion(e.to_string()))
    }

    /// Convenience: create an element with attributes and append it.
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> DomResult<NodeId> {
        let node = self.create_element(tag);
        for (name, value) in attrs {
            self.set_attribute(node, name, value)?;
        }
        self.append_child(parent, node)?;
        Ok(node)
    }

    /// Convenience: create a text node and append it.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> DomResult<NodeId> {
        let node = self.create_text(text);
        self.append_child(parent, node)?;
        Ok(node)
    }

    /// Remove a node and its whole subtree.
    pub fn remove(&mut self, node: NodeId) -> DomResult<()> {
        if !self.contains(node) || node == self.root {
            return Err(DomError::NodeNotFound(format!("{node:?}")));
        }
        node.remove_subtree(&mut self.arena);
        Ok(())
    }

    /// True if the id refers to a live (not removed) node of this arena.
    pub fn contains(&self, node: NodeId) -> bool {
        self.arena.get(node).map(|n| !n.is_removed()).unwrap_or(false)
    }

    pub fn kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.arena
            .get(node)
            .filter(|n| !n.is_removed())
            .map(|n| n.get())
    }

    /// Lowercase tag name, or `None` for text/document nodes.
    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.kind(node)? {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// All attributes of an element, in insertion order.
    pub fn attributes(&self, node: NodeId) -> &[(String, String)] {
        match self.kind(node) {
            Some(NodeKind::Element { attrs, .. }) => attrs,
            _ => &[],
        }
    }

    /// Set an attribute, returning the previous value.
    pub fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> DomResult<Option<String>> {
        let attrs = self.attrs_mut(node)?;
        let name = name.to_ascii_lowercase();
        match attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, v)) => Ok(Some(std::mem::replace(v, value.to_string()))),
            None => {
                attrs.push((name, value.to_string()));
                Ok(None)
            }
        }
    }

    /// Remove an attribute, returning the previous value.
    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> DomResult<Option<String>> {
        let attrs = self.attrs_mut(node)?;
        let pos = attrs.iter().position(|(k, _)| k.eq_ignore_ascii_case(name));
        Ok(pos.map(|i| attrs.remove(i).1))
    }

    fn attrs_mut(&mut self, node: NodeId) -> DomResult<&mut Vec<(String, String)>> {
        let entry = self
            .arena
            .get_mut(node)
            .filter(|n| !n.is_removed())
            .ok_or_else(|| DomError::NodeNotFound(format!("{node:?}")))?;
        match entry.get_mut() {
            NodeKind::Element { attrs, .. } => Ok(attrs),
            _ => Err(DomError::NotAnElement(format!("{node:?}"))),
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.arena.get(node)?.parent()
    }

    /// The node itself followed by its ancestors up to the root.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = if self.contains(node) { Some(node) } else { None };
        start
            .into_iter()
            .flat_map(move |n| n.ancestors(&self.arena))
    }

    /// Pre-order traversal of the subtree rooted at `node`, inclusive.
    pub fn descendants(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = if self.contains(node) { Some(node) } else { None };
        start
            .into_iter()
            .flat_map(move |n| n.descendants(&self.arena))
    }

    pub fn children(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let start = if self.contains(node) { Some(node) } else { None };
        start.into_iter().flat_map(move |n| n.children(&self.arena))
    }

    /// Concatenated text of every text node in the subtree.
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for id in self.descendants(node) {
            if let Some(NodeKind::Text { text }) = self.kind(id) {
                out.push_str(text);
            }
        }
        out
    }

    /// First element in document order with a matching `id` attribute.
    pub fn find_by_id(&self, id: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .find(|&n| self.attribute(n, "id") == Some(id))
    }

    /// The node itself if it is an element, else its parent element.
    pub fn nearest_element(&self, node: NodeId) -> Option<NodeId> {
        self.ancestors(node).find(|&n| self.tag(n).is_some())
    }

    /// Hidden by its own attributes, ignoring ancestors.
    pub fn is_hidden_self(&self, node: NodeId) -> bool {
        if self.tag(node).is_none() {
            return false;
        }
        if self.attribute(node, "hidden").is_some() {
            return true;
        }
        if self.attribute(node, "aria-hidden") == Some("true") {
            return true;
        }
        self.attribute(node, "style")
            .map(|style| {
                let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
                compact.to_ascii_lowercase().contains("display:none")
            })
            .unwrap_or(false)
    }

    /// Hidden by itself or by any ancestor.
    pub fn is_hidden(&self, node: NodeId) -> bool {
        self.ancestors(node).any(|n| self.is_hidden_self(n))
    }
}
