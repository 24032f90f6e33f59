//! Scripted page scenarios.
//!
//! A scenario is a YAML file describing a starting page and a list of
//! steps (user input, DOM mutations, navigation, inspector open/close)
//! that `ScenarioRunner` replays against a `Runtime`.
//!
//! ```yaml
//! url: https://example.com/
//! document:
//!   - tag: button
//!     attrs: { id: menu, aria-expanded: "false" }
//!     text: Menu
//! steps:
//!   - action: ready
//!   - action: key
//!     key: Tab
//!   - action: focus
//!     id: menu
//!   - action: set-attribute
//!     id: menu
//!     name: aria-expanded
//!     value: "true"
//! ```

pub mod runner;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indextree::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dom::page::Modifiers;
use crate::dom::{DomError, Document};
use crate::relay::TabId;
use crate::runtime::RuntimeError;

pub use runner::ScenarioRunner;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("no element with id {0:?}")]
    NoSuchElement(String),

    #[error("dom: {0}")]
    Dom(#[from] DomError),

    #[error("runtime: {0}")]
    Runtime(#[from] RuntimeError),
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// One node of a scenario document. With a `tag` it is an element whose
/// `text` (if any) becomes its first child; without one it is a text node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSpec {
    pub tag: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub text: Option<String>,
    pub children: Vec<NodeSpec>,
}

impl NodeSpec {
    /// Build this node (detached) inside `doc`.
    pub fn build(&self, doc: &mut Document) -> ScenarioResult<NodeId> {
        let Some(tag) = &self.tag else {
            let text = self.text.as_deref().ok_or_else(|| {
                ScenarioError::InvalidNode("a node needs a tag or text".into())
            })?;
            if !self.attrs.is_empty() || !self.children.is_empty() {
                return Err(ScenarioError::InvalidNode(format!(
                    "text node {text:?} cannot carry attributes or children"
                )));
            }
            return Ok(doc.create_text(text));
        };
        let element = doc.create_element(tag);
        for (name, value) in &self.attrs {
            doc.set_attribute(element, name, value)?;
        }
        if let Some(text) = &self.text {
            let node = doc.create_text(text);
            doc.append_child(element, node)?;
        }
        for child in &self.children {
            let node = child.build(doc)?;
            doc.append_child(element, node)?;
        }
        Ok(element)
    }
}

/// Build a document whose root holds `nodes` in order.
pub fn build_document(nodes: &[NodeSpec]) -> ScenarioResult<Document> {
    let mut doc = Document::new();
    let root = doc.root();
    for spec in nodes {
        let node = spec.build(&mut doc)?;
        doc.append_child(root, node)?;
    }
    Ok(doc)
}

/// A scenario step. Elements are addressed by their `id` attribute;
/// a missing `parent` means the document root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Step {
    Focus {
        id: String,
    },
    Blur,
    Key {
        key: String,
        #[serde(default)]
        modifiers: Modifiers,
    },
    SetAttribute {
        id: String,
        name: String,
        value: String,
    },
    RemoveAttribute {
        id: String,
        name: String,
    },
    Insert {
        #[serde(default)]
        parent: Option<String>,
        node: NodeSpec,
    },
    InsertText {
        #[serde(default)]
        parent: Option<String>,
        text: String,
    },
    Remove {
        id: String,
    },
    /// Full load when `document` is given, history navigation otherwise.
    Navigate {
        url: String,
        #[serde(default)]
        document: Option<Vec<NodeSpec>>,
    },
    /// Open the inspector.
    Ready,
    /// Close the inspector.
    Close,
    /// Inspector-initiated capture reinit.
    Reinitialize,
    /// The page drops every watcher registration.
    Detach,
    Wait {
        ms: u64,
    },
}

fn default_tab() -> TabId {
    TabId(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub url: String,
    #[serde(default = "default_tab")]
    pub tab: TabId,
    #[serde(default)]
    pub document: Vec<NodeSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> ScenarioResult<Self> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn from_yaml(yaml: &str) -> ScenarioResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }
}
