//! DOM seam
//!
//! The engine reads and rewrites the page only through `Dom`. `ArenaDom` is an
//! in-memory tree used natively and in tests; `WebDom` drives the live browser
//! document on wasm32.

pub mod arena;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use arena::*;
#[cfg(target_arch = "wasm32")]
pub use web::*;

use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Document,
    Element,
    Text,
    Other,
}

/// One childList mutation, as delivered by a mutation observer
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord<N> {
    pub target: N,
    pub added: Vec<N>,
    pub removed: Vec<N>,
}

pub trait Dom {
    type Node: Clone + PartialEq + fmt::Debug;

    /// The document body, where annotation starts
    fn root(&self) -> Option<Self::Node>;

    fn kind(&self, node: &Self::Node) -> NodeKind;

    /// Lower-case tag name for elements
    fn tag_name(&self, node: &Self::Node) -> Option<String>;

    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;

    fn children(&self, node: &Self::Node) -> Vec<Self::Node>;

    /// Character data of a text node
    fn text(&self, node: &Self::Node) -> Option<String>;

    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;

    fn has_attribute(&self, node: &Self::Node, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    /// Still attached to the document
    fn is_connected(&self, node: &Self::Node) -> bool;

    fn create_text(&mut self, data: &str) -> Result<Self::Node>;

    fn create_element(&mut self, tag: &str) -> Result<Self::Node>;

    fn set_attribute(&mut self, node: &Self::Node, name: &str, value: &str) -> Result<()>;

    /// Replace the data of a text node
    fn set_text(&mut self, node: &Self::Node, data: &str) -> Result<()>;

    fn append_child(&mut self, parent: &Self::Node, child: &Self::Node) -> Result<()>;

    fn insert_before(&mut self, parent: &Self::Node, child: &Self::Node, reference: &Self::Node) -> Result<()>;

    /// Detach from the parent; a no-op for parentless nodes
    fn remove(&mut self, node: &Self::Node) -> Result<()>;

    /// Merge adjacent text nodes and drop empty ones under `node`
    fn normalize(&mut self, node: &Self::Node) -> Result<()>;

    /// Start delivering childList records for the whole document
    fn observe_mutations(&mut self) -> Result<()>;

    /// Stop observing and drop anything pending
    fn disconnect_observer(&mut self);

    /// Drain pending childList records (`MutationObserver.takeRecords`)
    fn take_records(&mut self) -> Vec<MutationRecord<Self::Node>>;

    fn text_content(&self, node: &Self::Node) -> String {
        let mut out = String::new();
        let mut stack = vec![node.clone()];
        while let Some(current) = stack.pop() {
            if self.kind(&current) == NodeKind::Text {
                if let Some(data) = self.text(&current) {
                    out.push_str(&data);
                }
                continue;
            }
            let mut children = self.children(&current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Descendants (not `root` itself) carrying `name`, in document order
    fn descendants_with_attribute(&self, root: &Self::Node, name: &str) -> Vec<Self::Node> {
        let mut found = Vec::new();
        let mut stack = self.children(root);
        stack.reverse();
        while let Some(current) = stack.pop() {
            if self.kind(&current) != NodeKind::Element {
                continue;
            }
            if self.has_attribute(&current, name) {
                found.push(current.clone());
            }
            let mut children = self.children(&current);
            children.reverse();
            stack.extend(children);
        }
        found
    }

    /// Short human description for logs
    fn describe(&self, node: &Self::Node) -> String {
        match self.kind(node) {
            NodeKind::Text => {
                let data = self.text(node).unwrap_or_default();
                let head: String = data.chars().take(24).collect();
                format!("#text {head:?}")
            }
            NodeKind::Element => format!("<{}>", self.tag_name(node).unwrap_or_default()),
            NodeKind::Document => "#document".to_string(),
            NodeKind::Other => "#node".to_string(),
        }
    }
}
