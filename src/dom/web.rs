//! WebDom: the live browser document
//!
//! Node handles are `web_sys::Node`s. The `MutationObserver` is created by the
//! binding (it owns the JS callback) and handed in here, so `take_records`
//! and observe/disconnect act on the same observer the page events come from.

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{Document, Element, MutationObserver, MutationObserverInit, Node};

use super::{Dom, MutationRecord, NodeKind};
use crate::error::{EngineError, Result};

fn dom_err(op: &str, err: JsValue) -> EngineError {
    EngineError::Dom(format!("{op}: {err:?}"))
}

pub struct WebDom {
    document: Document,
    observer: Option<MutationObserver>,
}

impl WebDom {
    pub fn new(document: Document) -> Self {
        Self { document, observer: None }
    }

    /// The document of the current window
    pub fn from_window() -> Result<Self> {
        let document = web_sys::window()
            .and_then(|w| w.document())
            .ok_or_else(|| EngineError::Dom("no window document".into()))?;
        Ok(Self::new(document))
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Observer whose records this DOM reports. Not observing until
    /// `observe_mutations`.
    pub fn set_observer(&mut self, observer: MutationObserver) {
        if let Some(previous) = self.observer.replace(observer) {
            previous.disconnect();
        }
    }

    fn element<'a>(&self, node: &'a Node) -> Option<&'a Element> {
        node.dyn_ref::<Element>()
    }
}

/// childList records from a `takeRecords()` array or observer callback
pub fn convert_records(records: &js_sys::Array) -> Vec<MutationRecord<Node>> {
    records
        .iter()
        .filter_map(|value| value.dyn_into::<web_sys::MutationRecord>().ok())
        .filter(|record| record.type_() == "childList")
        .filter_map(|record| {
            let target = record.target()?;
            Some(MutationRecord {
                target,
                added: node_list(&record.added_nodes()),
                removed: node_list(&record.removed_nodes()),
            })
        })
        .collect()
}

fn node_list(list: &web_sys::NodeList) -> Vec<Node> {
    (0..list.length()).filter_map(|i| list.get(i)).collect()
}

impl Dom for WebDom {
    type Node = Node;

    fn root(&self) -> Option<Node> {
        self.document.body().map(Node::from)
    }

    fn kind(&self, node: &Node) -> NodeKind {
        match node.node_type() {
            Node::ELEMENT_NODE => NodeKind::Element,
            Node::TEXT_NODE => NodeKind::Text,
            Node::DOCUMENT_NODE => NodeKind::Document,
            _ => NodeKind::Other,
        }
    }

    fn tag_name(&self, node: &Node) -> Option<String> {
        self.element(node).map(|e| e.tag_name().to_ascii_lowercase())
    }

    fn parent(&self, node: &Node) -> Option<Node> {
        node.parent_node()
    }

    fn children(&self, node: &Node) -> Vec<Node> {
        node_list(&node.child_nodes())
    }

    fn text(&self, node: &Node) -> Option<String> {
        if node.node_type() == Node::TEXT_NODE {
            node.node_value()
        } else {
            None
        }
    }

    fn attribute(&self, node: &Node, name: &str) -> Option<String> {
        self.element(node).and_then(|e| e.get_attribute(name))
    }

    fn has_attribute(&self, node: &Node, name: &str) -> bool {
        self.element(node).is_some_and(|e| e.has_attribute(name))
    }

    fn is_connected(&self, node: &Node) -> bool {
        node.is_connected()
    }

    fn create_text(&mut self, data: &str) -> Result<Node> {
        Ok(self.document.create_text_node(data).into())
    }

    fn create_element(&mut self, tag: &str) -> Result<Node> {
        self.document
            .create_element(tag)
            .map(Node::from)
            .map_err(|e| dom_err("createElement", e))
    }

    fn set_attribute(&mut self, node: &Node, name: &str, value: &str) -> Result<()> {
        let element = self
            .element(node)
            .ok_or_else(|| EngineError::Dom("setAttribute on non-element".into()))?;
        element.set_attribute(name, value).map_err(|e| dom_err("setAttribute", e))
    }

    fn set_text(&mut self, node: &Node, data: &str) -> Result<()> {
        node.set_node_value(Some(data));
        Ok(())
    }

    fn append_child(&mut self, parent: &Node, child: &Node) -> Result<()> {
        parent.append_child(child).map(|_| ()).map_err(|e| dom_err("appendChild", e))
    }

    fn insert_before(&mut self, parent: &Node, child: &Node, reference: &Node) -> Result<()> {
        parent
            .insert_before(child, Some(reference))
            .map(|_| ())
            .map_err(|e| dom_err("insertBefore", e))
    }

    fn remove(&mut self, node: &Node) -> Result<()> {
        match node.parent_node() {
            Some(parent) => parent.remove_child(node).map(|_| ()).map_err(|e| dom_err("removeChild", e)),
            None => Ok(()),
        }
    }

    fn normalize(&mut self, node: &Node) -> Result<()> {
        node.normalize();
        Ok(())
    }

    fn observe_mutations(&mut self) -> Result<()> {
        let observer = self
            .observer
            .as_ref()
            .ok_or_else(|| EngineError::Dom("no mutation observer installed".into()))?;
        let init = MutationObserverInit::new();
        init.set_child_list(true);
        init.set_subtree(true);
        observer
            .observe_with_options(&self.document, &init)
            .map_err(|e| dom_err("observe", e))
    }

    fn disconnect_observer(&mut self) {
        if let Some(observer) = self.observer.as_ref() {
            observer.disconnect();
        }
    }

    fn take_records(&mut self) -> Vec<MutationRecord<Node>> {
        match self.observer.as_ref() {
            Some(observer) => convert_records(&observer.take_records()),
            None => Vec::new(),
        }
    }
}
