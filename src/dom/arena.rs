//! ArenaDom: in-memory document tree
//!
//! Nodes live in a flat arena and are addressed by `NodeId`. While observing,
//! every childList change (from the builder helpers or from `Dom` writes) is
//! recorded, which is how tests play the part of the page and of the
//! browser's mutation observer at the same time.

use super::{Dom, MutationRecord, NodeKind};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Element { tag: String, attributes: Vec<(String, String)> },
    Text(String),
}

#[derive(Debug, Clone)]
struct Slot {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ArenaDom {
    slots: Vec<Slot>,
    document: NodeId,
    body: NodeId,
    observing: bool,
    records: Vec<MutationRecord<NodeId>>,
}

impl Default for ArenaDom {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaDom {
    /// A document with an empty `<body>`
    pub fn new() -> Self {
        let mut dom = Self {
            slots: Vec::new(),
            document: NodeId(0),
            body: NodeId(0),
            observing: false,
            records: Vec::new(),
        };
        let document = dom.alloc(NodeData::Document);
        let body = dom.alloc(NodeData::Element { tag: "body".into(), attributes: Vec::new() });
        dom.link(document, body, None);
        dom.document = document;
        dom.body = body;
        dom
    }

    pub fn document(&self) -> NodeId {
        self.document
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    /// Start recording childList mutations
    pub fn observe(&mut self) {
        self.observing = true;
    }

    /// Stop recording and drop anything pending
    pub fn disconnect(&mut self) {
        self.observing = false;
        self.records.clear();
    }

    pub fn pending_records(&self) -> usize {
        self.records.len()
    }

    /// Append a new element, as the page would
    pub fn append_element(&mut self, parent: NodeId, tag: &str) -> NodeId {
        let node = self.alloc(NodeData::Element { tag: tag.to_ascii_lowercase(), attributes: Vec::new() });
        self.attach(parent, node, None);
        node
    }

    /// Append a new text node, as the page would
    pub fn append_text(&mut self, parent: NodeId, data: &str) -> NodeId {
        let node = self.alloc(NodeData::Text(data.to_string()));
        self.attach(parent, node, None);
        node
    }

    /// Element with a single text child, appended to `parent`
    pub fn append_element_with_text(&mut self, parent: NodeId, tag: &str, data: &str) -> NodeId {
        let node = self.append_element(parent, tag);
        self.append_text(node, data);
        node
    }

    /// Set an attribute without going through the fallible trait method
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        if let NodeData::Element { attributes, .. } = &mut self.slots[node.0].data {
            match attributes.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => attributes.push((name.to_string(), value.to_string())),
            }
        }
    }

    /// Detach a subtree, as the page would
    pub fn detach(&mut self, node: NodeId) {
        self.unlink(node);
    }

    /// Markup dump for assertions: `<p data-x="1">text</p>`
    pub fn render(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.render_into(node, &mut out);
        out
    }

    fn render_into(&self, node: NodeId, out: &mut String) {
        let slot = &self.slots[node.0];
        match &slot.data {
            NodeData::Text(data) => out.push_str(data),
            NodeData::Document => {
                for child in &slot.children {
                    self.render_into(*child, out);
                }
            }
            NodeData::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push_str(&format!(" {name}=\"{value}\""));
                }
                out.push('>');
                for child in &slot.children {
                    self.render_into(*child, out);
                }
                out.push_str(&format!("</{tag}>"));
            }
        }
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.slots.len());
        self.slots.push(Slot { data, parent: None, children: Vec::new() });
        id
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if node.0 < self.slots.len() {
            Ok(())
        } else {
            Err(EngineError::Dom(format!("unknown node {}", node.0)))
        }
    }

    fn link(&mut self, parent: NodeId, child: NodeId, position: Option<usize>) {
        self.slots[child.0].parent = Some(parent);
        let children = &mut self.slots[parent.0].children;
        match position {
            Some(index) => children.insert(index, child),
            None => children.push(child),
        }
    }

    /// Move `child` under `parent`, recording both halves of the move
    fn attach(&mut self, parent: NodeId, child: NodeId, position: Option<usize>) {
        self.unlink(child);
        self.link(parent, child, position);
        self.record(parent, vec![child], Vec::new());
    }

    fn unlink(&mut self, node: NodeId) {
        if let Some(parent) = self.slots[node.0].parent.take() {
            self.slots[parent.0].children.retain(|c| *c != node);
            self.record(parent, Vec::new(), vec![node]);
        }
    }

    fn record(&mut self, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        if self.observing {
            self.records.push(MutationRecord { target, added, removed });
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.slots[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }
}

impl Dom for ArenaDom {
    type Node = NodeId;

    fn root(&self) -> Option<NodeId> {
        Some(self.body)
    }

    fn kind(&self, node: &NodeId) -> NodeKind {
        match self.slots.get(node.0).map(|s| &s.data) {
            Some(NodeData::Document) => NodeKind::Document,
            Some(NodeData::Element { .. }) => NodeKind::Element,
            Some(NodeData::Text(_)) => NodeKind::Text,
            None => NodeKind::Other,
        }
    }

    fn tag_name(&self, node: &NodeId) -> Option<String> {
        match self.slots.get(node.0).map(|s| &s.data) {
            Some(NodeData::Element { tag, .. }) => Some(tag.clone()),
            _ => None,
        }
    }

    fn parent(&self, node: &NodeId) -> Option<NodeId> {
        self.slots.get(node.0).and_then(|s| s.parent)
    }

    fn children(&self, node: &NodeId) -> Vec<NodeId> {
        self.slots.get(node.0).map(|s| s.children.clone()).unwrap_or_default()
    }

    fn text(&self, node: &NodeId) -> Option<String> {
        match self.slots.get(node.0).map(|s| &s.data) {
            Some(NodeData::Text(data)) => Some(data.clone()),
            _ => None,
        }
    }

    fn attribute(&self, node: &NodeId, name: &str) -> Option<String> {
        match self.slots.get(node.0).map(|s| &s.data) {
            Some(NodeData::Element { attributes, .. }) => attributes
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        node.0 < self.slots.len() && self.is_ancestor_or_self(self.document, *node)
    }

    fn create_text(&mut self, data: &str) -> Result<NodeId> {
        Ok(self.alloc(NodeData::Text(data.to_string())))
    }

    fn create_element(&mut self, tag: &str) -> Result<NodeId> {
        Ok(self.alloc(NodeData::Element { tag: tag.to_ascii_lowercase(), attributes: Vec::new() }))
    }

    fn set_attribute(&mut self, node: &NodeId, name: &str, value: &str) -> Result<()> {
        self.check(*node)?;
        if self.kind(node) != NodeKind::Element {
            return Err(EngineError::Dom(format!("set_attribute on non-element {}", node.0)));
        }
        self.set_attr(*node, name, value);
        Ok(())
    }

    fn set_text(&mut self, node: &NodeId, data: &str) -> Result<()> {
        self.check(*node)?;
        match &mut self.slots[node.0].data {
            NodeData::Text(current) => {
                *current = data.to_string();
                Ok(())
            }
            _ => Err(EngineError::Dom(format!("set_text on non-text {}", node.0))),
        }
    }

    fn append_child(&mut self, parent: &NodeId, child: &NodeId) -> Result<()> {
        self.check(*parent)?;
        self.check(*child)?;
        if self.is_ancestor_or_self(*child, *parent) {
            return Err(EngineError::Dom("cannot append a node into itself".into()));
        }
        self.attach(*parent, *child, None);
        Ok(())
    }

    fn insert_before(&mut self, parent: &NodeId, child: &NodeId, reference: &NodeId) -> Result<()> {
        self.check(*parent)?;
        self.check(*child)?;
        if self.parent(reference) != Some(*parent) {
            return Err(EngineError::Dom(format!("node {} is not a child of {}", reference.0, parent.0)));
        }
        if self.is_ancestor_or_self(*child, *parent) {
            return Err(EngineError::Dom("cannot insert a node into itself".into()));
        }
        self.unlink(*child);
        let position = self.slots[parent.0].children.iter().position(|c| c == reference);
        self.link(*parent, *child, position);
        self.record(*parent, vec![*child], Vec::new());
        Ok(())
    }

    fn remove(&mut self, node: &NodeId) -> Result<()> {
        self.check(*node)?;
        self.unlink(*node);
        Ok(())
    }

    fn normalize(&mut self, node: &NodeId) -> Result<()> {
        self.check(*node)?;
        let mut stack = vec![*node];
        while let Some(current) = stack.pop() {
            let children = self.slots[current.0].children.clone();
            let mut kept: Vec<NodeId> = Vec::with_capacity(children.len());
            let mut dropped: Vec<NodeId> = Vec::new();
            for child in children {
                let merge_into = match (&self.slots[child.0].data, kept.last()) {
                    (NodeData::Text(data), _) if data.is_empty() => {
                        dropped.push(child);
                        continue;
                    }
                    (NodeData::Text(_), Some(prev)) if matches!(self.slots[prev.0].data, NodeData::Text(_)) => Some(*prev),
                    _ => None,
                };
                match merge_into {
                    Some(prev) => {
                        let data = self.text(&child).unwrap_or_default();
                        if let NodeData::Text(existing) = &mut self.slots[prev.0].data {
                            existing.push_str(&data);
                        }
                        dropped.push(child);
                    }
                    None => {
                        if self.kind(&child) == NodeKind::Element {
                            stack.push(child);
                        }
                        kept.push(child);
                    }
                }
            }
            if !dropped.is_empty() {
                for child in &dropped {
                    self.slots[child.0].parent = None;
                }
                self.slots[current.0].children = kept;
                self.record(current, Vec::new(), dropped);
            }
        }
        Ok(())
    }

    fn observe_mutations(&mut self) -> Result<()> {
        self.observe();
        Ok(())
    }

    fn disconnect_observer(&mut self) {
        self.disconnect();
    }

    fn take_records(&mut self) -> Vec<MutationRecord<NodeId>> {
        std::mem::take(&mut self.records)
    }
}
