//! In-memory content tree implementing [`DomPort`].
//!
//! Every structural change is recorded; [`Document::take_records`] hands the
//! accumulated batch to whoever plays the page observer.

use std::collections::{BTreeMap, HashSet};

use chatwire_core::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{DomPort, MutationKind, MutationRecord, NodeId, Selector, WatchId};

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: BTreeMap<String, String>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Declarative subtree, used to build pages in tests and replay scenarios.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Text child appended before `children`.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
}

fn default_tag() -> String {
    "div".to_string()
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Self::default()
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }
}

#[derive(Debug, Default)]
struct Observers {
    root_attached: bool,
    next_watch: u64,
    watches: BTreeMap<u64, NodeId>,
}

/// A mutable document with a `body` root.
#[derive(Debug)]
pub struct Document {
    nodes: Vec<Node>,
    records: Vec<MutationRecord>,
    observers: Mutex<Observers>,
    refuse_observers: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element {
                    tag: "body".to_string(),
                    attrs: BTreeMap::new(),
                },
                parent: None,
                children: Vec::new(),
            }],
            records: Vec::new(),
            observers: Mutex::new(Observers::default()),
            refuse_observers: false,
        }
    }

    /// Make every observer attach fail, as a hostile or torn-down page would.
    pub fn refuse_observers(&mut self) {
        self.refuse_observers = true;
    }

    // ---------------------------------------------------------------
    // Building
    // ---------------------------------------------------------------

    /// Create a detached subtree from `spec`. Not recorded until attached.
    pub fn build(&mut self, spec: &NodeSpec) -> NodeId {
        let id = self.alloc(NodeKind::Element {
            tag: spec.tag.to_ascii_lowercase(),
            attrs: spec.attrs.clone(),
        });
        if let Some(text) = &spec.text {
            let t = self.alloc(NodeKind::Text(text.clone()));
            self.link(id, t);
        }
        for child in &spec.children {
            let c = self.build(child);
            self.link(id, c);
        }
        id
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    /// Attach `child` as the last child of `parent`.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        self.check(parent)?;
        self.check(child)?;
        if self.contains(child, parent) {
            return Err(Error::Internal(format!(
                "node {} cannot be appended inside itself",
                child
            )));
        }
        if let Some(old) = self.nodes[child].parent {
            self.detach(old, child);
        }
        self.link(parent, child);
        self.record(MutationKind::ChildList, parent, vec![child], Vec::new());
        Ok(())
    }

    /// Build `spec` and append it under `parent` in one recorded change.
    pub fn insert(&mut self, parent: NodeId, spec: &NodeSpec) -> Result<NodeId> {
        let id = self.build(spec);
        self.append_child(parent, id)?;
        Ok(id)
    }

    pub fn remove(&mut self, node: NodeId) -> Result<()> {
        self.check(node)?;
        let Some(parent) = self.nodes[node].parent else {
            return Ok(());
        };
        self.detach(parent, node);
        self.record(MutationKind::ChildList, parent, Vec::new(), vec![node]);
        Ok(())
    }

    /// Replace the text of `node`: the data of a text node, or all children
    /// of an element with a single text node.
    pub fn set_text(&mut self, node: NodeId, text: &str) -> Result<()> {
        self.check(node)?;
        if let NodeKind::Text(data) = &mut self.nodes[node].kind {
            *data = text.to_string();
            self.record(MutationKind::CharacterData, node, Vec::new(), Vec::new());
            return Ok(());
        }
        let removed = std::mem::take(&mut self.nodes[node].children);
        for child in &removed {
            self.nodes[*child].parent = None;
        }
        let t = self.alloc(NodeKind::Text(text.to_string()));
        self.link(node, t);
        self.record(MutationKind::ChildList, node, vec![t], removed);
        Ok(())
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        self.check(node)?;
        match &mut self.nodes[node].kind {
            NodeKind::Element { attrs, .. } => {
                attrs.insert(name.to_string(), value.to_string());
            }
            NodeKind::Text(_) => {
                return Err(Error::Internal(format!("node {} is a text node", node)))
            }
        }
        self.record(
            MutationKind::Attribute(name.to_string()),
            node,
            Vec::new(),
            Vec::new(),
        );
        Ok(())
    }

    // ---------------------------------------------------------------
    // Observation
    // ---------------------------------------------------------------

    /// Drain the pending mutation batch.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn is_observed(&self) -> bool {
        self.observers.lock().root_attached
    }

    /// Subtrees currently watched.
    pub fn watched(&self) -> Vec<NodeId> {
        self.observers.lock().watches.values().copied().collect()
    }

    pub fn watch_count(&self) -> usize {
        self.observers.lock().watches.len()
    }

    /// First element in the whole document matching `selector`.
    pub fn find(&self, selector: &str) -> Result<Option<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self.query(self.root(), &sel))
    }

    pub fn find_all(&self, selector: &str) -> Result<Vec<NodeId>> {
        let sel = Selector::parse(selector)?;
        Ok(self.query_all(self.root(), &sel))
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn link(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child].parent = Some(parent);
        self.nodes[parent].children.push(child);
    }

    fn detach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent].children.retain(|c| *c != child);
        self.nodes[child].parent = None;
    }

    fn check(&self, node: NodeId) -> Result<()> {
        if node < self.nodes.len() {
            Ok(())
        } else {
            Err(Error::Internal(format!("no such node {}", node)))
        }
    }

    fn record(&mut self, kind: MutationKind, target: NodeId, added: Vec<NodeId>, removed: Vec<NodeId>) {
        // Changes to detached subtrees are invisible to the page observer.
        if !self.contains(self.root(), target) {
            return;
        }
        self.records.push(MutationRecord {
            kind,
            target,
            added,
            removed,
        });
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node].kind {
            NodeKind::Text(t) => out.push_str(t),
            NodeKind::Element { .. } => {
                for child in &self.nodes[node].children {
                    self.collect_text(*child, out);
                }
            }
        }
    }
}

impl DomPort for Document {
    fn root(&self) -> NodeId {
        0
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|n| n.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    fn tag_name(&self, node: NodeId) -> Option<String> {
        match &self.nodes.get(node)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.nodes.get(node)?.kind {
            NodeKind::Element { attrs, .. } => attrs.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        if node < self.nodes.len() {
            self.collect_text(node, &mut out);
        }
        out
    }

    fn observe_root(&self) -> Result<()> {
        if self.refuse_observers {
            return Err(Error::ObserverSetup("document refused root observer".into()));
        }
        self.observers.lock().root_attached = true;
        Ok(())
    }

    fn watch(&self, node: NodeId) -> Result<WatchId> {
        if self.refuse_observers {
            return Err(Error::ObserverSetup(format!("cannot watch node {}", node)));
        }
        self.check(node)?;
        let mut obs = self.observers.lock();
        obs.next_watch += 1;
        let id = obs.next_watch;
        obs.watches.insert(id, node);
        Ok(WatchId(id))
    }

    fn unwatch(&self, watch: WatchId) {
        self.observers.lock().watches.remove(&watch.0);
    }
}

/// Nodes in `records` that were added, flattened and de-duplicated.
pub fn added_nodes(records: &[MutationRecord]) -> Vec<NodeId> {
    let mut seen = HashSet::new();
    records
        .iter()
        .flat_map(|r| r.added.iter().copied())
        .filter(|n| seen.insert(*n))
        .collect()
}
