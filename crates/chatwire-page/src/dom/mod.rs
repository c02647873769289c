//! DOM access for page-content extraction.
//!
//! The live content tree is reached only through [`DomPort`]. It exposes a
//! handful of primitives (parent, children, tag, attribute, text) and the
//! observer hooks; querying by selector is built on top of those.

pub mod extractor;
pub mod profile;
pub mod selector;
pub mod tree;

use chatwire_core::Result;

pub use extractor::{DomExtractor, EntryState};
pub use profile::DomProfile;
pub use selector::Selector;
pub use tree::{Document, NodeSpec};

/// Handle to a node of the content tree.
pub type NodeId = usize;

/// Handle to a per-subtree watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    CharacterData,
    Attribute(String),
}

/// One observed change. A batch is a `Vec` of these delivered together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

/// The host's content tree.
pub trait DomPort {
    fn root(&self) -> NodeId;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    fn children(&self, node: NodeId) -> Vec<NodeId>;

    /// Lowercase tag name; `None` for text nodes.
    fn tag_name(&self, node: NodeId) -> Option<String>;

    fn attribute(&self, node: NodeId, name: &str) -> Option<String>;

    /// Concatenated text of the node and its descendants.
    fn text_content(&self, node: NodeId) -> String;

    /// Attach the page-wide observer. Failure leaves page capture inactive.
    fn observe_root(&self) -> Result<()>;

    /// Watch one subtree for changes.
    fn watch(&self, node: NodeId) -> Result<WatchId>;

    fn unwatch(&self, watch: WatchId);

    fn is_element(&self, node: NodeId) -> bool {
        self.tag_name(node).is_some()
    }

    /// Inclusive ancestry test.
    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(n) = cursor {
            if n == ancestor {
                return true;
            }
            cursor = self.parent(n);
        }
        false
    }

    /// Whether `node` is the subject of `selector`.
    fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        let chain = selector.chain();
        let Some((subject, ancestors)) = chain.split_last() else {
            return false;
        };
        if !compound_matches(self, node, subject) {
            return false;
        }
        // Right to left: each remaining compound must match some ancestor,
        // farther up than the previous one.
        let mut cursor = self.parent(node);
        for compound in ancestors.iter().rev() {
            loop {
                let Some(n) = cursor else {
                    return false;
                };
                cursor = self.parent(n);
                if compound_matches(self, n, compound) {
                    break;
                }
            }
        }
        true
    }

    /// Descendants of `scope` (excluding `scope`) matching `selector`, in
    /// document order.
    fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack: Vec<NodeId> = self.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if self.is_element(node) {
                if self.matches(node, selector) {
                    found.push(node);
                }
                stack.extend(self.children(node).into_iter().rev());
            }
        }
        found
    }

    fn query(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.query_all(scope, selector).into_iter().next()
    }

    fn exists(&self, selector: &Selector) -> bool {
        self.query(self.root(), selector).is_some()
    }
}

fn compound_matches<D: DomPort + ?Sized>(dom: &D, node: NodeId, compound: &selector::Compound) -> bool {
    let Some(tag) = dom.tag_name(node) else {
        return false;
    };
    compound.matches(&tag, |name| dom.attribute(node, name))
}
