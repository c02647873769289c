//! Page-side capture: the conversation tracker fed by navigation and
//! mutation signals, and the DOM message extractor for platforms without a
//! usable network signal.

pub mod dom;
pub mod tracker;

pub use dom::{
    Document, DomExtractor, DomPort, DomProfile, EntryState, MutationKind, MutationRecord, NodeId,
    NodeSpec, Selector, WatchId,
};
pub use tracker::ConversationTracker;
