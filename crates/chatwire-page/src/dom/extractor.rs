//! DOM message extractor.
//!
//! An explicit state machine keyed by message id. Containers are found by an
//! initial scan and in every added subtree. User messages are read at once;
//! assistant messages wait until the page stops generating, with their
//! container watched and retried on each change batch.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chatwire_core::events::{
    AbandonSource, CaptureAbandonedEvent, MessageExtractedEvent,
};
use chatwire_core::{
    now_millis, CanonicalEvent, CaptureConfig, Dispatcher, Message, ProcessedIds, Role,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::tree::added_nodes;
use super::{DomPort, DomProfile, MutationRecord, NodeId, WatchId};
use crate::tracker::ConversationTracker;

/// Lifecycle of one message container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Found but no text yet.
    Seen,
    /// Assistant message still generating.
    WaitingForCompletion,
    Processed,
    /// Timed out before it could be read.
    Abandoned,
}

impl EntryState {
    fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Processed | EntryState::Abandoned)
    }
}

#[derive(Debug)]
struct Entry {
    id: String,
    role: Role,
    container: NodeId,
    state: EntryState,
    watch: Option<WatchId>,
    since: Instant,
}

#[derive(Debug, Default)]
struct State {
    active: bool,
    indicator_present: bool,
    entries: HashMap<String, Entry>,
    /// Ids not yet Processed or Abandoned, in discovery order.
    pending: Vec<String>,
}

impl State {
    fn insert(&mut self, entry: Entry) {
        if !entry.state.is_terminal() {
            self.pending.push(entry.id.clone());
        }
        self.entries.insert(entry.id.clone(), entry);
    }

    fn settle(&mut self, id: &str) {
        self.pending.retain(|p| p != id);
    }
}

/// Reads messages out of a platform's rendered conversation.
pub struct DomExtractor {
    profile: DomProfile,
    dispatcher: Dispatcher,
    processed: ProcessedIds,
    tracker: ConversationTracker,
    timeout: Option<Duration>,
    state: Mutex<State>,
}

impl DomExtractor {
    pub fn new(
        profile: DomProfile,
        dispatcher: Dispatcher,
        processed: ProcessedIds,
        tracker: ConversationTracker,
        config: &CaptureConfig,
    ) -> Self {
        let timeout = config.extraction_timeout();
        Self {
            profile,
            dispatcher,
            processed,
            tracker,
            timeout: (!timeout.is_zero()).then_some(timeout),
            state: Mutex::new(State::default()),
        }
    }

    pub fn profile(&self) -> &DomProfile {
        &self.profile
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn state_of(&self, id: &str) -> Option<EntryState> {
        self.state.lock().entries.get(id).map(|e| e.state)
    }

    pub fn waiting_count(&self) -> usize {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .filter_map(|id| state.entries.get(id))
            .filter(|e| e.state == EntryState::WaitingForCompletion)
            .count()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Attach the page observer and scan what is already rendered.
    ///
    /// Returns false when the observer cannot be attached; the extractor then
    /// stays inactive and ignores every batch.
    pub fn start<D: DomPort + ?Sized>(&self, dom: &D) -> bool {
        if let Err(e) = dom.observe_root() {
            warn!("{} DOM capture disabled: {}", self.profile.platform, e);
            return false;
        }
        let mut out = Vec::new();
        {
            let mut state = self.state.lock();
            state.active = true;
            state.indicator_present = dom.exists(&self.profile.generation_indicator);
            let now = Instant::now();
            for node in dom.query_all(dom.root(), &self.profile.container) {
                self.discover(dom, &mut state, node, now, &mut out);
            }
            info!(
                "{} DOM capture started, {} messages on page",
                self.profile.platform,
                state.entries.len()
            );
        }
        self.flush(out);
        true
    }

    /// Tear down every watch and forget all entries.
    pub fn stop<D: DomPort + ?Sized>(&self, dom: &D) {
        let mut state = self.state.lock();
        for (_, entry) in state.entries.drain() {
            if let Some(w) = entry.watch {
                dom.unwatch(w);
            }
        }
        state.pending.clear();
        state.active = false;
    }

    // ---------------------------------------------------------------
    // Change batches
    // ---------------------------------------------------------------

    pub fn on_mutations<D: DomPort + ?Sized>(&self, dom: &D, records: &[MutationRecord]) {
        self.on_mutations_at(dom, records, Instant::now());
    }

    /// Process one change batch as of `now`.
    pub fn on_mutations_at<D: DomPort + ?Sized>(
        &self,
        dom: &D,
        records: &[MutationRecord],
        now: Instant,
    ) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock();
            if !state.active {
                return;
            }
            let root = dom.root();

            for node in added_nodes(records) {
                if !dom.is_element(node) || !dom.contains(root, node) {
                    continue;
                }
                if dom.matches(node, &self.profile.container) {
                    self.discover(dom, &mut state, node, now, &mut out);
                }
                for inner in dom.query_all(node, &self.profile.container) {
                    self.discover(dom, &mut state, inner, now, &mut out);
                }
            }

            let indicator = dom.exists(&self.profile.generation_indicator);
            let flipped = indicator != state.indicator_present;
            state.indicator_present = indicator;

            let retry: Vec<String> = state
                .pending
                .iter()
                .filter_map(|id| state.entries.get(id))
                .filter(|e| flipped || records.iter().any(|r| dom.contains(e.container, r.target)))
                .map(|e| e.id.clone())
                .collect();
            for id in retry {
                self.attempt(dom, &mut state, &id, &mut out);
            }

            self.sweep(dom, &mut state, now, &mut out);
        }
        self.flush(out);
    }

    /// Abandon every pending entry older than the extraction timeout.
    pub fn sweep_abandoned_at<D: DomPort + ?Sized>(&self, dom: &D, now: Instant) {
        let mut out = Vec::new();
        {
            let mut state = self.state.lock();
            self.sweep(dom, &mut state, now, &mut out);
        }
        self.flush(out);
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    fn discover<D: DomPort + ?Sized>(
        &self,
        dom: &D,
        state: &mut State,
        node: NodeId,
        now: Instant,
        out: &mut Vec<CanonicalEvent>,
    ) {
        let Some(marker) = dom.attribute(node, &self.profile.marker_attribute) else {
            return;
        };
        let Some((role, id)) = self.profile.identify(&marker) else {
            return;
        };

        if let Some(entry) = state.entries.get_mut(&id) {
            if entry.state.is_terminal() || entry.container == node {
                return;
            }
            // Re-rendered container for a pending message.
            if let Some(w) = entry.watch.take() {
                dom.unwatch(w);
            }
            entry.container = node;
        } else {
            if self.processed.contains(&id) {
                debug!("Message {} already processed", id);
                state.insert(Entry {
                    id,
                    role,
                    container: node,
                    state: EntryState::Processed,
                    watch: None,
                    since: now,
                });
                return;
            }
            state.insert(Entry {
                id: id.clone(),
                role,
                container: node,
                state: EntryState::Seen,
                watch: None,
                since: now,
            });
        }

        self.attempt(dom, state, &id, out);

        let Some(entry) = state.entries.get_mut(&id) else {
            return;
        };
        if entry.role == Role::Assistant && !entry.state.is_terminal() {
            entry.state = EntryState::WaitingForCompletion;
            if entry.watch.is_none() {
                match dom.watch(entry.container) {
                    Ok(w) => entry.watch = Some(w),
                    Err(e) => warn!("Cannot watch message {}: {}", entry.id, e),
                }
            }
        }
    }

    /// Try to read the entry's text; emit and settle it when complete.
    fn attempt<D: DomPort + ?Sized>(
        &self,
        dom: &D,
        state: &mut State,
        id: &str,
        out: &mut Vec<CanonicalEvent>,
    ) {
        let Some(entry) = state.entries.get_mut(id) else {
            return;
        };
        if entry.state.is_terminal() {
            return;
        }
        let text = match entry.role {
            Role::User => self.user_text(dom, entry.container),
            Role::Assistant => {
                if dom.exists(&self.profile.generation_indicator) {
                    debug!("Message {} still generating", id);
                    return;
                }
                self.assistant_text(dom, entry.container)
            }
        };
        if text.is_empty() {
            debug!("Message {} has no text yet", id);
            return;
        }

        entry.state = EntryState::Processed;
        if let Some(w) = entry.watch.take() {
            dom.unwatch(w);
        }
        let role = entry.role;
        state.settle(id);
        if !self.processed.claim(id) {
            return;
        }
        info!(
            "{} {} message {} extracted ({} chars)",
            self.profile.platform,
            role.as_str(),
            id,
            text.len()
        );
        out.push(CanonicalEvent::MessageExtracted(MessageExtractedEvent {
            message: Message {
                message_id: id.to_string(),
                conversation_id: self.tracker.current_id().unwrap_or_default(),
                role,
                content: text,
                model: self.profile.model.clone(),
                timestamp: now_millis(),
                parent_message_id: None,
            },
            platform: self.profile.platform,
        }));
    }

    fn sweep<D: DomPort + ?Sized>(
        &self,
        dom: &D,
        state: &mut State,
        now: Instant,
        out: &mut Vec<CanonicalEvent>,
    ) {
        let Some(timeout) = self.timeout else {
            return;
        };
        let mut abandoned = Vec::new();
        for id in &state.pending {
            let Some(entry) = state.entries.get_mut(id) else {
                continue;
            };
            let waited = now.saturating_duration_since(entry.since);
            if waited < timeout {
                continue;
            }
            if let Some(w) = entry.watch.take() {
                dom.unwatch(w);
            }
            entry.state = EntryState::Abandoned;
            abandoned.push(id.clone());
            if !self.processed.claim(&entry.id) {
                continue;
            }
            let partial = match entry.role {
                Role::User => self.user_text(dom, entry.container),
                Role::Assistant => self.assistant_text(dom, entry.container),
            };
            warn!(
                "{} message {} abandoned after {}ms",
                self.profile.platform,
                entry.id,
                waited.as_millis()
            );
            out.push(CanonicalEvent::CaptureAbandoned(CaptureAbandonedEvent {
                source: AbandonSource::Extraction,
                platform: self.profile.platform,
                message_id: Some(entry.id.clone()),
                accumulated_text: partial,
                waited_ms: waited.as_millis() as u64,
            }));
        }
        for id in abandoned {
            state.settle(&id);
        }
    }

    fn user_text<D: DomPort + ?Sized>(&self, dom: &D, container: NodeId) -> String {
        let source = dom
            .query(container, &self.profile.user_text)
            .unwrap_or(container);
        dom.text_content(source).trim().to_string()
    }

    fn assistant_text<D: DomPort + ?Sized>(&self, dom: &D, container: NodeId) -> String {
        dom.query_all(container, &self.profile.assistant_text)
            .into_iter()
            .map(|n| dom.text_content(n))
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    }

    fn flush(&self, out: Vec<CanonicalEvent>) {
        for event in out {
            self.dispatcher.emit(event);
        }
    }
}
