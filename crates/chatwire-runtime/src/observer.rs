//! Per-page mutation fan-out.

use std::time::Instant;

use chatwire_page::{ConversationTracker, DomExtractor, DomPort, MutationRecord};

/// Receives the page's mutation batches.
pub struct PageObserver {
    tracker: ConversationTracker,
    extractor: Option<DomExtractor>,
}

impl PageObserver {
    pub(crate) fn new(tracker: ConversationTracker, extractor: Option<DomExtractor>) -> Self {
        Self { tracker, extractor }
    }

    /// One batch, delivered with the page address at delivery time.
    ///
    /// The tracker runs first so extracted messages carry the conversation the
    /// address names.
    pub fn on_batch<D: DomPort + ?Sized>(&self, dom: &D, url: &str, records: &[MutationRecord]) {
        self.tracker.on_mutation_batch(url);
        if let Some(extractor) = &self.extractor {
            extractor.on_mutations(dom, records);
        }
    }

    /// Abandon timed-out extractions without waiting for a batch.
    pub fn sweep<D: DomPort + ?Sized>(&self, dom: &D) {
        self.sweep_at(dom, Instant::now());
    }

    pub fn sweep_at<D: DomPort + ?Sized>(&self, dom: &D, now: Instant) {
        if let Some(extractor) = &self.extractor {
            extractor.sweep_abandoned_at(dom, now);
        }
    }

    pub fn extractor(&self) -> Option<&DomExtractor> {
        self.extractor.as_ref()
    }

    pub fn is_extracting(&self) -> bool {
        self.extractor.is_some()
    }

    /// Tear down extraction watches.
    pub fn stop<D: DomPort + ?Sized>(&self, dom: &D) {
        if let Some(extractor) = &self.extractor {
            extractor.stop(dom);
        }
    }
}
