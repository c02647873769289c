//! The capture session.

use std::sync::Arc;

use chatwire_adapters::{adapter_for, AdapterRouter};
use chatwire_core::{CaptureConfig, Dispatcher, EventSink, Platform, ProcessedIds};
use chatwire_network::{EndpointTable, InterceptionPort, Interceptor};
use chatwire_page::{ConversationTracker, DomExtractor, DomPort, DomProfile};
use tracing::{info, warn};

use crate::observer::PageObserver;

/// Everything one page's capture shares.
pub struct CaptureSession {
    platform: Platform,
    config: CaptureConfig,
    dispatcher: Dispatcher,
    tracker: ConversationTracker,
    processed: ProcessedIds,
    interceptor: Interceptor,
}

impl CaptureSession {
    /// Session for the page served from `host`.
    pub fn new(host: &str, config: CaptureConfig) -> Self {
        Self::for_platform(Platform::from_hostname(host), config)
    }

    pub fn for_platform(platform: Platform, config: CaptureConfig) -> Self {
        Self::with_table(platform, Arc::new(EndpointTable::builtin().clone()), config)
    }

    /// Session with a custom endpoint table.
    pub fn with_table(platform: Platform, table: Arc<EndpointTable>, config: CaptureConfig) -> Self {
        let dispatcher = Dispatcher::new();
        let processed = ProcessedIds::new();
        let tracker = ConversationTracker::new(platform, dispatcher.clone());

        // The tracker sees every event before the adapters read it.
        dispatcher.subscribe(Arc::new(tracker.clone()));
        if let Some(adapter) = adapter_for(platform) {
            dispatcher.subscribe(Arc::new(AdapterRouter::new(
                adapter,
                dispatcher.clone(),
                processed.clone(),
                tracker.clone(),
            )));
        }

        let interceptor = Interceptor::new(platform, table, dispatcher.clone(), config.clone());
        info!("Capture session created for {}", platform);

        Self {
            platform,
            config,
            dispatcher,
            tracker,
            processed,
            interceptor,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &ConversationTracker {
        &self.tracker
    }

    pub fn processed(&self) -> &ProcessedIds {
        &self.processed
    }

    /// Add a consumer of canonical events.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.dispatcher.subscribe(sink);
    }

    // ---------------------------------------------------------------
    // Network
    // ---------------------------------------------------------------

    /// Wrap the port's fetch delegate. False when already installed or the
    /// page belongs to no known platform.
    pub fn install_network(&self, port: &InterceptionPort) -> bool {
        if self.platform == Platform::Unknown {
            warn!("Not intercepting: unknown platform");
            return false;
        }
        self.interceptor.install(port)
    }

    /// Restore the port's original delegate.
    pub fn uninstall_network(&self, port: &InterceptionPort) -> bool {
        self.interceptor.uninstall(port)
    }

    // ---------------------------------------------------------------
    // Page
    // ---------------------------------------------------------------

    /// Explicit navigation signal. Returns the new conversation id, if any.
    pub fn navigate(&self, url: &str) -> Option<String> {
        self.tracker.on_navigation(url)
    }

    /// Attach to the page's content tree.
    ///
    /// Every known platform gets address tracking per mutation batch; platforms
    /// with a DOM profile also get message extraction. Returns `None` for an
    /// unknown platform.
    pub fn observe_page<D: DomPort + ?Sized>(&self, dom: &D) -> Option<PageObserver> {
        if self.platform == Platform::Unknown {
            return None;
        }
        let extractor = DomProfile::for_platform(self.platform).and_then(|profile| {
            let extractor = DomExtractor::new(
                profile,
                self.dispatcher.clone(),
                self.processed.clone(),
                self.tracker.clone(),
                &self.config,
            );
            // Observer failure only disables extraction.
            extractor.start(dom).then_some(extractor)
        });
        Some(PageObserver::new(self.tracker.clone(), extractor))
    }
}
