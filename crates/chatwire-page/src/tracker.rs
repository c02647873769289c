//! Conversation tracker: the session's single current conversation id.
//!
//! SPAs change the address without a navigation event, so besides explicit
//! navigation signals the tracker is fed every DOM mutation batch and
//! re-derives the id whenever the address differs from the last one seen.

use std::sync::Arc;

use chatwire_core::events::ConversationChangedEvent;
use chatwire_core::{CanonicalEvent, ConversationState, Dispatcher, EventSink, Platform};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info};

/// Keys that carry a conversation id in platform payloads, in lookup order.
const PAYLOAD_ID_KEYS: [&str; 4] = ["conversation_id", "uuid", "chatId", "conversationId"];

/// One way of reading a conversation id off a page address.
#[derive(Debug, Clone)]
pub enum UrlPattern {
    /// Path regex; group 1 is the id.
    Path(Regex),
    /// Named query parameter.
    Query(&'static str),
}

impl UrlPattern {
    fn path(re: &str) -> Self {
        Self::Path(Regex::new(re).expect("conversation url regex"))
    }

    fn extract(&self, url: &url::Url) -> Option<String> {
        match self {
            UrlPattern::Path(re) => re
                .captures(url.path())
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string()),
            UrlPattern::Query(name) => url
                .query_pairs()
                .find(|(k, v)| k == name && !v.is_empty())
                .map(|(_, v)| v.into_owned()),
        }
    }
}

/// Ordered address patterns for `platform`. First match wins.
pub fn url_patterns(platform: Platform) -> Vec<UrlPattern> {
    match platform {
        Platform::ChatGPT => vec![UrlPattern::path(r"/c/([a-zA-Z0-9-]+)")],
        Platform::Claude => vec![UrlPattern::path(r"/chat/([a-zA-Z0-9-]+)")],
        Platform::Mistral => vec![
            UrlPattern::path(r"/chat/([a-zA-Z0-9-]+)"),
            UrlPattern::path(r"/c/(\w+)"),
        ],
        Platform::Copilot => vec![
            UrlPattern::path(r"/chats/([a-zA-Z0-9]+)"),
            UrlPattern::Query("conversationId"),
        ],
        Platform::Unknown => Vec::new(),
    }
}

struct Inner {
    platform: Platform,
    dispatcher: Dispatcher,
    patterns: Vec<UrlPattern>,
    state: RwLock<ConversationState>,
    /// Address at the last navigation or mutation batch.
    last_url: Mutex<Option<String>>,
}

/// Owns the current conversation id. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ConversationTracker {
    inner: Arc<Inner>,
}

impl ConversationTracker {
    pub fn new(platform: Platform, dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform,
                dispatcher,
                patterns: url_patterns(platform),
                state: RwLock::new(ConversationState::new(platform)),
                last_url: Mutex::new(None),
            }),
        }
    }

    pub fn platform(&self) -> Platform {
        self.inner.platform
    }

    pub fn current_id(&self) -> Option<String> {
        self.inner.state.read().current_conversation_id.clone()
    }

    pub fn state(&self) -> ConversationState {
        self.inner.state.read().clone()
    }

    // ---------------------------------------------------------------
    // Address signals
    // ---------------------------------------------------------------

    /// Explicit navigation (history pop, hash change, initial load).
    /// Returns the id if it changed.
    pub fn on_navigation(&self, url: &str) -> Option<String> {
        *self.inner.last_url.lock() = Some(url.to_string());
        self.derive_from_url(url)
    }

    /// Called once per DOM mutation batch with the current address. Only an
    /// address different from the last one seen triggers re-derivation.
    pub fn on_mutation_batch(&self, url: &str) -> Option<String> {
        {
            let mut last = self.inner.last_url.lock();
            if last.as_deref() == Some(url) {
                return None;
            }
            *last = Some(url.to_string());
        }
        debug!("Address changed without navigation: {}", url);
        self.derive_from_url(url)
    }

    /// Conversation id encoded in `url`, if any pattern matches.
    pub fn id_from_url(&self, url: &str) -> Option<String> {
        let parsed = parse_page_url(url)?;
        self.inner.patterns.iter().find_map(|p| p.extract(&parsed))
    }

    fn derive_from_url(&self, url: &str) -> Option<String> {
        let id = self.id_from_url(url)?;
        self.adopt(&id).then_some(id)
    }

    // ---------------------------------------------------------------
    // State transitions
    // ---------------------------------------------------------------

    /// Make `id` current. Returns false (and emits nothing) when it already is.
    pub fn adopt(&self, id: &str) -> bool {
        if id.is_empty() {
            return false;
        }
        {
            let mut state = self.inner.state.write();
            if state.current_conversation_id.as_deref() == Some(id) {
                return false;
            }
            state.current_conversation_id = Some(id.to_string());
            state.last_updated = Utc::now();
        }
        info!("{} conversation changed to {}", self.inner.platform, id);
        self.inner
            .dispatcher
            .emit(CanonicalEvent::ConversationChanged(ConversationChangedEvent {
                conversation_id: id.to_string(),
                platform: self.inner.platform,
            }));
        true
    }
}

/// First conversation id found under [`PAYLOAD_ID_KEYS`], then the URL capture.
pub fn payload_conversation_id(payload: Option<&Value>, url_capture: Option<&str>) -> Option<String> {
    payload
        .and_then(|body| {
            PAYLOAD_ID_KEYS
                .iter()
                .find_map(|k| body[*k].as_str().filter(|s| !s.is_empty()))
        })
        .or(url_capture.filter(|s| !s.is_empty()))
        .map(str::to_string)
}

fn parse_page_url(url: &str) -> Option<url::Url> {
    match url::Url::parse(url) {
        Ok(u) => Some(u),
        Err(url::ParseError::RelativeUrlWithoutBase) => url::Url::parse("http://page.invalid/")
            .ok()?
            .join(url)
            .ok(),
        Err(_) => None,
    }
}

impl EventSink for ConversationTracker {
    fn on_event(&self, event: &CanonicalEvent) {
        let id = match event {
            CanonicalEvent::SpecificConversation(e) => payload_conversation_id(
                e.exchange.response_body.as_ref(),
                e.exchange.url_conversation_id.as_deref(),
            ),
            CanonicalEvent::ChatCompletion(e) => payload_conversation_id(
                e.request_body.as_ref(),
                e.url_conversation_id.as_deref(),
            ),
            // New chats learn their id from the streamed response.
            CanonicalEvent::AssistantResponse(r) if r.is_complete => r.conversation_id.clone(),
            _ => None,
        };
        if let Some(id) = id {
            self.adopt(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_core::MemorySink;
    use serde_json::json;

    fn tracker(platform: Platform) -> (ConversationTracker, Arc<MemorySink>) {
        let dispatcher = Dispatcher::new();
        let sink = MemorySink::new();
        dispatcher.subscribe(sink.clone());
        (ConversationTracker::new(platform, dispatcher), sink)
    }

    #[test]
    fn test_mistral_short_path() {
        let (t, sink) = tracker(Platform::Mistral);
        assert_eq!(
            t.on_navigation("https://chat.mistral.ai/c/abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(t.current_id().as_deref(), Some("abc123"));
        assert_eq!(sink.count("conversation-changed"), 1);
    }

    #[test]
    fn test_unchanged_id_is_noop() {
        let (t, sink) = tracker(Platform::ChatGPT);
        t.on_navigation("https://chatgpt.com/c/67ab-12");
        assert_eq!(t.on_navigation("https://chatgpt.com/c/67ab-12?model=x"), None);
        assert!(!t.adopt("67ab-12"));
        assert_eq!(sink.count("conversation-changed"), 1);
    }

    #[test]
    fn test_mutation_batch_checks_address_once() {
        let (t, sink) = tracker(Platform::Claude);
        t.on_navigation("https://claude.ai/new");
        assert_eq!(t.current_id(), None);

        assert_eq!(
            t.on_mutation_batch("https://claude.ai/chat/ff00-11"),
            Some("ff00-11".to_string())
        );
        // Same address again: nothing re-derived even if state was changed meanwhile.
        t.adopt("other");
        assert_eq!(t.on_mutation_batch("https://claude.ai/chat/ff00-11"), None);
        assert_eq!(t.current_id().as_deref(), Some("other"));
        assert_eq!(sink.count("conversation-changed"), 2);
    }

    #[test]
    fn test_copilot_query_fallback() {
        let (t, _) = tracker(Platform::Copilot);
        assert_eq!(
            t.id_from_url("https://copilot.microsoft.com/?conversationId=Zx9"),
            Some("Zx9".to_string())
        );
        assert_eq!(
            t.id_from_url("https://copilot.microsoft.com/chats/Ab12?conversationId=Zx9"),
            Some("Ab12".to_string())
        );
        assert_eq!(t.id_from_url("https://copilot.microsoft.com/"), None);
    }

    #[test]
    fn test_payload_id_order() {
        let body = json!({"uuid": "u-1", "chatId": "c-1"});
        assert_eq!(payload_conversation_id(Some(&body), Some("x")), Some("u-1".into()));
        assert_eq!(payload_conversation_id(Some(&json!({})), Some("x")), Some("x".into()));
        assert_eq!(payload_conversation_id(None, None), None);
    }

    #[test]
    fn test_adopts_from_events() {
        let (t, _) = tracker(Platform::ChatGPT);
        t.on_event(&CanonicalEvent::ChatCompletion(
            chatwire_core::events::ChatCompletionEvent {
                platform: Platform::ChatGPT,
                url: "/backend-api/conversation".into(),
                request_body: Some(json!({"conversation_id": "59f1b3-aa"})),
                url_conversation_id: None,
            },
        ));
        assert_eq!(t.current_id().as_deref(), Some("59f1b3-aa"));
    }

    #[test]
    fn test_unknown_platform_never_tracks() {
        let (t, sink) = tracker(Platform::Unknown);
        assert_eq!(t.on_navigation("https://example.com/c/abc"), None);
        assert!(sink.events().is_empty());
    }
}
