//! Canonical event vocabulary and the in-process dispatcher.
//!
//! Dispatch is synchronous fire-and-forget: no acknowledgement, no retry.
//! Sinks that need durability persist what they receive. Emission order is
//! preserved per sink; nothing is promised across categories.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::platform::Platform;
use crate::types::{Conversation, EndpointCategory, InterceptedExchange, Message};

/// Payload of `user-info`, `conversation-list` and `specific-conversation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeEvent {
    pub platform: Platform,
    #[serde(flatten)]
    pub exchange: InterceptedExchange,
}

/// Request phase of a chat completion, emitted before any content arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCompletionEvent {
    pub platform: Platform,
    pub url: String,
    pub request_body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_conversation_id: Option<String>,
}

/// Progressive or final assistant text decoded from a streamed completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantResponseEvent {
    pub platform: Option<Platform>,
    pub accumulated_text: String,
    pub is_complete: bool,
    pub thinking_time_ms: Option<u64>,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub parent_message_id: Option<String>,
    /// Platform-reported creation time, epoch seconds.
    pub create_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageExtractedEvent {
    pub message: Message,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationChangedEvent {
    pub conversation_id: String,
    pub platform: Platform,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationLoadedEvent {
    pub platform: Platform,
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Which capture path gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbandonSource {
    Stream,
    Extraction,
}

/// Terminal event for a capture that never settled within its timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureAbandonedEvent {
    pub source: AbandonSource,
    pub platform: Platform,
    pub message_id: Option<String>,
    pub accumulated_text: String,
    pub waited_ms: u64,
}

/// The fixed named-event vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "kebab-case")]
pub enum CanonicalEvent {
    UserInfo(ExchangeEvent),
    ConversationList(ExchangeEvent),
    SpecificConversation(ExchangeEvent),
    ChatCompletion(ChatCompletionEvent),
    AssistantResponse(AssistantResponseEvent),
    MessageExtracted(MessageExtractedEvent),
    ConversationChanged(ConversationChangedEvent),
    ConversationLoaded(ConversationLoadedEvent),
    CaptureAbandoned(CaptureAbandonedEvent),
}

impl CanonicalEvent {
    /// Build the classified event for a non-streaming exchange.
    /// Returns `None` for chat completions, which have their own shape.
    pub fn classified(platform: Platform, exchange: InterceptedExchange) -> Option<Self> {
        let payload = ExchangeEvent { platform, exchange };
        match payload.exchange.category {
            EndpointCategory::UserInfo => Some(Self::UserInfo(payload)),
            EndpointCategory::ConversationList => Some(Self::ConversationList(payload)),
            EndpointCategory::SpecificConversation => {
                Some(Self::SpecificConversation(payload))
            }
            EndpointCategory::ChatCompletion => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserInfo(_) => "user-info",
            Self::ConversationList(_) => "conversation-list",
            Self::SpecificConversation(_) => "specific-conversation",
            Self::ChatCompletion(_) => "chat-completion",
            Self::AssistantResponse(_) => "assistant-response",
            Self::MessageExtracted(_) => "message-extracted",
            Self::ConversationChanged(_) => "conversation-changed",
            Self::ConversationLoaded(_) => "conversation-loaded",
            Self::CaptureAbandoned(_) => "capture-abandoned",
        }
    }
}

/// Receiver of canonical events.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &CanonicalEvent);
}

impl<F> EventSink for F
where
    F: Fn(&CanonicalEvent) + Send + Sync,
{
    fn on_event(&self, event: &CanonicalEvent) {
        self(event)
    }
}

/// Fan-out of canonical events to subscribed sinks.
#[derive(Clone, Default)]
pub struct Dispatcher {
    sinks: Arc<RwLock<Vec<Arc<dyn EventSink>>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Deliver `event` to every sink, in subscription order.
    ///
    /// The sink list is snapshotted first so a sink may emit follow-up
    /// events (the tracker and adapters do) without deadlocking.
    pub fn emit(&self, event: CanonicalEvent) {
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();
        debug!("emit {} to {} sinks", event.name(), sinks.len());
        for sink in sinks {
            sink.on_event(&event);
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.read().len()
    }
}

/// Records every event it receives. Used by tests and the replay CLI.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<CanonicalEvent>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<CanonicalEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.name()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name() == name).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for MemorySink {
    fn on_event(&self, event: &CanonicalEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Forwards events into an unbounded tokio channel so consumers can await them.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<CanonicalEvent>,
}

impl ChannelSink {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CanonicalEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl EventSink for ChannelSink {
    fn on_event(&self, event: &CanonicalEvent) {
        // A closed receiver means nobody is listening anymore.
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(id: &str) -> CanonicalEvent {
        CanonicalEvent::ConversationChanged(ConversationChangedEvent {
            conversation_id: id.to_string(),
            platform: Platform::ChatGPT,
        })
    }

    #[test]
    fn test_emit_preserves_order() {
        let dispatcher = Dispatcher::new();
        let sink = MemorySink::new();
        dispatcher.subscribe(sink.clone());

        dispatcher.emit(changed("a"));
        dispatcher.emit(changed("b"));

        let ids: Vec<String> = sink
            .events()
            .into_iter()
            .filter_map(|e| match e {
                CanonicalEvent::ConversationChanged(c) => Some(c.conversation_id),
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_reentrant_emit() {
        let dispatcher = Dispatcher::new();
        let sink = MemorySink::new();
        let inner = dispatcher.clone();
        dispatcher.subscribe(Arc::new(move |event: &CanonicalEvent| {
            if let CanonicalEvent::ConversationChanged(c) = event {
                if c.conversation_id == "first" {
                    inner.emit(changed("second"));
                }
            }
        }));
        dispatcher.subscribe(sink.clone());

        dispatcher.emit(changed("first"));
        assert_eq!(sink.count("conversation-changed"), 2);
    }

    #[test]
    fn test_event_wire_shape() {
        let json = serde_json::to_value(changed("abc")).unwrap();
        assert_eq!(json["event"], "conversation-changed");
        assert_eq!(json["detail"]["conversationId"], "abc");
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let dispatcher = Dispatcher::new();
        let (sink, mut rx) = ChannelSink::new();
        dispatcher.subscribe(sink);
        dispatcher.emit(changed("x"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "conversation-changed");
    }
}
