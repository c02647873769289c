//! Dispatcher sink that routes raw events to the session's platform adapter.

use chatwire_core::events::{AbandonSource, ConversationLoadedEvent, MessageExtractedEvent};
use chatwire_core::{CanonicalEvent, Dispatcher, EventSink, Message, ProcessedIds};
use chatwire_page::ConversationTracker;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::PlatformAdapter;

/// Emits `message-extracted` and `conversation-loaded` from raw events.
///
/// Subscribe it after the conversation tracker so a request that names a new
/// conversation has been adopted before its user turn is read.
///
/// A user turn whose request names no conversation (a new chat) is held until
/// the final response of that turn supplies the id. The tracked id is never
/// used for it: at request time it still names the previous conversation.
pub struct AdapterRouter {
    adapter: Box<dyn PlatformAdapter>,
    dispatcher: Dispatcher,
    processed: ProcessedIds,
    tracker: ConversationTracker,
    pending_user: Mutex<Option<Message>>,
}

impl AdapterRouter {
    pub fn new(
        adapter: Box<dyn PlatformAdapter>,
        dispatcher: Dispatcher,
        processed: ProcessedIds,
        tracker: ConversationTracker,
    ) -> Self {
        Self {
            adapter,
            dispatcher,
            processed,
            tracker,
            pending_user: Mutex::new(None),
        }
    }

    /// Emit the held user turn, if any, under `conversation_id`.
    fn release_pending(&self, conversation_id: &str) {
        let Some(mut message) = self.pending_user.lock().take() else {
            return;
        };
        if message.conversation_id.is_empty() {
            message.conversation_id = conversation_id.to_string();
        }
        self.emit_message(message);
    }

    fn emit_message(&self, message: Message) {
        if message.content.trim().is_empty() {
            return;
        }
        if !self.processed.claim(&message.message_id) {
            debug!("Message {} already extracted", message.message_id);
            return;
        }
        self.dispatcher
            .emit(CanonicalEvent::MessageExtracted(MessageExtractedEvent {
                message,
                platform: self.adapter.platform(),
            }));
    }
}

impl EventSink for AdapterRouter {
    fn on_event(&self, event: &CanonicalEvent) {
        let current = self.tracker.current_id();
        match event {
            CanonicalEvent::ChatCompletion(e) => {
                let Some(body) = &e.request_body else {
                    return;
                };
                // A turn left over from a response that never finished.
                self.release_pending("");
                let Some(message) = self
                    .adapter
                    .user_message(body, e.url_conversation_id.as_deref())
                else {
                    return;
                };
                if message.conversation_id.is_empty() {
                    debug!("User turn {} waits for its conversation id", message.message_id);
                    *self.pending_user.lock() = Some(message);
                } else {
                    self.emit_message(message);
                }
            }
            CanonicalEvent::AssistantResponse(r) if r.is_complete => {
                let message = self.adapter.assistant_message(r, current.as_deref());
                let conversation_id = message
                    .as_ref()
                    .map(|m| m.conversation_id.clone())
                    .or_else(|| r.conversation_id.clone())
                    .unwrap_or_default();
                self.release_pending(&conversation_id);
                if let Some(message) = message {
                    self.emit_message(message);
                }
            }
            CanonicalEvent::CaptureAbandoned(a) if a.source == AbandonSource::Stream => {
                self.release_pending("");
            }
            CanonicalEvent::SpecificConversation(e) => {
                let Some(body) = &e.exchange.response_body else {
                    return;
                };
                let fallback = e
                    .exchange
                    .url_conversation_id
                    .as_deref()
                    .or(current.as_deref());
                let Some((conversation, messages)) = self.adapter.conversation(body, fallback)
                else {
                    return;
                };
                // History is a snapshot: every message is reported, and the
                // ids are claimed so live paths do not repeat them.
                for m in &messages {
                    self.processed.claim(&m.message_id);
                }
                info!(
                    "{} conversation {} loaded with {} messages",
                    self.adapter.platform(),
                    conversation.conversation_id,
                    messages.len()
                );
                self.dispatcher
                    .emit(CanonicalEvent::ConversationLoaded(ConversationLoadedEvent {
                        platform: self.adapter.platform(),
                        conversation,
                        messages,
                    }));
            }
            _ => {}
        }
    }
}
