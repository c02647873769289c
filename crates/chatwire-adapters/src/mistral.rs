//! Mistral payloads. The first turn of a chat is wrapped under `"0".json`;
//! later turns carry `messageInput`.

use chatwire_core::events::AssistantResponseEvent;
use chatwire_core::{now_millis, Message, Platform, Role};
use serde_json::Value;

use crate::{generated_id, join_texts, str_at, PlatformAdapter};

pub struct MistralAdapter;

impl PlatformAdapter for MistralAdapter {
    fn platform(&self) -> Platform {
        Platform::Mistral
    }

    fn default_model(&self) -> &'static str {
        "mistral"
    }

    fn user_message(&self, request: &Value, fallback_conversation: Option<&str>) -> Option<Message> {
        let mut message_id = str_at(request, "messageId");
        let mut conversation_id = str_at(request, "chatId");
        let mut parent = str_at(request, "parentMessageId");

        let content = if let Some(first) = request.pointer("/0/json").filter(|j| j.is_object()) {
            message_id = str_at(first, "messageId").or(message_id);
            conversation_id = str_at(first, "chatId").or(conversation_id);
            parent = str_at(first, "parentMessageId").or(parent);
            first
                .get("content")
                .and_then(|c| c.as_array())
                .map(|parts| join_texts(parts, None))
                .unwrap_or_default()
        } else {
            match request.get("messageInput") {
                Some(Value::Array(parts)) => join_texts(parts, None),
                Some(Value::String(s)) => s.clone(),
                _ => String::new(),
            }
        };
        if content.trim().is_empty() {
            return None;
        }

        Some(Message {
            message_id: message_id
                .map(str::to_string)
                .unwrap_or_else(|| generated_id("user")),
            conversation_id: conversation_id
                .or(fallback_conversation)
                .unwrap_or_default()
                .to_string(),
            role: Role::User,
            content,
            model: str_at(request, "model")
                .unwrap_or(self.default_model())
                .to_string(),
            timestamp: now_millis(),
            parent_message_id: parent.map(str::to_string),
        })
    }

    fn assistant_message(
        &self,
        response: &AssistantResponseEvent,
        fallback_conversation: Option<&str>,
    ) -> Option<Message> {
        let text = strip_safe_wrapper(&response.accumulated_text);
        if text.trim().is_empty() {
            return None;
        }
        Some(Message {
            message_id: response
                .message_id
                .clone()
                .unwrap_or_else(|| generated_id("mistral")),
            conversation_id: response
                .conversation_id
                .clone()
                .or_else(|| fallback_conversation.map(str::to_string))
                .unwrap_or_default(),
            role: Role::Assistant,
            content: text.to_string(),
            model: response
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
            timestamp: now_millis(),
            parent_message_id: response.parent_message_id.clone(),
        })
    }
}

/// Some streams leak a `safe` prefix and `null` suffix around the text.
fn strip_safe_wrapper(text: &str) -> &str {
    text.strip_prefix("safe")
        .and_then(|t| t.strip_suffix("null"))
        .unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_turn_wrapper() {
        let body = json!({"0": {"json": {
            "chatId": "abc123",
            "messageId": "m-1",
            "content": [{"type": "text", "text": "Bonjour"}, {"type": "text", "text": "ça va?"}]
        }}});
        let msg = MistralAdapter.user_message(&body, None).unwrap();
        assert_eq!(msg.message_id, "m-1");
        assert_eq!(msg.conversation_id, "abc123");
        assert_eq!(msg.content, "Bonjour\nça va?");
        assert_eq!(msg.model, "mistral");
    }

    #[test]
    fn test_message_input_forms() {
        let array = json!({"chatId": "abc123", "parentMessageId": "a-0", "messageInput": [{"type": "text", "text": "next"}]});
        let msg = MistralAdapter.user_message(&array, None).unwrap();
        assert_eq!(msg.content, "next");
        assert_eq!(msg.parent_message_id.as_deref(), Some("a-0"));
        assert!(msg.message_id.starts_with("user-"));

        let plain = json!({"messageInput": "plain text"});
        let msg = MistralAdapter.user_message(&plain, Some("c-9")).unwrap();
        assert_eq!(msg.content, "plain text");
        assert_eq!(msg.conversation_id, "c-9");

        assert!(MistralAdapter.user_message(&json!({"mode": "start"}), None).is_none());
    }

    #[test]
    fn test_assistant_wrapper_stripped() {
        let response = AssistantResponseEvent {
            accumulated_text: "safeHello therenull".into(),
            is_complete: true,
            message_id: Some("r-1".into()),
            ..Default::default()
        };
        let msg = MistralAdapter.assistant_message(&response, Some("abc123")).unwrap();
        assert_eq!(msg.content, "Hello there");
        assert_eq!(msg.conversation_id, "abc123");
        assert_eq!(strip_safe_wrapper("safe"), "safe");
    }
}
