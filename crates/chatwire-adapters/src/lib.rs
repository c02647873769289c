//! Platform adapters: turn raw classified payloads into canonical messages.
//!
//! Each platform module knows one vendor's request and history shapes. The
//! [`AdapterRouter`] subscribes to the dispatcher and feeds them.

pub mod chatgpt;
pub mod claude;
pub mod copilot;
pub mod mistral;
pub mod router;

use chatwire_core::events::AssistantResponseEvent;
use chatwire_core::{now_millis, Conversation, Message, Platform, Role};
use chrono::DateTime;
use serde_json::Value;

pub use router::AdapterRouter;

/// One vendor's payload knowledge.
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Model reported when the payload names none.
    fn default_model(&self) -> &'static str;

    /// The user turn carried by a chat completion request body.
    /// `fallback_conversation` is the URL capture or the tracked id.
    fn user_message(&self, _request: &Value, _fallback_conversation: Option<&str>) -> Option<Message> {
        None
    }

    /// The assistant message of a final decoded response.
    fn assistant_message(
        &self,
        response: &AssistantResponseEvent,
        fallback_conversation: Option<&str>,
    ) -> Option<Message> {
        if response.accumulated_text.trim().is_empty() {
            return None;
        }
        Some(Message {
            message_id: response
                .message_id
                .clone()
                .unwrap_or_else(|| generated_id(self.platform().name())),
            conversation_id: response
                .conversation_id
                .clone()
                .or_else(|| fallback_conversation.map(str::to_string))
                .unwrap_or_default(),
            role: Role::Assistant,
            content: response.accumulated_text.clone(),
            model: response
                .model
                .clone()
                .unwrap_or_else(|| self.default_model().to_string()),
            timestamp: response
                .create_time
                .map(|secs| (secs * 1000.0) as i64)
                .unwrap_or_else(now_millis),
            parent_message_id: response.parent_message_id.clone(),
        })
    }

    /// Conversation header and messages from a history response.
    fn conversation(
        &self,
        _body: &Value,
        _fallback_conversation: Option<&str>,
    ) -> Option<(Conversation, Vec<Message>)> {
        None
    }
}

/// The adapter for `platform`, if it has one.
pub fn adapter_for(platform: Platform) -> Option<Box<dyn PlatformAdapter>> {
    match platform {
        Platform::ChatGPT => Some(Box::new(chatgpt::ChatGptAdapter)),
        Platform::Claude => Some(Box::new(claude::ClaudeAdapter)),
        Platform::Mistral => Some(Box::new(mistral::MistralAdapter)),
        Platform::Copilot => Some(Box::new(copilot::CopilotAdapter)),
        Platform::Unknown => None,
    }
}

// ---------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------

/// Id for a message the platform did not name.
pub(crate) fn generated_id(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4())
}

/// Non-empty string at `key`.
pub(crate) fn str_at<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Join the `text` of every item in an array of content parts.
pub(crate) fn join_texts(items: &[Value], only_type: Option<&str>) -> String {
    items
        .iter()
        .filter(|item| match only_type {
            Some(t) => item.get("type").and_then(|v| v.as_str()) == Some(t),
            None => true,
        })
        .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Epoch milliseconds from an RFC 3339 timestamp.
pub(crate) fn iso_millis(value: Option<&Value>) -> Option<i64> {
    let raw = value?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_assistant_message_defaults() {
        let adapter = adapter_for(Platform::Claude).unwrap();
        let response = AssistantResponseEvent {
            platform: Some(Platform::Claude),
            accumulated_text: "Sure.".into(),
            is_complete: true,
            create_time: Some(1_700_000_000.5),
            ..Default::default()
        };
        let msg = adapter.assistant_message(&response, Some("ff00-11")).unwrap();
        assert!(msg.message_id.starts_with("claude-"));
        assert_eq!(msg.conversation_id, "ff00-11");
        assert_eq!(msg.model, "claude");
        assert_eq!(msg.timestamp, 1_700_000_000_500);

        let empty = AssistantResponseEvent {
            accumulated_text: "  ".into(),
            ..response
        };
        assert!(adapter.assistant_message(&empty, None).is_none());
    }

    #[test]
    fn test_helpers() {
        let parts = vec![
            json!({"type": "text", "text": "a"}),
            json!({"type": "tool_use", "text": "skip"}),
            json!({"type": "text", "text": "b"}),
        ];
        assert_eq!(join_texts(&parts, Some("text")), "a\nb");
        assert_eq!(join_texts(&parts, None), "a\nskip\nb");
        assert_eq!(
            iso_millis(Some(&json!("2024-05-01T10:00:00.000Z"))),
            Some(1_714_557_600_000)
        );
        assert_eq!(str_at(&json!({"k": ""}), "k"), None);
        assert!(adapter_for(Platform::Unknown).is_none());
    }
}
