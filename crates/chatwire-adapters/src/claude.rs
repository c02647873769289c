//! Claude payloads: `prompt` completion requests and `chat_messages` history.

use chatwire_core::{now_millis, Conversation, Message, Platform, Role};
use serde_json::Value;

use crate::{generated_id, iso_millis, join_texts, str_at, PlatformAdapter};

pub struct ClaudeAdapter;

impl PlatformAdapter for ClaudeAdapter {
    fn platform(&self) -> Platform {
        Platform::Claude
    }

    fn default_model(&self) -> &'static str {
        "claude"
    }

    fn user_message(&self, request: &Value, fallback_conversation: Option<&str>) -> Option<Message> {
        let content = str_at(request, "prompt")?.to_string();
        Some(Message {
            // Completion requests carry no id for the human turn.
            message_id: generated_id("user"),
            conversation_id: str_at(request, "conversation_id")
                .or(fallback_conversation)
                .unwrap_or_default()
                .to_string(),
            role: Role::User,
            content,
            model: str_at(request, "model")
                .unwrap_or(self.default_model())
                .to_string(),
            timestamp: now_millis(),
            parent_message_id: str_at(request, "parent_message_uuid").map(str::to_string),
        })
    }

    fn conversation(
        &self,
        body: &Value,
        _fallback_conversation: Option<&str>,
    ) -> Option<(Conversation, Vec<Message>)> {
        let conversation_id = str_at(body, "uuid")?.to_string();
        let model = str_at(body, "model").unwrap_or(self.default_model());

        let mut indexed: Vec<(i64, Message)> = body
            .get("chat_messages")
            .and_then(|m| m.as_array())
            .map(|list| {
                list.iter()
                    .filter_map(|m| chat_message(m, &conversation_id, model))
                    .collect()
            })
            .unwrap_or_default();
        indexed.sort_by_key(|(index, _)| *index);

        Some((
            Conversation {
                conversation_id,
                title: str_at(body, "name").unwrap_or("Conversation").to_string(),
                platform: Platform::Claude,
            },
            indexed.into_iter().map(|(_, m)| m).collect(),
        ))
    }
}

fn chat_message(raw: &Value, conversation_id: &str, model: &str) -> Option<(i64, Message)> {
    let role = Role::from_platform_role(str_at(raw, "sender")?)?;
    let content = match raw.get("content").and_then(|c| c.as_array()) {
        Some(parts) => join_texts(parts, Some("text")),
        None => str_at(raw, "text").unwrap_or_default().to_string(),
    };
    if content.trim().is_empty() {
        return None;
    }
    let index = raw.get("index").and_then(|i| i.as_i64()).unwrap_or(0);
    Some((
        index,
        Message {
            message_id: str_at(raw, "uuid")
                .map(str::to_string)
                .unwrap_or_else(|| generated_id("claude")),
            conversation_id: conversation_id.to_string(),
            role,
            content,
            model: model.to_string(),
            timestamp: iso_millis(raw.get("created_at")).unwrap_or_else(now_millis),
            parent_message_id: str_at(raw, "parent_message_uuid").map(str::to_string),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_prompt_request() {
        let body = json!({"prompt": "Summarize this", "parent_message_uuid": "m-0", "model": "claude-sonnet"});
        let msg = ClaudeAdapter.user_message(&body, Some("ff00-11")).unwrap();
        assert!(msg.message_id.starts_with("user-"));
        assert_eq!(msg.conversation_id, "ff00-11");
        assert_eq!(msg.model, "claude-sonnet");
        assert_eq!(msg.parent_message_id.as_deref(), Some("m-0"));

        assert!(ClaudeAdapter.user_message(&json!({"prompt": ""}), None).is_none());
    }

    #[test]
    fn test_chat_messages_sorted_by_index() {
        let body = json!({
            "uuid": "ff00-11",
            "name": "Rust questions",
            "chat_messages": [
                {
                    "uuid": "m-2", "index": 1, "sender": "assistant",
                    "content": [{"type": "text", "text": "It is a language."}],
                    "created_at": "2024-05-01T10:00:05Z",
                    "parent_message_uuid": "m-1"
                },
                {
                    "uuid": "m-1", "index": 0, "sender": "human",
                    "text": "What is Rust?",
                    "created_at": "2024-05-01T10:00:00Z"
                },
                {"uuid": "m-x", "index": 2, "sender": "system", "text": "hidden"}
            ]
        });
        let (conv, messages) = ClaudeAdapter.conversation(&body, None).unwrap();
        assert_eq!(conv.title, "Rust questions");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message_id, "m-1");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].timestamp, 1_714_557_600_000);
        assert_eq!(messages[1].content, "It is a language.");
        assert_eq!(messages[1].parent_message_id.as_deref(), Some("m-1"));
    }

    #[test]
    fn test_empty_history_messages_skipped() {
        let body = json!({
            "uuid": "ff00-11",
            "chat_messages": [
                {"uuid": "m-1", "index": 0, "sender": "human", "text": "Hi"},
                {"uuid": "m-2", "index": 1, "sender": "assistant", "content": [{"type": "tool_use", "input": {}}]},
                {"uuid": "m-3", "index": 2, "sender": "assistant", "text": " "}
            ]
        });
        let (_, messages) = ClaudeAdapter.conversation(&body, None).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "m-1");
    }

    #[test]
    fn test_history_needs_uuid() {
        assert!(ClaudeAdapter
            .conversation(&json!({"chat_messages": []}), Some("x"))
            .is_none());
    }
}
