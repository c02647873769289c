//! ChatGPT payloads: completion request turns and the conversation mapping tree.

use chatwire_core::{now_millis, Conversation, Message, Platform, Role};
use serde_json::Value;

use crate::{generated_id, str_at, PlatformAdapter};

/// Synthetic root of every mapping tree; never a real message.
const MAPPING_ROOT: &str = "client-created-root";

pub struct ChatGptAdapter;

impl PlatformAdapter for ChatGptAdapter {
    fn platform(&self) -> Platform {
        Platform::ChatGPT
    }

    fn default_model(&self) -> &'static str {
        "unknown"
    }

    fn user_message(&self, request: &Value, fallback_conversation: Option<&str>) -> Option<Message> {
        let turn = request.get("messages")?.as_array()?.first()?;
        let role = turn
            .pointer("/author/role")
            .or_else(|| turn.get("role"))
            .and_then(|r| r.as_str());
        if role != Some("user") {
            return None;
        }
        let content = content_text(turn.get("content"));
        if content.is_empty() {
            return None;
        }
        Some(Message {
            message_id: str_at(turn, "id")
                .map(str::to_string)
                .unwrap_or_else(|| generated_id("user")),
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
            parent_message_id: str_at(request, "parent_message_id").map(str::to_string),
        })
    }

    fn conversation(
        &self,
        body: &Value,
        fallback_conversation: Option<&str>,
    ) -> Option<(Conversation, Vec<Message>)> {
        let conversation_id = str_at(body, "conversation_id")
            .or_else(|| str_at(body, "id"))
            .or(fallback_conversation)?
            .to_string();
        let messages = extract_messages(body, &conversation_id);
        Some((
            Conversation {
                conversation_id,
                title: str_at(body, "title").unwrap_or("Conversation").to_string(),
                platform: Platform::ChatGPT,
            },
            messages,
        ))
    }
}

/// User and assistant messages of a mapping tree, oldest first.
fn extract_messages(conv: &Value, conversation_id: &str) -> Vec<Message> {
    let mapping = match conv.get("mapping").and_then(|m| m.as_object()) {
        Some(m) => m,
        None => return Vec::new(),
    };

    let mut msg_list: Vec<(f64, Message)> = Vec::new();

    for (node_id, node) in mapping {
        if node_id == MAPPING_ROOT {
            continue;
        }
        let Some(message) = node.get("message") else {
            continue;
        };
        let role = match message
            .pointer("/author/role")
            .and_then(|r| r.as_str())
            .and_then(Role::from_platform_role)
        {
            Some(role) => role,
            None => continue,
        };

        let text = content_text(message.get("content"));
        if text.is_empty() {
            continue;
        }

        let create_time = message
            .get("create_time")
            .and_then(|t| t.as_f64())
            .unwrap_or(0.0);

        msg_list.push((
            create_time,
            Message {
                message_id: str_at(message, "id").unwrap_or(node_id).to_string(),
                conversation_id: conversation_id.to_string(),
                role,
                content: text,
                model: message
                    .pointer("/metadata/model_slug")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                timestamp: if create_time > 0.0 {
                    (create_time * 1000.0) as i64
                } else {
                    now_millis()
                },
                parent_message_id: str_at(node, "parent").map(str::to_string),
            },
        ));
    }

    // Sort by creation time
    msg_list.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    msg_list.into_iter().map(|(_, m)| m).collect()
}

/// Text of a message content object: string `parts`, else `text`.
fn content_text(content: Option<&Value>) -> String {
    let content = match content {
        Some(c) => c,
        None => return String::new(),
    };

    if let Some(parts) = content.get("parts").and_then(|p| p.as_array()) {
        let texts: Vec<&str> = parts
            .iter()
            .filter_map(|p| p.as_str())
            .filter(|s| !s.is_empty())
            .collect();
        return texts.join("\n");
    }

    content
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_turn_from_request() {
        let body = json!({
            "action": "next",
            "conversation_id": "59f1b3-aa",
            "parent_message_id": "p-0",
            "model": "gpt-4o",
            "messages": [{
                "id": "u-1",
                "author": {"role": "user"},
                "content": {"content_type": "text", "parts": ["Plan a trip", ""]}
            }]
        });
        let msg = ChatGptAdapter.user_message(&body, None).unwrap();
        assert_eq!(msg.message_id, "u-1");
        assert_eq!(msg.conversation_id, "59f1b3-aa");
        assert_eq!(msg.content, "Plan a trip");
        assert_eq!(msg.model, "gpt-4o");
        assert_eq!(msg.parent_message_id.as_deref(), Some("p-0"));
    }

    #[test]
    fn test_non_user_turn_ignored() {
        let body = json!({"messages": [{"author": {"role": "system"}, "content": {"parts": ["x"]}}]});
        assert!(ChatGptAdapter.user_message(&body, None).is_none());
        assert!(ChatGptAdapter.user_message(&json!({"messages": []}), None).is_none());
    }

    #[test]
    fn test_mapping_tree() {
        let body = json!({
            "conversation_id": "conv-1",
            "title": "Test Conversation",
            "mapping": {
                "client-created-root": {"children": ["node-0"]},
                "node-0": {
                    "parent": "client-created-root",
                    "message": {"author": {"role": "system"}, "content": {"parts": ["sys"]}}
                },
                "node-2": {
                    "parent": "node-1",
                    "message": {
                        "id": "node-2",
                        "author": {"role": "assistant"},
                        "content": {"content_type": "text", "parts": ["Hi there!"]},
                        "metadata": {"model_slug": "gpt-4o"},
                        "create_time": 1700000002.0
                    }
                },
                "node-1": {
                    "parent": "node-0",
                    "message": {
                        "id": "node-1",
                        "author": {"role": "user"},
                        "content": {"content_type": "text", "parts": ["Hello!"]},
                        "create_time": 1700000001.0
                    }
                }
            }
        });
        let (conv, messages) = ChatGptAdapter.conversation(&body, None).unwrap();
        assert_eq!(conv.conversation_id, "conv-1");
        assert_eq!(conv.title, "Test Conversation");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "Hello!");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].timestamp, 1_700_000_001_000);
        assert_eq!(messages[1].model, "gpt-4o");
        assert_eq!(messages[1].parent_message_id.as_deref(), Some("node-1"));
    }

    #[test]
    fn test_conversation_needs_id() {
        assert!(ChatGptAdapter.conversation(&json!({"mapping": {}}), None).is_none());
        let (conv, messages) = ChatGptAdapter
            .conversation(&json!({"mapping": {}}), Some("from-url"))
            .unwrap();
        assert_eq!(conv.conversation_id, "from-url");
        assert!(messages.is_empty());
    }
}
