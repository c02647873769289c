//! Copilot history (`results`). Live messages come from the DOM extractor.

use chatwire_core::{now_millis, Conversation, Message, Platform, Role};
use serde_json::Value;

use crate::{generated_id, iso_millis, join_texts, str_at, PlatformAdapter};

pub struct CopilotAdapter;

impl PlatformAdapter for CopilotAdapter {
    fn platform(&self) -> Platform {
        Platform::Copilot
    }

    fn default_model(&self) -> &'static str {
        "copilot"
    }

    fn assistant_message(
        &self,
        _response: &chatwire_core::events::AssistantResponseEvent,
        _fallback_conversation: Option<&str>,
    ) -> Option<Message> {
        None
    }

    fn conversation(
        &self,
        body: &Value,
        fallback_conversation: Option<&str>,
    ) -> Option<(Conversation, Vec<Message>)> {
        let results = body.get("results")?.as_array()?;
        // History carries no conversation id of its own.
        let conversation_id = fallback_conversation.filter(|id| !id.is_empty())?.to_string();
        let messages = results
            .iter()
            .map(|m| Message {
                message_id: str_at(m, "id")
                    .map(str::to_string)
                    .unwrap_or_else(|| generated_id("copilot")),
                conversation_id: conversation_id.clone(),
                role: if str_at(m, "author") == Some("human") {
                    Role::User
                } else {
                    Role::Assistant
                },
                content: match m.get("content") {
                    Some(Value::Array(parts)) => join_texts(parts, None),
                    Some(c) => str_at(c, "text").unwrap_or_default().to_string(),
                    None => String::new(),
                },
                model: self.default_model().to_string(),
                timestamp: iso_millis(m.get("createdAt")).unwrap_or_else(now_millis),
                parent_message_id: None,
            })
            .filter(|m| !m.content.trim().is_empty())
            .collect();
        Some((
            Conversation {
                title: results
                    .first()
                    .and_then(|r| str_at(r, "title"))
                    .unwrap_or("Conversation")
                    .to_string(),
                conversation_id,
                platform: Platform::Copilot,
            },
            messages,
        ))
    }
}
