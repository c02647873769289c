//! Claude completion stream.
//!
//! Two record shapes are in the wild: legacy `{"type":"completion",
//! "completion": "..."}` deltas, and the messages-style sequence
//! `message_start` / `content_block_delta` / `message_stop`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::framing::{parse_sse, Framing};
use super::{str_field, Draft, Step, StreamDialect};

static CONVERSATION_IN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/chat_conversations/([a-f0-9-]+)").unwrap());

#[derive(Debug, Default)]
pub struct ClaudeDialect {
    draft: Draft,
}

impl ClaudeDialect {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamDialect for ClaudeDialect {
    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn wants(&self, request_body: Option<&Value>) -> bool {
        request_body
            .and_then(|b| b["prompt"].as_str())
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }

    fn begin(&mut self, request_body: Option<&Value>, url: &str) {
        self.draft.conversation_id = CONVERSATION_IN_URL
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(body) = request_body {
            self.draft.parent_message_id = str_field(&body["parent_message_uuid"]);
            self.draft.model = str_field(&body["model"]);
        }
    }

    fn feed(&mut self, record: &str) -> Step {
        let Some(event) = parse_sse(record) else {
            return Step::Ignored;
        };
        let payload: Value = match serde_json::from_str(event.data.trim()) {
            Ok(v) => v,
            Err(_) => return Step::Ignored,
        };

        match payload["type"].as_str() {
            Some("completion") => {
                if let Some(id) = str_field(&payload["id"]) {
                    self.draft.message_id = Some(id);
                }
                if let Some(model) = str_field(&payload["model"]) {
                    self.draft.model = Some(model);
                }
                let text = payload["completion"].as_str().unwrap_or("");
                self.draft.text.push_str(text);
                if payload["stop_reason"].is_string() {
                    Step::Terminal
                } else if text.is_empty() {
                    Step::Meta
                } else {
                    Step::Delta
                }
            }
            Some("message_start") => {
                let message = &payload["message"];
                if let Some(id) = str_field(&message["uuid"]).or_else(|| str_field(&message["id"])) {
                    self.draft.message_id = Some(id);
                }
                if let Some(model) = str_field(&message["model"]) {
                    self.draft.model = Some(model);
                }
                if let Some(parent) = str_field(&message["parent_uuid"]) {
                    self.draft.parent_message_id = Some(parent);
                }
                Step::Meta
            }
            Some("content_block_delta") => {
                let delta = &payload["delta"];
                match (delta["type"].as_str(), delta["text"].as_str()) {
                    (Some("text_delta"), Some(text)) if !text.is_empty() => {
                        self.draft.text.push_str(text);
                        Step::Delta
                    }
                    (Some("thinking_delta"), _) => Step::Thinking,
                    _ => Step::Ignored,
                }
            }
            Some("message_stop") => Step::Terminal,
            Some("error") => {
                tracing::warn!(
                    "Claude stream reported an error: {}",
                    payload["error"]["message"].as_str().unwrap_or("unknown")
                );
                Step::Terminal
            }
            _ => Step::Ignored,
        }
    }

    fn draft(&self) -> &Draft {
        &self.draft
    }
}
