//! Mistral Le Chat line protocol.
//!
//! One record per line, `<tag>:<json>`: `0:"text"` carries a text delta,
//! `f:{"messageId":...}` opens the message, `d:{...}` finishes it, and a
//! `null` payload also ends the stream. Some deployments send
//! `data:{"messageId","token"}` lines ending with `data:[DONE]` instead.

use serde_json::Value;

use super::framing::Framing;
use super::{str_field, Draft, Step, StreamDialect};

#[derive(Debug, Default)]
pub struct MistralDialect {
    draft: Draft,
}

impl MistralDialect {
    pub fn new() -> Self {
        Self::default()
    }

    fn data_line(&mut self, data: &str) -> Step {
        if data == "[DONE]" {
            return Step::Terminal;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Step::Ignored,
        };
        if let Some(id) = str_field(&payload["messageId"]) {
            self.draft.message_id = Some(id);
        }
        let mut grew = false;
        for key in ["token", "content"] {
            if let Some(text) = payload[key].as_str().filter(|t| !t.is_empty()) {
                self.draft.text.push_str(text);
                grew = true;
            }
        }
        if grew {
            Step::Delta
        } else {
            Step::Meta
        }
    }
}

impl StreamDialect for MistralDialect {
    fn framing(&self) -> Framing {
        Framing::Lines
    }

    fn accepts(&self, content_type: &str) -> bool {
        content_type.contains("text/event-stream") || content_type.contains("text/plain")
    }

    fn wants(&self, request_body: Option<&Value>) -> bool {
        let Some(body) = request_body.filter(|b| b.is_object()) else {
            return false;
        };
        ["messageInput", "chatId", "mode"]
            .iter()
            .any(|k| !body[*k].is_null())
            || body["0"]["json"].is_object()
    }

    fn begin(&mut self, request_body: Option<&Value>, _url: &str) {
        let Some(body) = request_body else {
            return;
        };
        let wrapped = &body["0"]["json"];
        self.draft.conversation_id =
            str_field(&body["chatId"]).or_else(|| str_field(&wrapped["chatId"]));
        self.draft.parent_message_id = str_field(&body["parentMessageId"])
            .or_else(|| str_field(&wrapped["parentMessageId"]));
        self.draft.model = str_field(&body["model"]).or_else(|| Some("mistral".to_string()));
    }

    fn feed(&mut self, record: &str) -> Step {
        let Some((tag, payload)) = record.split_once(':') else {
            return Step::Ignored;
        };
        let payload = payload.trim();
        if tag == "data" {
            return self.data_line(payload);
        }
        if payload == "null" {
            return Step::Terminal;
        }

        match tag {
            "0" => match serde_json::from_str::<Value>(payload) {
                Ok(Value::String(text)) if !text.is_empty() => {
                    self.draft.text.push_str(&text);
                    Step::Delta
                }
                _ => Step::Ignored,
            },
            "f" => match serde_json::from_str::<Value>(payload) {
                Ok(v) => {
                    if let Some(id) = str_field(&v["messageId"]) {
                        self.draft.message_id = Some(id);
                    }
                    Step::Meta
                }
                Err(_) => Step::Ignored,
            },
            "d" => Step::Terminal,
            _ => Step::Ignored,
        }
    }

    fn draft(&self) -> &Draft {
        &self.draft
    }
}
