//! ChatGPT `backend-api/conversation` event stream.
//!
//! Each `data:` record is either a new message step (`v.message`), a text
//! append (explicit `o=append`, a bare string `v` continuing the last
//! append, or an `o=patch` batch), or a terminal marker. A response may run
//! several steps (tool calls, reasoning) before the assistant step; only the
//! assistant step feeds the accumulated text.

use serde_json::Value;

use super::framing::{parse_sse, Framing};
use super::{str_field, Draft, Step, StreamDialect};

const CONTENT_PATH: &str = "/message/content/parts/0";

#[derive(Debug, Default)]
pub struct ChatGptDialect {
    draft: Draft,
    /// Role of the step currently receiving appends.
    current_role: Option<String>,
    steps: usize,
}

impl ChatGptDialect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of message steps seen so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    fn start_step(&mut self, payload: &Value) -> Step {
        let message = &payload["v"]["message"];
        let role = message["author"]["role"].as_str().unwrap_or("").to_string();
        self.steps += 1;

        if let Some(id) = str_field(&message["id"]) {
            self.draft.message_id = Some(id);
        }
        if let Some(conv) = str_field(&payload["v"]["conversation_id"]) {
            self.draft.conversation_id = Some(conv);
        }
        if let Some(model) = str_field(&message["metadata"]["model_slug"]) {
            self.draft.model = Some(model);
        }
        if let Some(parent) = str_field(&message["metadata"]["parent_id"]) {
            self.draft.parent_message_id = Some(parent);
        }
        if let Some(t) = message["create_time"].as_f64() {
            self.draft.create_time = Some(t);
        }

        let is_assistant = role == "assistant";
        self.current_role = Some(role);
        if is_assistant {
            self.draft.text.clear();
            // Some steps arrive with their first part already filled in.
            if let Some(initial) = message["content"]["parts"][0].as_str() {
                self.draft.text.push_str(initial);
            }
            Step::Meta
        } else {
            Step::Thinking
        }
    }

    fn append(&mut self, text: &str) -> Step {
        match self.current_role.as_deref() {
            None => Step::Ignored,
            Some(_) if text.is_empty() => Step::Ignored,
            Some("assistant") => {
                self.draft.text.push_str(text);
                Step::Delta
            }
            Some(_) => Step::Thinking,
        }
    }

    fn apply_patches(&mut self, patches: &[Value]) -> Step {
        let mut step = Step::Meta;
        for patch in patches {
            if patch["p"] == CONTENT_PATH && patch["o"] == "append" {
                if let Some(text) = patch["v"].as_str() {
                    match self.append(text) {
                        Step::Delta => step = Step::Delta,
                        Step::Thinking if step != Step::Delta => step = Step::Thinking,
                        _ => {}
                    }
                }
            }
        }
        step
    }
}

impl StreamDialect for ChatGptDialect {
    fn framing(&self) -> Framing {
        Framing::Sse
    }

    fn wants(&self, request_body: Option<&Value>) -> bool {
        let Some(first) = request_body.and_then(|b| b["messages"].get(0)) else {
            return false;
        };
        first["author"]["role"] == "user" || first["role"] == "user"
    }

    fn begin(&mut self, request_body: Option<&Value>, _url: &str) {
        if let Some(body) = request_body {
            self.draft.conversation_id = str_field(&body["conversation_id"]);
            self.draft.parent_message_id = str_field(&body["parent_message_id"]);
            self.draft.model = str_field(&body["model"]);
        }
    }

    fn feed(&mut self, record: &str) -> Step {
        let Some(event) = parse_sse(record) else {
            return Step::Ignored;
        };
        let data = event.data.trim();
        if data == "[DONE]" {
            return Step::Terminal;
        }
        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Step::Ignored,
        };

        if payload["type"] == "message_stream_complete" {
            if let Some(conv) = str_field(&payload["conversation_id"]) {
                self.draft.conversation_id = Some(conv);
            }
            return Step::Terminal;
        }
        if payload["v"]["message"].is_object() {
            return self.start_step(&payload);
        }
        match (&payload["o"], &payload["v"]) {
            (Value::String(op), Value::String(text)) if op == "append" => {
                if payload["p"] == CONTENT_PATH {
                    self.append(text)
                } else {
                    Step::Ignored
                }
            }
            (Value::Null, Value::String(text)) => self.append(text),
            (Value::String(op), Value::Array(patches)) if op == "patch" => {
                self.apply_patches(patches)
            }
            _ => Step::Ignored,
        }
    }

    fn draft(&self) -> &Draft {
        &self.draft
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> String {
        format!("data: {}", v)
    }

    fn step(role: &str, id: &str) -> String {
        record(json!({
            "v": {
                "message": {
                    "id": id,
                    "author": {"role": role},
                    "create_time": 1718000000.5,
                    "content": {"content_type": "text", "parts": [""]},
                    "metadata": {"model_slug": "gpt-4o", "parent_id": "u-1"}
                },
                "conversation_id": "59f1b3-aa"
            },
            "c": 0
        }))
    }

    #[test]
    fn test_wants_user_led_requests() {
        let d = ChatGptDialect::new();
        let body = json!({"messages": [{"author": {"role": "user"}, "content": {"parts": ["hi"]}}]});
        assert!(d.wants(Some(&body)));
        assert!(d.wants(Some(&json!({"messages": [{"role": "user"}]}))));
        assert!(!d.wants(Some(&json!({"messages": [{"author": {"role": "system"}}]}))));
        assert!(!d.wants(Some(&json!({"action": "variant"}))));
        assert!(!d.wants(None));
    }

    #[test]
    fn test_assistant_step_accumulates() {
        let mut d = ChatGptDialect::new();
        assert_eq!(d.feed(&step("assistant", "a-1")), Step::Meta);
        assert_eq!(
            d.feed(&record(json!({"p": CONTENT_PATH, "o": "append", "v": "Hel"}))),
            Step::Delta
        );
        assert_eq!(d.feed(&record(json!({"v": "lo"}))), Step::Delta);
        assert_eq!(
            d.feed(&record(json!({"o": "patch", "v": [
                {"p": CONTENT_PATH, "o": "append", "v": "!"},
                {"p": "/message/status", "o": "replace", "v": "finished_successfully"}
            ]}))),
            Step::Delta
        );
        assert_eq!(d.feed("data: [DONE]"), Step::Terminal);

        let draft = d.draft();
        assert_eq!(draft.text, "Hello!");
        assert_eq!(draft.message_id.as_deref(), Some("a-1"));
        assert_eq!(draft.conversation_id.as_deref(), Some("59f1b3-aa"));
        assert_eq!(draft.model.as_deref(), Some("gpt-4o"));
        assert_eq!(draft.parent_message_id.as_deref(), Some("u-1"));
        assert_eq!(draft.create_time, Some(1718000000.5));
    }

    #[test]
    fn test_tool_step_is_thinking() {
        let mut d = ChatGptDialect::new();
        assert_eq!(d.feed(&step("tool", "t-1")), Step::Thinking);
        assert_eq!(d.feed(&record(json!({"v": "searching"}))), Step::Thinking);
        assert_eq!(d.feed(&step("assistant", "a-1")), Step::Meta);
        assert_eq!(d.feed(&record(json!({"v": "Answer"}))), Step::Delta);
        assert_eq!(d.draft().text, "Answer");
        assert_eq!(d.draft().message_id.as_deref(), Some("a-1"));
        assert_eq!(d.steps(), 2);
    }

    #[test]
    fn test_stream_complete_marker_and_garbage() {
        let mut d = ChatGptDialect::new();
        assert_eq!(d.feed("data: {not json"), Step::Ignored);
        assert_eq!(d.feed(&record(json!({"v": "orphan"}))), Step::Ignored);
        assert_eq!(d.feed("event: delta_encoding\ndata: \"v1\""), Step::Ignored);
        assert_eq!(
            d.feed(&record(json!({"type": "message_stream_complete", "conversation_id": "c-9"}))),
            Step::Terminal
        );
        assert_eq!(d.draft().conversation_id.as_deref(), Some("c-9"));
    }
}
