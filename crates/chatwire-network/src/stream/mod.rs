//! Incremental decoding of streamed chat completions.
//!
//! A [`StreamDecoder`] reads its branch of a teed response body, frames
//! records, and hands each one to a platform [`StreamDialect`]. It emits a
//! progressive `assistant-response` after every meaningful delta and exactly
//! one terminal event: a final `assistant-response`, or `capture-abandoned`
//! when the stream stalls past the idle timeout.

pub mod chatgpt;
pub mod claude;
pub mod framing;
pub mod mistral;

use std::time::{Duration, Instant};

use chatwire_core::events::{AbandonSource, AssistantResponseEvent, CaptureAbandonedEvent};
use chatwire_core::{CanonicalEvent, CaptureConfig, Dispatcher, Platform};
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::port::ByteStream;

pub use chatgpt::ChatGptDialect;
pub use claude::ClaudeDialect;
pub use framing::{Framer, Framing};
pub use mistral::MistralDialect;

/// What one record meant to the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Assistant text grew.
    Delta,
    /// A non-assistant step (tool call, reasoning) produced output.
    Thinking,
    /// Metadata only.
    Meta,
    /// End of the response.
    Terminal,
    /// Unrecognized or malformed record.
    Ignored,
}

/// Assistant response as accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct Draft {
    pub text: String,
    pub message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
    pub parent_message_id: Option<String>,
    pub create_time: Option<f64>,
}

/// Platform-specific stream grammar.
pub trait StreamDialect: Send {
    fn framing(&self) -> Framing;

    /// Whether a response with this content type is a stream this dialect reads.
    fn accepts(&self, content_type: &str) -> bool {
        content_type.contains("text/event-stream")
    }

    /// Whether this request starts a user turn worth decoding.
    fn wants(&self, request_body: Option<&Value>) -> bool;

    /// Seed request-derived metadata before the first record.
    fn begin(&mut self, _request_body: Option<&Value>, _url: &str) {}

    fn feed(&mut self, record: &str) -> Step;

    fn draft(&self) -> &Draft;
}

/// Decoder for `platform`, if it has a streaming grammar.
pub fn dialect_for(platform: Platform) -> Option<Box<dyn StreamDialect>> {
    match platform {
        Platform::ChatGPT => Some(Box::new(ChatGptDialect::new())),
        Platform::Claude => Some(Box::new(ClaudeDialect::new())),
        Platform::Mistral => Some(Box::new(MistralDialect::new())),
        Platform::Copilot | Platform::Unknown => None,
    }
}

/// How a decode run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A terminal record arrived.
    Completed,
    /// The body ended without a terminal record.
    Ended,
    /// Reading the body failed; what was accumulated was salvaged.
    Failed,
    /// No chunk arrived within the idle timeout.
    Abandoned,
}

pub struct StreamDecoder {
    platform: Platform,
    dispatcher: Dispatcher,
    idle_timeout: Option<Duration>,
    progress_every_chars: usize,
}

impl StreamDecoder {
    pub fn new(platform: Platform, dispatcher: Dispatcher, config: &CaptureConfig) -> Self {
        let idle_timeout = match config.stream_idle_timeout_ms {
            0 => None,
            _ => Some(config.stream_idle_timeout()),
        };
        Self {
            platform,
            dispatcher,
            idle_timeout,
            progress_every_chars: config.progress_every_chars,
        }
    }

    /// Decode `body` to completion.
    pub async fn run(&self, mut body: ByteStream, mut dialect: Box<dyn StreamDialect>) -> Outcome {
        let started = Instant::now();
        let mut run = RunState::default();
        let mut framer = Framer::new(dialect.framing());

        loop {
            let next = match self.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, body.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        self.abandon(dialect.draft(), limit);
                        return Outcome::Abandoned;
                    }
                },
                None => body.next().await,
            };

            let chunk = match next {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    warn!("{} stream read failed: {}", self.platform, e);
                    self.finish(dialect.draft(), &run);
                    return Outcome::Failed;
                }
                None => break,
            };

            for record in framer.push(&chunk) {
                if self.apply(dialect.as_mut(), &record, &mut run, started) {
                    self.finish(dialect.draft(), &run);
                    return Outcome::Completed;
                }
            }
        }

        if let Some(record) = framer.finish() {
            if self.apply(dialect.as_mut(), &record, &mut run, started) {
                self.finish(dialect.draft(), &run);
                return Outcome::Completed;
            }
        }
        debug!("{} stream ended without a terminal record", self.platform);
        self.finish(dialect.draft(), &run);
        Outcome::Ended
    }

    /// Feed one record. Returns true on a terminal record.
    fn apply(
        &self,
        dialect: &mut dyn StreamDialect,
        record: &str,
        run: &mut RunState,
        started: Instant,
    ) -> bool {
        match dialect.feed(record) {
            Step::Terminal => true,
            Step::Thinking => {
                run.thinking_seen = true;
                false
            }
            Step::Delta => {
                if run.thinking_seen && run.thinking_time_ms.is_none() {
                    run.thinking_time_ms = Some(started.elapsed().as_millis() as u64);
                }
                let chars = dialect.draft().text.chars().count();
                let grown = chars.saturating_sub(run.emitted_chars);
                if grown > 0 && grown >= self.progress_every_chars {
                    run.emitted_chars = chars;
                    self.emit_response(dialect.draft(), run, false);
                }
                false
            }
            Step::Meta | Step::Ignored => false,
        }
    }

    fn finish(&self, draft: &Draft, run: &RunState) {
        self.emit_response(draft, run, true);
    }

    fn emit_response(&self, draft: &Draft, run: &RunState, is_complete: bool) {
        self.dispatcher
            .emit(CanonicalEvent::AssistantResponse(AssistantResponseEvent {
                platform: Some(self.platform),
                accumulated_text: draft.text.clone(),
                is_complete,
                thinking_time_ms: run.thinking_time_ms,
                message_id: draft.message_id.clone(),
                conversation_id: draft.conversation_id.clone(),
                model: draft.model.clone(),
                parent_message_id: draft.parent_message_id.clone(),
                create_time: draft.create_time,
            }));
    }

    fn abandon(&self, draft: &Draft, waited: Duration) {
        warn!(
            "{} stream stalled for {:?}, abandoning after {} chars",
            self.platform,
            waited,
            draft.text.chars().count()
        );
        self.dispatcher
            .emit(CanonicalEvent::CaptureAbandoned(CaptureAbandonedEvent {
                source: AbandonSource::Stream,
                platform: self.platform,
                message_id: draft.message_id.clone(),
                accumulated_text: draft.text.clone(),
                waited_ms: waited.as_millis() as u64,
            }));
    }
}

#[derive(Debug, Default)]
struct RunState {
    thinking_seen: bool,
    thinking_time_ms: Option<u64>,
    emitted_chars: usize,
}

/// Non-empty string at `value`, owned.
pub(crate) fn str_field(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatwire_core::MemorySink;
    use chatwire_core::Error;

    fn body(parts: Vec<&'static str>) -> ByteStream {
        let items: Vec<chatwire_core::Result<Vec<u8>>> =
            parts.into_iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        Box::pin(futures::stream::iter(items))
    }

    fn responses(sink: &MemorySink) -> Vec<AssistantResponseEvent> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                CanonicalEvent::AssistantResponse(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    fn decoder(config: &CaptureConfig) -> (StreamDecoder, std::sync::Arc<MemorySink>) {
        let dispatcher = Dispatcher::new();
        let sink = MemorySink::new();
        dispatcher.subscribe(sink.clone());
        (StreamDecoder::new(Platform::Mistral, dispatcher, config), sink)
    }

    #[tokio::test]
    async fn test_progressive_then_final() {
        let (dec, sink) = decoder(&CaptureConfig::default());
        let outcome = dec
            .run(
                body(vec!["0:\"Hel\"\n0:\"lo\"\n", "d:{}\n"]),
                Box::new(MistralDialect::new()),
            )
            .await;
        assert_eq!(outcome, Outcome::Completed);

        let events = responses(&sink);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].accumulated_text, "Hel");
        assert!(!events[0].is_complete);
        assert_eq!(events[2].accumulated_text, "Hello");
        assert!(events[2].is_complete);
    }

    #[tokio::test]
    async fn test_progress_cadence() {
        let config = CaptureConfig {
            progress_every_chars: 4,
            ..CaptureConfig::default()
        };
        let (dec, sink) = decoder(&config);
        dec.run(
            body(vec!["0:\"ab\"\n0:\"cd\"\n0:\"e\"\n"]),
            Box::new(MistralDialect::new()),
        )
        .await;
        let events = responses(&sink);
        // One progressive at 4 chars, then the final at stream end.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].accumulated_text, "abcd");
        assert_eq!(events[1].accumulated_text, "abcde");
        assert!(events[1].is_complete);
    }

    #[tokio::test]
    async fn test_read_error_salvages_text() {
        let (dec, sink) = decoder(&CaptureConfig::default());
        let items: Vec<chatwire_core::Result<Vec<u8>>> = vec![
            Ok(b"0:\"partial\"\n".to_vec()),
            Err(Error::Stream("connection reset".into())),
        ];
        let outcome = dec
            .run(Box::pin(futures::stream::iter(items)), Box::new(MistralDialect::new()))
            .await;
        assert_eq!(outcome, Outcome::Failed);
        let last = responses(&sink).pop().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.accumulated_text, "partial");
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_abandons() {
        let config = CaptureConfig {
            stream_idle_timeout_ms: 1_000,
            ..CaptureConfig::default()
        };
        let (dec, sink) = decoder(&config);
        let stalled = async_stream::stream! {
            yield Ok::<Vec<u8>, Error>(b"0:\"half\"\n".to_vec());
            futures::future::pending::<()>().await;
        };
        let outcome = dec.run(Box::pin(stalled), Box::new(MistralDialect::new())).await;
        assert_eq!(outcome, Outcome::Abandoned);

        assert_eq!(sink.count("capture-abandoned"), 1);
        assert!(responses(&sink).iter().all(|r| !r.is_complete));
        match sink.events().last() {
            Some(CanonicalEvent::CaptureAbandoned(a)) => {
                assert_eq!(a.source, AbandonSource::Stream);
                assert_eq!(a.accumulated_text, "half");
                assert_eq!(a.waited_ms, 1_000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_dialect_for_platforms() {
        assert!(dialect_for(Platform::ChatGPT).is_some());
        assert!(dialect_for(Platform::Mistral).is_some());
        assert!(dialect_for(Platform::Copilot).is_none());
    }
}
