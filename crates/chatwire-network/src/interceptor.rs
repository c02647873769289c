//! Request/response interception on the fetch port.
//!
//! The wrapper never alters the outgoing request and always hands the host
//! the original response (for streams, a branch yielding the same bytes).
//! Everything it does on the side is best-effort: failures are logged and
//! swallowed.

use std::sync::Arc;

use chatwire_core::events::ChatCompletionEvent;
use chatwire_core::{
    CanonicalEvent, CaptureConfig, Dispatcher, EndpointCategory, InterceptedExchange, Platform,
    Result,
};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use crate::endpoints::EndpointTable;
use crate::port::{
    collect_stream, Body, FetchDelegate, FetchFuture, HttpRequest, HttpResponse, InterceptionPort,
};
use crate::stream::{dialect_for, StreamDecoder};
use crate::tee::clone_body;

struct Shared {
    platform: Platform,
    table: Arc<EndpointTable>,
    dispatcher: Dispatcher,
    config: CaptureConfig,
}

/// Classifies traffic flowing through an [`InterceptionPort`] and turns it
/// into canonical events.
#[derive(Clone)]
pub struct Interceptor {
    shared: Arc<Shared>,
}

impl Interceptor {
    pub fn new(
        platform: Platform,
        table: Arc<EndpointTable>,
        dispatcher: Dispatcher,
        config: CaptureConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                platform,
                table,
                dispatcher,
                config,
            }),
        }
    }

    /// Wrap the port's delegate. No-op (returns false) if something is
    /// already installed on it.
    pub fn install(&self, port: &InterceptionPort) -> bool {
        let shared = self.shared.clone();
        port.install(move |original| {
            Arc::new(InterceptedFetch { original, shared }) as Arc<dyn FetchDelegate>
        })
    }

    /// Put the exact original delegate back.
    pub fn uninstall(&self, port: &InterceptionPort) -> bool {
        port.uninstall()
    }

    pub fn platform(&self) -> Platform {
        self.shared.platform
    }
}

struct InterceptedFetch {
    original: Arc<dyn FetchDelegate>,
    shared: Arc<Shared>,
}

impl FetchDelegate for InterceptedFetch {
    fn fetch(&self, request: HttpRequest) -> FetchFuture {
        let shared = self.shared.clone();
        let classification = shared
            .table
            .classify(shared.platform, &request.url, &request.method);

        let Some(classification) = classification else {
            return self.original.fetch(request);
        };

        let url = request.url.clone();
        let method = request.method.to_ascii_uppercase();
        let request_body = parse_request_body(request.body.as_deref());
        let pending = self.original.fetch(request);

        Box::pin(async move {
            let mut response = pending.await?;
            if !response.is_success() {
                debug!("{} {} returned {}, skipping", method, url, response.status);
                return Ok(response);
            }

            let category = classification.category;
            let seen = Seen {
                url,
                method,
                category,
                request_body,
                url_conversation_id: classification.capture,
            };
            if let Err(e) = observe(&shared, seen, &mut response).await {
                warn!("Interception of {} response failed: {}", category, e);
            }
            Ok(response)
        })
    }
}

/// Request-side facts about a classified call.
struct Seen {
    url: String,
    method: String,
    category: EndpointCategory,
    request_body: Option<Value>,
    url_conversation_id: Option<String>,
}

async fn observe(shared: &Shared, seen: Seen, response: &mut HttpResponse) -> Result<()> {
    let is_streaming = matches!(response.body, Body::Stream(_))
        && is_stream_content_type(response.content_type());

    if seen.category == EndpointCategory::ChatCompletion {
        shared
            .dispatcher
            .emit(CanonicalEvent::ChatCompletion(ChatCompletionEvent {
                platform: shared.platform,
                url: seen.url.clone(),
                request_body: seen.request_body.clone(),
                url_conversation_id: seen.url_conversation_id.clone(),
            }));
        if shared.config.decode_streams {
            spawn_decoder(shared, &seen, response);
        }
        return Ok(());
    }

    if is_streaming {
        debug!("Streaming {} response not captured", seen.category);
        return Ok(());
    }

    let bytes = collect_stream(clone_body(response)).await?;
    let response_body: Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => {
            debug!("{} body is not JSON: {}", seen.category, e);
            return Ok(());
        }
    };

    let exchange = InterceptedExchange {
        url: seen.url,
        method: seen.method,
        category: seen.category,
        request_body: seen.request_body,
        response_body: Some(response_body),
        is_streaming: false,
        timestamp: Utc::now(),
        url_conversation_id: seen.url_conversation_id,
    };
    if let Some(event) = CanonicalEvent::classified(shared.platform, exchange) {
        shared.dispatcher.emit(event);
    }
    Ok(())
}

fn spawn_decoder(shared: &Shared, seen: &Seen, response: &mut HttpResponse) {
    if !matches!(response.body, Body::Stream(_)) {
        return;
    }
    let Some(mut dialect) = dialect_for(shared.platform) else {
        return;
    };
    if !dialect.accepts(response.content_type()) {
        debug!(
            "{} completion with content type {:?} not decoded",
            shared.platform,
            response.content_type()
        );
        return;
    }
    if !dialect.wants(seen.request_body.as_ref()) {
        debug!("{} completion is not a user turn, not decoded", shared.platform);
        return;
    }

    dialect.begin(seen.request_body.as_ref(), &seen.url);
    let branch = clone_body(response);
    let decoder = StreamDecoder::new(shared.platform, shared.dispatcher.clone(), &shared.config);
    tokio::spawn(async move {
        let outcome = decoder.run(branch, dialect).await;
        debug!("Stream decode finished: {:?}", outcome);
    });
}

fn is_stream_content_type(content_type: &str) -> bool {
    content_type.contains("text/event-stream")
}

/// Best-effort JSON parse of an outgoing body. Only object bodies are
/// considered; anything else is `None`.
fn parse_request_body(body: Option<&[u8]>) -> Option<Value> {
    let text = std::str::from_utf8(body?).ok()?;
    if !text.trim_start().starts_with('{') {
        return None;
    }
    serde_json::from_str(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Option<Value> {
        parse_request_body(Some(text.as_bytes()))
    }

    #[test]
    fn test_parse_request_body() {
        assert!(parse(r#"{"a":1}"#).is_some());
        assert!(parse("  {\"a\":1}").is_some());
        assert!(parse("a=1&b=2").is_none());
        assert!(parse("{broken").is_none());
        assert!(parse_request_body(None).is_none());
    }

    #[test]
    fn test_stream_content_types() {
        assert!(is_stream_content_type("text/event-stream; charset=utf-8"));
        assert!(!is_stream_content_type("text/plain"));
        assert!(!is_stream_content_type("application/json"));
    }
}
