//! The interception port: the one seam with the host's fetch primitive.
//!
//! The host exposes its outgoing-request function as a [`FetchDelegate`]
//! stored in an [`InterceptionPort`]. Installing interception replaces the
//! stored delegate with a wrapper around it; uninstalling puts the exact
//! original `Arc` back.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chatwire_core::{Error, Result};
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use tracing::info;

/// Streamed response body. Each item is one chunk as delivered by the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

pub type FetchFuture = BoxFuture<'static, Result<HttpResponse>>;

/// Outgoing request as seen by the host's fetch primitive.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: &serde_json::Value) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body.to_string().into_bytes()),
        }
    }
}

pub enum Body {
    Full(Vec<u8>),
    Stream(ByteStream),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream"),
        }
    }
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Body::Full(body.to_string().into_bytes()),
        }
    }

    pub fn streaming(status: u16, content_type: &str, body: ByteStream) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: Body::Stream(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    /// Read the whole body. Consumes the response.
    pub async fn bytes(self) -> Result<Vec<u8>> {
        match self.body {
            Body::Full(bytes) => Ok(bytes),
            Body::Stream(stream) => collect_stream(stream).await,
        }
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes).map_err(|e| Error::Parse(e.to_string()))
    }
}

pub async fn collect_stream(mut stream: ByteStream) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// The host's outgoing-request primitive.
pub trait FetchDelegate: Send + Sync {
    fn fetch(&self, request: HttpRequest) -> FetchFuture;
}

/// Holds the delegate the host page calls through, plus the original while
/// a wrapper is installed.
pub struct InterceptionPort {
    current: RwLock<Arc<dyn FetchDelegate>>,
    original: Mutex<Option<Arc<dyn FetchDelegate>>>,
}

impl InterceptionPort {
    pub fn new(delegate: Arc<dyn FetchDelegate>) -> Self {
        Self {
            current: RwLock::new(delegate),
            original: Mutex::new(None),
        }
    }

    /// The delegate the host currently calls.
    pub fn current(&self) -> Arc<dyn FetchDelegate> {
        self.current.read().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.original.lock().is_some()
    }

    /// Replace the current delegate with `wrap(current)`.
    /// Returns false (and leaves everything as is) if already installed.
    pub fn install<W>(&self, wrap: W) -> bool
    where
        W: FnOnce(Arc<dyn FetchDelegate>) -> Arc<dyn FetchDelegate>,
    {
        let mut original = self.original.lock();
        if original.is_some() {
            return false;
        }
        let mut current = self.current.write();
        let saved = current.clone();
        *current = wrap(saved.clone());
        *original = Some(saved);
        info!("Fetch interception installed");
        true
    }

    /// Restore the exact original delegate. Returns false if nothing was installed.
    pub fn uninstall(&self) -> bool {
        let mut original = self.original.lock();
        match original.take() {
            Some(saved) => {
                *self.current.write() = saved;
                info!("Fetch interception removed");
                true
            }
            None => false,
        }
    }

    /// Issue a request the way the host page would.
    pub fn fetch(&self, request: HttpRequest) -> FetchFuture {
        self.current().fetch(request)
    }
}

/// Canned response for [`ScriptedFetch`].
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub content_type: String,
    /// Body chunks, delivered in order. A single chunk for plain bodies.
    pub chunks: Vec<Vec<u8>>,
    /// Delay before each chunk after the first.
    pub chunk_delay: Duration,
    pub streaming: bool,
    /// Fail the request itself (no response at all) with this message.
    pub failure: Option<String>,
}

impl ScriptedResponse {
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            chunks: vec![body.to_string().into_bytes()],
            chunk_delay: Duration::ZERO,
            streaming: false,
            failure: None,
        }
    }

    pub fn event_stream(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream".to_string(),
            chunks,
            chunk_delay: Duration::ZERO,
            streaming: true,
            failure: None,
        }
    }

    /// A request that fails before any response, like a dropped connection.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::json(0, &serde_json::Value::Null)
        }
    }

    fn into_response(self) -> HttpResponse {
        if !self.streaming {
            return HttpResponse {
                status: self.status,
                headers: vec![("content-type".to_string(), self.content_type)],
                body: Body::Full(self.chunks.concat()),
            };
        }
        let delay = self.chunk_delay;
        let chunks = self.chunks;
        let stream = async_stream::stream! {
            for (i, chunk) in chunks.into_iter().enumerate() {
                if i > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<Vec<u8>, Error>(chunk);
            }
        };
        HttpResponse::streaming(self.status, &self.content_type, Box::pin(stream))
    }
}

/// In-memory fetch delegate serving canned responses keyed by
/// `METHOD path+query`. Unscripted requests get a 404.
#[derive(Default)]
pub struct ScriptedFetch {
    routes: RwLock<HashMap<String, ScriptedResponse>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedFetch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, method: &str, url: &str, response: ScriptedResponse) {
        self.routes.write().insert(route_key(method, url), response);
    }

    /// Requests received so far, in order.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }
}

impl FetchDelegate for ScriptedFetch {
    fn fetch(&self, request: HttpRequest) -> FetchFuture {
        let scripted = self
            .routes
            .read()
            .get(&route_key(&request.method, &request.url))
            .cloned();
        self.calls.lock().push(request);
        Box::pin(async move {
            match scripted {
                Some(ScriptedResponse {
                    failure: Some(message),
                    ..
                }) => Err(Error::Fetch(message)),
                Some(r) => Ok(r.into_response()),
                None => Ok(HttpResponse::json(
                    404,
                    &serde_json::json!({"detail": "Not Found"}),
                )),
            }
        })
    }
}

fn route_key(method: &str, url: &str) -> String {
    let target = crate::endpoints::split_path_query(url)
        .map(|(path, query)| match query {
            Some(q) => format!("{}?{}", path, q),
            None => path,
        })
        .unwrap_or_else(|| url.to_string());
    format!("{} {}", method.to_ascii_uppercase(), target)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Wrapper {
        inner: Arc<dyn FetchDelegate>,
    }

    impl FetchDelegate for Wrapper {
        fn fetch(&self, request: HttpRequest) -> FetchFuture {
            self.inner.fetch(request)
        }
    }

    #[test]
    fn test_install_uninstall_restores_original() {
        let original: Arc<dyn FetchDelegate> = ScriptedFetch::new();
        let port = InterceptionPort::new(original.clone());

        assert!(port.install(|inner| Arc::new(Wrapper { inner })));
        assert!(!Arc::ptr_eq(&port.current(), &original));
        assert!(!port.install(|inner| Arc::new(Wrapper { inner })));

        assert!(port.uninstall());
        assert!(Arc::ptr_eq(&port.current(), &original));
        assert!(!port.uninstall());
    }

    #[tokio::test]
    async fn test_scripted_fetch_routes() {
        let fetch = ScriptedFetch::new();
        fetch.route(
            "GET",
            "/backend-api/me",
            ScriptedResponse::json(200, &serde_json::json!({"id": "u1"})),
        );
        let port = InterceptionPort::new(fetch.clone());

        let ok = port
            .fetch(HttpRequest::get("https://chatgpt.com/backend-api/me"))
            .await
            .unwrap();
        assert_eq!(ok.status, 200);
        assert_eq!(ok.text().await.unwrap(), r#"{"id":"u1"}"#);

        let missing = port.fetch(HttpRequest::get("/nope")).await.unwrap();
        assert_eq!(missing.status, 404);
        assert_eq!(fetch.calls().len(), 2);
    }
}
