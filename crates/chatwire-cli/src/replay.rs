//! Scenario replay: drive a real capture session with scripted traffic and
//! page changes, printing every canonical event as one JSON line.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chatwire_core::{CanonicalEvent, CaptureConfig, ChannelSink};
use chatwire_network::{HttpRequest, InterceptionPort, ScriptedFetch, ScriptedResponse};
use chatwire_page::{Document, DomPort, NodeId, NodeSpec};
use chatwire_runtime::{CaptureSession, PageObserver};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

fn default_settle_ms() -> u64 {
    50
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_status() -> u16 {
    200
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub host: String,
    /// Overrides `CHATWIRE_*` environment config when present.
    #[serde(default)]
    pub config: Option<CaptureConfig>,
    /// How long the page is quiet before the next step runs.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Content rendered before capture starts.
    #[serde(default)]
    pub page: Vec<NodeSpec>,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing scenario {}", path.display()))
    }

    /// Use the config file at `path` unless the scenario carries its own.
    pub fn with_config_file(mut self, path: &Path) -> Self {
        if self.config.is_none() {
            self.config = Some(CaptureConfig::load(path));
        }
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    Navigate(String),
    /// Address change without a navigation event; later batches carry it.
    SetAddress(String),
    Route(RouteStep),
    Fetch(FetchStep),
    Insert {
        #[serde(default)]
        parent: Option<String>,
        node: NodeSpec,
    },
    Remove {
        selector: String,
    },
    SetText {
        selector: String,
        text: String,
    },
    SetAttribute {
        selector: String,
        name: String,
        value: String,
    },
    Sweep,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub content_type: Option<String>,
    /// JSON body. Takes precedence over `chunks`.
    #[serde(default)]
    pub json: Option<Value>,
    /// Streamed body, one entry per network chunk.
    #[serde(default)]
    pub chunks: Vec<String>,
    #[serde(default)]
    pub chunk_delay_ms: u64,
    /// Fail the request with this message instead of responding.
    #[serde(default)]
    pub error: Option<String>,
}

impl RouteStep {
    fn response(&self) -> ScriptedResponse {
        if let Some(message) = &self.error {
            return ScriptedResponse::network_error(message.clone());
        }
        let mut response = match &self.json {
            Some(body) => ScriptedResponse::json(self.status, body),
            None => {
                let mut r = ScriptedResponse::event_stream(
                    self.chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
                );
                r.status = self.status;
                r
            }
        };
        if let Some(ct) = &self.content_type {
            response.content_type = ct.clone();
        }
        response.chunk_delay = Duration::from_millis(self.chunk_delay_ms);
        response
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchStep {
    #[serde(default = "default_method")]
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body: Option<Value>,
}

impl FetchStep {
    fn request(&self) -> HttpRequest {
        match &self.body {
            Some(body) => {
                let mut req = HttpRequest::post_json(self.url.clone(), body);
                req.method = self.method.to_ascii_uppercase();
                req
            }
            None => {
                let mut req = HttpRequest::get(self.url.clone());
                req.method = self.method.to_ascii_uppercase();
                req
            }
        }
    }
}

struct Replay<'w, W: Write> {
    session: CaptureSession,
    fetch: Arc<ScriptedFetch>,
    port: InterceptionPort,
    doc: Document,
    observer: Option<PageObserver>,
    address: String,
    rx: UnboundedReceiver<CanonicalEvent>,
    settle: Duration,
    out: &'w mut W,
    printed: usize,
}

/// Run `scenario`, writing one JSON line per event to `out`. Returns the
/// number of events written.
pub async fn run<W: Write>(scenario: Scenario, out: &mut W) -> Result<usize> {
    let config = scenario.config.clone().unwrap_or_else(CaptureConfig::from_env);
    let session = CaptureSession::new(&scenario.host, config);
    let (sink, rx) = ChannelSink::new();
    session.subscribe(sink);

    let fetch = ScriptedFetch::new();
    let port = InterceptionPort::new(fetch.clone());
    session.install_network(&port);

    let mut doc = Document::new();
    let root = doc.root();
    for spec in &scenario.page {
        doc.insert(root, spec)?;
    }
    doc.take_records();
    let observer = session.observe_page(&doc);

    info!(
        "Replaying {} steps against {}",
        scenario.steps.len(),
        session.platform()
    );
    let mut replay = Replay {
        address: format!("https://{}/", scenario.host),
        session,
        fetch,
        port,
        doc,
        observer,
        rx,
        settle: Duration::from_millis(scenario.settle_ms),
        out,
        printed: 0,
    };
    replay.drain().await?;
    for (i, step) in scenario.steps.iter().enumerate() {
        debug!("step {}: {:?}", i, step);
        replay
            .apply(step)
            .await
            .with_context(|| format!("step {}", i))?;
        replay.drain().await?;
    }
    replay.session.uninstall_network(&replay.port);
    Ok(replay.printed)
}

impl<'w, W: Write> Replay<'w, W> {
    async fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Navigate(url) => {
                self.address = url.clone();
                self.session.navigate(url);
            }
            Step::SetAddress(url) => self.address = url.clone(),
            Step::Route(route) => self.fetch.route(&route.method, &route.url, route.response()),
            Step::Fetch(f) => match self.port.fetch(f.request()).await {
                Ok(response) => {
                    let status = response.status;
                    let body = response.bytes().await?;
                    info!("{} {} -> {} ({} bytes)", f.method, f.url, status, body.len());
                }
                Err(e) => warn!("{} {} failed: {}", f.method, f.url, e),
            },
            Step::Insert { parent, node } => {
                let parent = match parent {
                    Some(sel) => self.select(sel)?,
                    None => self.doc.root(),
                };
                self.doc.insert(parent, node)?;
                self.deliver();
            }
            Step::Remove { selector } => {
                let node = self.select(selector)?;
                self.doc.remove(node)?;
                self.deliver();
            }
            Step::SetText { selector, text } => {
                let node = self.select(selector)?;
                self.doc.set_text(node, text)?;
                self.deliver();
            }
            Step::SetAttribute {
                selector,
                name,
                value,
            } => {
                let node = self.select(selector)?;
                self.doc.set_attribute(node, name, value)?;
                self.deliver();
            }
            Step::Sweep => {
                if let Some(observer) = &self.observer {
                    observer.sweep(&self.doc);
                }
            }
        }
        Ok(())
    }

    fn select(&self, selector: &str) -> Result<NodeId> {
        self.doc
            .find(selector)?
            .ok_or_else(|| anyhow!("no element matches {:?}", selector))
    }

    /// Hand the pending mutation batch to the page observer.
    fn deliver(&mut self) {
        let records = self.doc.take_records();
        if let Some(observer) = &self.observer {
            observer.on_batch(&self.doc, &self.address, &records);
        }
    }

    /// Print events until none arrives for the settle period.
    async fn drain(&mut self) -> Result<()> {
        while let Ok(Some(event)) = tokio::time::timeout(self.settle, self.rx.recv()).await {
            writeln!(self.out, "{}", serde_json::to_string(&event)?)?;
            self.printed += 1;
        }
        Ok(())
    }
}
