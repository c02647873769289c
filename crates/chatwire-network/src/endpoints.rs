//! Per-platform endpoint tables and URL classification.
//!
//! Classification runs on path+query only, so absolute and relative URLs of
//! the same endpoint agree regardless of origin.

use std::collections::HashMap;

use chatwire_core::{EndpointCategory, Platform};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// How a pattern recognizes a URL.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Substring of path+query.
    Literal(&'static str),
    /// Regex over path+query; group 1, when present, is the capture.
    Pattern(Regex),
    /// Named query parameter with a non-empty value, optionally only on
    /// paths starting with `path`. The value is the capture.
    QueryParam {
        path: Option<&'static str>,
        name: &'static str,
    },
}

impl Matcher {
    fn regex(re: &str) -> Self {
        Self::Pattern(Regex::new(re).expect("endpoint regex"))
    }

    /// Match against a split path/query. `Some(capture)` on match.
    fn matches(&self, path: &str, query: Option<&str>) -> Option<Option<String>> {
        match self {
            Matcher::Literal(needle) => {
                let full = join_path_query(path, query);
                full.contains(needle).then_some(None)
            }
            Matcher::Pattern(re) => {
                let full = join_path_query(path, query);
                re.captures(&full)
                    .map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
            }
            Matcher::QueryParam { path: scope, name } => {
                if let Some(prefix) = scope {
                    if !path.starts_with(prefix) {
                        return None;
                    }
                }
                query_param(query?, name).map(Some)
            }
        }
    }
}

/// One row of an endpoint table.
#[derive(Debug, Clone)]
pub struct EndpointPattern {
    pub platform: Platform,
    pub category: EndpointCategory,
    pub matcher: Matcher,
    /// Restricts the pattern to one HTTP method, for endpoints whose URL is
    /// shared between categories.
    pub method: Option<&'static str>,
}

impl EndpointPattern {
    fn new(platform: Platform, category: EndpointCategory, matcher: Matcher) -> Self {
        Self {
            platform,
            category,
            matcher,
            method: None,
        }
    }

    fn with_method(mut self, method: &'static str) -> Self {
        self.method = Some(method);
        self
    }
}

/// Result of a successful classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: EndpointCategory,
    /// Capture group or query value, typically a conversation id.
    pub capture: Option<String>,
}

/// Immutable set of endpoint patterns, grouped by platform.
#[derive(Debug, Clone)]
pub struct EndpointTable {
    patterns: HashMap<Platform, Vec<EndpointPattern>>,
}

static BUILTIN: Lazy<EndpointTable> = Lazy::new(EndpointTable::build_builtin);

impl EndpointTable {
    /// The shipped table for every supported platform.
    pub fn builtin() -> &'static EndpointTable {
        &BUILTIN
    }

    pub fn from_patterns(patterns: Vec<EndpointPattern>) -> Self {
        let mut grouped: HashMap<Platform, Vec<EndpointPattern>> = HashMap::new();
        for p in patterns {
            grouped.entry(p.platform).or_default().push(p);
        }
        Self { patterns: grouped }
    }

    fn build_builtin() -> Self {
        use EndpointCategory::*;
        use Platform::*;

        let claude_org = r"/api/organizations/[a-f0-9-]+/chat_conversations";
        Self::from_patterns(vec![
            // ChatGPT
            EndpointPattern::new(ChatGPT, UserInfo, Matcher::Literal("/backend-api/me")),
            EndpointPattern::new(
                ChatGPT,
                ConversationList,
                Matcher::Literal("/backend-api/conversations"),
            ),
            EndpointPattern::new(
                ChatGPT,
                SpecificConversation,
                Matcher::regex(r"/backend-api/conversation/([a-f0-9-]+)$"),
            ),
            EndpointPattern::new(
                ChatGPT,
                ChatCompletion,
                Matcher::Literal("/backend-api/conversation"),
            )
            .with_method("POST"),
            // Claude
            EndpointPattern::new(Claude, UserInfo, Matcher::Literal("/api/user")),
            EndpointPattern::new(
                Claude,
                ConversationList,
                Matcher::regex(&format!(r"{}(?:\?|$)", claude_org)),
            ),
            EndpointPattern::new(
                Claude,
                SpecificConversation,
                Matcher::regex(&format!(r"{}/([a-f0-9-]+)(?:\?|$)", claude_org)),
            ),
            EndpointPattern::new(
                Claude,
                ChatCompletion,
                Matcher::regex(&format!(r"{}/([a-f0-9-]+)/completion", claude_org)),
            ),
            // Mistral
            EndpointPattern::new(
                Mistral,
                UserInfo,
                Matcher::Literal("/api/trpc/user.session"),
            ),
            EndpointPattern::new(
                Mistral,
                ConversationList,
                Matcher::Literal("/api/trpc/chat.list"),
            ),
            EndpointPattern::new(
                Mistral,
                SpecificConversation,
                Matcher::QueryParam {
                    path: Some("/api/trpc/message.all"),
                    name: "chatId",
                },
            ),
            EndpointPattern::new(
                Mistral,
                ChatCompletion,
                Matcher::regex(r"^/api/chat(?:\?|$)"),
            ),
            // Copilot: list and create share a URL, the method tells them apart.
            EndpointPattern::new(Copilot, UserInfo, Matcher::Literal("/c/api/user")),
            EndpointPattern::new(
                Copilot,
                ConversationList,
                Matcher::Literal("/c/api/conversations"),
            )
            .with_method("GET"),
            EndpointPattern::new(
                Copilot,
                SpecificConversation,
                Matcher::regex(r"/c/api/conversations/([a-zA-Z0-9-]+)/history"),
            ),
            EndpointPattern::new(
                Copilot,
                ChatCompletion,
                Matcher::Literal("/c/api/conversations"),
            )
            .with_method("POST"),
        ])
    }

    pub fn patterns_for(&self, platform: Platform) -> &[EndpointPattern] {
        self.patterns
            .get(&platform)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Classify a request URL for `platform`.
    ///
    /// Categories are tried in [`EndpointCategory::PRECEDENCE`] order; the
    /// first hit wins. `None` simply means the URL is not of interest.
    pub fn classify(&self, platform: Platform, url: &str, method: &str) -> Option<Classification> {
        let patterns = self.patterns.get(&platform)?;
        let (path, query) = split_path_query(url)?;

        for category in EndpointCategory::PRECEDENCE {
            for pattern in patterns.iter().filter(|p| p.category == category) {
                if let Some(required) = pattern.method {
                    if !required.eq_ignore_ascii_case(method) {
                        continue;
                    }
                }
                if let Some(capture) = pattern.matcher.matches(&path, query.as_deref()) {
                    debug!("{} {} classified as {}", platform, path, category);
                    return Some(Classification { category, capture });
                }
            }
        }
        None
    }
}

/// Reduce an absolute or relative URL to (path, query).
pub fn split_path_query(url: &str) -> Option<(String, Option<String>)> {
    static BASE: Lazy<url::Url> =
        Lazy::new(|| url::Url::parse("http://relative.invalid/").expect("base url"));

    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = match url::Url::parse(trimmed) {
        Ok(u) => u,
        Err(_) => BASE.join(trimmed).ok()?,
    };
    Some((
        parsed.path().to_string(),
        parsed.query().map(str::to_string),
    ))
}

fn join_path_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(q) => format!("{}?{}", path, q),
        None => path.to_string(),
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}
