//! Shared data model: exchanges, messages, conversation state.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Semantic category of an intercepted endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointCategory {
    UserInfo,
    ConversationList,
    SpecificConversation,
    ChatCompletion,
}

impl EndpointCategory {
    /// Matching order: most specific first, so a completion URL that is a
    /// textual prefix of a list URL is not misclassified.
    pub const PRECEDENCE: [EndpointCategory; 4] = [
        Self::SpecificConversation,
        Self::UserInfo,
        Self::ConversationList,
        Self::ChatCompletion,
    ];

    /// Canonical event name for this category.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::UserInfo => "user-info",
            Self::ConversationList => "conversation-list",
            Self::SpecificConversation => "specific-conversation",
            Self::ChatCompletion => "chat-completion",
        }
    }
}

impl std::fmt::Display for EndpointCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_name())
    }
}

/// One classified request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedExchange {
    pub url: String,
    pub method: String,
    pub category: EndpointCategory,
    pub request_body: Option<serde_json::Value>,
    pub response_body: Option<serde_json::Value>,
    pub is_streaming: bool,
    pub timestamp: DateTime<Utc>,
    /// Conversation id captured from the URL by the endpoint pattern.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_conversation_id: Option<String>,
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn from_platform_role(role: &str) -> Option<Self> {
        match role {
            "user" | "human" => Some(Self::User),
            "assistant" | "bot" | "ai" => Some(Self::Assistant),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A normalized chat message. Built at extraction time and handed off;
/// nothing in the core retains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub model: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub parent_message_id: Option<String>,
}

/// Conversation header carried by `conversation-loaded`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub title: String,
    pub platform: Platform,
}

/// The session's single active conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub current_conversation_id: Option<String>,
    pub platform: Platform,
    pub last_updated: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(platform: Platform) -> Self {
        Self {
            current_conversation_id: None,
            platform,
            last_updated: Utc::now(),
        }
    }
}

/// Message ids already handed to collaborators this session.
///
/// Shared between the DOM extractor and the network adapters; a message id
/// passes [`ProcessedIds::claim`] at most once.
#[derive(Debug, Clone, Default)]
pub struct ProcessedIds {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl ProcessedIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` processed. Returns false if it already was.
    pub fn claim(&self, id: &str) -> bool {
        self.inner.lock().insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
