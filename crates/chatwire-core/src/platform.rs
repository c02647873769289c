//! Platform identification from the page host.

use serde::{Deserialize, Serialize};

/// Supported AI chat platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[serde(rename = "chatgpt")]
    ChatGPT,
    Claude,
    Mistral,
    Copilot,
    Unknown,
}

impl Platform {
    /// All known platforms (excludes `Unknown`).
    pub fn all() -> &'static [Platform] {
        &[Self::ChatGPT, Self::Claude, Self::Mistral, Self::Copilot]
    }

    /// Hosts served by this platform. Subdomains of these also match.
    pub fn hosts(&self) -> &'static [&'static str] {
        match self {
            Self::ChatGPT => &["chatgpt.com", "chat.openai.com"],
            Self::Claude => &["claude.ai"],
            Self::Mistral => &["chat.mistral.ai"],
            Self::Copilot => &["copilot.microsoft.com"],
            Self::Unknown => &[],
        }
    }

    pub fn base_url(&self) -> &'static str {
        match self {
            Self::ChatGPT => "https://chatgpt.com",
            Self::Claude => "https://claude.ai",
            Self::Mistral => "https://chat.mistral.ai",
            Self::Copilot => "https://copilot.microsoft.com",
            Self::Unknown => "",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::ChatGPT => "chatgpt",
            Self::Claude => "claude",
            Self::Mistral => "mistral",
            Self::Copilot => "copilot",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "chatgpt" => Self::ChatGPT,
            "claude" => Self::Claude,
            "mistral" => Self::Mistral,
            "copilot" => Self::Copilot,
            _ => Self::Unknown,
        }
    }

    /// Map a hostname to its platform. Pure; the answer never changes for a
    /// given host, so callers may re-evaluate freely.
    pub fn from_hostname(hostname: &str) -> Self {
        let host = hostname.trim().trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return Self::Unknown;
        }
        Self::all()
            .iter()
            .copied()
            .find(|p| {
                p.hosts().iter().any(|known| {
                    host == *known
                        || host
                            .strip_suffix(known)
                            .is_some_and(|prefix| prefix.ends_with('.'))
                })
            })
            .unwrap_or(Self::Unknown)
    }

    /// Identify the platform from a full page address.
    pub fn from_url(address: &str) -> Self {
        url::Url::parse(address)
            .ok()
            .and_then(|u| u.host_str().map(Self::from_hostname))
            .unwrap_or(Self::Unknown)
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
