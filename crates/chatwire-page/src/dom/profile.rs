//! Per-platform DOM profiles: where messages live and how to read them.

use chatwire_core::{Platform, Result, Role};

use super::Selector;

/// How message containers are found, identified and read on one platform.
#[derive(Debug, Clone)]
pub struct DomProfile {
    pub platform: Platform,
    /// Candidate message containers.
    pub container: Selector,
    /// Attribute carrying `<id><suffix>`.
    pub marker_attribute: String,
    pub user_suffix: String,
    pub assistant_suffix: String,
    /// First match holds the user text; the container text is the fallback.
    pub user_text: Selector,
    /// Every match is one assistant text block, joined with newlines.
    pub assistant_text: Selector,
    /// Present anywhere on the page while a response is generating.
    pub generation_indicator: Selector,
    /// Model name reported for extracted messages.
    pub model: String,
}

impl DomProfile {
    pub fn copilot() -> Result<Self> {
        Ok(Self {
            platform: Platform::Copilot,
            container: Selector::parse("[data-tabster]")?,
            marker_attribute: "aria-labelledby".to_string(),
            user_suffix: "-user-message".to_string(),
            assistant_suffix: "-author".to_string(),
            user_text: Selector::parse(".font-ligatures-none")?,
            assistant_text: Selector::parse("p span.font-ligatures-none")?,
            generation_indicator: Selector::parse(r#"button[data-testid="stop-button"]"#)?,
            model: "copilot".to_string(),
        })
    }

    /// The shipped profile for `platform`. Only Copilot renders messages that
    /// are not also visible on the network.
    pub fn for_platform(platform: Platform) -> Option<Self> {
        match platform {
            Platform::Copilot => Self::copilot().ok(),
            _ => None,
        }
    }

    /// Role and raw message id from a marker attribute value.
    ///
    /// The id is the text before the first occurrence of the suffix; the user
    /// suffix is checked first.
    pub fn identify(&self, marker: &str) -> Option<(Role, String)> {
        let (role, idx) = if let Some(idx) = marker.find(&self.user_suffix) {
            (Role::User, idx)
        } else if let Some(idx) = marker.find(&self.assistant_suffix) {
            (Role::Assistant, idx)
        } else {
            return None;
        };
        let id = &marker[..idx];
        if id.is_empty() {
            return None;
        }
        Some((role, id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_marker() {
        let p = DomProfile::copilot().unwrap();
        assert_eq!(
            p.identify("m1-user-message"),
            Some((Role::User, "m1".to_string()))
        );
        assert_eq!(
            p.identify("Xy7-author"),
            Some((Role::Assistant, "Xy7".to_string()))
        );
        assert_eq!(p.identify("-author"), None);
        assert_eq!(p.identify("sidebar-heading"), None);
    }

    #[test]
    fn test_only_copilot_ships() {
        assert!(DomProfile::for_platform(Platform::Copilot).is_some());
        assert!(DomProfile::for_platform(Platform::ChatGPT).is_none());
        assert!(DomProfile::for_platform(Platform::Unknown).is_none());
    }
}
