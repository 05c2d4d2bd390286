//! Agent configuration domain types.
//!
//! An [`AgentProfile`] is loaded once when a call starts and treated as
//! immutable for the lifetime of the session.

use serde::{Deserialize, Serialize};

/// Optional per-agent outcome taxonomy for post-call classification.
///
/// When present, the end-of-call analyzer asks the LLM to pick a
/// disposition title and sub-disposition from this list; anything outside
/// the taxonomy is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispositionTaxonomy {
    pub title: String,
    #[serde(default)]
    pub subs: Vec<String>,
}

impl DispositionTaxonomy {
    /// Case-insensitive title match.
    #[must_use]
    pub fn matches_title(&self, candidate: &str) -> bool {
        self.title.eq_ignore_ascii_case(candidate.trim())
    }

    /// Find the canonical sub-disposition for a candidate, case-insensitively.
    #[must_use]
    pub fn canonical_sub(&self, candidate: &str) -> Option<&str> {
        let candidate = candidate.trim();
        self.subs
            .iter()
            .find(|s| s.eq_ignore_ascii_case(candidate))
            .map(String::as_str)
    }
}

/// Immutable agent configuration resolved at call start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    /// Database id of the agent.
    pub id: i64,
    /// Owning client (billing account) id.
    pub client_id: i64,
    /// Display name, used only for logging.
    pub name: String,
    /// The agent's own E.164 calling number, used for call routing.
    pub calling_number: String,
    /// LLM system prompt.
    pub system_prompt: String,
    /// First message spoken when the call connects.
    pub first_message: String,
    /// TTS voice identifier.
    pub voice_id: String,
    /// BCP-47 language tag for ASR/TTS and transcript entries.
    pub language: String,
    /// Selected ASR vendor model (e.g. `"nova-2"`).
    pub asr_model: String,
    /// Selected LLM vendor model.
    pub llm_model: String,
    /// Whether a follow-up message may be dispatched after the call.
    pub messaging_enabled: bool,
    /// Messaging endpoint URL (required when messaging is enabled).
    #[serde(default)]
    pub messaging_url: Option<String>,
    /// Link included in the dispatched message.
    #[serde(default)]
    pub messaging_link: Option<String>,
    /// Optional disposition taxonomy for finer outcome classification.
    #[serde(default)]
    pub dispositions: Vec<DispositionTaxonomy>,
}

impl AgentProfile {
    /// Find a taxonomy entry whose title matches, case-insensitively.
    #[must_use]
    pub fn find_disposition(&self, title: &str) -> Option<&DispositionTaxonomy> {
        self.dispositions.iter().find(|d| d.matches_title(title))
    }

    /// Whether messaging dispatch is fully configured.
    #[must_use]
    pub fn messaging_ready(&self) -> bool {
        self.messaging_enabled
            && self.messaging_url.as_deref().is_some_and(|u| !u.is_empty())
            && self.messaging_link.as_deref().is_some_and(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taxonomy() -> DispositionTaxonomy {
        DispositionTaxonomy {
            title: "Interested".to_string(),
            subs: vec!["Callback Requested".to_string(), "Visit Planned".to_string()],
        }
    }

    #[test]
    fn title_match_is_case_insensitive() {
        let t = taxonomy();
        assert!(t.matches_title("interested"));
        assert!(t.matches_title(" INTERESTED "));
        assert!(!t.matches_title("not interested"));
    }

    #[test]
    fn canonical_sub_returns_stored_casing() {
        let t = taxonomy();
        assert_eq!(t.canonical_sub("callback requested"), Some("Callback Requested"));
        assert_eq!(t.canonical_sub("walk-in"), None);
    }
}
