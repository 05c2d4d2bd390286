//! Lead status taxonomy.
//!
//! The fixed set of codes used to classify the commercial outcome of a
//! call. The post-call classifier validates LLM output against this enum
//! and falls back to a safe default on anything unrecognized.

use serde::{Deserialize, Serialize};

/// Commercial outcome classification for a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Very very interested — the strongest positive signal.
    Vvi,
    Maybe,
    Enrolled,
    JunkLead,
    NotRequired,
    EnrolledOther,
    Decline,
    NotEligible,
    WrongNumber,
    HotFollowup,
    ColdFollowup,
    Schedule,
    /// No conversation took place.
    NotConnected,
}

impl LeadStatus {
    /// All valid codes, in the order they are offered to the classifier.
    pub const ALL: [Self; 13] = [
        Self::Vvi,
        Self::Maybe,
        Self::Enrolled,
        Self::JunkLead,
        Self::NotRequired,
        Self::EnrolledOther,
        Self::Decline,
        Self::NotEligible,
        Self::WrongNumber,
        Self::HotFollowup,
        Self::ColdFollowup,
        Self::Schedule,
        Self::NotConnected,
    ];

    /// The wire/database code for this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vvi => "vvi",
            Self::Maybe => "maybe",
            Self::Enrolled => "enrolled",
            Self::JunkLead => "junk_lead",
            Self::NotRequired => "not_required",
            Self::EnrolledOther => "enrolled_other",
            Self::Decline => "decline",
            Self::NotEligible => "not_eligible",
            Self::WrongNumber => "wrong_number",
            Self::HotFollowup => "hot_followup",
            Self::ColdFollowup => "cold_followup",
            Self::Schedule => "schedule",
            Self::NotConnected => "not_connected",
        }
    }

    /// Parse a classifier answer. Tolerates case and surrounding noise
    /// (quotes, periods, whitespace) but nothing fuzzier than that.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let cleaned = s
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`')
            .to_ascii_lowercase();
        Self::ALL.into_iter().find(|v| v.as_str() == cleaned)
    }

    /// Whether this status should trigger messaging dispatch on its own.
    #[must_use]
    pub const fn is_strongest_positive(self) -> bool {
        matches!(self, Self::Vvi)
    }
}

impl std::fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
