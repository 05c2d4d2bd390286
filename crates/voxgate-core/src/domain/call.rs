//! Call and transcript domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a call relative to the PBX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    #[default]
    Inbound,
    Outbound,
}

impl CallDirection {
    /// Parse a direction from a PBX hint string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" | "in" => Some(Self::Inbound),
            "outbound" | "out" => Some(Self::Outbound),
            _ => None,
        }
    }

    /// String representation used in call records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// The identifier triple the PBX supplies on `start`.
///
/// All outbound frames and the call record are keyed on `stream_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallIds {
    pub stream_id: String,
    pub call_id: String,
    pub channel_id: String,
}

/// Media format advertised by the PBX on `start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFormat {
    /// Frame encoding (`"linear16"` or `"mulaw"`).
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for MediaFormat {
    fn default() -> Self {
        Self {
            encoding: "linear16".to_string(),
            sample_rate: 8_000,
            channels: 1,
        }
    }
}

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    User,
    Assistant,
}

impl SpeakerRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One committed conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: SpeakerRole,
    pub text: String,
    pub language: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered conversation history for one call.
///
/// Entries are appended in commit order; timestamps are monotonically
/// non-decreasing. The full history is retained for post-call analysis,
/// while the LLM context uses a trailing window.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Append a turn. The timestamp is clamped forward so the ordering
    /// invariant holds even if the caller's clock reads slightly behind
    /// the previous entry.
    pub fn push(&mut self, role: SpeakerRole, text: impl Into<String>, language: &str) {
        let mut timestamp = Utc::now();
        if let Some(last) = self.entries.last() {
            if timestamp < last.timestamp {
                timestamp = last.timestamp;
            }
        }
        self.entries.push(TranscriptEntry {
            role,
            text: text.into(),
            language: language.to_string(),
            timestamp,
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    /// The trailing window handed to the LLM as conversation context.
    #[must_use]
    pub fn window(&self, n: usize) -> &[TranscriptEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    /// Chronological plain-text rendering for post-call analysis prompts.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(match entry.role {
                SpeakerRole::User => "Caller: ",
                SpeakerRole::Assistant => "Agent: ",
            });
            out.push_str(&entry.text);
            out.push('\n');
        }
        out
    }

    /// Whether the caller produced any speech at all.
    #[must_use]
    pub fn has_user_turns(&self) -> bool {
        self.entries.iter().any(|e| e.role == SpeakerRole::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_window_returns_trailing_entries() {
        let mut t = Transcript::new();
        for i in 0..10 {
            t.push(SpeakerRole::User, format!("turn {i}"), "en");
        }
        let window = t.window(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text, "turn 7");
        assert_eq!(window[2].text, "turn 9");
    }

    #[test]
    fn transcript_window_smaller_than_n() {
        let mut t = Transcript::new();
        t.push(SpeakerRole::User, "only turn", "en");
        assert_eq!(t.window(8).len(), 1);
    }

    #[test]
    fn timestamps_are_non_decreasing() {
        let mut t = Transcript::new();
        for _ in 0..50 {
            t.push(SpeakerRole::Assistant, "x", "en");
        }
        let entries = t.entries();
        for pair in entries.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn render_labels_speakers() {
        let mut t = Transcript::new();
        t.push(SpeakerRole::User, "hello", "en");
        t.push(SpeakerRole::Assistant, "hi there", "en");
        assert_eq!(t.render(), "Caller: hello\nAgent: hi there\n");
    }

    #[test]
    fn direction_parses_hints() {
        assert_eq!(CallDirection::parse("inbound"), Some(CallDirection::Inbound));
        assert_eq!(CallDirection::parse("OUT"), Some(CallDirection::Outbound));
        assert_eq!(CallDirection::parse("sideways"), None);
    }
}
