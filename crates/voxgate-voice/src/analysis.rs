//! End-of-call analysis.
//!
//! Runs once during teardown: classifies the lead status, optionally maps
//! the conversation onto the agent's disposition taxonomy, and decides
//! whether a follow-up message is due. Every step degrades to a safe
//! default — analysis must never prevent the final record from being
//! saved.

use voxgate_core::domain::{AgentProfile, LeadStatus, SpeakerRole, Transcript};

use crate::llm::{ChatMessage, ChatRequest, LlmBackend};

/// Turns of context handed to the disposition classifier.
const DISPOSITION_CONTEXT_TURNS: usize = 10;

const CLASSIFIER_TEMPERATURE: f32 = 0.0;

/// Outcome of the post-call classification.
#[derive(Debug, Clone)]
pub struct CallAnalysis {
    pub lead_status: LeadStatus,
    pub disposition: Option<String>,
    pub sub_disposition: Option<String>,
}

/// Classify a finished call.
///
/// A call with no caller speech is `not_connected` and needs no LLM at
/// all. Otherwise the lead status falls back to `maybe` on any error or
/// out-of-enumeration answer, and dispositions fall back to `None`.
pub async fn analyze(
    llm: &dyn LlmBackend,
    agent: &AgentProfile,
    transcript: &Transcript,
) -> CallAnalysis {
    if !transcript.has_user_turns() {
        return CallAnalysis {
            lead_status: LeadStatus::NotConnected,
            disposition: None,
            sub_disposition: None,
        };
    }

    let lead_status = classify_lead_status(llm, agent, transcript).await;
    let (disposition, sub_disposition) = if agent.dispositions.is_empty() {
        (None, None)
    } else {
        classify_disposition(llm, agent, transcript).await
    };

    CallAnalysis {
        lead_status,
        disposition,
        sub_disposition,
    }
}

/// Whether a follow-up message should be dispatched.
#[must_use]
pub fn should_dispatch_message(
    agent: &AgentProfile,
    lead_status: LeadStatus,
    caller_requested: bool,
) -> bool {
    agent.messaging_ready() && (lead_status.is_strongest_positive() || caller_requested)
}

// ── Lead status ────────────────────────────────────────────────────

async fn classify_lead_status(
    llm: &dyn LlmBackend,
    agent: &AgentProfile,
    transcript: &Transcript,
) -> LeadStatus {
    let codes: Vec<&str> = LeadStatus::ALL.iter().map(|s| s.as_str()).collect();
    let prompt = format!(
        "You are classifying the outcome of a phone call between a caller and a \
         voice agent.\n\nTranscript:\n{}\n\nAnswer with exactly one of these codes \
         and nothing else: {}",
        transcript.render(),
        codes.join(", "),
    );

    let request = ChatRequest {
        model: agent.llm_model.clone(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 20,
        temperature: CLASSIFIER_TEMPERATURE,
    };

    match llm.complete(request).await {
        Ok(answer) => LeadStatus::parse(&answer).unwrap_or_else(|| {
            tracing::warn!(answer = %answer, "Lead status outside enumeration, using maybe");
            LeadStatus::Maybe
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Lead status classification failed, using maybe");
            LeadStatus::Maybe
        }
    }
}

// ── Disposition ────────────────────────────────────────────────────

async fn classify_disposition(
    llm: &dyn LlmBackend,
    agent: &AgentProfile,
    transcript: &Transcript,
) -> (Option<String>, Option<String>) {
    let taxonomy: Vec<String> = agent
        .dispositions
        .iter()
        .map(|d| {
            if d.subs.is_empty() {
                d.title.clone()
            } else {
                format!("{} (sub-dispositions: {})", d.title, d.subs.join(", "))
            }
        })
        .collect();

    let tail: String = transcript
        .window(DISPOSITION_CONTEXT_TURNS)
        .iter()
        .map(|e| {
            let label = match e.role {
                SpeakerRole::User => "Caller",
                SpeakerRole::Assistant => "Agent",
            };
            format!("{label}: {}\n", e.text)
        })
        .collect();

    let prompt = format!(
        "Classify this call into one of the dispositions below.\n\nDispositions:\n{}\n\n\
         Conversation:\n{tail}\nReply with exactly two lines:\n\
         DISPOSITION: <title>\nSUB_DISPOSITION: <sub-disposition or none>",
        taxonomy.join("\n"),
    );

    let request = ChatRequest {
        model: agent.llm_model.clone(),
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: 60,
        temperature: CLASSIFIER_TEMPERATURE,
    };

    match llm.complete(request).await {
        Ok(answer) => validate_disposition(agent, &answer),
        Err(e) => {
            tracing::warn!(error = %e, "Disposition classification failed");
            (None, None)
        }
    }
}

/// Parse `DISPOSITION:` / `SUB_DISPOSITION:` lines and validate both
/// against the agent's taxonomy, case-insensitively. Anything the
/// taxonomy does not declare becomes `None`.
fn validate_disposition(agent: &AgentProfile, answer: &str) -> (Option<String>, Option<String>) {
    let mut title_line = None;
    let mut sub_line = None;

    for line in answer.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("DISPOSITION:") {
            title_line = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("SUB_DISPOSITION:") {
            sub_line = Some(rest.trim().to_string());
        }
    }

    let Some(title) = title_line else {
        tracing::warn!(answer = %answer, "Disposition reply missing DISPOSITION line");
        return (None, None);
    };

    let Some(entry) = agent.find_disposition(&title) else {
        tracing::warn!(title = %title, "Disposition not in taxonomy");
        return (None, None);
    };

    let sub = sub_line
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
        .and_then(|s| entry.canonical_sub(&s).map(ToString::to_string));

    (Some(entry.title.clone()), sub)
}
