//! Pipeline error types.
//!
//! Every failure is classified into one of five kinds, each with its own
//! handling policy: transient upstream failures are retried with bounded
//! backoff and then degraded around; protocol violations are logged and
//! the offending message dropped; contract violations fall back to safe
//! defaults; resource exhaustion terminates the call before it starts;
//! internal invariant breaks drop the item but preserve the session.

use thiserror::Error;

/// Policy classification for a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// ASR/LLM/TTS transport errors, 5xx, timeouts.
    Transient,
    /// Malformed PBX message, missing ids.
    Protocol,
    /// Upstream returned something outside its contract (unknown lead
    /// status, undeclared disposition).
    Contract,
    /// Zero credit balance, no matching agent.
    Resource,
    /// Inconsistent internal state.
    Internal,
}

/// Errors that can occur in the voice pipeline.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Upstream vendor transport failure.
    #[error("{service} failure: {message}")]
    Transient { service: &'static str, message: String },

    /// Malformed or out-of-order PBX traffic.
    #[error("PBX protocol violation: {0}")]
    Protocol(String),

    /// Upstream response violated its contract.
    #[error("{service} contract violation: {message}")]
    Contract { service: &'static str, message: String },

    /// Client has no credits left.
    #[error("Insufficient credits: balance {0}")]
    InsufficientCredits(f64),

    /// No agent is configured for this number pair.
    #[error("No agent configured for dialed {dialed} / caller {caller}")]
    NoAgent { dialed: String, caller: String },

    /// Internal invariant violated.
    #[error("Internal invariant violated: {0}")]
    Internal(String),

    /// The PBX connection is gone.
    #[error("PBX connection closed")]
    Closed,
}

impl GatewayError {
    /// The handling-policy kind for this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Contract { .. } => ErrorKind::Contract,
            Self::InsufficientCredits(_) | Self::NoAgent { .. } => ErrorKind::Resource,
            Self::Internal(_) | Self::Closed => ErrorKind::Internal,
        }
    }

    /// Shorthand for a transient vendor failure.
    pub fn transient(service: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Transient {
            service,
            message: message.to_string(),
        }
    }

    /// Shorthand for a vendor contract violation.
    pub fn contract(service: &'static str, message: impl std::fmt::Display) -> Self {
        Self::Contract {
            service,
            message: message.to_string(),
        }
    }
}
