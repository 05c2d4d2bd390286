//! Per-call voice pipeline for the voxgate gateway.
//!
//! One [`CallSession`] exists per PBX WebSocket connection. It owns the
//! dialogue state machine and a set of cooperating stages connected by
//! bounded channels:
//!
//! ```text
//!   PBX media ──▶ ASR link ──▶ dialogue controller ──▶ LLM stream
//!                                      │                   │
//!                                      ▼                   ▼
//!                                 speak queue ◀── sentence chunker
//!                                      │
//!                                      ▼
//!                              TTS prep (synthesize + resample + frame)
//!                                      │
//!                                      ▼
//!                              egress pacer ──▶ PBX reverse-media
//! ```
//!
//! Vendor integrations (ASR, LLM, TTS, PBX sink, messaging) sit behind
//! traits so tests drive the full pipeline with mock backends.

#[cfg(test)]
use tokio_test as _;

pub mod analysis;
pub mod asr;
pub mod audio;
pub mod call_logger;
pub mod chunker;
pub mod dialogue;
pub mod egress;
pub mod error;
pub mod frame;
pub mod llm;
pub mod messaging;
pub mod pbx;
pub mod registry;
pub mod session;
pub mod tts;

// Re-export key types for convenience
pub use asr::{AsrConnector, AsrEvent, AsrLink, AsrParams, AsrSession};
pub use dialogue::{DialogueController, DialoguePhase, PipelineSignal, SpeakItem};
pub use egress::{PlaybackItem, SENTENCE_COMPLETION_GRACE};
pub use error::{ErrorKind, GatewayError};
pub use llm::{ChatMessage, ChatRequest, LlmBackend, SseLlmClient};
pub use pbx::{PbxEvent, PbxProfile, PbxSink, WireEncoding};
pub use registry::SessionRegistry;
pub use session::{CallSession, SessionDeps};
pub use tts::{HttpTtsClient, TtsAudio, TtsBackend};
