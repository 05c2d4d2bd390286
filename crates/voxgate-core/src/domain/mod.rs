//! Domain model for the voice gateway.
//!
//! These types represent calls, agents, transcripts, and call outcomes in
//! the domain model, independent of any infrastructure concerns.

pub mod agent;
pub mod call;
pub mod lead;

pub use agent::{AgentProfile, DispositionTaxonomy};
pub use call::{CallDirection, CallIds, MediaFormat, SpeakerRole, Transcript, TranscriptEntry};
pub use lead::LeadStatus;
