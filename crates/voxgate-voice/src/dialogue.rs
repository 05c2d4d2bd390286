//! Dialogue controller — the per-call state machine.
//!
//! Consumes ASR events and drives LLM generation and TTS playback. All
//! mutable dialogue state lives here and is touched only from the
//! session's event loop; concurrent stages observe it through the shared
//! atomic session counters.
//!
//! ```text
//!   Idle → Setup → Greeting → Listening → Generating → Speaking
//!                     ▲            ▲──────────┴─────────┘
//!                     └──────────────── Teardown on stop/close
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;

use voxgate_core::domain::{AgentProfile, SpeakerRole, Transcript};

use crate::asr::AsrEvent;
use crate::chunker::SentenceChunker;
use crate::egress::EgressNotice;
use crate::llm::{ChatMessage, ChatRequest, LlmBackend};

/// Minimum interim confidence for an interruption candidate.
const BARGE_IN_MIN_CONFIDENCE: f32 = 0.3;

/// Minimum interim word count for an interruption candidate.
const BARGE_IN_MIN_WORDS: usize = 2;

/// An identical interim repeated inside this window is a stutter, not a
/// new interruption.
const STUTTER_WINDOW: Duration = Duration::from_millis(25);

/// History entries handed to the LLM as context.
const HISTORY_WINDOW: usize = 8;

/// Output budget per conversational turn.
const MAX_REPLY_TOKENS: u32 = 100;

const REPLY_TEMPERATURE: f32 = 0.7;

// ── Phases ─────────────────────────────────────────────────────────

/// Lifecycle phase of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DialoguePhase {
    Idle,
    Setup,
    Greeting,
    Listening,
    Generating,
    Speaking,
    Teardown,
}

// ── Pipeline plumbing types ────────────────────────────────────────

/// A speakable chunk queued for synthesis.
#[derive(Debug, Clone)]
pub struct SpeakItem {
    pub text: String,
    pub tts_session: u64,
    pub high_priority: bool,
}

/// Internal signals funneled into the session event loop.
#[derive(Debug)]
pub enum PipelineSignal {
    Asr(AsrEvent),
    Egress(EgressNotice),
    /// A generation task finished (stream drained or failed).
    GenerationDone { llm_session: u64, reply: String },
}

// ── Controller ─────────────────────────────────────────────────────

/// Per-call dialogue state machine.
pub struct DialogueController {
    phase: DialoguePhase,
    agent: Arc<AgentProfile>,
    history: Transcript,

    llm: Arc<dyn LlmBackend>,
    speak_tx: mpsc::Sender<SpeakItem>,
    signal_tx: mpsc::UnboundedSender<PipelineSignal>,

    /// Monotonic generation counter; only the latest session's deltas
    /// are spoken.
    llm_session: Arc<AtomicU64>,
    /// Monotonic playback counter; advancing it invalidates queued audio.
    tts_session: Arc<AtomicU64>,
    /// Speak items enqueued but not yet finished by the pacer.
    items_outstanding: Arc<AtomicUsize>,

    /// Whether a generation task is in flight.
    generating: bool,
    /// When a gentle stop was issued, for hard-stop escalation.
    gentle_stop_at: Option<Instant>,
    last_interim: Option<(String, Instant)>,

    /// Caller name from PBX extra params, for personalization.
    caller_name: Option<String>,
    /// A final transcript that arrived while the greeting was playing.
    held_final: Option<String>,

    /// The caller explicitly asked for a message/link during the call.
    messaging_requested: bool,
    /// The caller said goodbye.
    end_of_call_detected: bool,
}

impl DialogueController {
    #[must_use]
    pub fn new(
        agent: Arc<AgentProfile>,
        llm: Arc<dyn LlmBackend>,
        speak_tx: mpsc::Sender<SpeakItem>,
        signal_tx: mpsc::UnboundedSender<PipelineSignal>,
        tts_session: Arc<AtomicU64>,
    ) -> Self {
        Self {
            phase: DialoguePhase::Setup,
            agent,
            history: Transcript::new(),
            llm,
            speak_tx,
            signal_tx,
            llm_session: Arc::new(AtomicU64::new(0)),
            tts_session,
            items_outstanding: Arc::new(AtomicUsize::new(0)),
            generating: false,
            gentle_stop_at: None,
            last_interim: None,
            caller_name: None,
            held_final: None,
            messaging_requested: false,
            end_of_call_detected: false,
        }
    }

    // ── Accessors ──────────────────────────────────────────────────

    #[must_use]
    pub const fn phase(&self) -> DialoguePhase {
        self.phase
    }

    #[must_use]
    pub const fn history(&self) -> &Transcript {
        &self.history
    }

    #[must_use]
    pub const fn messaging_requested(&self) -> bool {
        self.messaging_requested
    }

    #[must_use]
    pub const fn end_of_call_detected(&self) -> bool {
        self.end_of_call_detected
    }

    pub fn set_caller_name(&mut self, name: Option<String>) {
        self.caller_name = name;
    }

    // ── Greeting ───────────────────────────────────────────────────

    /// Speak the configured first message. High priority: immune to
    /// barge-in, and user speech is held until it completes.
    pub async fn begin_greeting(&mut self) {
        let text = personalize(&self.agent.first_message, self.caller_name.as_deref());
        self.set_phase(DialoguePhase::Greeting);
        self.history
            .push(SpeakerRole::Assistant, text.clone(), &self.agent.language);
        self.enqueue_speech(text, true).await;
    }

    // ── ASR events ─────────────────────────────────────────────────

    pub async fn on_asr(&mut self, event: AsrEvent) {
        match event {
            AsrEvent::Interim { text, confidence } => {
                self.on_interim(&text, confidence);
            }
            AsrEvent::Final { text, confidence } => {
                tracing::debug!(confidence, text = %text, "ASR final");
                self.on_final(text).await;
            }
            AsrEvent::UtteranceEnd => {
                // The endpointer closed the utterance; finals carry the
                // text, so there is nothing to commit here.
                tracing::trace!("ASR utterance end");
            }
            AsrEvent::Closed { .. } => {}
        }
    }

    fn on_interim(&mut self, text: &str, confidence: f32) {
        // Interims only matter while we are producing audio.
        if self.phase == DialoguePhase::Greeting {
            return;
        }
        let audible = self.items_outstanding.load(Ordering::SeqCst) > 0;
        if !audible && !self.generating {
            return;
        }

        if !self.is_interruption(text, confidence) {
            return;
        }

        match self.gentle_stop_at {
            None => {
                tracing::debug!(text = %text, confidence, "Barge-in: gentle stop");
                self.gentle_stop();
            }
            Some(at) if at.elapsed() > crate::egress::SENTENCE_COMPLETION_GRACE && audible => {
                // The caller kept talking past the grace window and the
                // old sentence is still playing.
                tracing::debug!("Barge-in: hard stop");
                self.hard_stop();
            }
            Some(_) => {}
        }
    }

    async fn on_final(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        if self.phase == DialoguePhase::Greeting {
            // Rule: the greeting never barges itself. Act once it is done.
            self.held_final = Some(match self.held_final.take() {
                Some(held) => format!("{held} {text}"),
                None => text,
            });
            return;
        }

        self.note_user_intents(&text);
        self.history
            .push(SpeakerRole::User, text.clone(), &self.agent.language);

        // A new utterance supersedes whatever we were saying or
        // generating for the previous one.
        if self.items_outstanding.load(Ordering::SeqCst) > 0 {
            self.gentle_stop();
        }

        self.start_generation(text);
    }

    /// Barge-in predicate: two words, some confidence, not a stutter.
    fn is_interruption(&mut self, text: &str, confidence: f32) -> bool {
        if confidence < BARGE_IN_MIN_CONFIDENCE {
            return false;
        }
        if text.split_whitespace().count() < BARGE_IN_MIN_WORDS {
            return false;
        }

        let now = Instant::now();
        let stutter = self
            .last_interim
            .as_ref()
            .is_some_and(|(last, at)| last == text && now.duration_since(*at) <= STUTTER_WINDOW);
        self.last_interim = Some((text.to_string(), now));

        !stutter
    }

    // ── Stops ──────────────────────────────────────────────────────

    /// Clear the pending queue; the in-flight sentence may finish within
    /// the completion grace.
    pub fn gentle_stop(&mut self) {
        self.tts_session.fetch_add(1, Ordering::SeqCst);
        self.gentle_stop_at = Some(Instant::now());
    }

    /// Drop pending and in-flight audio immediately.
    pub fn hard_stop(&mut self) {
        self.tts_session.fetch_add(2, Ordering::SeqCst);
        self.gentle_stop_at = Some(Instant::now());
    }

    // ── Generation ─────────────────────────────────────────────────

    fn start_generation(&mut self, user_text: String) {
        let session = self.llm_session.fetch_add(1, Ordering::SeqCst) + 1;
        self.generating = true;
        self.set_phase(DialoguePhase::Generating);

        let request = ChatRequest {
            model: self.agent.llm_model.clone(),
            messages: self.build_messages(),
            max_tokens: MAX_REPLY_TOKENS,
            temperature: REPLY_TEMPERATURE,
        };

        tracing::debug!(session, text = %user_text, "Starting generation");

        let llm = Arc::clone(&self.llm);
        let llm_session = Arc::clone(&self.llm_session);
        let tts_session = Arc::clone(&self.tts_session);
        let items_outstanding = Arc::clone(&self.items_outstanding);
        let speak_tx = self.speak_tx.clone();
        let signal_tx = self.signal_tx.clone();
        let language = self.agent.language.clone();

        tokio::spawn(async move {
            let mut chunker = SentenceChunker::new();
            let mut reply = String::new();

            let mut deltas = match llm.stream_chat(request).await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::warn!(error = %e, session, "LLM stream failed to open");
                    let _ = signal_tx.send(PipelineSignal::GenerationDone {
                        llm_session: session,
                        reply: String::new(),
                    });
                    return;
                }
            };

            let speak = |text: String| {
                let speak_tx = speak_tx.clone();
                let tts_session = Arc::clone(&tts_session);
                let items_outstanding = Arc::clone(&items_outstanding);
                async move {
                    items_outstanding.fetch_add(1, Ordering::SeqCst);
                    let item = SpeakItem {
                        text,
                        tts_session: tts_session.load(Ordering::SeqCst),
                        high_priority: false,
                    };
                    if speak_tx.send(item).await.is_err() {
                        items_outstanding.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            };

            while let Some(delta) = deltas.recv().await {
                if llm_session.load(Ordering::SeqCst) != session {
                    // Superseded mid-stream: stop feeding the chunker.
                    tracing::debug!(session, "Generation superseded, dropping stream");
                    break;
                }
                reply.push_str(&delta);
                for chunk in chunker.push(&delta) {
                    speak(chunk).await;
                }
            }

            if llm_session.load(Ordering::SeqCst) == session {
                if let Some(tail) = chunker.finish() {
                    speak(tail).await;
                }
                // Always leave the caller with a prompt to continue.
                if !reply.is_empty() && !reply.contains('?') {
                    let closing = closing_question(&language);
                    reply.push(' ');
                    reply.push_str(closing);
                    speak(closing.to_string()).await;
                }
            }

            let _ = signal_tx.send(PipelineSignal::GenerationDone {
                llm_session: session,
                reply,
            });
        });
    }

    /// LLM context: system prompt, optional personalization, then the
    /// trailing history window.
    fn build_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(HISTORY_WINDOW + 2);
        messages.push(ChatMessage::system(&self.agent.system_prompt));
        if let Some(name) = &self.caller_name {
            messages.push(ChatMessage::system(format!(
                "The caller's name is {name}. Address them naturally, without overusing the name."
            )));
        }
        for entry in self.history.window(HISTORY_WINDOW) {
            messages.push(match entry.role {
                SpeakerRole::User => ChatMessage::user(&entry.text),
                SpeakerRole::Assistant => ChatMessage::assistant(&entry.text),
            });
        }
        messages
    }

    // ── Pipeline notices ───────────────────────────────────────────

    pub async fn on_generation_done(&mut self, llm_session: u64, reply: String) {
        if llm_session != self.llm_session.load(Ordering::SeqCst) {
            // A newer generation is already running; its completion will
            // drive the phase, and its reply is the one that counts.
            return;
        }

        self.generating = false;
        if !reply.is_empty() {
            self.history
                .push(SpeakerRole::Assistant, reply, &self.agent.language);
        }
        // Playback may have already drained (the pacer races the stream
        // tail) or still be running.
        if self.items_outstanding.load(Ordering::SeqCst) == 0 {
            self.set_phase(DialoguePhase::Listening);
        } else {
            self.set_phase(DialoguePhase::Speaking);
        }
    }

    pub async fn on_egress(&mut self, notice: EgressNotice) {
        match notice {
            EgressNotice::ItemFinished { high_priority, .. } => {
                // The counter can transiently read zero if the pacer
                // finishes before the producer increments; saturate.
                let _ = self
                    .items_outstanding
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                        Some(v.saturating_sub(1))
                    });

                if high_priority && self.phase == DialoguePhase::Greeting {
                    self.finish_greeting().await;
                }
            }
            EgressNotice::Idle => {
                self.gentle_stop_at = None;
                if !self.generating
                    && self.items_outstanding.load(Ordering::SeqCst) == 0
                    && matches!(self.phase, DialoguePhase::Speaking | DialoguePhase::Generating)
                {
                    self.set_phase(DialoguePhase::Listening);
                }
            }
        }
    }

    async fn finish_greeting(&mut self) {
        self.set_phase(DialoguePhase::Listening);
        if let Some(held) = self.held_final.take() {
            tracing::debug!(text = %held, "Acting on speech held during greeting");
            self.on_final(held).await;
        }
    }

    pub fn begin_teardown(&mut self) {
        self.set_phase(DialoguePhase::Teardown);
        // Invalidate any in-flight generation and playback.
        self.llm_session.fetch_add(1, Ordering::SeqCst);
        self.tts_session.fetch_add(2, Ordering::SeqCst);
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn enqueue_speech(&mut self, text: String, high_priority: bool) {
        self.items_outstanding.fetch_add(1, Ordering::SeqCst);
        let item = SpeakItem {
            text,
            tts_session: self.tts_session.load(Ordering::SeqCst),
            high_priority,
        };
        if self.speak_tx.send(item).await.is_err() {
            self.items_outstanding.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Speak queue closed, dropping utterance");
        }
    }

    /// Record intents we act on at teardown: an explicit message/link
    /// request, and the caller wrapping up the conversation.
    fn note_user_intents(&mut self, text: &str) {
        let lower = text.to_lowercase();

        const MESSAGE_CUES: [&str; 6] = [
            "send me",
            "whatsapp",
            "message me",
            "text me",
            "share the link",
            "send the link",
        ];
        if MESSAGE_CUES.iter().any(|cue| lower.contains(cue)) {
            self.messaging_requested = true;
        }

        const FAREWELL_CUES: [&str; 5] = ["goodbye", "bye", "hang up", "talk later", "अलविदा"];
        if FAREWELL_CUES.iter().any(|cue| lower.contains(cue)) {
            self.end_of_call_detected = true;
        }
    }

    fn set_phase(&mut self, phase: DialoguePhase) {
        if self.phase != phase {
            tracing::debug!(old = ?self.phase, new = ?phase, "Dialogue phase transition");
            self.phase = phase;
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Substitute the caller's name into a greeting template.
///
/// Supports a literal `{name}` placeholder; with no name available the
/// placeholder (and any glue comma before it) is dropped.
#[must_use]
pub fn personalize(template: &str, name: Option<&str>) -> String {
    match name {
        Some(name) => template.replace("{name}", name),
        None => template
            .replace(", {name}", "")
            .replace(" {name}", "")
            .replace("{name}", ""),
    }
}

/// Language-appropriate prompt appended when the reply lacks a question.
#[must_use]
pub fn closing_question(language: &str) -> &'static str {
    if language.starts_with("hi") {
        "क्या मैं आपकी किसी और चीज़ में मदद कर सकती हूँ?"
    } else {
        "Is there anything else I can help you with?"
    }
}
