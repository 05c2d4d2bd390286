//! Call session — owns the full pipeline for one PBX connection.
//!
//! The session is driven from two sides: PBX events arriving on the
//! WebSocket ([`CallSession::handle_message`]) and internal pipeline
//! signals delivered on the receiver returned by [`CallSession::new`]
//! and applied via [`CallSession::handle_signal`]. The connection
//! handler selects over both, so all dialogue state is mutated from a
//! single task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use base64::Engine as _;
use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voxgate_core::domain::{AgentProfile, CallDirection, CallIds};
use voxgate_core::ports::{
    billing::CallChargeMeta, AgentDirectory, BillingLedger, CallLogRepository, CallLogSeed,
    MessagingDispatcher,
};
use voxgate_core::ports::{messaging::normalize_msisdn, CallLogFinal, CallLogLive};

use crate::analysis;
use crate::asr::{AsrConnector, AsrLink, AsrParams};
use crate::audio::downsample_16k_to_8k;
use crate::call_logger::CallLogger;
use crate::dialogue::{DialogueController, PipelineSignal, SpeakItem};
use crate::egress::{spawn_egress, EgressNotice, PlaybackItem, EGRESS_QUEUE_DEPTH};
use crate::frame::frames_from_audio;
use crate::llm::LlmBackend;
use crate::pbx::{PbxEvent, PbxProfile, PbxSink, StartPayload};
use crate::registry::{ActiveCall, SessionRegistry};
use crate::tts::TtsBackend;

/// Depth of the chunk queue between the dialogue and synthesis prep.
const SPEAK_QUEUE_DEPTH: usize = 32;

/// Error code sent to the PBX when the client has no credits.
pub const CODE_INSUFFICIENT_CREDITS: &str = "insufficient_credits";

/// Error code sent to the PBX when no agent matches the call.
pub const CODE_NO_AGENT: &str = "no_agent";

/// External collaborators and vendor clients for one session.
pub struct SessionDeps {
    pub agents: Arc<dyn AgentDirectory>,
    pub billing: Arc<dyn BillingLedger>,
    pub call_log: Arc<dyn CallLogRepository>,
    pub messaging: Arc<dyn MessagingDispatcher>,
    pub asr: Arc<dyn AsrConnector>,
    pub llm: Arc<dyn LlmBackend>,
    pub tts: Arc<dyn TtsBackend>,
    pub sink: Arc<dyn PbxSink>,
    pub registry: Arc<SessionRegistry>,
    pub profile: PbxProfile,
}

/// State that exists only between `start` and teardown.
struct LiveCall {
    ids: CallIds,
    agent: Arc<AgentProfile>,
    dialogue: DialogueController,
    asr_audio_tx: mpsc::Sender<Vec<u8>>,
    logger: Option<CallLogger>,
    caller: String,
    direction: CallDirection,
    start_instant: tokio::time::Instant,
    uniqueid: Option<String>,
    frames_in: u64,
    frames_out: Arc<AtomicU64>,
    _egress_task: JoinHandle<()>,
    _prep_task: JoinHandle<()>,
    _asr_pump: JoinHandle<()>,
}

/// One PBX connection's pipeline.
pub struct CallSession {
    deps: SessionDeps,
    signal_tx: mpsc::UnboundedSender<PipelineSignal>,
    tts_session: Arc<AtomicU64>,

    /// Hints cached from the `connected` event.
    caller_hint: Option<String>,
    dialed_hint: Option<String>,
    direction_hint: Option<CallDirection>,

    active: Option<LiveCall>,
    torn_down: bool,
}

impl CallSession {
    /// Create the session and the internal signal receiver the owning
    /// connection loop must select on alongside the PBX socket.
    #[must_use]
    pub fn new(deps: SessionDeps) -> (Self, mpsc::UnboundedReceiver<PipelineSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let session = Self {
            deps,
            signal_tx,
            tts_session: Arc::new(AtomicU64::new(1)),
            caller_hint: None,
            dialed_hint: None,
            direction_hint: None,
            active: None,
            torn_down: false,
        };
        (session, signal_rx)
    }

    /// Whether the session reached teardown.
    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Conversation history, for tests and ops introspection.
    #[must_use]
    pub fn history(&self) -> Option<&voxgate_core::domain::Transcript> {
        self.active.as_ref().map(|a| a.dialogue.history())
    }

    // ── PBX side ───────────────────────────────────────────────────

    /// Handle one text message from the PBX socket.
    pub async fn handle_message(&mut self, text: &str) {
        let event = match PbxEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                // Malformed traffic never kills the call.
                tracing::warn!(error = %e, "Dropping malformed PBX message");
                return;
            }
        };

        match event {
            PbxEvent::Connected(hints) => {
                tracing::debug!(?hints, "PBX connected");
                if self.caller_hint.is_none() {
                    self.caller_hint = hints.caller_id.or(hints.from);
                }
                if self.dialed_hint.is_none() {
                    self.dialed_hint = hints.did.or(hints.to);
                }
                if self.direction_hint.is_none() {
                    self.direction_hint = hints
                        .call_direction
                        .as_deref()
                        .and_then(CallDirection::parse);
                }
            }
            PbxEvent::Start(start) => self.handle_start(start).await,
            PbxEvent::Media { payload } => self.handle_media(&payload).await,
            PbxEvent::Stop { stream_id, .. } => {
                tracing::info!(?stream_id, "PBX stop");
                self.teardown("stop").await;
            }
            PbxEvent::Dtmf { digit } => {
                tracing::info!(digit = %digit, "DTMF received");
            }
            PbxEvent::Mark {}
            | PbxEvent::Clear {}
            | PbxEvent::Answer {}
            | PbxEvent::TransferCallResponse {}
            | PbxEvent::HangupCallResponse {} => {
                tracing::debug!("PBX control event acknowledged");
            }
            PbxEvent::Unknown => {
                tracing::debug!("Ignoring unknown PBX event");
            }
        }
    }

    /// The PBX socket closed without a `stop`.
    pub async fn on_socket_closed(&mut self) {
        self.teardown("socket-close").await;
    }

    // ── Internal side ──────────────────────────────────────────────

    /// Apply one internal signal to the dialogue state.
    pub async fn handle_signal(&mut self, signal: PipelineSignal) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        match signal {
            PipelineSignal::Asr(event) => {
                let commits = matches!(event, crate::asr::AsrEvent::Final { .. });
                active.dialogue.on_asr(event).await;
                if commits {
                    Self::push_live_update(active).await;
                }
            }
            PipelineSignal::Egress(notice) => {
                active.dialogue.on_egress(notice).await;
            }
            PipelineSignal::GenerationDone { llm_session, reply } => {
                active.dialogue.on_generation_done(llm_session, reply).await;
                Self::push_live_update(active).await;
            }
        }
    }

    // ── Start ──────────────────────────────────────────────────────

    async fn handle_start(&mut self, start: StartPayload) {
        if self.active.is_some() {
            tracing::warn!("Duplicate start event ignored");
            return;
        }

        let ids = start.ids();
        let caller = start
            .from
            .clone()
            .or_else(|| self.caller_hint.clone())
            .unwrap_or_default();
        let dialed = start
            .to
            .clone()
            .or_else(|| self.dialed_hint.clone())
            .unwrap_or_default();

        tracing::info!(
            stream_id = %ids.stream_id,
            call_id = %ids.call_id,
            caller = %caller,
            dialed = %dialed,
            "Call starting"
        );

        // Agent lookup gates everything else.
        let agent = match self.deps.agents.resolve(&dialed, &caller).await {
            Ok(Some(agent)) => Arc::new(agent),
            Ok(None) => {
                tracing::warn!(dialed = %dialed, caller = %caller, "No agent for call");
                self.reject(CODE_NO_AGENT, "no agent configured for this number")
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Agent lookup failed");
                self.reject("agent_lookup_failed", "agent lookup failed").await;
                return;
            }
        };

        // Credit gate: a zero balance rejects the call before any record
        // or vendor session is created.
        match self.deps.billing.get_or_create(agent.client_id).await {
            Ok(balance) if balance > 0.0 => {}
            Ok(balance) => {
                tracing::warn!(client_id = agent.client_id, balance, "Insufficient credits");
                self.reject(CODE_INSUFFICIENT_CREDITS, "credit balance exhausted")
                    .await;
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Balance check failed");
                self.reject("billing_unavailable", "billing unavailable").await;
                return;
            }
        }

        let direction = self.direction_hint.unwrap_or_default();
        let started_at = Utc::now();

        // Call record. Creation failure degrades to an unlogged call
        // rather than rejecting it.
        let logger = match self
            .deps
            .call_log
            .create_initial(CallLogSeed {
                client_id: agent.client_id,
                agent_id: agent.id,
                mobile: caller.clone(),
                direction: direction.as_str().to_string(),
                started_at,
                stream_id: ids.stream_id.clone(),
                call_id: ids.call_id.clone(),
                metadata: start.extra_params.clone(),
            })
            .await
        {
            Ok(id) => Some(CallLogger::new(Arc::clone(&self.deps.call_log), id)),
            Err(e) => {
                tracing::error!(error = %e, "Call log creation failed, continuing unlogged");
                None
            }
        };

        self.deps.registry.insert(
            &ids.stream_id,
            ActiveCall {
                call_id: ids.call_id.clone(),
                agent_id: agent.id,
                started_at,
            },
        );

        // ASR link. Frames arriving before the vendor socket opens are
        // buffered inside the link.
        let asr_link = AsrLink::spawn(
            Arc::clone(&self.deps.asr),
            AsrParams {
                sample_rate: self.deps.profile.sample_rate,
                encoding: self.deps.profile.encoding.asr_name(),
                channels: 1,
                language: agent.language.clone(),
                model: agent.asr_model.clone(),
            },
        );
        let AsrLink {
            audio_tx: asr_audio_tx,
            events_rx: mut asr_events_rx,
        } = asr_link;

        let asr_pump = {
            let signal_tx = self.signal_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = asr_events_rx.recv().await {
                    if signal_tx.send(PipelineSignal::Asr(event)).is_err() {
                        break;
                    }
                }
            })
        };

        // Synthesis prep and egress pacing.
        let (speak_tx, speak_rx) = mpsc::channel::<SpeakItem>(SPEAK_QUEUE_DEPTH);
        let (egress_tx, egress_rx) = mpsc::channel::<PlaybackItem>(EGRESS_QUEUE_DEPTH);
        let (notice_tx, mut notice_rx) = mpsc::unbounded_channel::<EgressNotice>();
        let frames_out = Arc::new(AtomicU64::new(0));

        let egress_task = spawn_egress(
            ids.clone(),
            Arc::clone(&self.deps.sink),
            Arc::clone(&self.tts_session),
            egress_rx,
            notice_tx.clone(),
            Arc::clone(&frames_out),
            self.deps.profile.frame_bytes(),
        );

        let prep_task = spawn_synthesis_prep(
            speak_rx,
            egress_tx,
            notice_tx,
            Arc::clone(&self.deps.tts),
            Arc::clone(&agent),
            self.deps.profile,
            Arc::clone(&self.tts_session),
        );

        // Pump egress notices into the signal loop.
        {
            let signal_tx = self.signal_tx.clone();
            tokio::spawn(async move {
                while let Some(notice) = notice_rx.recv().await {
                    if signal_tx.send(PipelineSignal::Egress(notice)).is_err() {
                        break;
                    }
                }
            });
        }

        let mut dialogue = DialogueController::new(
            Arc::clone(&agent),
            Arc::clone(&self.deps.llm),
            speak_tx,
            self.signal_tx.clone(),
            Arc::clone(&self.tts_session),
        );
        dialogue.set_caller_name(start.caller_name().map(ToString::to_string));
        dialogue.begin_greeting().await;

        self.active = Some(LiveCall {
            ids,
            agent,
            dialogue,
            asr_audio_tx,
            logger,
            caller,
            direction,
            start_instant: tokio::time::Instant::now(),
            uniqueid: start.uniqueid().map(ToString::to_string),
            frames_in: 0,
            frames_out,
            _egress_task: egress_task,
            _prep_task: prep_task,
            _asr_pump: asr_pump,
        });
    }

    // ── Media ──────────────────────────────────────────────────────

    async fn handle_media(&mut self, payload: &str) {
        let Some(active) = self.active.as_mut() else {
            // Media before start carries no ids to route by.
            tracing::trace!("Media before start, dropping frame");
            return;
        };

        let audio = match base64::engine::general_purpose::STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable media payload");
                return;
            }
        };

        active.frames_in += 1;

        // Forwarded verbatim; the link buffers while the vendor socket
        // opens and its queue is drop-oldest beyond the safety cap.
        if active.asr_audio_tx.try_send(audio).is_err() {
            tracing::trace!("ASR queue full, dropping frame");
        }
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Reject a call before it starts: error event, then close.
    async fn reject(&mut self, code: &str, message: &str) {
        self.deps.sink.send_error(code, message).await;
        self.deps.sink.close().await;
        self.torn_down = true;
    }

    /// Tear the call down. Idempotent: `stop`, socket close, and drop can
    /// all call this; only the first does the work.
    pub async fn teardown(&mut self, reason: &str) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        let Some(mut active) = self.active.take() else {
            return;
        };

        let duration_seconds = active.start_instant.elapsed().as_secs();
        tracing::info!(
            stream_id = %active.ids.stream_id,
            reason,
            duration_seconds,
            "Tearing down call"
        );

        active.dialogue.begin_teardown();
        // Closing the audio channel ends the ASR supervisor and with it
        // the vendor session.
        drop(std::mem::replace(&mut active.asr_audio_tx, mpsc::channel(1).0));

        // Post-call classification. Failures inside degrade to defaults
        // and never block the finalize below.
        let result = analysis::analyze(
            &*self.deps.llm,
            &active.agent,
            active.dialogue.history(),
        )
        .await;

        // Follow-up messaging, gated on the agent config and the outcome.
        let mut messaging_sent = false;
        if analysis::should_dispatch_message(
            &active.agent,
            result.lead_status,
            active.dialogue.messaging_requested(),
        ) {
            messaging_sent = self.dispatch_message(&active).await;
        }

        // Billing happens at most once per stream, whichever teardown
        // path gets here first.
        if self.deps.registry.try_mark_billed(&active.ids.stream_id) {
            let meta = CallChargeMeta {
                mobile: active.caller.clone(),
                direction: active.direction.as_str().to_string(),
                call_log_id: active.logger.as_ref().map(CallLogger::record_id),
                stream_id: active.ids.stream_id.clone(),
                uniqueid: active.uniqueid.clone(),
            };
            match self
                .deps
                .billing
                .bill_call(active.agent.client_id, duration_seconds, meta)
                .await
            {
                Ok(charge) => {
                    tracing::info!(
                        credits_used = charge.credits_used,
                        balance_after = charge.balance_after,
                        "Call billed"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Call billing failed");
                }
            }
        }

        // The final record is written no matter what happened above.
        if let Some(logger) = active.logger.as_mut() {
            let record = CallLogFinal {
                lead_status: result.lead_status,
                disposition: result.disposition,
                sub_disposition: result.sub_disposition,
                duration_seconds,
                transcript: active.dialogue.history().render(),
                messaging_sent,
                metadata: serde_json::json!({
                    "framesIn": active.frames_in,
                    "framesOut": active.frames_out.load(Ordering::Relaxed),
                    "endOfCallDetected": active.dialogue.end_of_call_detected(),
                    "teardownReason": reason,
                }),
            };
            if let Err(e) = logger.finalize(record).await {
                tracing::error!(error = %e, "Call log finalize failed");
            }
        }

        self.deps.registry.remove(&active.ids.stream_id);
        // The stream is fully settled; drop its billing claim so the set
        // does not grow for the process lifetime. The torn_down flag
        // guards re-entry, so this cannot reopen a double charge.
        self.deps.registry.forget_billed(&active.ids.stream_id);
    }

    async fn dispatch_message(&self, active: &LiveCall) -> bool {
        let Some(to) = normalize_msisdn(&active.caller) else {
            tracing::warn!(caller = %active.caller, "Caller number not messageable");
            return false;
        };
        // messaging_ready() guaranteed these are present.
        let (Some(url), Some(link)) = (
            active.agent.messaging_url.as_deref(),
            active.agent.messaging_link.as_deref(),
        ) else {
            return false;
        };

        match self.deps.messaging.send(url, &to, link).await {
            Ok(()) => {
                let meta = CallChargeMeta {
                    mobile: active.caller.clone(),
                    direction: active.direction.as_str().to_string(),
                    call_log_id: active.logger.as_ref().map(CallLogger::record_id),
                    stream_id: active.ids.stream_id.clone(),
                    uniqueid: active.uniqueid.clone(),
                };
                if let Err(e) = self
                    .deps
                    .billing
                    .use_credits(
                        active.agent.client_id,
                        voxgate_core::ports::billing::MESSAGING_CREDITS,
                        "messaging",
                        meta,
                    )
                    .await
                {
                    tracing::error!(error = %e, "Messaging credit charge failed");
                }
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Messaging dispatch failed");
                false
            }
        }
    }

    async fn push_live_update(active: &mut LiveCall) {
        let update = CallLogLive {
            transcript: active.dialogue.history().render(),
            duration_seconds: active.start_instant.elapsed().as_secs(),
            frames_in: active.frames_in,
            frames_out: active.frames_out.load(Ordering::Relaxed),
            last_updated: Utc::now(),
            messaging_requested: active.dialogue.messaging_requested(),
        };
        if let Some(logger) = active.logger.as_mut() {
            logger.live(update).await;
        }
    }
}

// ── Synthesis prep ─────────────────────────────────────────────────

/// Spawn the stage that turns speakable chunks into framed playback
/// items. Synthesis runs ahead of playback, but items enter the egress
/// queue in enqueue order, so playback stays strictly in-order.
fn spawn_synthesis_prep(
    mut speak_rx: mpsc::Receiver<SpeakItem>,
    egress_tx: mpsc::Sender<PlaybackItem>,
    notice_tx: mpsc::UnboundedSender<EgressNotice>,
    tts: Arc<dyn TtsBackend>,
    agent: Arc<AgentProfile>,
    profile: PbxProfile,
    current_session: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = speak_rx.recv().await {
            // Stale chunks are cleared before we spend a vendor call on
            // them. Every SpeakItem still produces exactly one
            // ItemFinished so the outstanding counter stays balanced.
            if !item.high_priority && current_session.load(Ordering::SeqCst) > item.tts_session {
                let _ = notice_tx.send(EgressNotice::ItemFinished {
                    tts_session: item.tts_session,
                    high_priority: item.high_priority,
                    aborted: true,
                });
                continue;
            }

            let audio = match tts
                .synthesize(&item.text, &agent.voice_id, &agent.language)
                .await
            {
                Ok(audio) => audio,
                Err(e) => {
                    let preview: String = item.text.chars().take(60).collect();
                    tracing::warn!(
                        error = %e,
                        text = %preview,
                        "TTS synthesis failed, skipping chunk"
                    );
                    let _ = notice_tx.send(EgressNotice::ItemFinished {
                        tts_session: item.tts_session,
                        high_priority: item.high_priority,
                        aborted: true,
                    });
                    continue;
                }
            };

            let pcm_8k = if audio.sample_rate == profile.sample_rate {
                audio.pcm
            } else {
                downsample_16k_to_8k(&audio.pcm)
            };
            let wire = profile.encode_egress(pcm_8k);
            let frames = frames_from_audio(&wire, profile.frame_bytes());

            let playback = PlaybackItem {
                tts_session: item.tts_session,
                high_priority: item.high_priority,
                frames,
            };

            // Bounded queue: blocks when the pacer is behind.
            if egress_tx.send(playback).await.is_err() {
                break;
            }
        }
    })
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if !self.torn_down && self.active.is_some() {
            // The handler should have torn down; losing the teardown
            // means losing the final record, so make it loud.
            tracing::error!("CallSession dropped without teardown");
        }
    }
}
