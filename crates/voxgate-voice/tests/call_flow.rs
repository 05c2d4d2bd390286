//! Integration tests for the call session pipeline.
//!
//! These drive a [`CallSession`] end-to-end with mock ASR/LLM/TTS/PBX
//! backends and mock persistence ports. No network, no audio hardware,
//! no database — the mocks return canned data and record everything for
//! inspection. Tokio's paused clock makes the 20 ms pacing and the
//! multi-second call durations run instantly.
//!
//! # What is tested
//!
//! - The greeting path: paced 320-byte frames, trailing silence, no LLM
//!   involvement, `not_connected` classification, duration billing
//! - A full conversational turn: history commits, synthesis, ordering
//! - Barge-in immunity of the greeting
//! - Stale-session suppression after barge-in
//! - The credit gate on `start`
//! - Messaging dispatch with credit accounting
//! - Disposition taxonomy validation
//! - Teardown idempotence (no double finalize, no double billing)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use voxgate_core::domain::{AgentProfile, CallIds, DispositionTaxonomy, LeadStatus};
use voxgate_core::ports::{
    billing::{BillingError, BillingLedger, CallCharge, CallChargeMeta},
    AgentDirectory, AgentDirectoryError, CallLogError, CallLogFinal, CallLogLive,
    CallLogRepository, CallLogSeed, MessagingDispatcher, MessagingError,
};
use voxgate_voice::asr::{AsrConnector, AsrEvent, AsrParams, AsrSession};
use voxgate_voice::llm::{ChatRequest, LlmBackend};
use voxgate_voice::pbx::PbxSink;
use voxgate_voice::tts::{TtsAudio, TtsBackend, TTS_SAMPLE_RATE};
use voxgate_voice::{
    CallSession, GatewayError, PbxProfile, PipelineSignal, SessionDeps, SessionRegistry,
};

// ── Mock backends ──────────────────────────────────────────────────

struct MockAgents {
    agent: Option<AgentProfile>,
}

#[async_trait]
impl AgentDirectory for MockAgents {
    async fn resolve(
        &self,
        _dialed: &str,
        _caller: &str,
    ) -> Result<Option<AgentProfile>, AgentDirectoryError> {
        Ok(self.agent.clone())
    }
}

#[derive(Default)]
struct BillingState {
    balance: f64,
    call_charges: Vec<u64>,
    extra_charges: Vec<(f64, String)>,
}

struct MockBilling {
    state: Mutex<BillingState>,
}

impl MockBilling {
    fn with_balance(balance: f64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BillingState {
                balance,
                ..BillingState::default()
            }),
        })
    }
}

#[async_trait]
impl BillingLedger for MockBilling {
    async fn get_or_create(&self, _client_id: i64) -> Result<f64, BillingError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn bill_call(
        &self,
        _client_id: i64,
        seconds: u64,
        _meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError> {
        let mut state = self.state.lock().unwrap();
        #[allow(clippy::cast_precision_loss)]
        let credits = seconds as f64 / 30.0;
        state.balance -= credits;
        state.call_charges.push(seconds);
        Ok(CallCharge {
            credits_used: credits,
            balance_after: state.balance,
        })
    }

    async fn use_credits(
        &self,
        _client_id: i64,
        amount: f64,
        reason: &str,
        _meta: CallChargeMeta,
    ) -> Result<CallCharge, BillingError> {
        let mut state = self.state.lock().unwrap();
        state.balance -= amount;
        state.extra_charges.push((amount, reason.to_string()));
        Ok(CallCharge {
            credits_used: amount,
            balance_after: state.balance,
        })
    }
}

#[derive(Default)]
struct CallLogState {
    created: usize,
    live_updates: usize,
    finalized: Vec<CallLogFinal>,
}

#[derive(Default)]
struct MockCallLog {
    state: Mutex<CallLogState>,
}

#[async_trait]
impl CallLogRepository for MockCallLog {
    async fn create_initial(&self, _seed: CallLogSeed) -> Result<i64, CallLogError> {
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        Ok(77)
    }

    async fn update_live(&self, _id: i64, _update: CallLogLive) -> Result<(), CallLogError> {
        self.state.lock().unwrap().live_updates += 1;
        Ok(())
    }

    async fn finalize(&self, _id: i64, record: CallLogFinal) -> Result<(), CallLogError> {
        self.state.lock().unwrap().finalized.push(record);
        Ok(())
    }
}

#[derive(Default)]
struct MockMessaging {
    sent: Mutex<Vec<(String, String, String)>>,
    fail: bool,
}

#[async_trait]
impl MessagingDispatcher for MockMessaging {
    async fn send(&self, endpoint: &str, to: &str, link: &str) -> Result<(), MessagingError> {
        if self.fail {
            return Err(MessagingError::EndpointStatus(500));
        }
        self.sent
            .lock()
            .unwrap()
            .push((endpoint.to_string(), to.to_string(), link.to_string()));
        Ok(())
    }
}

/// Mock ASR connector. Tests push events through `event_handle()`.
struct MockAsr {
    event_tx: Mutex<Option<mpsc::Sender<AsrEvent>>>,
    frames_received: Arc<AtomicUsize>,
}

impl MockAsr {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            event_tx: Mutex::new(None),
            frames_received: Arc::new(AtomicUsize::new(0)),
        })
    }

    async fn emit(&self, event: AsrEvent) {
        // The vendor session opens asynchronously after `start`; wait for
        // the connector to have run before injecting.
        let tx = loop {
            if let Some(tx) = self.event_tx.lock().unwrap().clone() {
                break tx;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        tx.send(event).await.unwrap();
    }
}

#[async_trait]
impl AsrConnector for MockAsr {
    async fn connect(&self, _params: &AsrParams) -> Result<AsrSession, GatewayError> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, events_rx) = mpsc::channel::<AsrEvent>(64);
        *self.event_tx.lock().unwrap() = Some(event_tx);

        let counter = Arc::clone(&self.frames_received);
        tokio::spawn(async move {
            while audio_rx.recv().await.is_some() {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(AsrSession { audio_tx, events_rx })
    }
}

/// Mock LLM with scripted streaming replies and scripted completions.
struct MockLlm {
    stream_scripts: Mutex<Vec<Vec<&'static str>>>,
    completions: Mutex<Vec<&'static str>>,
    stream_calls: AtomicUsize,
    completion_calls: AtomicUsize,
}

impl MockLlm {
    fn new(streams: Vec<Vec<&'static str>>, completions: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            stream_scripts: Mutex::new(streams),
            completions: Mutex::new(completions),
            stream_calls: AtomicUsize::new(0),
            completion_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl LlmBackend for MockLlm {
    async fn stream_chat(
        &self,
        _request: ChatRequest,
    ) -> Result<mpsc::Receiver<String>, GatewayError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut scripts = self.stream_scripts.lock().unwrap();
            if scripts.is_empty() {
                Vec::new()
            } else {
                scripts.remove(0)
            }
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for delta in script {
                if tx.send(delta.to_string()).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn complete(&self, _request: ChatRequest) -> Result<String, GatewayError> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        let mut completions = self.completions.lock().unwrap();
        if completions.is_empty() {
            Err(GatewayError::transient("llm", "no scripted completion"))
        } else {
            Ok(completions.remove(0).to_string())
        }
    }
}

/// Mock TTS returning a fixed stretch of non-zero 16 kHz PCM.
struct MockTts {
    millis: u64,
    calls: AtomicUsize,
}

impl MockTts {
    fn with_duration_ms(millis: u64) -> Arc<Self> {
        Arc::new(Self {
            millis,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TtsBackend for MockTts {
    async fn synthesize(
        &self,
        _text: &str,
        _voice_id: &str,
        _language: &str,
    ) -> Result<TtsAudio, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let samples = (u64::from(TTS_SAMPLE_RATE) * self.millis / 1000) as usize;
        let mut pcm = Vec::with_capacity(samples * 2);
        for _ in 0..samples {
            pcm.extend_from_slice(&1000i16.to_le_bytes());
        }
        Ok(TtsAudio {
            pcm,
            sample_rate: TTS_SAMPLE_RATE,
        })
    }
}

/// Mock PBX sink recording every frame and error event.
#[derive(Default)]
struct MockSink {
    frames: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<String>>,
    closed: Mutex<bool>,
}

impl MockSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    fn error_codes(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl PbxSink for MockSink {
    async fn send_media(&self, _ids: &CallIds, frame: &[u8]) -> Result<(), GatewayError> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }

    async fn send_error(&self, code: &str, _message: &str) {
        self.errors.lock().unwrap().push(code.to_string());
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

// ── Harness ────────────────────────────────────────────────────────

fn agent() -> AgentProfile {
    AgentProfile {
        id: 5,
        client_id: 9,
        name: "reception".into(),
        calling_number: "911409000000".into(),
        system_prompt: "You are a friendly receptionist.".into(),
        first_message: "Hello, how can I help you?".into(),
        voice_id: "aura-asteria".into(),
        language: "en-IN".into(),
        asr_model: "nova-2".into(),
        llm_model: "gpt-4o-mini".into(),
        messaging_enabled: true,
        messaging_url: Some("https://msg.example/send".into()),
        messaging_link: Some("https://example.com/brochure".into()),
        dispositions: Vec::new(),
    }
}

struct Harness {
    session: CallSession,
    signals: tokio::sync::mpsc::UnboundedReceiver<PipelineSignal>,
    billing: Arc<MockBilling>,
    call_log: Arc<MockCallLog>,
    messaging: Arc<MockMessaging>,
    asr: Arc<MockAsr>,
    tts: Arc<MockTts>,
    sink: Arc<MockSink>,
    registry: Arc<SessionRegistry>,
}

impl Harness {
    fn build(
        agent: Option<AgentProfile>,
        balance: f64,
        llm: Arc<MockLlm>,
        messaging_fails: bool,
    ) -> Self {
        let billing = MockBilling::with_balance(balance);
        let call_log = Arc::new(MockCallLog::default());
        let messaging = Arc::new(MockMessaging {
            sent: Mutex::new(Vec::new()),
            fail: messaging_fails,
        });
        let asr = MockAsr::new();
        let tts = MockTts::with_duration_ms(500);
        let sink = MockSink::new();
        let registry = Arc::new(SessionRegistry::new());

        let (session, signals) = CallSession::new(SessionDeps {
            agents: Arc::new(MockAgents { agent }),
            billing: Arc::clone(&billing) as Arc<dyn BillingLedger>,
            call_log: Arc::clone(&call_log) as Arc<dyn CallLogRepository>,
            messaging: Arc::clone(&messaging) as Arc<dyn MessagingDispatcher>,
            asr: Arc::clone(&asr) as Arc<dyn AsrConnector>,
            llm: Arc::clone(&llm) as Arc<dyn LlmBackend>,
            tts: Arc::clone(&tts) as Arc<dyn TtsBackend>,
            sink: Arc::clone(&sink) as Arc<dyn PbxSink>,
            registry: Arc::clone(&registry),
            profile: PbxProfile::linear16(),
        });

        Self {
            session,
            signals,
            billing,
            call_log,
            messaging,
            asr,
            tts,
            sink,
            registry,
        }
    }

    async fn start_call(&mut self) {
        self.session
            .handle_message(
                r#"{
                    "event": "start",
                    "streamId": "st-1",
                    "callId": "ca-1",
                    "channelId": "ch-1",
                    "mediaFormat": {"encoding": "linear16", "sampleRate": 8000, "channels": 1},
                    "from": "+919876543210",
                    "to": "+911409000000",
                    "extraParams": {"uniqueid": "u-1"}
                }"#,
            )
            .await;
    }

    /// Process pipeline signals for `window` of virtual time.
    async fn drain(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            tokio::select! {
                signal = self.signals.recv() => {
                    if let Some(signal) = signal {
                        self.session.handle_signal(signal).await;
                    }
                }
                () = tokio::time::sleep_until(deadline) => break,
            }
        }
    }

    fn finalized(&self) -> Vec<CallLogFinal> {
        self.call_log.state.lock().unwrap().finalized.clone()
    }
}

// ── Scenario: happy greeting ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn greeting_only_call_plays_frames_and_classifies_not_connected() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    // Four seconds of silence from the caller.
    h.drain(Duration::from_secs(4)).await;
    h.session.handle_message(r#"{"event":"stop","streamId":"st-1"}"#).await;

    let frames = h.sink.frames();
    assert!(frames.len() >= 5, "expected at least 5 frames, got {}", frames.len());

    // Framing contract: every frame is exactly 320 bytes, so the total is
    // a multiple of 320.
    assert!(frames.iter().all(|f| f.len() == 320));

    // Three trailing silence frames for clean termination.
    let tail = &frames[frames.len() - 3..];
    assert!(tail.iter().all(|f| f.iter().all(|&b| b == 0)));

    // No user speech: the LLM is never consulted.
    assert_eq!(llm.stream_calls.load(Ordering::SeqCst), 0);
    assert_eq!(llm.completion_calls.load(Ordering::SeqCst), 0);

    let finalized = h.finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].lead_status, LeadStatus::NotConnected);
    assert_eq!(finalized[0].duration_seconds, 4);

    // Duration billing: one charge of exactly the elapsed seconds.
    let charges = h.billing.state.lock().unwrap().call_charges.clone();
    assert_eq!(charges, vec![4]);

    // Registry entry removed at teardown.
    assert_eq!(h.registry.active_count(), 0);
}

// ── Scenario: single conversational turn ───────────────────────────

#[tokio::test(start_paused = true)]
async fn single_turn_commits_history_and_synthesizes_reply() {
    let llm = MockLlm::new(
        vec![vec!["We are open ", "nine to five. ", "Anything else?"]],
        vec!["maybe"],
    );
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    // Let the greeting finish.
    h.drain(Duration::from_secs(2)).await;

    h.asr
        .emit(AsrEvent::Final {
            text: "What are your hours?".into(),
            confidence: 0.95,
        })
        .await;
    h.drain(Duration::from_secs(4)).await;

    {
        let history = h.session.history().expect("call is active");
        let entries = history.entries();
        // Greeting + user turn + assistant turn.
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].text, "What are your hours?");
        assert!(entries[2].text.starts_with("We are open nine to five."));
    }

    assert_eq!(llm.stream_calls.load(Ordering::SeqCst), 1);
    // Greeting plus at least one reply chunk.
    assert!(h.tts.calls.load(Ordering::SeqCst) >= 2);

    h.session.handle_message(r#"{"event":"stop"}"#).await;

    let finalized = h.finalized();
    assert_eq!(finalized.len(), 1);
    assert!(matches!(
        finalized[0].lead_status,
        LeadStatus::Maybe | LeadStatus::Vvi
    ));
    assert!(finalized[0].transcript.contains("What are your hours?"));
}

#[tokio::test(start_paused = true)]
async fn empty_llm_stream_speaks_nothing_and_records_user_turn_only() {
    // One scripted stream with no deltas at all.
    let llm = MockLlm::new(vec![vec![]], vec![]);
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;
    let tts_after_greeting = h.tts.calls.load(Ordering::SeqCst);

    h.asr
        .emit(AsrEvent::Final {
            text: "Hello, is anyone there?".into(),
            confidence: 0.9,
        })
        .await;
    h.drain(Duration::from_secs(2)).await;

    // No synthesis was attempted for the empty reply.
    assert_eq!(h.tts.calls.load(Ordering::SeqCst), tts_after_greeting);

    let history = h.session.history().expect("active");
    let entries = history.entries();
    // Greeting plus the user turn; no assistant reply was recorded.
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].text, "Hello, is anyone there?");
}

// ── Scenario: barge-in ─────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn greeting_ignores_barge_in_and_holds_user_speech() {
    let llm = MockLlm::new(vec![vec!["Sure, ", "let me check that for you."]], vec!["maybe"]);
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;

    // Caller speaks over the greeting immediately.
    h.asr
        .emit(AsrEvent::Interim {
            text: "hello can you".into(),
            confidence: 0.7,
        })
        .await;
    h.asr
        .emit(AsrEvent::Final {
            text: "Can you check a price?".into(),
            confidence: 0.9,
        })
        .await;

    h.drain(Duration::from_secs(4)).await;

    // The greeting played to completion: 500 ms of mock speech is 4 000
    // samples after downsampling — exactly 25 frames — plus three
    // silence frames.
    let frames = h.sink.frames();
    assert!(frames.len() >= 25 + 3, "greeting was cut: {} frames", frames.len());

    // The held final triggered exactly one generation after the greeting.
    assert_eq!(llm.stream_calls.load(Ordering::SeqCst), 1);

    let history = h.session.history().expect("active");
    assert!(history.entries().iter().any(|e| e.text == "Can you check a price?"));
}

#[tokio::test(start_paused = true)]
async fn barge_in_during_reply_suppresses_stale_audio() {
    // First reply is long (many chunks); second is short.
    let llm = MockLlm::new(
        vec![
            vec![
                "This course has a very long description. ",
                "It spans two years of classroom time. ",
                "There are twelve modules in total. ",
                "Each module has its own assessment. ",
            ],
            vec!["Okay, what would you like to know?"],
        ],
        vec!["maybe"],
    );
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;

    h.asr
        .emit(AsrEvent::Final {
            text: "Tell me everything about the course.".into(),
            confidence: 0.95,
        })
        .await;
    // Give the first reply time to start playing but not finish.
    h.drain(Duration::from_millis(600)).await;
    let frames_mid = h.sink.frames().len();

    // New utterance supersedes the long reply.
    h.asr
        .emit(AsrEvent::Final {
            text: "Stop, one more question.".into(),
            confidence: 0.95,
        })
        .await;
    h.drain(Duration::from_secs(6)).await;

    assert_eq!(llm.stream_calls.load(Ordering::SeqCst), 2);

    // The stale reply did not keep streaming to the PBX: everything after
    // the barge-in belongs to the short second reply (at most its frames
    // plus one grace sentence plus silence padding).
    let frames_total = h.sink.frames().len();
    let frames_after = frames_total - frames_mid;
    assert!(
        frames_after < 60,
        "stale audio kept flowing: {frames_after} frames after barge-in"
    );

    h.session.handle_message(r#"{"event":"stop"}"#).await;
    assert_eq!(h.finalized().len(), 1);
}

// ── Scenario: credit block ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn zero_balance_rejects_call_before_setup() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(Some(agent()), 0.0, llm, false);

    h.start_call().await;

    assert_eq!(h.sink.error_codes(), vec!["insufficient_credits"]);
    assert!(h.sink.is_closed());
    assert!(h.session.is_torn_down());

    // No record, no billing, no registry entry.
    assert_eq!(h.call_log.state.lock().unwrap().created, 0);
    assert!(h.billing.state.lock().unwrap().call_charges.is_empty());
    assert_eq!(h.registry.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn missing_agent_rejects_call() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(None, 10.0, llm, false);

    h.start_call().await;

    assert_eq!(h.sink.error_codes(), vec!["no_agent"]);
    assert!(h.sink.is_closed());
    assert_eq!(h.call_log.state.lock().unwrap().created, 0);
}

// ── Scenario: messaging dispatch ───────────────────────────────────

#[tokio::test(start_paused = true)]
async fn vvi_outcome_dispatches_message_and_bills_one_credit() {
    let llm = MockLlm::new(
        vec![vec!["Great, I will enroll you right away!"]],
        vec!["vvi"],
    );
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;
    h.asr
        .emit(AsrEvent::Final {
            text: "I want to join, sign me up.".into(),
            confidence: 0.95,
        })
        .await;
    h.drain(Duration::from_secs(4)).await;

    h.session.handle_message(r#"{"event":"stop"}"#).await;

    let sent = h.messaging.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    let (endpoint, to, link) = &sent[0];
    assert_eq!(endpoint, "https://msg.example/send");
    assert_eq!(to, "919876543210");
    assert_eq!(link, "https://example.com/brochure");

    let extra = h.billing.state.lock().unwrap().extra_charges.clone();
    assert_eq!(extra.len(), 1);
    assert!((extra[0].0 - 1.0).abs() < 1e-9);
    assert_eq!(extra[0].1, "messaging");

    let finalized = h.finalized();
    assert_eq!(finalized.len(), 1);
    assert!(finalized[0].messaging_sent);
    assert_eq!(finalized[0].lead_status, LeadStatus::Vvi);
}

#[tokio::test(start_paused = true)]
async fn failed_dispatch_does_not_bill_or_mark_sent() {
    let llm = MockLlm::new(vec![vec!["Certainly!"]], vec!["vvi"]);
    let mut h = Harness::build(Some(agent()), 10.0, Arc::clone(&llm), true);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;
    h.asr
        .emit(AsrEvent::Final {
            text: "Yes I am very interested.".into(),
            confidence: 0.95,
        })
        .await;
    h.drain(Duration::from_secs(3)).await;
    h.session.handle_message(r#"{"event":"stop"}"#).await;

    assert!(h.billing.state.lock().unwrap().extra_charges.is_empty());
    let finalized = h.finalized();
    assert!(!finalized[0].messaging_sent);
}

// ── Scenario: disposition taxonomy ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disposition_lines_are_validated_and_stored() {
    let mut with_taxonomy = agent();
    with_taxonomy.dispositions = vec![DispositionTaxonomy {
        title: "Interested".into(),
        subs: vec!["Callback Requested".into()],
    }];

    let llm = MockLlm::new(
        vec![vec!["I can arrange a callback for you."]],
        vec![
            "maybe",
            "DISPOSITION: Interested\nSUB_DISPOSITION: Callback Requested",
        ],
    );
    let mut h = Harness::build(Some(with_taxonomy), 10.0, Arc::clone(&llm), false);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;
    h.asr
        .emit(AsrEvent::Final {
            text: "Please call me back tomorrow.".into(),
            confidence: 0.95,
        })
        .await;
    h.drain(Duration::from_secs(3)).await;
    h.session.handle_message(r#"{"event":"stop"}"#).await;

    let finalized = h.finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].disposition.as_deref(), Some("Interested"));
    assert_eq!(
        finalized[0].sub_disposition.as_deref(),
        Some("Callback Requested")
    );
}

// ── Teardown idempotence ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn second_stop_does_not_double_finalize_or_double_bill() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(Some(agent()), 10.0, llm, false);

    h.start_call().await;
    h.drain(Duration::from_secs(2)).await;

    h.session.handle_message(r#"{"event":"stop"}"#).await;
    h.session.handle_message(r#"{"event":"stop"}"#).await;
    h.session.on_socket_closed().await;

    assert_eq!(h.finalized().len(), 1);
    assert_eq!(h.billing.state.lock().unwrap().call_charges.len(), 1);

    // Teardown released the stream's billing claim along with its
    // registry entry, so the billed set does not accumulate finished
    // streams for the process lifetime.
    assert!(h.registry.try_mark_billed("st-1"));
}

// ── Media plumbing ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn media_frames_are_forwarded_to_asr() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(Some(agent()), 10.0, llm, false);

    h.start_call().await;
    h.drain(Duration::from_millis(100)).await;

    // 50 frames of base64 PCM.
    let payload = {
        use base64::Engine as _;
        base64::engine::general_purpose::STANDARD.encode(vec![0u8; 320])
    };
    for _ in 0..50 {
        h.session
            .handle_message(&format!(
                r#"{{"event":"media","payload":"{payload}"}}"#
            ))
            .await;
    }
    h.drain(Duration::from_millis(200)).await;

    assert_eq!(h.asr.frames_received.load(Ordering::SeqCst), 50);
}

#[tokio::test(start_paused = true)]
async fn malformed_and_unknown_events_are_absorbed() {
    let llm = MockLlm::new(vec![], vec![]);
    let mut h = Harness::build(Some(agent()), 10.0, llm, false);

    h.session.handle_message("{broken json").await;
    h.session
        .handle_message(r#"{"event":"mystery-event","x":1}"#)
        .await;
    h.start_call().await;
    h.session.handle_message("{broken json again").await;
    h.drain(Duration::from_millis(100)).await;

    // The call is still alive and the greeting is playing.
    assert!(!h.session.is_torn_down());
    assert_eq!(h.registry.active_count(), 1);
}
