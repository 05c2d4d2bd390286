//! Streaming ASR client.
//!
//! [`AsrConnector`] opens one vendor WebSocket session and exposes it as a
//! pair of channels (audio in, events out). [`AsrLink`] supervises the
//! connector for the lifetime of a call: it buffers audio while the
//! socket is opening, reconnects with bounded backoff on abnormal close,
//! and degrades to accept-and-discard once the retry budget is exhausted
//! so the call itself never dies with the ASR.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::GatewayError;

/// Frames buffered while the vendor socket is not open. Beyond this the
/// oldest are dropped — at 20 ms per frame this is ten seconds of audio.
const MAX_PENDING_FRAMES: usize = 500;

/// Reconnect attempts before the link degrades to accept-and-discard.
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Utterance endpointing window advertised to the vendor.
pub const ENDPOINTING_MS: u32 = 300;

// ── Parameters and events ──────────────────────────────────────────

/// Session parameters for one streaming ASR connection.
#[derive(Debug, Clone)]
pub struct AsrParams {
    pub sample_rate: u32,
    /// Wire encoding name (`"linear16"` or `"mulaw"`).
    pub encoding: &'static str,
    pub channels: u8,
    pub language: String,
    pub model: String,
}

/// Events produced by an ASR session.
#[derive(Debug, Clone)]
pub enum AsrEvent {
    /// Partial transcript — used only for barge-in detection.
    Interim { text: String, confidence: f32 },
    /// Committed transcript — triggers generation.
    Final { text: String, confidence: f32 },
    /// The vendor's endpointer closed the current utterance.
    UtteranceEnd,
    /// The vendor socket closed. Consumed by the supervisor, never
    /// forwarded to the dialogue.
    Closed { normal: bool },
}

/// One open vendor session: audio goes in, events come out.
pub struct AsrSession {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub events_rx: mpsc::Receiver<AsrEvent>,
}

/// Port that opens one streaming ASR session.
#[async_trait]
pub trait AsrConnector: Send + Sync {
    async fn connect(&self, params: &AsrParams) -> Result<AsrSession, GatewayError>;
}

// ── Deepgram-style vendor connector ────────────────────────────────

/// Wire shape of vendor result messages.
#[derive(Debug, Deserialize)]
struct VendorResponse {
    #[serde(rename = "type")]
    message_type: Option<String>,
    channel: Option<VendorChannel>,
    is_final: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct VendorChannel {
    alternatives: Vec<VendorAlternative>,
}

#[derive(Debug, Deserialize)]
struct VendorAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// Streaming ASR connector for a Deepgram-shaped vendor API.
pub struct StreamingAsrConnector {
    base_url: String,
    api_key: String,
}

impl StreamingAsrConnector {
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn session_url(&self, params: &AsrParams) -> String {
        format!(
            "{}?model={}&language={}&sample_rate={}&channels={}&encoding={}\
             &interim_results=true&smart_format=true&punctuate=true&endpointing={}",
            self.base_url,
            params.model,
            params.language,
            params.sample_rate,
            params.channels,
            params.encoding,
            ENDPOINTING_MS,
        )
    }
}

#[async_trait]
impl AsrConnector for StreamingAsrConnector {
    async fn connect(&self, params: &AsrParams) -> Result<AsrSession, GatewayError> {
        let url = self.session_url(params);

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .uri(url.as_str())
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Host", host_of(&url))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .body(())
            .map_err(|e| GatewayError::transient("asr", e))?;

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| GatewayError::transient("asr", e))?;

        tracing::debug!(model = %params.model, encoding = params.encoding, "ASR session open");

        let (mut write, mut read) = ws.split();
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let (event_tx, events_rx) = mpsc::channel::<AsrEvent>(64);

        // Writer: PBX frames → vendor binary messages.
        tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if write.send(Message::Binary(frame.into())).await.is_err() {
                    break;
                }
            }
            // Session abandoned — tell the vendor to flush and close.
            let _ = write.send(Message::Close(None)).await;
        });

        // Reader: vendor JSON → AsrEvents.
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_vendor_message(&text) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        let normal = frame
                            .as_ref()
                            .map_or(true, |f| u16::from(f.code) == 1000);
                        let _ = event_tx.send(AsrEvent::Closed { normal }).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ASR socket error");
                        let _ = event_tx.send(AsrEvent::Closed { normal: false }).await;
                        break;
                    }
                    Ok(_) => {}
                }
            }
        });

        Ok(AsrSession { audio_tx, events_rx })
    }
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .split(['/', '?'])
        .next()
        .unwrap_or_default()
        .to_string()
}

fn parse_vendor_message(text: &str) -> Option<AsrEvent> {
    let response: VendorResponse = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(error = %e, "Unparseable ASR message");
            return None;
        }
    };

    match response.message_type.as_deref() {
        Some("Results") => {
            let alternative = response.channel?.alternatives.into_iter().next()?;
            if alternative.transcript.trim().is_empty() {
                return None;
            }
            let event = if response.is_final.unwrap_or(false) {
                AsrEvent::Final {
                    text: alternative.transcript,
                    confidence: alternative.confidence,
                }
            } else {
                AsrEvent::Interim {
                    text: alternative.transcript,
                    confidence: alternative.confidence,
                }
            };
            Some(event)
        }
        Some("UtteranceEnd") => Some(AsrEvent::UtteranceEnd),
        // Metadata and anything the vendor adds later.
        _ => None,
    }
}

// ── Supervised link ────────────────────────────────────────────────

/// A supervised ASR connection for the lifetime of one call.
///
/// Dropping the link (or its audio sender) shuts the vendor session down.
pub struct AsrLink {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub events_rx: mpsc::Receiver<AsrEvent>,
}

impl AsrLink {
    /// Spawn the supervisor. Audio sent before the vendor socket opens is
    /// buffered (drop-oldest beyond [`MAX_PENDING_FRAMES`]) and flushed in
    /// order once the session is up.
    #[must_use]
    pub fn spawn(connector: std::sync::Arc<dyn AsrConnector>, params: AsrParams) -> Self {
        let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(MAX_PENDING_FRAMES);
        let (event_tx, events_rx) = mpsc::channel::<AsrEvent>(64);

        tokio::spawn(supervise(connector, params, audio_rx, event_tx));

        Self { audio_tx, events_rx }
    }
}

async fn supervise(
    connector: std::sync::Arc<dyn AsrConnector>,
    params: AsrParams,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    event_tx: mpsc::Sender<AsrEvent>,
) {
    let mut pending: VecDeque<Vec<u8>> = VecDeque::new();
    let mut attempt: u32 = 0;

    loop {
        if attempt > MAX_RECONNECT_ATTEMPTS {
            tracing::warn!("ASR reconnect budget exhausted — discarding audio for the rest of the call");
            // Keep the call alive: consume and drop audio until teardown.
            while audio_rx.recv().await.is_some() {}
            return;
        }

        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1));
            tracing::info!(attempt, delay_s = delay.as_secs(), "ASR reconnecting after backoff");
            if !buffer_while_waiting(&mut audio_rx, &mut pending, delay).await {
                return; // call torn down during backoff
            }
        }

        // Connect while still draining inbound audio, so frames arriving
        // before the socket is open are buffered drop-oldest rather than
        // backing up the channel.
        let connect_result = {
            let connect = connector.connect(&params);
            tokio::pin!(connect);
            loop {
                tokio::select! {
                    result = &mut connect => break Some(result),
                    frame = audio_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                if pending.len() >= MAX_PENDING_FRAMES {
                                    pending.pop_front();
                                }
                                pending.push_back(frame);
                            }
                            None => break None,
                        }
                    }
                }
            }
        };
        let session = match connect_result {
            Some(Ok(s)) => s,
            Some(Err(e)) => {
                tracing::warn!(error = %e, attempt, "ASR connect failed");
                attempt += 1;
                continue;
            }
            // Call torn down while connecting.
            None => return,
        };
        attempt = 0;

        // Flush audio that arrived while the socket was opening.
        let mut flush_failed = false;
        while let Some(frame) = pending.pop_front() {
            if session.audio_tx.send(frame).await.is_err() {
                flush_failed = true;
                break;
            }
        }
        if flush_failed {
            attempt = 1;
            continue;
        }

        match run_session(session, &mut audio_rx, &event_tx).await {
            SessionEnd::CallOver => return,
            SessionEnd::NormalClose => {
                // Vendor closed cleanly (e.g. idle timeout) — reconnect
                // without consuming the retry budget.
                attempt = 0;
            }
            SessionEnd::AbnormalClose => {
                attempt += 1;
            }
        }
    }
}

enum SessionEnd {
    CallOver,
    NormalClose,
    AbnormalClose,
}

async fn run_session(
    mut session: AsrSession,
    audio_rx: &mut mpsc::Receiver<Vec<u8>>,
    event_tx: &mpsc::Sender<AsrEvent>,
) -> SessionEnd {
    loop {
        tokio::select! {
            frame = audio_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if session.audio_tx.send(frame).await.is_err() {
                            return SessionEnd::AbnormalClose;
                        }
                    }
                    None => return SessionEnd::CallOver,
                }
            }
            event = session.events_rx.recv() => {
                match event {
                    Some(AsrEvent::Closed { normal: true }) => return SessionEnd::NormalClose,
                    Some(AsrEvent::Closed { normal: false }) | None => {
                        return SessionEnd::AbnormalClose;
                    }
                    Some(other) => {
                        if event_tx.send(other).await.is_err() {
                            return SessionEnd::CallOver;
                        }
                    }
                }
            }
        }
    }
}

/// Buffer inbound audio during a backoff window. Returns `false` when the
/// audio channel closed (the call ended).
async fn buffer_while_waiting(
    audio_rx: &mut mpsc::Receiver<Vec<u8>>,
    pending: &mut VecDeque<Vec<u8>>,
    delay: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        tokio::select! {
            () = tokio::time::sleep_until(deadline) => return true,
            frame = audio_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if pending.len() >= MAX_PENDING_FRAMES {
                            pending.pop_front();
                        }
                        pending.push_back(frame);
                    }
                    None => return false,
                }
            }
        }
    }
}
