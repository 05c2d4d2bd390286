//! WebSocket upgrade handler for the PBX ingress.
//!
//! `GET /pbx` upgrades to the PBX's JSON event protocol. Each connection
//! owns one [`CallSession`]; the handler's loop is the single task that
//! mutates dialogue state, selecting between socket traffic and internal
//! pipeline signals.
//!
//! All outbound writes (paced `reverse-media` frames and `error` events)
//! funnel through one writer task, so frames never interleave on the
//! wire.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use voxgate_core::domain::CallIds;
use voxgate_voice::pbx::{ErrorEvent, ReverseMedia};
use voxgate_voice::{CallSession, GatewayError, PbxSink};

use crate::state::AppState;

/// Outbound messages buffered towards the writer task. The egress pacer
/// produces one frame per 20 ms, so this stays small.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// `GET /pbx` — WebSocket upgrade endpoint for the PBX event stream.
pub async fn pbx_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_pbx_socket(socket, state))
}

async fn handle_pbx_socket(socket: WebSocket, state: AppState) {
    info!("PBX connection opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Single critical section for the socket: everything outbound goes
    // through this channel and task.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if ws_sender.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    let sink: Arc<dyn PbxSink> = Arc::new(ChannelPbxSink { tx: out_tx });
    let (mut session, mut signals) = CallSession::new(state.session_deps(sink));

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        session.handle_message(&text).await;
                        if session.is_torn_down() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("PBX socket closed");
                        session.on_socket_closed().await;
                        break;
                    }
                    Some(Ok(_)) => {
                        // The PBX speaks JSON text only; binary/ping noise
                        // is ignored.
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "PBX socket error");
                        session.on_socket_closed().await;
                        break;
                    }
                }
            }
            signal = signals.recv() => {
                // The session holds a sender, so the channel stays open
                // for as long as the session lives.
                if let Some(signal) = signal {
                    session.handle_signal(signal).await;
                }
            }
        }
    }

    // Belt and braces: the loop exits only through a teardown path, but
    // a missed one would leak the registry entry and the final record.
    session.teardown("handler-exit").await;

    // Dropping the session releases the last sender; the writer drains
    // queued messages (including a pending close frame) and exits.
    drop(session);
    let _ = writer.await;

    info!("PBX connection finished");
}

// ── Sink implementation ────────────────────────────────────────────

struct ChannelPbxSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait]
impl PbxSink for ChannelPbxSink {
    async fn send_media(&self, ids: &CallIds, frame: &[u8]) -> Result<(), GatewayError> {
        let payload = base64::engine::general_purpose::STANDARD.encode(frame);
        let envelope = ReverseMedia::new(ids, payload);
        let text = serde_json::to_string(&envelope)
            .map_err(|e| GatewayError::Internal(e.to_string()))?;
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|_| GatewayError::Closed)
    }

    async fn send_error(&self, code: &str, message: &str) {
        let envelope = ErrorEvent::new(code, message);
        if let Ok(text) = serde_json::to_string(&envelope) {
            let _ = self.tx.send(Message::Text(text)).await;
        }
    }

    async fn close(&self) {
        let _ = self.tx.send(Message::Close(None)).await;
    }
}
