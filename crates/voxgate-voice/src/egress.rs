//! Egress pacing — the single serialized worker that drains playback
//! items and sends 20 ms frames to the PBX.
//!
//! Pacing contract:
//! - one frame per ~20 ms (15 ms for high-priority items so the greeting
//!   catches up after setup),
//! - a 60 ms gap between distinct playback items,
//! - three silence frames after the last frame of an utterance,
//! - a per-frame staleness check: an item whose TTS session has been
//!   superseded once may finish if it is inside the completion grace;
//!   superseded twice (hard stop) it is dropped immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use voxgate_core::domain::CallIds;

use crate::frame::{silence_frame, FRAME_MS};
use crate::pbx::PbxSink;

/// Sleep between frames of a normal-priority item.
pub const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Sleep between frames of a high-priority item (greeting, completion).
pub const PRIORITY_FRAME_INTERVAL: Duration = Duration::from_millis(15);

/// Gap between distinct playback items, against chunk-boundary artifacts.
pub const ITEM_GAP: Duration = Duration::from_millis(60);

/// Silence frames appended after the final frame of an utterance.
pub const TRAILING_SILENCE_FRAMES: usize = 3;

/// How much of a sentence may still play out after a gentle stop.
pub const SENTENCE_COMPLETION_GRACE: Duration = Duration::from_millis(2_000);

/// Bound of the egress queue; producers block when the pacer falls behind.
pub const EGRESS_QUEUE_DEPTH: usize = 16;

/// One utterance chunk, fully framed and ready to send.
#[derive(Debug)]
pub struct PlaybackItem {
    /// TTS session the item was synthesized under.
    pub tts_session: u64,
    /// High-priority items are immune to barge-in and paced faster.
    pub high_priority: bool,
    /// Whole wire frames; the last one is already zero-padded.
    pub frames: Vec<Vec<u8>>,
}

/// What the pacer reports back to the session loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressNotice {
    /// An item finished (or was dropped as stale).
    ItemFinished {
        tts_session: u64,
        high_priority: bool,
        aborted: bool,
    },
    /// The queue is drained and nothing is playing.
    Idle,
}

/// Spawn the egress worker for one call.
///
/// The worker exits when the item channel closes or the PBX sink fails.
pub fn spawn_egress(
    ids: CallIds,
    sink: Arc<dyn PbxSink>,
    current_session: Arc<AtomicU64>,
    mut rx: mpsc::Receiver<PlaybackItem>,
    notice_tx: mpsc::UnboundedSender<EgressNotice>,
    frames_out: Arc<AtomicU64>,
    frame_bytes: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let silence = silence_frame(frame_bytes);
        let mut carried: Option<PlaybackItem> = None;

        loop {
            let item = match carried.take() {
                Some(item) => item,
                None => match rx.recv().await {
                    Some(item) => item,
                    None => break,
                },
            };

            let aborted = play_item(&ids, &*sink, &current_session, &frames_out, &silence, &item)
                .await;

            let Ok(aborted) = aborted else {
                // PBX sink gone — the session is tearing down.
                break;
            };

            let _ = notice_tx.send(EgressNotice::ItemFinished {
                tts_session: item.tts_session,
                high_priority: item.high_priority,
                aborted,
            });

            tokio::time::sleep(ITEM_GAP).await;

            match rx.try_recv() {
                Ok(next) => carried = Some(next),
                Err(mpsc::error::TryRecvError::Empty) => {
                    let _ = notice_tx.send(EgressNotice::Idle);
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
    })
}

/// Play one item. Returns `Ok(true)` if it was aborted as stale,
/// `Ok(false)` if it completed, `Err(())` if the sink failed.
async fn play_item(
    ids: &CallIds,
    sink: &dyn PbxSink,
    current_session: &AtomicU64,
    frames_out: &AtomicU64,
    silence: &[u8],
    item: &PlaybackItem,
) -> Result<bool, ()> {
    // A still-pending item under a superseded session was cleared by the
    // barge-in; it never starts.
    if !item.high_priority && current_session.load(Ordering::SeqCst) > item.tts_session {
        return Ok(true);
    }

    let interval = if item.high_priority {
        PRIORITY_FRAME_INTERVAL
    } else {
        FRAME_INTERVAL
    };
    let total = item.frames.len();

    for (index, frame) in item.frames.iter().enumerate() {
        if !item.high_priority {
            let current = current_session.load(Ordering::SeqCst);
            let behind = current.saturating_sub(item.tts_session);
            if behind > 0 {
                let remaining =
                    Duration::from_millis((total - index) as u64 * FRAME_MS);
                // One step behind: finish only inside the grace window.
                // Two or more (hard stop): drop immediately.
                if behind >= 2 || remaining > SENTENCE_COMPLETION_GRACE {
                    return Ok(true);
                }
            }
        }

        sink.send_media(ids, frame).await.map_err(|_| ())?;
        frames_out.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(interval).await;
    }

    // Clean termination: trailing silence.
    for _ in 0..TRAILING_SILENCE_FRAMES {
        sink.send_media(ids, silence).await.map_err(|_| ())?;
        frames_out.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(interval).await;
    }

    Ok(false)
}
