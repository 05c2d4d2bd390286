//! PBX wire protocol: inbound event envelope, outbound frames, and the
//! profile parameterization that unifies the PCM and μ-law PBX variants.
//!
//! The PBX sends JSON events on a single WebSocket. Audio arrives as
//! base64 payloads inside `media` events and leaves as base64 payloads
//! inside `reverse-media` events, one 20 ms frame per message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use voxgate_core::domain::{CallIds, MediaFormat};

use crate::error::GatewayError;
use crate::frame::{MULAW_FRAME_BYTES, PCM_FRAME_BYTES};

// ── Inbound events ─────────────────────────────────────────────────

/// Metadata carried by the `start` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub stream_id: String,
    pub call_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub media_format: Option<MediaFormat>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub extra_params: Value,
}

impl StartPayload {
    #[must_use]
    pub fn ids(&self) -> CallIds {
        CallIds {
            stream_id: self.stream_id.clone(),
            call_id: self.call_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    /// Caller display name from `extraParams`, when the PBX forwards one.
    #[must_use]
    pub fn caller_name(&self) -> Option<&str> {
        self.extra_params
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// PBX channel unique id from `extraParams`.
    #[must_use]
    pub fn uniqueid(&self) -> Option<&str> {
        self.extra_params.get("uniqueid").and_then(Value::as_str)
    }
}

/// Connection hints delivered before `start`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub call_direction: Option<String>,
    #[serde(default)]
    pub did: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

/// Inbound PBX event envelope.
///
/// Unrecognized event names deserialize to [`PbxEvent::Unknown`]; the
/// session logs and ignores them.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PbxEvent {
    Connected(ConnectedPayload),
    Start(StartPayload),
    Media {
        payload: String,
    },
    Stop {
        #[serde(default, rename = "streamId")]
        stream_id: Option<String>,
        #[serde(default, rename = "callId")]
        call_id: Option<String>,
    },
    Dtmf {
        digit: String,
    },
    Mark {},
    Clear {},
    Answer {},
    TransferCallResponse {},
    HangupCallResponse {},
    #[serde(other)]
    Unknown,
}

impl PbxEvent {
    /// Parse one PBX text message. Malformed JSON and unknown shapes are
    /// protocol errors; the caller logs them and continues.
    pub fn parse(text: &str) -> Result<Self, GatewayError> {
        serde_json::from_str(text).map_err(|e| GatewayError::Protocol(e.to_string()))
    }
}

// ── Outbound events ────────────────────────────────────────────────

/// `reverse-media` envelope: one 20 ms frame back to the PBX.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseMedia<'a> {
    pub event: &'static str,
    pub stream_id: &'a str,
    pub channel_id: &'a str,
    pub call_id: &'a str,
    pub payload: String,
}

impl<'a> ReverseMedia<'a> {
    #[must_use]
    pub fn new(ids: &'a CallIds, payload_b64: String) -> Self {
        Self {
            event: "reverse-media",
            stream_id: &ids.stream_id,
            channel_id: &ids.channel_id,
            call_id: &ids.call_id,
            payload: payload_b64,
        }
    }
}

/// `error` envelope sent before closing a rejected call.
#[derive(Debug, Serialize)]
pub struct ErrorEvent<'a> {
    pub event: &'static str,
    pub code: &'a str,
    pub message: &'a str,
}

impl<'a> ErrorEvent<'a> {
    #[must_use]
    pub fn new(code: &'a str, message: &'a str) -> Self {
        Self {
            event: "error",
            code,
            message,
        }
    }
}

// ── PBX sink ───────────────────────────────────────────────────────

/// Outbound side of the PBX socket.
///
/// Implementations must serialize all writes through a single critical
/// section — the egress worker and the event sender share one socket and
/// frames on the wire must never interleave.
#[async_trait]
pub trait PbxSink: Send + Sync {
    /// Send one audio frame as a `reverse-media` event.
    async fn send_media(&self, ids: &CallIds, frame: &[u8]) -> Result<(), GatewayError>;

    /// Send an `error` event (best-effort; failures are logged by callers).
    async fn send_error(&self, code: &str, message: &str);

    /// Close the PBX connection.
    async fn close(&self);
}

// ── Profile parameterization ───────────────────────────────────────

/// Wire encoding of PBX audio frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    Linear16,
    Mulaw,
}

impl WireEncoding {
    /// Value used in the ASR session's `encoding` query parameter.
    #[must_use]
    pub const fn asr_name(self) -> &'static str {
        match self {
            Self::Linear16 => "linear16",
            Self::Mulaw => "mulaw",
        }
    }
}

/// Everything that differs between PBX vendor profiles: frame encoding,
/// frame size, and the media format advertised to the ASR.
#[derive(Debug, Clone, Copy)]
pub struct PbxProfile {
    pub encoding: WireEncoding,
    pub sample_rate: u32,
}

impl PbxProfile {
    /// Primary profile: PCM-16 mono 8 kHz.
    #[must_use]
    pub const fn linear16() -> Self {
        Self {
            encoding: WireEncoding::Linear16,
            sample_rate: 8_000,
        }
    }

    /// Legacy SIP profile: μ-law mono 8 kHz both directions.
    #[must_use]
    pub const fn mulaw() -> Self {
        Self {
            encoding: WireEncoding::Mulaw,
            sample_rate: 8_000,
        }
    }

    /// Bytes per 20 ms egress frame under this profile.
    #[must_use]
    pub const fn frame_bytes(self) -> usize {
        match self.encoding {
            WireEncoding::Linear16 => PCM_FRAME_BYTES,
            WireEncoding::Mulaw => MULAW_FRAME_BYTES,
        }
    }

    /// Convert 8 kHz PCM-16 synthesis output to this profile's wire format.
    #[must_use]
    pub fn encode_egress(&self, pcm_8k: Vec<u8>) -> Vec<u8> {
        match self.encoding {
            WireEncoding::Linear16 => pcm_8k,
            WireEncoding::Mulaw => crate::audio::pcm_to_mulaw(&pcm_8k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_event() {
        let text = r#"{
            "event": "start",
            "streamId": "st-1",
            "callId": "ca-1",
            "channelId": "ch-1",
            "mediaFormat": {"encoding": "linear16", "sampleRate": 8000, "channels": 1},
            "from": "+919876543210",
            "to": "+911409000000",
            "extraParams": {"name": "Asha", "uniqueid": "u-77"}
        }"#;
        let event = PbxEvent::parse(text).unwrap();
        let PbxEvent::Start(start) = event else {
            panic!("expected start event");
        };
        assert_eq!(start.stream_id, "st-1");
        assert_eq!(start.caller_name(), Some("Asha"));
        assert_eq!(start.uniqueid(), Some("u-77"));
        assert_eq!(start.media_format.unwrap().sample_rate, 8_000);
    }

    #[test]
    fn parses_media_and_stop() {
        let media = PbxEvent::parse(r#"{"event":"media","payload":"AAAA"}"#).unwrap();
        assert!(matches!(media, PbxEvent::Media { .. }));

        let stop = PbxEvent::parse(r#"{"event":"stop","streamId":"st-1"}"#).unwrap();
        assert!(matches!(stop, PbxEvent::Stop { .. }));
    }

    #[test]
    fn unknown_event_does_not_error() {
        let event = PbxEvent::parse(r#"{"event":"vendor-keepalive","x":1}"#).unwrap();
        assert!(matches!(event, PbxEvent::Unknown));
    }

    #[test]
    fn kebab_case_events_parse() {
        let event = PbxEvent::parse(r#"{"event":"transfer-call-response"}"#).unwrap();
        assert!(matches!(event, PbxEvent::TransferCallResponse {}));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = PbxEvent::parse("{not json").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Protocol);
    }

    #[test]
    fn reverse_media_serializes_camel_case() {
        let ids = CallIds {
            stream_id: "st".into(),
            call_id: "ca".into(),
            channel_id: "ch".into(),
        };
        let json = serde_json::to_value(ReverseMedia::new(&ids, "QUJD".into())).unwrap();
        assert_eq!(json["event"], "reverse-media");
        assert_eq!(json["streamId"], "st");
        assert_eq!(json["payload"], "QUJD");
    }

    #[test]
    fn profiles_expose_frame_sizes() {
        assert_eq!(PbxProfile::linear16().frame_bytes(), 320);
        assert_eq!(PbxProfile::mulaw().frame_bytes(), 160);
    }

    #[test]
    fn mulaw_profile_compands_egress() {
        let pcm = vec![0u8; 320];
        let wire = PbxProfile::mulaw().encode_egress(pcm);
        assert_eq!(wire.len(), 160);
        assert!(wire.iter().all(|&b| b == 0xFF));
    }
}
