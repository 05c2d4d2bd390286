//! Batch TTS client.
//!
//! Each speakable chunk becomes one vendor request returning a complete
//! WAV payload. The container is stripped and the PCM handed back at the
//! vendor's 16 kHz rate; downsampling to the PBX rate happens in the
//! synthesis-prep stage, not here.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::audio::strip_wav_header;
use crate::error::GatewayError;

/// Connect timeout for TTS requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(8);

/// Sample rate of vendor synthesis output.
pub const TTS_SAMPLE_RATE: u32 = 16_000;

/// Synthesized audio: PCM-16 LE mono.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    pub pcm: Vec<u8>,
    pub sample_rate: u32,
}

impl TtsAudio {
    /// Playback duration of this audio.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let samples = self.pcm.len() / 2;
        Duration::from_micros(samples as u64 * 1_000_000 / u64::from(self.sample_rate))
    }
}

/// Port for speech synthesis.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize one chunk of text.
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        language: &str,
    ) -> Result<TtsAudio, GatewayError>;
}

// ── HTTP batch implementation ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    text: &'a str,
    voice_settings: VoiceSettings<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct VoiceSettings<'a> {
    voice_id: &'a str,
    language: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    sample_rate: u32,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    audios: Vec<String>,
}

/// Batch TTS client: one HTTP POST per chunk, base64 WAV back.
pub struct HttpTtsClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HttpTtsClient {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::transient("tts", e))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl TtsBackend for HttpTtsClient {
    async fn synthesize(
        &self,
        text: &str,
        voice_id: &str,
        language: &str,
    ) -> Result<TtsAudio, GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&WireRequest {
                text,
                voice_settings: VoiceSettings { voice_id, language },
                generation_config: GenerationConfig {
                    sample_rate: TTS_SAMPLE_RATE,
                    format: "wav",
                },
            })
            .send()
            .await
            .map_err(|e| GatewayError::transient("tts", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::transient("tts", format!("HTTP {status}")));
        }

        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::contract("tts", e))?;

        let encoded = body
            .audios
            .first()
            .ok_or_else(|| GatewayError::contract("tts", "empty audios array"))?;

        let wav = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| GatewayError::contract("tts", e))?;

        let pcm = strip_wav_header(&wav).to_vec();
        if pcm.is_empty() {
            return Err(GatewayError::contract("tts", "no audio data in response"));
        }

        Ok(TtsAudio {
            pcm,
            sample_rate: TTS_SAMPLE_RATE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_counts_samples() {
        let audio = TtsAudio {
            pcm: vec![0u8; 32_000], // 16 000 samples = 1 s at 16 kHz
            sample_rate: 16_000,
        };
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }

    #[test]
    fn duration_of_empty_audio_is_zero() {
        let audio = TtsAudio {
            pcm: Vec::new(),
            sample_rate: 16_000,
        };
        assert_eq!(audio.duration(), Duration::ZERO);
    }
}
