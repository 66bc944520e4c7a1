//! OpenAI-compatible `/v1/audio/speech` synthesizer, used as the secondary
//! link of the fallback chain.

use async_trait::async_trait;
use serde::Serialize;

use crate::error::SynthesisError;
use crate::frame::AudioFormat;
use crate::synth::{RawAudio, RawBody, SpeechSynthesizer, VoiceSelector};

#[derive(Debug, Clone)]
pub struct CloudTtsConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    /// Rate of the raw PCM the endpoint returns (24 kHz for OpenAI).
    pub sample_rate: u32,
    pub speed: f32,
}

/// Batch synthesizer: one request, one complete PCM buffer.
#[derive(Debug, Clone)]
pub struct CloudSynthesizer {
    client: reqwest::Client,
    config: CloudTtsConfig,
}

impl CloudSynthesizer {
    pub fn new(config: CloudTtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
}

#[async_trait]
impl SpeechSynthesizer for CloudSynthesizer {
    fn name(&self) -> &str {
        "cloud"
    }

    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSelector,
    ) -> Result<RawAudio, SynthesisError> {
        let request = SpeechRequest {
            model: &self.config.model,
            input: text,
            voice: voice.voice.as_deref().unwrap_or(&self.config.voice),
            response_format: "pcm",
            speed: self.config.speed,
        };

        let mut req = self.client.post(&self.config.url).json(&request);
        if let Some(key) = &self.config.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        let response = req
            .send()
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("cloud tts request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Unavailable(format!(
                "cloud tts error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Unavailable(format!("cloud tts body: {e}")))?;
        if audio.is_empty() {
            return Err(SynthesisError::Unavailable("cloud tts returned no audio".into()));
        }

        Ok(RawAudio {
            format: AudioFormat::pcm16(self.config.sample_rate, 1),
            body: RawBody::Buffer(audio),
        })
    }
}
