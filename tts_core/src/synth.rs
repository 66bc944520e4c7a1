//! The speech synthesizer seam.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::SynthesisError;
use crate::frame::AudioFormat;

/// Raw PCM bytes as produced by a synthesizer, not yet aligned to sample frames.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SynthesisError>> + Send>>;

pub enum RawBody {
    /// Native incremental output (e.g. a subprocess stdout).
    Stream(ByteStream),
    /// One complete buffer from a batch-only synthesizer.
    Buffer(Bytes),
}

impl std::fmt::Debug for RawBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawBody::Stream(_) => f.write_str("RawBody::Stream(..)"),
            RawBody::Buffer(b) => write!(f, "RawBody::Buffer({} bytes)", b.len()),
        }
    }
}

/// Container-free audio: the synthesizer describes its samples and the
/// caller owns all framing.
#[derive(Debug)]
pub struct RawAudio {
    pub format: AudioFormat,
    pub body: RawBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoiceSelector {
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

impl VoiceSelector {
    pub fn language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: Option<String>) -> Self {
        self.voice = voice;
        self
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Whether this synthesizer has a voice for `language` at all. The stage
    /// skips links that do not without counting them as failures.
    fn supports(&self, _language: &str) -> bool {
        true
    }

    /// Start synthesizing `text`. Failing to start is reported here; failures
    /// after the first bytes surface as stream items.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSelector,
    ) -> Result<RawAudio, SynthesisError>;
}
