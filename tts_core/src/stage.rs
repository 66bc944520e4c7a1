//! Synthesis stage: one sentence in, aligned mono frames at the response rate
//! out, whatever the synthesizer behind it looks like.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::frame::{AudioFormat, AudioFrame};
use crate::stream::FrameAssembler;
use crate::synth::{RawBody, SpeechSynthesizer, VoiceSelector};

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<AudioFrame, SynthesisError>> + Send>>;

pub const DEFAULT_FRAME_BYTES: usize = 4096;
pub const DEFAULT_SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(10);

/// Ordered fallback chain over synthesizers.
///
/// For a request in language `L` the candidates are every link that supports
/// `L` (in order), then every link that supports the default language. The
/// first candidate that produces audio wins; each failure is logged and the
/// next one is tried.
#[derive(Clone)]
pub struct SynthesisStage {
    links: Vec<Arc<dyn SpeechSynthesizer>>,
    default_language: String,
    output_rate: u32,
    frame_bytes: usize,
    timeout: Duration,
}

impl std::fmt::Debug for SynthesisStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisStage")
            .field("links", &self.links.iter().map(|l| l.name()).collect::<Vec<_>>())
            .field("default_language", &self.default_language)
            .field("output_rate", &self.output_rate)
            .field("frame_bytes", &self.frame_bytes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl SynthesisStage {
    pub fn new(
        links: Vec<Arc<dyn SpeechSynthesizer>>,
        default_language: impl Into<String>,
        output_rate: u32,
    ) -> Self {
        Self {
            links,
            default_language: default_language.into(),
            output_rate,
            frame_bytes: DEFAULT_FRAME_BYTES,
            timeout: DEFAULT_SYNTHESIS_TIMEOUT,
        }
    }

    pub fn with_frame_bytes(mut self, frame_bytes: usize) -> Self {
        self.frame_bytes = frame_bytes.max(1);
        self
    }

    /// Bounds opening the whole chain (until the first frame) and every wait
    /// for a further chunk afterwards. Each link gets an even share of what is
    /// left when its turn comes.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mono format of every frame this stage yields.
    pub fn output_format(&self) -> AudioFormat {
        AudioFormat::pcm16(self.output_rate, 1)
    }

    pub fn default_language(&self) -> &str {
        &self.default_language
    }

    pub fn link_names(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.name()).collect()
    }

    fn candidates(&self, voice: &VoiceSelector) -> Vec<(Arc<dyn SpeechSynthesizer>, VoiceSelector)> {
        let mut chain: Vec<_> = self
            .links
            .iter()
            .filter(|l| l.supports(&voice.language))
            .map(|l| (Arc::clone(l), voice.clone()))
            .collect();

        if voice.language != self.default_language {
            let fallback = VoiceSelector::language(self.default_language.clone());
            chain.extend(
                self.links
                    .iter()
                    .filter(|l| l.supports(&fallback.language))
                    .map(|l| (Arc::clone(l), fallback.clone())),
            );
        }
        chain
    }

    /// Start synthesizing `text`. Resolves once some link has produced its
    /// first frame, or with the reason none could.
    pub async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceSelector,
    ) -> Result<FrameStream, SynthesisError> {
        let deadline = Instant::now() + self.timeout;
        let candidates = self.candidates(voice);
        let total = candidates.len();
        let mut failures = Vec::new();
        let mut last_timed_out = false;

        for (i, (link, selector)) in candidates.into_iter().enumerate() {
            // the remaining budget is split evenly over the links still to try
            let left = deadline.saturating_duration_since(Instant::now());
            let budget = left / (total - i) as u32;
            match tokio::time::timeout(budget, self.open(link.as_ref(), text, &selector)).await {
                Ok(Ok(frames)) => {
                    debug!(synth = link.name(), language = %selector.language, "synthesis started");
                    return Ok(frames);
                }
                Ok(Err(e)) => {
                    warn!(synth = link.name(), language = %selector.language, error = %e, "synthesis link failed");
                    failures.push(format!("{}: {e}", link.name()));
                    last_timed_out = false;
                }
                Err(_) => {
                    warn!(synth = link.name(), language = %selector.language, budget = ?budget, "synthesis link timed out");
                    failures.push(format!("{}: timed out after {budget:?}", link.name()));
                    last_timed_out = true;
                }
            }
        }

        if last_timed_out {
            return Err(SynthesisError::Timeout(self.timeout));
        }
        if failures.is_empty() {
            return Err(SynthesisError::Unavailable(format!(
                "no synthesizer for language '{}'",
                voice.language
            )));
        }
        Err(SynthesisError::Unavailable(failures.join("; ")))
    }

    async fn open(
        &self,
        link: &dyn SpeechSynthesizer,
        text: &str,
        voice: &VoiceSelector,
    ) -> Result<FrameStream, SynthesisError> {
        let raw = link.synthesize(text, voice).await?;
        let mut asm = FrameAssembler::new(raw.format, self.output_rate, self.frame_bytes)?;

        let mut body = match raw.body {
            RawBody::Buffer(buf) => {
                // batch synthesizer: chunk the whole buffer up front
                let mut frames = asm.push(&buf)?;
                frames.extend(asm.finish()?);
                if frames.is_empty() {
                    return Err(SynthesisError::Unavailable(format!("{} produced no audio", link.name())));
                }
                return Ok(Box::pin(futures_util::stream::iter(frames.into_iter().map(Ok))));
            }
            RawBody::Stream(body) => body,
        };

        // Prime until the first frame so a link that fails before producing
        // anything still falls through to the next one.
        let mut primed: VecDeque<AudioFrame> = VecDeque::new();
        loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    primed.extend(asm.push(&bytes)?);
                    if !primed.is_empty() {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    primed.extend(asm.finish()?);
                    if primed.is_empty() {
                        return Err(SynthesisError::Unavailable(format!("{} produced no audio", link.name())));
                    }
                    return Ok(Box::pin(futures_util::stream::iter(primed.into_iter().map(Ok))));
                }
            }
        }

        let idle = self.timeout;
        let frames = stream! {
            for frame in primed {
                yield Ok(frame);
            }
            loop {
                match tokio::time::timeout(idle, body.next()).await {
                    Err(_) => {
                        yield Err(SynthesisError::Timeout(idle));
                        return;
                    }
                    Ok(Some(Ok(bytes))) => match asm.push(&bytes) {
                        Ok(frames) => {
                            for frame in frames {
                                yield Ok(frame);
                            }
                        }
                        Err(e) => {
                            yield Err(SynthesisError::Format(e));
                            return;
                        }
                    },
                    Ok(Some(Err(e))) => {
                        yield Err(e);
                        return;
                    }
                    Ok(None) => {
                        match asm.finish() {
                            Ok(frames) => {
                                for frame in frames {
                                    yield Ok(frame);
                                }
                            }
                            Err(e) => yield Err(SynthesisError::Format(e)),
                        }
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(frames))
    }
}
