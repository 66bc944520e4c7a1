//! Stub collaborators and app builders shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use llm_core::{
    ChatMessage, GenerationBudget, GenerationError, SearchError, SearchResult, SessionRegistry,
    TextGenerator, TextStream, WebSearch,
};
use server::metrics::AppMetrics;
use server::{router, AppState, Pipeline, PipelineConfig};
use tokio::sync::Notify;
use tts_core::{
    AudioFormat, OutputSink, RawAudio, RawBody, SinkClosed, SpeechSynthesizer, SynthesisError,
    VoiceSelector,
};

pub const RATE: u32 = 22050;
/// Mono bytes per synthesized sentence: exactly one stereo 4096-byte frame.
pub const SENTENCE_BYTES: usize = 2048;
pub const STEREO_FRAME: usize = 4096;

/// Sets its flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Yields fixed chunks, optionally pausing before each one.
pub struct ScriptedGenerator {
    chunks: Vec<String>,
    delay: Duration,
    pub pulled: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicBool>,
    pub seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            delay: Duration::ZERO,
            pulled: Arc::new(AtomicUsize::new(0)),
            dropped: Arc::new(AtomicBool::new(false)),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        _budget: &GenerationBudget,
    ) -> Result<TextStream, GenerationError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let pulled = Arc::clone(&self.pulled);
        let guard = DropFlag(Arc::clone(&self.dropped));
        let stream = async_stream::stream! {
            let _guard = guard;
            for chunk in chunks {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(stream))
    }
}

/// Opens a stream that never produces anything.
pub struct HangingGenerator;

#[async_trait]
impl TextGenerator for HangingGenerator {
    async fn generate_stream(
        &self,
        _: &[ChatMessage],
        _: &GenerationBudget,
    ) -> Result<TextStream, GenerationError> {
        Ok(Box::pin(futures_util::stream::pending::<Result<String, GenerationError>>()))
    }
}

pub struct UnavailableGenerator;

#[async_trait]
impl TextGenerator for UnavailableGenerator {
    async fn generate_stream(
        &self,
        _: &[ChatMessage],
        _: &GenerationBudget,
    ) -> Result<TextStream, GenerationError> {
        Err(GenerationError::Unavailable("connection refused".into()))
    }
}

/// Batch synthesizer returning `SENTENCE_BYTES` of mono silence per call.
#[derive(Default)]
pub struct SilenceSynth {
    pub spoken: Mutex<Vec<String>>,
    /// Sentences containing this text fail.
    pub fail_on: Option<&'static str>,
}

impl SilenceSynth {
    pub fn failing_on(text: &'static str) -> Self {
        Self {
            fail_on: Some(text),
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for SilenceSynth {
    fn name(&self) -> &str {
        "silence"
    }

    async fn synthesize(&self, text: &str, _: &VoiceSelector) -> Result<RawAudio, SynthesisError> {
        if self.fail_on.is_some_and(|bad| text.contains(bad)) {
            return Err(SynthesisError::Unavailable("voice crashed".into()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(RawAudio {
            format: AudioFormat::pcm16(RATE, 1),
            body: RawBody::Buffer(Bytes::from(vec![0u8; SENTENCE_BYTES])),
        })
    }
}

/// Fills each sentence with the number found in its text, after a delay
/// that shrinks as the number grows.
pub struct NumberedSynth;

#[async_trait]
impl SpeechSynthesizer for NumberedSynth {
    fn name(&self) -> &str {
        "numbered"
    }

    async fn synthesize(&self, text: &str, _: &VoiceSelector) -> Result<RawAudio, SynthesisError> {
        let n: i16 = text
            .chars()
            .filter(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(n as u64 * 5))).await;
        let samples = vec![n; SENTENCE_BYTES / 2];
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Ok(RawAudio {
            format: AudioFormat::pcm16(RATE, 1),
            body: RawBody::Buffer(Bytes::from(payload)),
        })
    }
}

/// Never finishes opening; flags when the pending call is dropped.
pub struct HangingSynth {
    pub dropped: Arc<AtomicBool>,
}

#[async_trait]
impl SpeechSynthesizer for HangingSynth {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn synthesize(&self, _: &str, _: &VoiceSelector) -> Result<RawAudio, SynthesisError> {
        let _guard = DropFlag(Arc::clone(&self.dropped));
        futures_util::future::pending::<()>().await;
        Err(SynthesisError::Unavailable("unreachable".into()))
    }
}

pub struct StubSearch {
    pub result: Option<SearchResult>,
}

#[async_trait]
impl WebSearch for StubSearch {
    async fn search(&self, _query: &str) -> Result<SearchResult, SearchError> {
        self.result
            .clone()
            .ok_or_else(|| SearchError::Unavailable("503 from search API".into()))
    }
}

/// Accepts `accept` chunks, then behaves like a disconnected client.
pub struct ClosingSink {
    accept: usize,
    pub chunks: Arc<Mutex<Vec<Bytes>>>,
    pub attempts_after_close: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ClosingSink {
    pub fn new(accept: usize) -> Self {
        Self {
            accept,
            chunks: Arc::new(Mutex::new(Vec::new())),
            attempts_after_close: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl OutputSink for ClosingSink {
    async fn send(&mut self, chunk: Bytes) -> Result<(), SinkClosed> {
        if self.closed.load(Ordering::SeqCst) {
            self.attempts_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(SinkClosed);
        }
        let mut chunks = self.chunks.lock().unwrap();
        chunks.push(chunk);
        if chunks.len() >= self.accept {
            self.closed.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn closed(&self) {
        let notified = self.notify.notified();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

pub fn pipeline_with(
    generator: Arc<dyn TextGenerator>,
    synth: Arc<dyn SpeechSynthesizer>,
    config: PipelineConfig,
) -> Pipeline {
    Pipeline::new(generator, vec![synth], Arc::new(SessionRegistry::default()), config)
}

/// Router over a stub generator and the silence synthesizer.
pub fn create_test_app(generator: Arc<dyn TextGenerator>) -> Router {
    let metrics = AppMetrics::new();
    let pipeline = pipeline_with(generator, Arc::new(SilenceSynth::default()), PipelineConfig::default())
        .with_metrics(metrics.pipeline.clone());
    router(AppState::new(pipeline, vec!["en".to_string()], metrics))
}

pub fn u32_at(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub fn u16_at(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}
