//! Request orchestration.
//!
//! One request runs two cooperating tasks joined by a small bounded queue:
//!
//! ```text
//! generator -> segmenter --(queue)--> normalize -> synthesize -> adapt channels -> WAV writer -> sink
//! ```
//!
//! The generation task owns the segmenter; the request task speaks units in
//! queue order, one at a time, so audio reaches the sink in sentence order
//! without any reordering. Every stage awaits capacity downstream, so a slow
//! client pauses synthesis, which fills the queue, which pauses generation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use llm_core::prompt::{conversation_messages, search_failed_messages, search_grounded_messages};
use llm_core::{
    needs_web_search, BudgetConfig, ChatMessage, GenerationBudget, GenerationError,
    GenerationSession, Role, SessionRegistry, TextGenerator, WebSearch,
};
use serde::Deserialize;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use tts_core::{
    adapt_channels, detect_language, normalize, AudioFormat, ContainerError, OutputSink,
    SentenceSegmenter, SentenceUnit, SinkClosed, SpeechSynthesizer, StreamingWavWriter,
    SynthesisStage, VoiceSelector,
};

use crate::metrics::PipelineMetrics;

pub const FALLBACK_TIMEOUT: &str = "Response timed out.";
pub const FALLBACK_UNAVAILABLE: &str = "I'm having trouble generating a response.";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Format of the response stream; synthesized mono audio is widened to it.
    pub output_format: AudioFormat,
    /// Payload bytes per frame written to the sink.
    pub frame_bytes: usize,
    pub synthesis_timeout: Duration,
    pub default_language: String,
    pub budgets: BudgetConfig,
    /// Units buffered between generation and synthesis.
    pub sentence_queue: usize,
    pub max_unit_chars: Option<usize>,
    pub web_search: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_format: AudioFormat::pcm16(22050, 2),
            frame_bytes: 4096,
            synthesis_timeout: Duration::from_secs(10),
            default_language: "en".into(),
            budgets: BudgetConfig::default(),
            sentence_queue: 4,
            max_unit_chars: Some(150),
            web_search: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceRequest {
    pub text: String,
    pub session_id: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamReport {
    pub session_id: String,
    pub reply: String,
    pub sentences_spoken: usize,
    pub sentences_skipped: usize,
    pub fallback_used: bool,
    pub payload_bytes: u64,
    pub cancelled: bool,
    /// Time from request start to the first payload byte.
    pub first_audio: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct TextReport {
    pub session_id: String,
    pub reply: String,
    pub sentences: usize,
    pub fallback_used: bool,
    pub cancelled: bool,
}

/// What the generation task hands to the speaking side.
#[derive(Debug)]
enum Utterance {
    Sentence(SentenceUnit),
    Fallback(&'static str),
}

impl Utterance {
    fn text(&self) -> &str {
        match self {
            Utterance::Sentence(unit) => &unit.text,
            Utterance::Fallback(phrase) => phrase,
        }
    }
}

#[derive(Debug, Default)]
struct Generated {
    reply: String,
    fallback: Option<&'static str>,
}

/// Join handle that cancels its task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Everything a request needs once its session is locked.
struct Turn {
    session_id: String,
    session: OwnedMutexGuard<GenerationSession>,
    messages: Vec<ChatMessage>,
    budget: GenerationBudget,
    voice: VoiceSelector,
}

pub struct Pipeline {
    generator: Arc<dyn TextGenerator>,
    synthesis: SynthesisStage,
    sessions: Arc<SessionRegistry>,
    search: Option<Arc<dyn WebSearch>>,
    metrics: PipelineMetrics,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        links: Vec<Arc<dyn SpeechSynthesizer>>,
        sessions: Arc<SessionRegistry>,
        config: PipelineConfig,
    ) -> Self {
        // the stage yields mono frames; size them so widened frames hit frame_bytes
        let channels = usize::from(config.output_format.channels.max(1));
        let synthesis = SynthesisStage::new(
            links,
            config.default_language.clone(),
            config.output_format.sample_rate,
        )
        .with_frame_bytes(config.frame_bytes / channels)
        .with_timeout(config.synthesis_timeout);

        info!(
            links = ?synthesis.link_names(),
            format = ?config.output_format,
            "voice pipeline ready"
        );
        Self {
            generator,
            synthesis,
            sessions,
            search: None,
            metrics: PipelineMetrics::new(),
            config,
        }
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn output_format(&self) -> AudioFormat {
        self.config.output_format
    }

    /// Run one spoken reply onto `sink`: a streaming WAV header, then the raw
    /// PCM of every sentence in order. The sink is handed back afterwards.
    pub async fn stream_voice<S: OutputSink>(&self, request: VoiceRequest, sink: S) -> (StreamReport, S) {
        let started = Instant::now();
        self.metrics.stream_started();

        let mut report = StreamReport {
            session_id: request.session_id.clone().unwrap_or_default(),
            ..StreamReport::default()
        };
        let mut writer = StreamingWavWriter::new(sink, self.config.output_format);

        // header first, so even a total failure leaves a well-formed stream
        if writer.write_header().await.is_err() {
            return self.close_voice(report, writer, true);
        }

        let Some(turn) = or_closed(&writer, self.prepare(&request)).await else {
            return self.close_voice(report, writer, true);
        };
        let Turn {
            session_id,
            mut session,
            messages,
            budget,
            voice,
        } = turn;
        report.session_id = session_id;

        let (mut rx, mut generation) = self.spawn_generation(messages, budget);
        let mut index = 0usize;
        let mut cancelled = false;

        loop {
            let next = tokio::select! {
                biased;
                _ = writer.sink_closed() => {
                    cancelled = true;
                    break;
                }
                next = rx.recv() => next,
            };
            let Some(utterance) = next else { break };

            if let Utterance::Fallback(phrase) = &utterance {
                info!(session = %report.session_id, phrase, "speaking fallback");
                report.fallback_used = true;
                self.metrics.fallback_used();
            }
            index += 1;
            if self
                .speak(&mut writer, index, utterance.text(), &voice, started, &mut report)
                .await
                .is_err()
            {
                cancelled = true;
                break;
            }
        }

        if cancelled {
            // dropping the handle aborts generation and any upstream request
            drop(generation);
            return self.close_voice(report, writer, true);
        }

        let generated = join_generation(&mut generation).await;
        report.reply = commit_reply(&mut session, generated);
        drop(session);

        let cancelled = writer.finish().await.is_err();
        self.close_voice(report, writer, cancelled)
    }

    /// Run one reply as text only, sending each normalized sentence to `out`.
    pub async fn stream_text(&self, request: VoiceRequest, out: mpsc::Sender<String>) -> TextReport {
        let mut report = TextReport {
            session_id: request.session_id.clone().unwrap_or_default(),
            ..TextReport::default()
        };

        let turn = tokio::select! {
            biased;
            _ = out.closed() => {
                report.cancelled = true;
                return report;
            }
            turn = self.prepare(&request) => turn,
        };
        let mut session = turn.session;
        report.session_id = turn.session_id;

        let (mut rx, mut generation) = self.spawn_generation(turn.messages, turn.budget);
        loop {
            let next = tokio::select! {
                biased;
                _ = out.closed() => {
                    report.cancelled = true;
                    break;
                }
                next = rx.recv() => next,
            };
            let Some(utterance) = next else { break };
            report.fallback_used |= matches!(utterance, Utterance::Fallback(_));

            let cleaned = normalize(utterance.text());
            if cleaned.is_empty() {
                continue;
            }
            if out.send(cleaned).await.is_err() {
                report.cancelled = true;
                break;
            }
            report.sentences += 1;
        }

        if report.cancelled {
            info!(session = %report.session_id, "text client disconnected");
            return report;
        }

        let generated = join_generation(&mut generation).await;
        report.reply = commit_reply(&mut session, generated);
        report
    }

    /// Lock the session, record the user turn and build the prompt.
    async fn prepare(&self, request: &VoiceRequest) -> Turn {
        let (session_id, handle) = self.sessions.get_or_create(request.session_id.as_deref());
        let mut session = handle.lock_owned().await;

        let language = request
            .language
            .clone()
            .unwrap_or_else(|| detect_language(&request.text).to_string());
        session
            .context
            .insert("language".into(), serde_json::Value::String(language.clone()));
        session.add_turn(Role::User, request.text.clone());

        let budget = self.config.budgets.estimate(&request.text);
        info!(
            session = %session_id,
            language = %language,
            complexity = ?budget.complexity,
            max_tokens = budget.max_tokens,
            "turn started"
        );

        let messages = self.build_messages(&session, &request.text).await;
        Turn {
            session_id,
            session,
            messages,
            budget,
            voice: VoiceSelector::language(language),
        }
    }

    async fn build_messages(&self, session: &GenerationSession, query: &str) -> Vec<ChatMessage> {
        let search = self
            .search
            .as_ref()
            .filter(|_| self.config.web_search && needs_web_search(query));

        let Some(search) = search else {
            return conversation_messages(session);
        };
        match search.search(query).await {
            Ok(result) => {
                info!(citations = result.citations.len(), "answer grounded in web search");
                search_grounded_messages(session, query, &result)
            }
            Err(e) => {
                warn!(error = %e, "web search failed, answering from model knowledge");
                search_failed_messages(session)
            }
        }
    }

    fn spawn_generation(
        &self,
        messages: Vec<ChatMessage>,
        budget: GenerationBudget,
    ) -> (mpsc::Receiver<Utterance>, AbortOnDrop<Generated>) {
        let (tx, rx) = mpsc::channel(self.config.sentence_queue.max(1));
        let generator = Arc::clone(&self.generator);
        let max_unit_chars = self.config.max_unit_chars;
        let handle = tokio::spawn(generate(generator, messages, budget, max_unit_chars, tx));
        (rx, AbortOnDrop(handle))
    }

    /// Normalize, synthesize and write one unit. Synthesis failures skip the
    /// unit; only a closed sink is an error.
    async fn speak<S: OutputSink>(
        &self,
        writer: &mut StreamingWavWriter<S>,
        index: usize,
        text: &str,
        voice: &VoiceSelector,
        started: Instant,
        report: &mut StreamReport,
    ) -> Result<(), SinkClosed> {
        let cleaned = normalize(text);
        if cleaned.is_empty() {
            debug!(sentence = index, "nothing speakable in unit");
            return Ok(());
        }
        info!(sentence = index, text = %preview(&cleaned), "speaking sentence");

        let mut frames = match or_closed(writer, self.synthesis.synthesize(&cleaned, voice)).await {
            None => return Err(SinkClosed),
            Some(Ok(frames)) => frames,
            Some(Err(e)) => {
                warn!(sentence = index, error = %e, "skipping sentence audio");
                report.sentences_skipped += 1;
                self.metrics.sentence_skipped();
                return Ok(());
            }
        };

        let channels = writer.format().channels;
        let mut wrote = false;
        loop {
            let frame = match or_closed(writer, frames.next()).await {
                None => return Err(SinkClosed),
                Some(None) => break,
                Some(Some(Ok(frame))) => frame,
                Some(Some(Err(e))) => {
                    warn!(sentence = index, error = %e, "sentence audio cut short");
                    break;
                }
            };
            let frame = match adapt_channels(frame, channels) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(sentence = index, error = %e, "dropping unadaptable audio");
                    break;
                }
            };
            match writer.write_payload(frame.format, frame.payload).await {
                Ok(()) => {}
                Err(ContainerError::SinkClosed(e)) => return Err(e),
                Err(e @ ContainerError::FormatMismatch { .. }) => {
                    warn!(sentence = index, error = %e, "dropping mismatched audio");
                    break;
                }
            }

            if report.first_audio.is_none() {
                let latency = started.elapsed();
                info!(latency_ms = latency.as_millis() as u64, "first audio sent");
                report.first_audio = Some(latency);
                self.metrics.first_audio(latency);
            }
            wrote = true;
        }

        if wrote {
            report.sentences_spoken += 1;
            self.metrics.sentence_spoken();
        } else {
            report.sentences_skipped += 1;
            self.metrics.sentence_skipped();
        }
        Ok(())
    }

    fn close_voice<S: OutputSink>(
        &self,
        mut report: StreamReport,
        mut writer: StreamingWavWriter<S>,
        cancelled: bool,
    ) -> (StreamReport, S) {
        if cancelled {
            writer.abort();
            info!(session = %report.session_id, "client disconnected, stream cancelled");
        } else {
            info!(
                session = %report.session_id,
                spoken = report.sentences_spoken,
                skipped = report.sentences_skipped,
                bytes = writer.state().payload_bytes(),
                "stream complete"
            );
        }
        report.cancelled = cancelled;
        report.payload_bytes = writer.state().payload_bytes();
        self.metrics.stream_finished(cancelled);
        (report, writer.into_sink())
    }
}

/// Drive the generator into the unit queue.
///
/// The budget's timeout bounds only the time spent waiting on the generator;
/// time blocked on a full queue (a slow listener) does not count against it.
async fn generate(
    generator: Arc<dyn TextGenerator>,
    messages: Vec<ChatMessage>,
    budget: GenerationBudget,
    max_unit_chars: Option<usize>,
    tx: mpsc::Sender<Utterance>,
) -> Generated {
    let mut segmenter = SentenceSegmenter::new().with_max_unit_chars(max_unit_chars);
    let mut reply = String::new();
    let mut remaining = budget.timeout;
    let timed_out = || GenerationError::Timeout(budget.timeout);

    let result = async {
        let waited = Instant::now();
        let mut fragments = tokio::time::timeout(remaining, generator.generate_stream(&messages, &budget))
            .await
            .map_err(|_| timed_out())??;
        remaining = remaining.saturating_sub(waited.elapsed());

        loop {
            let waited = Instant::now();
            let next = tokio::time::timeout(remaining, fragments.next())
                .await
                .map_err(|_| timed_out())?;
            remaining = remaining.saturating_sub(waited.elapsed());

            let Some(fragment) = next else { break };
            let fragment = fragment?;
            reply.push_str(&fragment);
            for unit in segmenter.push(&fragment) {
                if tx.send(Utterance::Sentence(unit)).await.is_err() {
                    return Ok(());
                }
            }
        }
        if let Some(unit) = segmenter.finish() {
            let _ = tx.send(Utterance::Sentence(unit)).await;
        }
        Ok::<(), GenerationError>(())
    }
    .await;

    match result {
        Ok(()) => {
            debug!(chars = reply.len(), "generation complete");
            Generated {
                reply,
                fallback: None,
            }
        }
        Err(e) => {
            error!(error = %e, partial_chars = reply.len(), "generation failed");
            let phrase = match e {
                GenerationError::Timeout(_) => FALLBACK_TIMEOUT,
                GenerationError::Unavailable(_) => FALLBACK_UNAVAILABLE,
            };
            // the unfinished tail is dropped; the listener hears the apology instead
            let _ = tx.send(Utterance::Fallback(phrase)).await;
            Generated {
                reply,
                fallback: Some(phrase),
            }
        }
    }
}

async fn join_generation(generation: &mut AbortOnDrop<Generated>) -> Generated {
    match (&mut generation.0).await {
        Ok(generated) => generated,
        Err(e) => {
            error!(error = %e, "generation task failed");
            Generated {
                reply: String::new(),
                fallback: Some(FALLBACK_UNAVAILABLE),
            }
        }
    }
}

/// Append the assistant turn and return what was said.
fn commit_reply(session: &mut GenerationSession, generated: Generated) -> String {
    let reply = if generated.reply.trim().is_empty() {
        generated.fallback.unwrap_or_default().to_string()
    } else {
        generated.reply
    };
    if !reply.is_empty() {
        session.add_turn(Role::Assistant, reply.clone());
    }
    reply
}

/// `fut`, unless the sink's consumer goes away first.
async fn or_closed<S: OutputSink, F: Future>(writer: &StreamingWavWriter<S>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = writer.sink_closed() => None,
        out = fut => Some(out),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
