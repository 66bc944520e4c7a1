use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;
use tts_core::wav::HEADER_LEN;
use tts_core::{channel_sink, encode_wav_base64, MemorySink};

use crate::error::ApiError;
use crate::metrics::MetricsResponse;
use crate::pipeline::VoiceRequest;
use crate::state::AppState;
use crate::validation::{validate_session_id, validate_voice_request};

/// Chunks queued between the pipeline and a streaming response body.
const SINK_CAPACITY: usize = 4;
/// Sentences queued between the pipeline and a text response.
const TEXT_BUFFER: usize = 16;

#[derive(Serialize)]
pub struct TextResponse {
    pub response: String,
    pub session_id: String,
}

#[derive(Serialize)]
pub struct VoiceTextResponse {
    pub reply: String,
    pub session_id: String,
    pub audio_base64: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration_ms: u64,
}

/// All routes, served at the root and again under `/api`.
pub fn router(state: AppState) -> Router {
    let public_api = Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/voices", get(list_voices))
        .route("/voice/stream", post(voice_stream))
        .route("/voice/text", post(voice_text))
        .route("/text", post(text_reply))
        .route("/stream/text", post(stream_text))
        .route("/session/{id}", delete(reset_session));

    // Metrics endpoint - consider adding authentication in production
    let metrics_api = Router::new().route("/metrics", get(metrics_endpoint));

    let api = Router::new().merge(public_api).merge(metrics_api);

    Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .layer(axum::middleware::from_fn(add_request_id))
        .with_state(state)
}

/// Request ID middleware for tracing
pub async fn add_request_id(mut request: Request, next: Next) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    let Ok(value) = HeaderValue::from_str(&request_id) else {
        return next.run(request).await;
    };
    request.headers_mut().insert("x-request-id", value.clone());
    let mut response = next.run(request).await;
    response.headers_mut().insert("x-request-id", value);
    response
}

/// Validate, and pin a session id so it can be reported before the body starts.
fn accept(mut req: VoiceRequest) -> Result<VoiceRequest, ApiError> {
    validate_voice_request(&req.text, req.session_id.as_deref(), req.language.as_deref())?;
    if req.session_id.is_none() {
        req.session_id = Some(uuid::Uuid::new_v4().to_string());
    }
    Ok(req)
}

pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn list_voices(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.voices.as_ref().clone())
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot(state.pipeline.sessions().len()))
}

pub async fn voice_stream(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Result<Response, ApiError> {
    state.metrics.count_request();
    let endpoint = state.metrics.voice_stream.clone();
    let req = accept(req).inspect_err(|_| endpoint.record_error())?;
    let session_id = req.session_id.clone().unwrap_or_default();
    info!(session = %session_id, chars = req.text.len(), "voice stream requested");

    let (sink, rx) = channel_sink(SINK_CAPACITY);
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        let started = Instant::now();
        let (report, _) = pipeline.stream_voice(req, sink).await;
        endpoint.record_request(started.elapsed());
        if !report.cancelled && report.sentences_spoken == 0 {
            endpoint.record_error();
        }
    });

    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    Response::builder()
        .header(header::CONTENT_TYPE, "audio/wav")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-stream-type", "real-time-sentence-streaming")
        .header("x-session-id", session_id)
        .body(body)
        .map_err(|e| ApiError::InternalError(format!("response build failed: {e}")))
}

pub async fn voice_text(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Result<Json<VoiceTextResponse>, ApiError> {
    state.metrics.count_request();
    let endpoint = &state.metrics.voice_text;
    let started = Instant::now();
    let req = accept(req).inspect_err(|_| endpoint.record_error())?;

    let (report, sink) = state.pipeline.stream_voice(req, MemorySink::new()).await;
    let wav = sink.into_bytes();
    let pcm = wav.get(HEADER_LEN..).unwrap_or_default();
    if pcm.is_empty() {
        endpoint.record_error();
        return Err(ApiError::Unavailable("speech synthesis produced no audio".into()));
    }

    let format = state.pipeline.output_format();
    let audio_base64 = encode_wav_base64(pcm, format)?;
    let duration_ms = pcm.len() as u64 * 1000 / u64::from(format.byte_rate().max(1));
    endpoint.record_request(started.elapsed());

    Ok(Json(VoiceTextResponse {
        reply: report.reply,
        session_id: report.session_id,
        audio_base64,
        sample_rate: format.sample_rate,
        channels: format.channels,
        duration_ms,
    }))
}

pub async fn text_reply(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    state.metrics.count_request();
    let endpoint = &state.metrics.text;
    let started = Instant::now();
    let req = accept(req).inspect_err(|_| endpoint.record_error())?;

    let (tx, mut rx) = mpsc::channel(TEXT_BUFFER);
    let collect = async move {
        let mut sentences = Vec::new();
        while let Some(sentence) = rx.recv().await {
            sentences.push(sentence);
        }
        sentences
    };
    let (report, sentences) = tokio::join!(state.pipeline.stream_text(req, tx), collect);
    endpoint.record_request(started.elapsed());

    Ok(Json(TextResponse {
        response: sentences.join(" "),
        session_id: report.session_id,
    }))
}

pub async fn stream_text(
    State(state): State<AppState>,
    Json(req): Json<VoiceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.metrics.count_request();
    let req = accept(req).inspect_err(|_| state.metrics.text.record_error())?;
    let session_id = req.session_id.clone().unwrap_or_default();

    let (tx, mut rx) = mpsc::channel(TEXT_BUFFER);
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        pipeline.stream_text(req, tx).await;
    });

    let done_session = session_id.clone();
    let events = async_stream::stream! {
        let mut index = 0usize;
        while let Some(text) = rx.recv().await {
            let data = json!({ "text": text, "index": index }).to_string();
            yield Ok::<_, Infallible>(Event::default().event("sentence").data(data));
            index += 1;
        }
        let done = json!({ "total_sentences": index, "session_id": done_session }).to_string();
        yield Ok(Event::default().event("done").data(done));
    };

    Ok((
        [("x-session-id", session_id)],
        Sse::new(events).keep_alive(KeepAlive::default()),
    ))
}

pub async fn reset_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    validate_session_id(&id)?;
    state.pipeline.sessions().reset(&id)?;
    Ok(StatusCode::NO_CONTENT)
}
