//! Streaming client for OpenAI-compatible chat completion servers
//! (llama.cpp, vLLM, Ollama's `/v1` shim, OpenAI itself).

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::budget::GenerationBudget;
use crate::chat::ChatMessage;
use crate::error::GenerationError;
use crate::generator::{TextGenerator, TextStream};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8080/v1/chat/completions".into(),
            model: "mistral-small".into(),
            api_key: None,
            temperature: 0.7,
        }
    }
}

/// Structure for the streaming chat request
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent-events line.
#[derive(Debug, PartialEq, Eq)]
pub enum SseEvent {
    Delta(String),
    Done,
}

/// Parse a single SSE line. Comments, keep-alives, role-only deltas and
/// malformed JSON all yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.trim().strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let chunk: StreamChunk = serde_json::from_str(data).ok()?;
    let content = chunk.choices.into_iter().next()?.delta.content?;
    (!content.is_empty()).then_some(SseEvent::Delta(content))
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiClient {
    pub fn new(config: OpenAiConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        budget: &GenerationBudget,
    ) -> Result<TextStream, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: budget.max_tokens,
            stream: true,
        };

        let mut req = self.client.post(&self.config.api_url).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        info!(
            messages = messages.len(),
            max_tokens = budget.max_tokens,
            "LLM stream started"
        );
        let response = match tokio::time::timeout(budget.timeout, req.send()).await {
            Err(_) => return Err(GenerationError::Timeout(budget.timeout)),
            Ok(Err(e)) => return Err(GenerationError::Unavailable(format!("request failed: {e}"))),
            Ok(Ok(resp)) => resp,
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "LLM API error");
            return Err(GenerationError::Unavailable(format!("LLM API error {status}: {text}")));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut buf: Vec<u8> = Vec::new();
            let mut fragments = 0usize;
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(GenerationError::Unavailable(format!("stream interrupted: {e}")));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_sse_line(&String::from_utf8_lossy(&line)) {
                        Some(SseEvent::Delta(text)) => {
                            fragments += 1;
                            yield Ok(text);
                        }
                        Some(SseEvent::Done) => break 'read,
                        None => {}
                    }
                }
            }
            // a final line without a trailing newline
            if let Some(SseEvent::Delta(text)) = parse_sse_line(&String::from_utf8_lossy(&buf)) {
                fragments += 1;
                yield Ok(text);
            }
            debug!(fragments, "LLM stream completed");
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;

    #[test]
    fn test_parse_content_delta() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(parse_sse_line(line), Some(SseEvent::Delta("Hello".into())));
    }

    #[test]
    fn test_parse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line("data:[DONE]\r"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line(": keep-alive"), None);
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line("data: {not json"), None);
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
        assert_eq!(parse_sse_line(r#"data: {"choices":[]}"#), None);
    }

    #[test]
    fn test_request_body() {
        let messages = vec![ChatMessage::user("hi")];
        let body = ChatRequest {
            model: "m",
            messages: &messages,
            temperature: 0.5,
            max_tokens: 150,
            stream: true,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 150);
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable() {
        let client = OpenAiClient::new(OpenAiConfig {
            api_url: "http://127.0.0.1:9/v1/chat/completions".into(),
            ..OpenAiConfig::default()
        });
        let budget = BudgetConfig::default().estimate("hello there");
        let err = client
            .generate_stream(&[ChatMessage::user("hello there")], &budget)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GenerationError::Unavailable(_)));
    }
}
