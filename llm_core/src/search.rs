//! Optional web-search enrichment.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chat::ChatMessage;
use crate::error::SearchError;

const SEARCH_KEYWORDS: &[&str] = &[
    "search", "latest", "current", "recent", "news", "today", "price", "cost", "weather", "stock",
    "what is happening",
];

/// Whether a query asks for fresh information the model cannot know.
pub fn needs_web_search(text: &str) -> bool {
    let lower = text.to_lowercase();
    SEARCH_KEYWORDS.iter().any(|k| lower.contains(k))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult, SearchError>;
}

#[derive(Debug, Clone)]
pub struct PerplexityConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl PerplexityConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "sonar-pro".into(),
            base_url: "https://api.perplexity.ai/chat/completions".into(),
            max_tokens: 1000,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    return_citations: bool,
    search_recency_filter: &'a str,
}

#[derive(Deserialize)]
struct SearchResponse {
    choices: Vec<SearchChoice>,
    #[serde(default)]
    citations: Vec<String>,
}

#[derive(Deserialize)]
struct SearchChoice {
    message: SearchMessage,
}

#[derive(Deserialize)]
struct SearchMessage {
    content: String,
}

#[derive(Debug, Clone)]
pub struct PerplexityClient {
    client: reqwest::Client,
    config: PerplexityConfig,
}

impl PerplexityClient {
    pub fn new(config: PerplexityConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl WebSearch for PerplexityClient {
    async fn search(&self, query: &str) -> Result<SearchResult, SearchError> {
        info!(query = %query.chars().take(100).collect::<String>(), "perplexity search");

        let body = SearchRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage::system(
                    "You are a helpful search assistant. Provide accurate, well-cited answers based on current information.",
                ),
                ChatMessage::user(query),
            ],
            max_tokens: self.config.max_tokens,
            temperature: 0.2,
            return_citations: true,
            search_recency_filter: "month",
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "perplexity API error");
            return Err(SearchError::Unavailable(format!("{status}: {text}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Unavailable(format!("invalid response: {e}")))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| SearchError::Unavailable("empty response".into()))?;

        info!(chars = answer.len(), citations = parsed.citations.len(), "perplexity result");
        Ok(SearchResult {
            answer,
            citations: parsed.citations,
        })
    }
}
