// Server configuration, read from the environment (after `.env` is loaded)

use std::str::FromStr;
use std::time::Duration;

use llm_core::{BudgetConfig, OpenAiConfig, PerplexityConfig};
use tts_core::{AudioFormat, CloudTtsConfig};

use crate::pipeline::PipelineConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,

    pub llm_api_url: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_temperature: f32,

    pub simple_max_tokens: u32,
    pub normal_max_tokens: u32,
    pub detailed_max_tokens: u32,
    pub fast_timeout_secs: u64,
    pub normal_timeout_secs: u64,

    pub session_timeout_secs: u64,
    pub max_history: usize,
    pub session_cleanup_interval_secs: u64,

    pub piper_binary: String,
    pub piper_model_map: String,
    pub piper_speed: f32,
    pub default_language: String,

    pub output_sample_rate: u32,
    pub output_channels: u16,
    pub audio_frame_bytes: usize,
    pub synthesis_timeout_secs: u64,

    pub cloud_tts_url: Option<String>,
    pub cloud_tts_api_key: Option<String>,
    pub cloud_tts_model: String,
    pub cloud_tts_voice: String,
    pub cloud_tts_sample_rate: u32,

    pub enable_web_search: bool,
    pub perplexity_api_key: Option<String>,
    pub perplexity_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            rate_limit_per_minute: 60,
            request_timeout_secs: 60,
            cors_allowed_origins: None,

            llm_api_url: "http://localhost:8080/v1/chat/completions".into(),
            llm_model: "mistral-small".into(),
            llm_api_key: None,
            llm_temperature: 0.7,

            simple_max_tokens: 150,
            normal_max_tokens: 500,
            detailed_max_tokens: 1200,
            fast_timeout_secs: 5,
            normal_timeout_secs: 15,

            session_timeout_secs: 1800,
            max_history: 20,
            session_cleanup_interval_secs: 60,

            piper_binary: "piper".into(),
            piper_model_map: "models/map.json".into(),
            piper_speed: 1.1,
            default_language: "en".into(),

            output_sample_rate: 22050,
            output_channels: 2,
            audio_frame_bytes: 4096,
            synthesis_timeout_secs: 10,

            cloud_tts_url: None,
            cloud_tts_api_key: None,
            cloud_tts_model: "tts-1".into(),
            cloud_tts_voice: "alloy".into(),
            cloud_tts_sample_rate: 24000,

            enable_web_search: true,
            perplexity_api_key: None,
            perplexity_model: "sonar-pro".into(),
        }
    }
}

/// Parsed value of `key`, or `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Non-empty value of `key`.
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();

        let cors_allowed_origins = env_opt("CORS_ALLOWED_ORIGINS").map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        Self {
            port: env_or("PORT", d.port),
            rate_limit_per_minute: env_or("RATE_LIMIT_PER_MINUTE", d.rate_limit_per_minute),
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", d.request_timeout_secs),
            cors_allowed_origins,

            llm_api_url: env_opt("LLM_API_URL").unwrap_or(d.llm_api_url),
            llm_model: env_opt("LLM_MODEL_NAME").unwrap_or(d.llm_model),
            llm_api_key: env_opt("LLM_API_KEY"),
            llm_temperature: env_or("LLM_TEMPERATURE", d.llm_temperature),

            simple_max_tokens: env_or("LLM_SIMPLE_QUERY_MAX_TOKENS", d.simple_max_tokens),
            normal_max_tokens: env_or("LLM_NORMAL_QUERY_MAX_TOKENS", d.normal_max_tokens),
            detailed_max_tokens: env_or("LLM_DETAILED_QUERY_MAX_TOKENS", d.detailed_max_tokens),
            fast_timeout_secs: env_or("LLM_FAST_TIMEOUT", d.fast_timeout_secs),
            normal_timeout_secs: env_or("LLM_NORMAL_TIMEOUT", d.normal_timeout_secs),

            session_timeout_secs: env_or("SESSION_TIMEOUT", d.session_timeout_secs),
            max_history: env_or("MAX_CONVERSATION_HISTORY", d.max_history),
            session_cleanup_interval_secs: env_or(
                "SESSION_CLEANUP_INTERVAL_SECS",
                d.session_cleanup_interval_secs,
            ),

            piper_binary: env_opt("PIPER_BINARY").unwrap_or(d.piper_binary),
            piper_model_map: env_opt("PIPER_MODEL_MAP").unwrap_or(d.piper_model_map),
            piper_speed: env_or("PIPER_SPEED", d.piper_speed),
            default_language: env_opt("DEFAULT_LANGUAGE").unwrap_or(d.default_language),

            output_sample_rate: env_or("OUTPUT_SAMPLE_RATE", d.output_sample_rate),
            output_channels: env_or("OUTPUT_CHANNELS", d.output_channels),
            audio_frame_bytes: env_or("AUDIO_FRAME_BYTES", d.audio_frame_bytes),
            synthesis_timeout_secs: env_or("SYNTHESIS_TIMEOUT_SECS", d.synthesis_timeout_secs),

            cloud_tts_url: env_opt("CLOUD_TTS_URL"),
            cloud_tts_api_key: env_opt("CLOUD_TTS_API_KEY"),
            cloud_tts_model: env_opt("CLOUD_TTS_MODEL").unwrap_or(d.cloud_tts_model),
            cloud_tts_voice: env_opt("CLOUD_TTS_VOICE").unwrap_or(d.cloud_tts_voice),
            cloud_tts_sample_rate: env_or("CLOUD_TTS_SAMPLE_RATE", d.cloud_tts_sample_rate),

            enable_web_search: env_or("ENABLE_WEB_SEARCH", d.enable_web_search),
            perplexity_api_key: env_opt("PERPLEXITY_API_KEY"),
            perplexity_model: env_opt("PERPLEXITY_MODEL").unwrap_or(d.perplexity_model),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.session_cleanup_interval_secs.max(1))
    }

    pub fn budgets(&self) -> BudgetConfig {
        BudgetConfig {
            simple_max_tokens: self.simple_max_tokens,
            normal_max_tokens: self.normal_max_tokens,
            detailed_max_tokens: self.detailed_max_tokens,
            fast_timeout: Duration::from_secs(self.fast_timeout_secs),
            normal_timeout: Duration::from_secs(self.normal_timeout_secs),
        }
    }

    pub fn openai(&self) -> OpenAiConfig {
        OpenAiConfig {
            api_url: self.llm_api_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            temperature: self.llm_temperature,
        }
    }

    /// Secondary synthesis link, only when an endpoint is configured.
    pub fn cloud_tts(&self) -> Option<CloudTtsConfig> {
        self.cloud_tts_url.as_ref().map(|url| CloudTtsConfig {
            url: url.clone(),
            api_key: self.cloud_tts_api_key.clone(),
            model: self.cloud_tts_model.clone(),
            voice: self.cloud_tts_voice.clone(),
            sample_rate: self.cloud_tts_sample_rate,
            speed: self.piper_speed,
        })
    }

    /// Web search, only when enabled and a key is present.
    pub fn perplexity(&self) -> Option<PerplexityConfig> {
        if !self.enable_web_search {
            return None;
        }
        self.perplexity_api_key.as_ref().map(|key| PerplexityConfig {
            model: self.perplexity_model.clone(),
            ..PerplexityConfig::new(key.clone())
        })
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            output_format: AudioFormat::pcm16(self.output_sample_rate, self.output_channels.max(1)),
            frame_bytes: self.audio_frame_bytes,
            synthesis_timeout: Duration::from_secs(self.synthesis_timeout_secs),
            default_language: self.default_language.clone(),
            budgets: self.budgets(),
            web_search: self.perplexity().is_some(),
            ..PipelineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.budgets(), BudgetConfig::default());
        assert!(config.cloud_tts().is_none());
        assert!(config.perplexity().is_none());

        let pipeline = config.pipeline();
        assert_eq!(pipeline.output_format, AudioFormat::pcm16(22050, 2));
        assert_eq!(pipeline.frame_bytes, 4096);
        assert!(!pipeline.web_search);
    }

    #[test]
    fn test_search_requires_key_and_flag() {
        let mut config = ServerConfig {
            perplexity_api_key: Some("key".into()),
            ..ServerConfig::default()
        };
        assert_eq!(config.perplexity().map(|p| p.model), Some("sonar-pro".into()));
        assert!(config.pipeline().web_search);

        config.enable_web_search = false;
        assert!(config.perplexity().is_none());
    }

    #[test]
    fn test_env_or_ignores_garbage() {
        std::env::set_var("VOICE_TEST_ENV_OR", "not-a-number");
        assert_eq!(env_or("VOICE_TEST_ENV_OR", 7u16), 7);
        std::env::set_var("VOICE_TEST_ENV_OR", " 9 ");
        assert_eq!(env_or("VOICE_TEST_ENV_OR", 7u16), 9);
        std::env::remove_var("VOICE_TEST_ENV_OR");
    }
}
