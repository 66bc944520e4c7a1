use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use llm_core::{OpenAiClient, PerplexityClient, SessionRegistry};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::GlobalKeyExtractor, GovernorLayer};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use tts_core::{CloudSynthesizer, PiperSynthesizer, SpeechSynthesizer, VoiceMap};

use server::config::ServerConfig;
use server::metrics::{self, AppMetrics};
use server::{router, AppState, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = dotenv::dotenv();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting voice streaming server...");
    metrics::mark_start();

    let config = ServerConfig::from_env();

    info!("Loading voice map from {}", config.piper_model_map);
    let voices = VoiceMap::load_or_empty(&config.piper_model_map);
    let languages = voices.list_languages();
    info!("Loaded {} Piper voices", languages.len());

    let mut links: Vec<Arc<dyn SpeechSynthesizer>> = Vec::new();
    links.push(Arc::new(PiperSynthesizer::new(
        config.piper_binary.clone(),
        voices,
        config.piper_speed,
    )));
    if let Some(cloud) = config.cloud_tts() {
        info!("Cloud TTS enabled at {} as secondary voice", cloud.url);
        links.push(Arc::new(CloudSynthesizer::new(cloud)));
    }

    let generator = Arc::new(OpenAiClient::new(config.openai()));
    info!("LLM: model={} url={}", generator.model(), config.llm_api_url);

    let sessions = Arc::new(SessionRegistry::new(config.session_timeout(), config.max_history));
    spawn_session_cleanup(Arc::clone(&sessions), config.cleanup_interval());

    let app_metrics = AppMetrics::new();
    let mut pipeline = Pipeline::new(generator, links, Arc::clone(&sessions), config.pipeline())
        .with_metrics(app_metrics.pipeline.clone());
    if let Some(search) = config.perplexity() {
        info!("Web search enabled ({})", search.model);
        pipeline = pipeline.with_search(Arc::new(PerplexityClient::new(search)));
    }

    let state = AppState::new(pipeline, languages, app_metrics);
    info!(
        "Server configuration loaded: port={}, rate_limit={}/min, request_timeout={}s",
        config.port, config.rate_limit_per_minute, config.request_timeout_secs
    );

    // CORS configuration - environment-aware
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ];
    let origins: Vec<axum::http::HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .flatten()
        .filter_map(|origin| origin.parse::<axum::http::HeaderValue>().ok())
        .collect();
    let cors = if origins.is_empty() {
        warn!("CORS_ALLOWED_ORIGINS not set, allowing all origins (development mode)");
        CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .expose_headers(tower_http::cors::Any)
            .allow_credentials(false)
    } else {
        info!("CORS configured for {} origin(s)", origins.len());
        CorsLayer::new()
            .allow_origin(tower_http::cors::AllowOrigin::list(origins))
            .allow_methods(methods)
            .allow_headers(tower_http::cors::Any)
            .expose_headers(tower_http::cors::Any)
            .allow_credentials(false)
    };

    // Global rate limit: every client shares one bucket
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(u64::from((config.rate_limit_per_minute / 60).max(1)))
            .burst_size(config.rate_limit_per_minute.max(1))
            .key_extractor(GlobalKeyExtractor)
            .finish()
            .context("invalid rate limit configuration")?,
    );
    info!("Rate limiting: {} requests per minute", config.rate_limit_per_minute);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(GovernorLayer::new(governor_conf))
        .layer(TimeoutLayer::new(config.request_timeout()))
        .layer(cors)
        .into_inner();

    let app = router(state).layer(middleware_stack);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_session_cleanup(sessions: Arc<SessionRegistry>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = sessions.cleanup_expired();
            debug!(removed, active = sessions.len(), "session cleanup pass");
        }
    });
}
