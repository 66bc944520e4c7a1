pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod validation;

pub use pipeline::{Pipeline, PipelineConfig, StreamReport, TextReport, VoiceRequest};
pub use routes::router;
pub use state::AppState;
