use std::sync::Arc;

use crate::metrics::AppMetrics;
use crate::pipeline::Pipeline;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Languages with a local voice, sorted.
    pub voices: Arc<Vec<String>>,
    pub metrics: AppMetrics,
}

impl AppState {
    pub fn new(pipeline: Pipeline, voices: Vec<String>, metrics: AppMetrics) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            voices: Arc::new(voices),
            metrics,
        }
    }
}
