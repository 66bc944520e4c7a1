// Metrics collection and tracking

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Latency samples kept for percentiles.
const MAX_SAMPLES: usize = 1000;

static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Mark process start for uptime reporting.
pub fn mark_start() {
    let _ = START_TIME.get_or_init(Instant::now);
}

pub fn uptime_seconds() -> u64 {
    START_TIME.get().map(|start| start.elapsed().as_secs()).unwrap_or(0)
}

/// Per-endpoint metrics
#[derive(Debug, Clone)]
pub struct EndpointMetrics {
    request_count: Arc<AtomicU64>,
    error_count: Arc<AtomicU64>,
    total_latency_ms: Arc<AtomicU64>,
    min_latency_ms: Arc<AtomicU64>,
    max_latency_ms: Arc<AtomicU64>,
    latency_samples: Arc<Mutex<VecDeque<u64>>>,
}

impl EndpointMetrics {
    pub fn new() -> Self {
        Self {
            request_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            total_latency_ms: Arc::new(AtomicU64::new(0)),
            min_latency_ms: Arc::new(AtomicU64::new(u64::MAX)),
            max_latency_ms: Arc::new(AtomicU64::new(0)),
            latency_samples: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn record_request(&self, latency: Duration) {
        let latency_ms = latency.as_millis() as u64;
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.min_latency_ms.fetch_min(latency_ms, Ordering::Relaxed);
        self.max_latency_ms.fetch_max(latency_ms, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            samples.push_back(latency_ms);
            if samples.len() > MAX_SAMPLES {
                samples.pop_front();
            }
        }
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_ms(&self) -> f64 {
        let count = self.request_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn percentile(&self, p: u8) -> u64 {
        let Ok(samples) = self.latency_samples.lock() else {
            return 0;
        };
        if samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        let index = (sorted.len() * p as usize / 100).min(sorted.len() - 1);
        sorted[index]
    }

    pub fn stats(&self) -> EndpointStats {
        let request_count = self.request_count.load(Ordering::Relaxed);
        let min = self.min_latency_ms.load(Ordering::Relaxed);
        EndpointStats {
            request_count,
            error_count: self.error_count.load(Ordering::Relaxed),
            avg_latency_ms: self.avg_latency_ms(),
            min_latency_ms: if request_count == 0 { 0 } else { min },
            max_latency_ms: self.max_latency_ms.load(Ordering::Relaxed),
            p50_latency_ms: self.percentile(50),
            p95_latency_ms: self.percentile(95),
            p99_latency_ms: self.percentile(99),
        }
    }
}

impl Default for EndpointMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters updated by the voice pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    streams_started: Arc<AtomicU64>,
    streams_completed: Arc<AtomicU64>,
    streams_cancelled: Arc<AtomicU64>,
    sentences_spoken: Arc<AtomicU64>,
    sentences_skipped: Arc<AtomicU64>,
    fallback_utterances: Arc<AtomicU64>,
    first_audio_count: Arc<AtomicU64>,
    first_audio_total_ms: Arc<AtomicU64>,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_started(&self) {
        self.streams_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stream_finished(&self, cancelled: bool) {
        if cancelled {
            self.streams_cancelled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.streams_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn sentence_spoken(&self) {
        self.sentences_spoken.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sentence_skipped(&self) {
        self.sentences_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_used(&self) {
        self.fallback_utterances.fetch_add(1, Ordering::Relaxed);
    }

    pub fn first_audio(&self, latency: Duration) {
        self.first_audio_count.fetch_add(1, Ordering::Relaxed);
        self.first_audio_total_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> PipelineStats {
        let first = self.first_audio_count.load(Ordering::Relaxed);
        PipelineStats {
            streams_started: self.streams_started.load(Ordering::Relaxed),
            streams_completed: self.streams_completed.load(Ordering::Relaxed),
            streams_cancelled: self.streams_cancelled.load(Ordering::Relaxed),
            sentences_spoken: self.sentences_spoken.load(Ordering::Relaxed),
            sentences_skipped: self.sentences_skipped.load(Ordering::Relaxed),
            fallback_utterances: self.fallback_utterances.load(Ordering::Relaxed),
            avg_first_audio_ms: if first == 0 {
                0.0
            } else {
                self.first_audio_total_ms.load(Ordering::Relaxed) as f64 / first as f64
            },
        }
    }
}

/// Comprehensive metrics structure
#[derive(Debug, Clone, Default)]
pub struct AppMetrics {
    pub request_count: Arc<AtomicU64>,
    pub voice_stream: EndpointMetrics,
    pub voice_text: EndpointMetrics,
    pub text: EndpointMetrics,
    pub pipeline: PipelineMetrics,
}

impl AppMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub endpoints: EndpointMetricsResponse,
    pub pipeline: PipelineStats,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f32,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f32,
    pub request_count: u64,
    pub uptime_seconds: u64,
    pub system_load: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct EndpointMetricsResponse {
    pub voice_stream: EndpointStats,
    pub voice_text: EndpointStats,
    pub text: EndpointStats,
}

#[derive(Debug, Serialize)]
pub struct EndpointStats {
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub p50_latency_ms: u64,
    pub p95_latency_ms: u64,
    pub p99_latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct PipelineStats {
    pub streams_started: u64,
    pub streams_completed: u64,
    pub streams_cancelled: u64,
    pub sentences_spoken: u64,
    pub sentences_skipped: u64,
    pub fallback_utterances: u64,
    pub avg_first_audio_ms: f64,
}

/// Host snapshot: CPU, memory and (on Unix) the 1-minute load average.
pub fn system_snapshot(request_count: u64) -> SystemMetrics {
    let mut system = sysinfo::System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpu_usage = system.global_cpu_info().cpu_usage();
    let memory_used = system.used_memory();
    let memory_total = system.total_memory();
    let memory_usage_percent = if memory_total > 0 {
        (memory_used as f64 / memory_total as f64 * 100.0) as f32
    } else {
        0.0
    };

    let system_load = {
        #[cfg(unix)]
        {
            std::fs::read_to_string("/proc/loadavg")
                .ok()
                .and_then(|loadavg| loadavg.split_whitespace().next()?.parse::<f64>().ok())
        }
        #[cfg(not(unix))]
        None
    };

    SystemMetrics {
        cpu_usage_percent: cpu_usage,
        memory_used_mb: memory_used / 1024 / 1024,
        memory_total_mb: memory_total / 1024 / 1024,
        memory_usage_percent,
        request_count,
        uptime_seconds: uptime_seconds(),
        system_load,
    }
}

impl AppMetrics {
    pub fn snapshot(&self, active_sessions: usize) -> MetricsResponse {
        MetricsResponse {
            timestamp: Utc::now(),
            system: system_snapshot(self.request_count.load(Ordering::Relaxed)),
            endpoints: EndpointMetricsResponse {
                voice_stream: self.voice_stream.stats(),
                voice_text: self.voice_text.stats(),
                text: self.text.stats(),
            },
            pipeline: self.pipeline.stats(),
            active_sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_stats() {
        let metrics = EndpointMetrics::new();
        assert_eq!(metrics.stats().min_latency_ms, 0);

        for ms in [30, 10, 20] {
            metrics.record_request(Duration::from_millis(ms));
        }
        metrics.record_error();

        let stats = metrics.stats();
        assert_eq!(stats.request_count, 3);
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.min_latency_ms, 10);
        assert_eq!(stats.max_latency_ms, 30);
        assert_eq!(stats.p50_latency_ms, 20);
        assert!((stats.avg_latency_ms - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_samples_are_bounded() {
        let metrics = EndpointMetrics::new();
        for ms in 0..(MAX_SAMPLES as u64 + 10) {
            metrics.record_request(Duration::from_millis(ms));
        }
        assert_eq!(metrics.latency_samples.lock().unwrap().len(), MAX_SAMPLES);
    }

    #[test]
    fn test_pipeline_counters() {
        let metrics = PipelineMetrics::new();
        metrics.stream_started();
        metrics.stream_started();
        metrics.stream_finished(false);
        metrics.stream_finished(true);
        metrics.first_audio(Duration::from_millis(100));
        metrics.first_audio(Duration::from_millis(300));

        let stats = metrics.stats();
        assert_eq!(stats.streams_started, 2);
        assert_eq!(stats.streams_completed, 1);
        assert_eq!(stats.streams_cancelled, 1);
        assert!((stats.avg_first_audio_ms - 200.0).abs() < f64::EPSILON);
    }
}
