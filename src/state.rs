//! # Application State Management
//!
//! Shared state handed to every HTTP request handler.
//!
//! ## What lives here:
//! - **config**: the effective configuration, fixed after startup
//! - **metrics**: request counters, updated by the metrics middleware on every request
//! - **storage**: the mounted storage gateway (read-only documents such as the UI page)
//! - **audio**: the [`AudioSubsystem`] owning the audio lock and the playback liveness handle
//! - **listener**: lets `/play` ask the supervisor to take the listener down in restart mode
//!
//! ## Arc<RwLock<T>> Pattern
//! Metrics are written by every request and read by the metrics endpoints, so they sit
//! behind an `RwLock`. A poisoned lock is recovered rather than propagated: a counter is
//! never worth failing a request over.

use crate::audio::AudioSubsystem;
use crate::config::AppConfig;
use crate::listener::ListenerControl;
use crate::storage::Storage;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
///
/// Cloning is cheap: every field is either `Arc`-backed or `Copy`.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration (read-only after startup)
    pub config: Arc<AppConfig>,

    /// Request metrics, updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the process started; survives listener restarts
    pub start_time: Instant,

    pub storage: Storage,

    pub audio: Arc<AudioSubsystem>,

    pub listener: ListenerControl,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since start
    pub request_count: u64,

    /// Total number of 4xx/5xx responses since start
    pub error_count: u64,

    /// Key: endpoint name (e.g., "GET /play")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Per-endpoint request metrics.
///
/// ## Derived values:
/// - **Average response time**: total_duration_ms / request_count
/// - **Error rate**: error_count / request_count
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        storage: Storage,
        audio: Arc<AudioSubsystem>,
        listener: ListenerControl,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            storage,
            audio,
            listener,
        }
    }

    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        self.metrics_write().request_count += 1;
    }

    /// Increment the total error counter (called for every 4xx/5xx response).
    pub fn increment_error_count(&self) {
        self.metrics_write().error_count += 1;
    }

    /// Record one finished request for `endpoint`.
    ///
    /// The first request to an endpoint creates its entry.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the current metrics, so no lock is held while a response is serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of failed requests, from 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{app_state, test_config, RecordingOutput};

    #[tokio::test]
    async fn test_endpoint_metrics_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        let (output, _tap) = RecordingOutput::new();
        let state = app_state(test_config(dir.path()), output);

        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();
        state.record_endpoint_request("GET /play", 10, false);
        state.record_endpoint_request("GET /play", 30, true);

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.request_count, 2);
        assert_eq!(metrics.error_rate(), 0.5);

        let play = &metrics.endpoint_metrics["GET /play"];
        assert_eq!(play.request_count, 2);
        assert_eq!(play.average_duration_ms(), 20.0);
        assert_eq!(play.error_rate(), 0.5);
    }

    #[test]
    fn test_empty_metric_rates_are_zero() {
        let metric = EndpointMetric::default();
        assert_eq!(metric.average_duration_ms(), 0.0);
        assert_eq!(metric.error_rate(), 0.0);
        assert_eq!(AppMetrics::default().error_rate(), 0.0);
    }
}
