//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple
//! HTTP request handlers simultaneously.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many HTTP handlers can hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time (thread-safe)
//! - **T**: The actual data type being protected
//!
//! ### The engine handle is different
//! The `AnalysisEngine` wraps the model loaded at startup and is immutable
//! afterwards, so it is shared as a plain `Arc<AnalysisEngine>` with no
//! lock at all; concurrent analyses read it freely.

use crate::config::AppConfig;
use crate::staging::AnalysisEngine;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (can be updated at runtime)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// The analysis engine built around the model loaded at startup.
    /// Immutable, so no lock is needed.
    pub engine: Arc<AnalysisEngine>,

    /// When the server started (never changes)
    pub start_time: Instant,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Number of analysis pipelines currently running on the worker pool
    pub active_analyses: u32,

    /// Detailed metrics for each API endpoint (e.g. "POST /api/v1/analyze")
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration and engine.
    pub fn new(config: AppConfig, engine: Arc<AnalysisEngine>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            engine,
            start_time: Instant::now(),
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately, so other threads aren't
    /// blocked while the caller works with the snapshot.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Update the configuration with validation.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        match new_config.validate() {
            Ok(_) => {
                *self.config.write().unwrap() = new_config;
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the running-analyses gauge (one analysis entered the
    /// blocking pool).
    pub fn increment_active_analyses(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_analyses += 1;
    }

    /// Decrement the running-analyses gauge.
    ///
    /// Guarded against underflow so a double-decrement bug can't panic the
    /// metrics path.
    pub fn decrement_active_analyses(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_analyses > 0 {
            metrics.active_analyses -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones the data so no lock is held while the HTTP response is being
    /// serialized.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_analyses: metrics.active_analyses,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction in `[0, 1]`.
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
    use crate::staging::model::StageModel;

    fn state() -> AppState {
        let engine = Arc::new(AnalysisEngine::new(Arc::new(StageModel::fallback())));
        AppState::new(AppConfig::default(), engine)
    }

    #[test]
    fn test_request_counters() {
        let state = state();
        state.increment_request_count();
        state.increment_request_count();
        state.increment_error_count();

        let snapshot = state.get_metrics_snapshot();
        assert_eq!(snapshot.request_count, 2);
        assert_eq!(snapshot.error_count, 1);
    }

    #[test]
    fn test_active_analyses_gauge_never_underflows() {
        let state = state();
        state.decrement_active_analyses();
        assert_eq!(state.get_metrics_snapshot().active_analyses, 0);

        state.increment_active_analyses();
        state.decrement_active_analyses();
        assert_eq!(state.get_metrics_snapshot().active_analyses, 0);
    }

    #[test]
    fn test_endpoint_metrics_accumulate() {
        let state = state();
        state.record_endpoint_request("POST /api/v1/analyze", 120, false);
        state.record_endpoint_request("POST /api/v1/analyze", 80, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /api/v1/analyze"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 100.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_config_update_rejects_invalid() {
        let state = state();
        let mut bad = state.get_config();
        bad.server.port = 0;
        assert!(state.update_config(bad).is_err());
        // Original config untouched
        assert_eq!(state.get_config().server.port, 8080);
    }
}
