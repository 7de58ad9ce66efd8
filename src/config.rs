//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_ANALYSIS_EPOCH_SECONDS, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Calibration constants live here:
//! Everything the pipeline treats as a tunable (quality weights, saturation
//! thresholds, smoother penalties) is a named configuration field with a
//! documented default, not a literal buried in pipeline code. The defaults
//! below were calibrated against overnight recordings sampled at roughly
//! 1 Hz per modality.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub analysis: AnalysisConfig,
    pub smoother: SmootherConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Classifier model configuration.
///
/// ## Fields:
/// - `artifact_path`: Path to the pre-trained gradient-boosted ensemble
///   artifact. Loaded once at startup; if missing or unreadable the engine
///   runs on the deterministic fallback model and flags results as degraded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub artifact_path: String,
}

/// Tunables for segmentation and quality validation.
///
/// ## Quality scoring:
/// Each detected problem contributes a penalty in `[0, 1]`; the overall
/// score is `1 - Σ weight · penalty`, clamped to `[0, 1]`. More or larger
/// issues can only lower the score, never raise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Epoch window length in seconds (30 s is the standard scoring unit)
    pub epoch_seconds: u32,

    /// Reject recordings shorter than this (seconds). Two hours by default:
    /// anything shorter cannot produce meaningful night statistics.
    pub min_recording_seconds: u32,

    /// Reject recordings longer than this (seconds). Bounds the analyzable
    /// span at twelve hours.
    pub max_recording_seconds: u32,

    /// A trailing partial epoch is kept only if at least this fraction of
    /// its window overlaps the recording
    pub min_fill_ratio: f64,

    /// Sessions where more than this fraction of epochs have no samples in
    /// either modality are marked non-analyzable
    pub max_gap_ratio: f64,

    /// Expected spacing between consecutive samples of one modality (seconds)
    pub nominal_sample_interval_seconds: f64,

    /// Allowed relative deviation of the median inter-sample interval from
    /// nominal before "irregular sampling" is flagged
    pub sampling_tolerance: f64,

    /// An inter-sample gap longer than this (seconds) counts as a sensor
    /// dropout span
    pub dropout_gap_seconds: f64,

    /// Accelerometer magnitude at or above this (g) is treated as pinned at
    /// the sensor range limit. 90 % of a ±20 g part's full scale.
    pub accel_saturation_g: f64,

    /// Audio amplitude at or above this is treated as clipped
    pub audio_saturation_level: f64,

    /// Audio amplitude at or below this is treated as a dead signal
    pub audio_floor_level: f64,

    /// Pinned readings only count as saturation when they persist for at
    /// least this many consecutive samples
    pub min_saturation_run: usize,

    /// Sessions where more than this fraction of samples sit in sustained
    /// saturation runs are marked non-analyzable
    pub max_saturation_ratio: f64,

    /// Below this overall score the session is not analyzable at all
    pub quality_reject_floor: f64,

    /// Below this overall score (but at or above the reject floor) the
    /// analysis proceeds with a low-quality caveat in the report
    pub quality_warn_threshold: f64,

    /// Weight of the gap-epoch coverage penalty in the overall score
    pub coverage_weight: f64,

    /// Weight of the irregular-sampling penalty
    pub sampling_weight: f64,

    /// Weight of the saturation penalty
    pub saturation_weight: f64,

    /// Weight of the sensor-dropout penalty
    pub dropout_weight: f64,
}

/// Tunables for the temporal smoother.
///
/// ## Penalty calibration:
/// The smoother prices stage transitions with a fixed physiological table
/// (see `staging::smoother`); `penalty_scale` multiplies the whole table,
/// so `0.0` disables transition smoothing entirely and larger values trade
/// responsiveness for stability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmootherConfig {
    /// Multiplier applied to the physiological transition-penalty table
    pub penalty_scale: f64,

    /// An isolated single-epoch stage survives de-flickering only when its
    /// probability margin over the surrounding stage exceeds this
    pub high_confidence_margin: f64,

    /// Extra cost for starting the night in any stage other than Wake
    pub wake_start_cost: f64,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of analysis pipelines allowed to run simultaneously
    /// on the blocking worker pool
    pub max_concurrent_analyses: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            model: ModelConfig {
                artifact_path: "models/stage_ensemble.json".to_string(),
            },
            analysis: AnalysisConfig {
                epoch_seconds: 30,
                min_recording_seconds: 7200,   // 2 hours
                max_recording_seconds: 43200,  // 12 hours
                min_fill_ratio: 0.5,
                max_gap_ratio: 0.2,
                nominal_sample_interval_seconds: 1.0,
                sampling_tolerance: 0.5,
                dropout_gap_seconds: 120.0,
                accel_saturation_g: 18.0,
                audio_saturation_level: 0.99,
                audio_floor_level: 0.01,
                min_saturation_run: 5,
                max_saturation_ratio: 0.2,
                quality_reject_floor: 0.3,
                quality_warn_threshold: 0.6,
                coverage_weight: 0.4,
                sampling_weight: 0.25,
                saturation_weight: 0.25,
                dropout_weight: 0.1,
            },
            smoother: SmootherConfig {
                penalty_scale: 1.0,
                high_confidence_margin: 0.35,
                wake_start_cost: 0.7,
            },
            performance: PerformanceConfig {
                max_concurrent_analyses: 4,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///    (used by deployment platforms that don't follow the APP_ prefix)
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors at startup prevents a half-working
    /// pipeline later: every ratio must be a real fraction, the recording
    /// floor must sit below the ceiling, and the score thresholds must be
    /// ordered (reject floor ≤ warn threshold).
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.model.artifact_path.is_empty() {
            return Err(anyhow::anyhow!("Model artifact path cannot be empty"));
        }

        let a = &self.analysis;

        if a.epoch_seconds == 0 {
            return Err(anyhow::anyhow!("Epoch length must be greater than 0"));
        }

        if a.min_recording_seconds >= a.max_recording_seconds {
            return Err(anyhow::anyhow!(
                "Minimum recording duration ({}s) must be below the maximum ({}s)",
                a.min_recording_seconds,
                a.max_recording_seconds
            ));
        }

        for (name, value) in [
            ("min_fill_ratio", a.min_fill_ratio),
            ("max_gap_ratio", a.max_gap_ratio),
            ("max_saturation_ratio", a.max_saturation_ratio),
            ("quality_reject_floor", a.quality_reject_floor),
            ("quality_warn_threshold", a.quality_warn_threshold),
            ("coverage_weight", a.coverage_weight),
            ("sampling_weight", a.sampling_weight),
            ("saturation_weight", a.saturation_weight),
            ("dropout_weight", a.dropout_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }

        if a.quality_reject_floor > a.quality_warn_threshold {
            return Err(anyhow::anyhow!(
                "Quality reject floor ({}) must not exceed the warn threshold ({})",
                a.quality_reject_floor,
                a.quality_warn_threshold
            ));
        }

        if a.nominal_sample_interval_seconds <= 0.0 || a.dropout_gap_seconds <= 0.0 {
            return Err(anyhow::anyhow!("Sampling intervals must be positive"));
        }

        let s = &self.smoother;

        if s.penalty_scale < 0.0 {
            return Err(anyhow::anyhow!("Smoother penalty scale cannot be negative"));
        }

        if !(0.0..=1.0).contains(&s.high_confidence_margin) {
            return Err(anyhow::anyhow!("High-confidence margin must be within [0, 1]"));
        }

        if self.performance.max_concurrent_analyses == 0 {
            return Err(anyhow::anyhow!("Max concurrent analyses must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are touched. For example,
    /// `{"smoother": {"penalty_scale": 1.5}}` changes one tunable and leaves
    /// everything else alone. The merged result is re-validated before it
    /// is accepted.
    ///
    /// Note: `model.artifact_path` is deliberately not updatable here: the
    /// artifact is loaded once at startup, and silently accepting a new path
    /// without reloading would lie about what model is serving.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(analysis) = partial.get("analysis") {
            if let Some(v) = analysis.get("epoch_seconds").and_then(|v| v.as_u64()) {
                self.analysis.epoch_seconds = v as u32;
            }
            if let Some(v) = analysis.get("max_gap_ratio").and_then(|v| v.as_f64()) {
                self.analysis.max_gap_ratio = v;
            }
            if let Some(v) = analysis.get("max_saturation_ratio").and_then(|v| v.as_f64()) {
                self.analysis.max_saturation_ratio = v;
            }
            if let Some(v) = analysis.get("quality_warn_threshold").and_then(|v| v.as_f64()) {
                self.analysis.quality_warn_threshold = v;
            }
        }

        if let Some(smoother) = partial.get("smoother") {
            if let Some(v) = smoother.get("penalty_scale").and_then(|v| v.as_f64()) {
                self.smoother.penalty_scale = v;
            }
            if let Some(v) = smoother.get("high_confidence_margin").and_then(|v| v.as_f64()) {
                self.smoother.high_confidence_margin = v;
            }
            if let Some(v) = smoother.get("wake_start_cost").and_then(|v| v.as_f64()) {
                self.smoother.wake_start_cost = v;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(v) = performance.get("max_concurrent_analyses").and_then(|v| v.as_u64()) {
                self.performance.max_concurrent_analyses = v as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.analysis.epoch_seconds, 30);
        assert_eq!(config.analysis.min_recording_seconds, 7200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.max_gap_ratio = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.analysis.quality_reject_floor = 0.9;
        // Floor above the warn threshold is inconsistent
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"smoother": {"penalty_scale": 1.5}, "server": {"port": 9090}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.smoother.penalty_scale, 1.5);
        // Untouched fields keep their defaults
        assert_eq!(config.analysis.epoch_seconds, 30);
    }

    #[test]
    fn test_config_update_rejects_invalid_merge() {
        let mut config = AppConfig::default();
        let json = r#"{"analysis": {"max_gap_ratio": 7.0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
