//! # Analysis Engine
//!
//! The one-shot pipeline that turns a raw `RecordingSession` into a quality
//! verdict, a classified epoch sequence, and night-level statistics.
//!
//! ## Pipeline order (strictly sequential per request):
//! 1. Quality Validator: gate on data sufficiency and integrity
//! 2. Epoch Segmenter: fixed 30 s windows tiling the recording
//! 3. Feature Extractor: one fixed-schema vector per epoch
//! 4. Stage Classifier: calibrated probabilities from the loaded model
//! 5. Temporal Smoother: physiologically constrained final labels
//! 6. Statistics Aggregator: summary metrics and stage intervals
//!
//! ## Concurrency model:
//! `analyze` is synchronous, CPU-bound, and side-effect-free: the engine
//! holds nothing mutable beyond the immutable `Arc<StageModel>` loaded at
//! startup, so any number of analyses can run concurrently when callers
//! dispatch onto a worker pool. Nothing from one request survives into the
//! next.

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::sensor::quality::{QualityReport, QualityValidator};
use crate::sensor::segment::EpochSegmenter;
use crate::sensor::types::RecordingSession;
use crate::staging::classifier::StageClassifier;
use crate::staging::features;
use crate::staging::model::StageModel;
use crate::staging::smoother::TemporalSmoother;
use crate::staging::stage::{SleepStage, StageProbability};
use crate::staging::stats::{merge_intervals, StageInterval, StatisticsAggregator, SummaryStatistics};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One epoch's final classification: raw calibrated probabilities plus the
/// label the smoother settled on.
#[derive(Debug, Clone)]
pub struct ClassifiedEpoch {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub probabilities: StageProbability,
    /// The classifier's own pick, before temporal smoothing
    pub raw_stage: SleepStage,
    /// The final label after temporal smoothing
    pub stage: SleepStage,
}

/// Everything one analysis produces.
///
/// A non-analyzable session still yields an outcome (the quality report
/// with its verdict) but no epochs and no summary, because the classifier
/// was never invoked.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub quality: QualityReport,
    pub epochs: Vec<ClassifiedEpoch>,
    pub intervals: Vec<StageInterval>,
    pub summary: Option<SummaryStatistics>,
    pub model_version: String,
    /// True when results came from the fallback model instead of the
    /// trained ensemble
    pub model_degraded: bool,
}

/// The process-wide analysis engine.
///
/// Constructed once at startup around the loaded model handle and shared
/// behind an `Arc`. Tunables are passed per call so runtime configuration
/// updates apply to the next request without rebuilding the engine.
pub struct AnalysisEngine {
    model: Arc<StageModel>,
}

impl AnalysisEngine {
    pub fn new(model: Arc<StageModel>) -> Self {
        Self { model }
    }

    /// The loaded model handle (shared with health reporting).
    pub fn model(&self) -> &StageModel {
        &self.model
    }

    /// Run the full pipeline for one session.
    ///
    /// ## Returns:
    /// - **Ok(outcome)**: Quality report, classified epochs and summary,
    ///   or a report-only outcome when the session is not analyzable
    /// - **Err(...)**: A fatal condition from §"Error Handling": recording
    ///   too short, malformed samples, or an invalid span. No partial
    ///   results accompany an error.
    pub fn analyze(
        &self,
        session: &RecordingSession,
        config: &AppConfig,
    ) -> AppResult<AnalysisOutcome> {
        let started = Instant::now();

        info!(
            user_id = %session.user_id,
            duration_minutes = session.duration_minutes(),
            accel_samples = session.accelerometer.len(),
            audio_samples = session.audio.len(),
            "Sleep analysis started"
        );

        let validator = QualityValidator::new(config.analysis.clone());
        let quality = validator.validate(session)?;

        if !quality.analyzable {
            info!(
                user_id = %session.user_id,
                score = quality.overall_score,
                issues = quality.issues.len(),
                "Session not analyzable, returning quality report only"
            );
            return Ok(AnalysisOutcome {
                quality,
                epochs: Vec::new(),
                intervals: Vec::new(),
                summary: None,
                model_version: self.model.version().to_string(),
                model_degraded: self.model.is_degraded(),
            });
        }

        let segmenter =
            EpochSegmenter::new(config.analysis.epoch_seconds, config.analysis.min_fill_ratio);
        let epochs = segmenter.segment(session)?;
        debug!(epochs = epochs.len(), "Segmentation finished");

        let feature_vectors: Vec<_> = epochs.iter().map(features::extract).collect();

        let classifier = StageClassifier::new(self.model.clone());
        let probabilities = classifier.classify_batch(&feature_vectors);

        let smoother = TemporalSmoother::new(&config.smoother);
        let stages = smoother.smooth(&probabilities);

        let classified: Vec<ClassifiedEpoch> = epochs
            .iter()
            .zip(probabilities.iter())
            .zip(stages.iter())
            .map(|((epoch, probs), &stage)| ClassifiedEpoch {
                index: epoch.index,
                start: epoch.start,
                end: epoch.end,
                probabilities: *probs,
                raw_stage: probs.argmax(),
                stage,
            })
            .collect();

        let aggregator = StatisticsAggregator::new(config.analysis.epoch_seconds);
        let summary = aggregator.aggregate(&stages, session.duration_minutes());
        let intervals = merge_intervals(&classified);

        info!(
            user_id = %session.user_id,
            epochs = classified.len(),
            sleep_minutes = summary.total_sleep_minutes,
            efficiency = summary.sleep_efficiency,
            quality_score = quality.overall_score,
            degraded = self.model.is_degraded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sleep analysis finished"
        );

        Ok(AnalysisOutcome {
            quality,
            epochs: classified,
            intervals,
            summary: Some(summary),
            model_version: self.model.version().to_string(),
            model_degraded: self.model.is_degraded(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::sensor::types::test_support::*;
    use crate::staging::model::test_support::motion_keyed_ensemble;
    use chrono::Duration;

    fn engine() -> AnalysisEngine {
        AnalysisEngine::new(Arc::new(StageModel::from_ensemble(motion_keyed_ensemble())))
    }

    /// 8 hours of 1 Hz samples: a restless first stretch, then stillness.
    fn overnight_session(restless_seconds: i64) -> RecordingSession {
        let start = session_start();
        let end = start + Duration::hours(8);

        let accel = (0..8 * 3600)
            .map(|t| {
                if t < restless_seconds {
                    // Alternating magnitudes give a large activity count
                    let g = if t % 2 == 0 { 0.2 } else { 1.8 };
                    accel_at(t, 0.0, 0.0, g)
                } else {
                    accel_at(t, 0.005, 0.01, 1.0)
                }
            })
            .collect();
        let audio = (0..8 * 3600).map(|t| audio_at(t, 0.1, 0.05)).collect();

        RecordingSession::assemble("night-owl".to_string(), start, end, accel, audio).unwrap()
    }

    #[test]
    fn test_quiet_night_classifies_as_mostly_sleep() {
        // Half an hour of restlessness, then 7.5 h of stillness
        let session = overnight_session(1800);
        let outcome = engine().analyze(&session, &AppConfig::default()).unwrap();

        assert!(outcome.quality.analyzable);
        assert!(!outcome.model_degraded);

        let summary = outcome.summary.expect("analyzable session must have a summary");
        assert!(summary.sleep_efficiency > 0.8);

        let sleep_epochs = outcome.epochs.iter().filter(|e| e.stage.is_sleep()).count();
        assert!(sleep_epochs * 2 > outcome.epochs.len());
    }

    #[test]
    fn test_saturated_session_skips_classification() {
        let start = session_start();
        let end = start + Duration::hours(8);
        // Pinned at the range limit for 30 % of the night
        let pinned = (8 * 3600) * 3 / 10;
        let accel: Vec<_> = (0..8 * 3600)
            .map(|t| {
                if t < pinned {
                    accel_at(t, 20.0, 0.0, 0.0)
                } else {
                    accel_at(t, 0.005, 0.01, 1.0)
                }
            })
            .collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let outcome = engine().analyze(&session, &AppConfig::default()).unwrap();

        assert!(!outcome.quality.analyzable);
        assert!(outcome.epochs.is_empty());
        assert!(outcome.intervals.is_empty());
        assert!(outcome.summary.is_none());
    }

    #[test]
    fn test_short_session_is_rejected_outright() {
        let start = session_start();
        let end = start + Duration::minutes(90);
        let accel = (0..90 * 60).map(|t| accel_at(t, 0.005, 0.01, 1.0)).collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let result = engine().analyze(&session, &AppConfig::default());
        assert!(matches!(
            result,
            Err(crate::error::AppError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_pipeline_is_a_pure_function() {
        let session = overnight_session(3600);
        let config = AppConfig::default();
        let engine = engine();

        let a = engine.analyze(&session, &config).unwrap();
        let b = engine.analyze(&session, &config).unwrap();

        assert_eq!(a.epochs.len(), b.epochs.len());
        for (x, y) in a.epochs.iter().zip(b.epochs.iter()) {
            assert_eq!(x.stage, y.stage);
            assert_eq!(x.probabilities, y.probabilities);
        }
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.quality.overall_score, b.quality.overall_score);
    }

    #[test]
    fn test_degraded_model_still_analyzes() {
        let engine = AnalysisEngine::new(Arc::new(StageModel::fallback()));
        let session = overnight_session(0);
        let outcome = engine.analyze(&session, &AppConfig::default()).unwrap();

        assert!(outcome.model_degraded);
        assert_eq!(outcome.model_version, "prior-fallback-v1");
        // The prior model calls everything N2, which still yields a summary
        assert!(outcome.summary.is_some());
    }

    #[test]
    fn test_probabilities_are_normalized_across_the_night() {
        let session = overnight_session(900);
        let outcome = engine().analyze(&session, &AppConfig::default()).unwrap();

        for epoch in &outcome.epochs {
            assert!(epoch.probabilities.is_normalized(1e-6));
        }
    }

    #[test]
    fn test_intervals_tile_the_classified_night() {
        let session = overnight_session(1800);
        let outcome = engine().analyze(&session, &AppConfig::default()).unwrap();

        let intervals = &outcome.intervals;
        assert!(!intervals.is_empty());
        assert_eq!(intervals[0].start_time, outcome.epochs[0].start);
        assert_eq!(
            intervals.last().unwrap().end_time,
            outcome.epochs.last().unwrap().end
        );
        for pair in intervals.windows(2) {
            assert_eq!(pair[0].end_time, pair[1].start_time);
            assert_ne!(pair[0].stage, pair[1].stage);
        }
    }
}
