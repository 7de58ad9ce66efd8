//! # Sensor Data Quality Validation
//!
//! Inspects the raw streams for sufficiency and integrity before any
//! processing proceeds, and produces the `QualityReport` that gates the
//! rest of the pipeline.
//!
//! ## Checks:
//! - **Recording duration**: below the configured floor the request is
//!   rejected outright (`InsufficientData`); above the ceiling it is
//!   rejected as invalid input.
//! - **Sampling consistency**: the median inter-sample interval of each
//!   modality must stay near the nominal rate; large deviation flags
//!   "irregular sampling" without rejecting.
//! - **Sensor dropout**: inter-sample gaps long enough to mean a sensor
//!   went away for a while.
//! - **Saturation**: accelerometer magnitude pinned at the sensor range
//!   limit, or audio amplitude pinned at zero/max, for sustained runs.
//! - **Coverage**: fraction of epoch windows with no samples at all.
//!
//! ## Scoring:
//! Each issue carries a penalty in `[0, 1]`. The overall score is
//! `1 - Σ weight · worst_penalty(kind)`, clamped to `[0, 1]`. Strictly
//! monotonic: more or larger issues can only lower it. Reject-level issues
//! (excessive gaps, excessive saturation) make the session non-analyzable
//! regardless of the score.

use crate::config::AnalysisConfig;
use crate::error::{AppError, AppResult};
use crate::sensor::segment::EpochSegmenter;
use crate::sensor::types::RecordingSession;
use serde::Serialize;
use tracing::debug;

/// Which sensor stream an issue was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Accelerometer,
    Audio,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Accelerometer => write!(f, "accelerometer"),
            Modality::Audio => write!(f, "audio"),
        }
    }
}

/// The problem classes the validator can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssueKind {
    IrregularSampling,
    SensorDropout,
    Saturation,
    GapCoverage,
}

/// One detected data-quality problem.
#[derive(Debug, Clone, Serialize)]
pub struct QualityIssue {
    pub kind: QualityIssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modality: Option<Modality>,
    pub detail: String,
    /// Severity in `[0, 1]`, before kind weighting
    pub penalty: f64,
    /// Reject-level issues make the session non-analyzable on their own
    pub reject: bool,
}

/// Verdict on one session's raw data.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    /// Weighted combination of all penalties, in `[0, 1]`
    pub overall_score: f64,
    pub issues: Vec<QualityIssue>,
    /// Fraction of epoch windows with no samples in either modality
    pub gap_epoch_ratio: f64,
    /// Whether the pipeline may proceed past validation
    pub analyzable: bool,
    /// Set when the score sits below the warn threshold but above the
    /// reject floor; the analysis proceeds with this caveat attached
    pub low_quality: bool,
}

/// Runs all checks against one session.
pub struct QualityValidator {
    config: AnalysisConfig,
}

impl QualityValidator {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Validate a session and decide whether downstream processing proceeds.
    ///
    /// ## Returns:
    /// - **Ok(report)**: Soft problems (or none); `report.analyzable` is the
    ///   gate for the rest of the pipeline
    /// - **Err(InsufficientData)**: Recording shorter than the floor
    /// - **Err(ValidationError)**: Recording longer than the ceiling
    pub fn validate(&self, session: &RecordingSession) -> AppResult<QualityReport> {
        let duration = session.duration_seconds();

        if duration < self.config.min_recording_seconds as f64 {
            return Err(AppError::InsufficientData {
                user_id: session.user_id.clone(),
                detail: format!(
                    "recording covers {:.2} h, minimum is {:.2} h",
                    duration / 3600.0,
                    self.config.min_recording_seconds as f64 / 3600.0
                ),
            });
        }

        if duration > self.config.max_recording_seconds as f64 {
            return Err(AppError::ValidationError(format!(
                "recording covers {:.2} h, maximum analyzable span is {:.2} h",
                duration / 3600.0,
                self.config.max_recording_seconds as f64 / 3600.0
            )));
        }

        let mut issues = Vec::new();

        self.check_sampling(session, Modality::Accelerometer, &mut issues);
        self.check_sampling(session, Modality::Audio, &mut issues);
        self.check_dropout(session, Modality::Accelerometer, &mut issues);
        self.check_dropout(session, Modality::Audio, &mut issues);
        self.check_saturation(session, &mut issues);
        let gap_epoch_ratio = self.check_coverage(session, &mut issues);

        let overall_score = self.combine_score(&issues);
        let rejected = issues.iter().any(|i| i.reject);
        let analyzable = !rejected && overall_score >= self.config.quality_reject_floor;
        let low_quality = analyzable && overall_score < self.config.quality_warn_threshold;

        debug!(
            score = overall_score,
            issues = issues.len(),
            gap_epoch_ratio,
            analyzable,
            "Quality validation finished"
        );

        Ok(QualityReport {
            overall_score,
            issues,
            gap_epoch_ratio,
            analyzable,
            low_quality,
        })
    }

    /// Median inter-sample interval vs. the nominal rate.
    fn check_sampling(
        &self,
        session: &RecordingSession,
        modality: Modality,
        issues: &mut Vec<QualityIssue>,
    ) {
        let intervals = self.intervals_seconds(session, modality);
        if intervals.len() < 2 {
            return;
        }

        let median = median(&intervals);
        let nominal = self.config.nominal_sample_interval_seconds;
        let deviation = (median - nominal).abs() / nominal;

        if deviation > self.config.sampling_tolerance {
            issues.push(QualityIssue {
                kind: QualityIssueKind::IrregularSampling,
                modality: Some(modality),
                detail: format!(
                    "median {} interval {:.2}s deviates {:.0}% from the nominal {:.2}s",
                    modality,
                    median,
                    deviation * 100.0,
                    nominal
                ),
                penalty: deviation.min(1.0),
                reject: false,
            });
        }
    }

    /// Long inter-sample gaps meaning a sensor went silent for a while.
    fn check_dropout(
        &self,
        session: &RecordingSession,
        modality: Modality,
        issues: &mut Vec<QualityIssue>,
    ) {
        let intervals = self.intervals_seconds(session, modality);
        let dropouts: Vec<f64> = intervals
            .iter()
            .copied()
            .filter(|&gap| gap > self.config.dropout_gap_seconds)
            .collect();

        if dropouts.is_empty() {
            return;
        }

        let lost: f64 = dropouts.iter().sum();
        let penalty = (lost / session.duration_seconds()).min(1.0);

        issues.push(QualityIssue {
            kind: QualityIssueKind::SensorDropout,
            modality: Some(modality),
            detail: format!(
                "{} dropout span(s) on {} totaling {:.0}s",
                dropouts.len(),
                modality,
                lost
            ),
            penalty,
            reject: false,
        });
    }

    /// Sustained runs of pinned sensor readings.
    fn check_saturation(&self, session: &RecordingSession, issues: &mut Vec<QualityIssue>) {
        let limit = self.config.accel_saturation_g;
        let accel_ratio = saturated_ratio(
            session.accelerometer.iter().map(|s| s.magnitude() >= limit),
            session.accelerometer.len(),
            self.config.min_saturation_run,
        );
        self.push_saturation_issue(Modality::Accelerometer, accel_ratio, issues);

        let high = self.config.audio_saturation_level;
        let low = self.config.audio_floor_level;
        let audio_ratio = saturated_ratio(
            session
                .audio
                .iter()
                .map(|s| s.amplitude >= high || s.amplitude <= low),
            session.audio.len(),
            self.config.min_saturation_run,
        );
        self.push_saturation_issue(Modality::Audio, audio_ratio, issues);
    }

    fn push_saturation_issue(
        &self,
        modality: Modality,
        ratio: f64,
        issues: &mut Vec<QualityIssue>,
    ) {
        if ratio <= 0.0 {
            return;
        }

        issues.push(QualityIssue {
            kind: QualityIssueKind::Saturation,
            modality: Some(modality),
            detail: format!(
                "{:.1}% of {} samples sit in sustained saturation runs",
                ratio * 100.0,
                modality
            ),
            penalty: (ratio * 5.0).min(1.0),
            reject: ratio > self.config.max_saturation_ratio,
        });
    }

    /// Fraction of epoch windows with no samples at all. Above the
    /// configured limit this is reject-level: there is not enough signal
    /// left to classify a night.
    fn check_coverage(&self, session: &RecordingSession, issues: &mut Vec<QualityIssue>) -> f64 {
        let segmenter = EpochSegmenter::new(self.config.epoch_seconds, self.config.min_fill_ratio);
        let count = segmenter.epoch_count(session.duration_seconds());
        if count == 0 {
            return 1.0;
        }

        let mut occupied = vec![false; count];
        for sample in &session.accelerometer {
            let idx = segmenter.epoch_index_of(session.recording_start, sample.timestamp);
            if idx < count {
                occupied[idx] = true;
            }
        }
        for sample in &session.audio {
            let idx = segmenter.epoch_index_of(session.recording_start, sample.timestamp);
            if idx < count {
                occupied[idx] = true;
            }
        }

        let gaps = occupied.iter().filter(|&&o| !o).count();
        let ratio = gaps as f64 / count as f64;

        if gaps > 0 {
            issues.push(QualityIssue {
                kind: QualityIssueKind::GapCoverage,
                modality: None,
                detail: format!("{} of {} epoch windows contain no samples", gaps, count),
                penalty: (ratio / self.config.max_gap_ratio).min(1.0),
                reject: ratio > self.config.max_gap_ratio,
            });
        }

        ratio
    }

    /// `1 - Σ weight · worst_penalty(kind)`, clamped to `[0, 1]`.
    ///
    /// Only the worst penalty per kind contributes, so one bad modality is
    /// not double-counted, and it can never make the score better.
    fn combine_score(&self, issues: &[QualityIssue]) -> f64 {
        let worst = |kind: QualityIssueKind| {
            issues
                .iter()
                .filter(|i| i.kind == kind)
                .map(|i| i.penalty)
                .fold(0.0, f64::max)
        };

        let score = 1.0
            - self.config.coverage_weight * worst(QualityIssueKind::GapCoverage)
            - self.config.sampling_weight * worst(QualityIssueKind::IrregularSampling)
            - self.config.saturation_weight * worst(QualityIssueKind::Saturation)
            - self.config.dropout_weight * worst(QualityIssueKind::SensorDropout);

        score.clamp(0.0, 1.0)
    }

    fn intervals_seconds(&self, session: &RecordingSession, modality: Modality) -> Vec<f64> {
        let timestamps: Vec<_> = match modality {
            Modality::Accelerometer => {
                session.accelerometer.iter().map(|s| s.timestamp).collect()
            }
            Modality::Audio => session.audio.iter().map(|s| s.timestamp).collect(),
        };

        timestamps
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).num_milliseconds() as f64 / 1000.0)
            .collect()
    }
}

/// Fraction of samples sitting inside pinned runs of at least `min_run`
/// consecutive samples.
fn saturated_ratio(
    pinned: impl Iterator<Item = bool>,
    total: usize,
    min_run: usize,
) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let mut saturated = 0usize;
    let mut run = 0usize;

    for is_pinned in pinned {
        if is_pinned {
            run += 1;
        } else {
            if run >= min_run {
                saturated += run;
            }
            run = 0;
        }
    }
    if run >= min_run {
        saturated += run;
    }

    saturated as f64 / total as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::sensor::types::test_support::*;
    use crate::sensor::types::RecordingSession;
    use chrono::Duration;

    fn validator() -> QualityValidator {
        QualityValidator::new(AppConfig::default().analysis)
    }

    /// A clean 8-hour session: 1 Hz accelerometer at rest, quiet audio.
    fn clean_session() -> RecordingSession {
        let start = session_start();
        let end = start + Duration::hours(8);
        let accel = (0..8 * 3600).map(|t| accel_at(t, 0.01, 0.02, 1.0)).collect();
        let audio = (0..8 * 3600).map(|t| audio_at(t, 0.12, 0.05)).collect();
        RecordingSession::assemble("u".to_string(), start, end, accel, audio).unwrap()
    }

    #[test]
    fn test_clean_session_is_analyzable_with_high_score() {
        let report = validator().validate(&clean_session()).unwrap();
        assert!(report.analyzable);
        assert!(!report.low_quality);
        assert!(report.issues.is_empty());
        assert_eq!(report.gap_epoch_ratio, 0.0);
        assert!(report.overall_score > 0.95);
    }

    #[test]
    fn test_short_recording_is_insufficient_data() {
        let start = session_start();
        let end = start + Duration::minutes(90);
        let accel = (0..90 * 60).map(|t| accel_at(t, 0.0, 0.0, 1.0)).collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let result = validator().validate(&session);
        assert!(matches!(
            result,
            Err(crate::error::AppError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_overlong_recording_is_rejected() {
        let start = session_start();
        let end = start + Duration::hours(14);
        let session =
            RecordingSession::assemble("u".to_string(), start, end, vec![], vec![]).unwrap();

        let result = validator().validate(&session);
        assert!(matches!(
            result,
            Err(crate::error::AppError::ValidationError(_))
        ));
    }

    #[test]
    fn test_sustained_accel_saturation_rejects_session() {
        let start = session_start();
        let end = start + Duration::hours(8);
        // Magnitude pinned at 20 g for the first 30 % of the night
        let pinned = (8 * 3600) * 3 / 10;
        let accel: Vec<_> = (0..8 * 3600)
            .map(|t| {
                if t < pinned {
                    accel_at(t, 20.0, 0.0, 0.0)
                } else {
                    accel_at(t, 0.01, 0.02, 1.0)
                }
            })
            .collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let report = validator().validate(&session).unwrap();
        assert!(!report.analyzable);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::Saturation && i.reject));
    }

    #[test]
    fn test_brief_spikes_are_not_saturation() {
        let start = session_start();
        let end = start + Duration::hours(8);
        // A pinned reading every 100 s, never a sustained run
        let accel: Vec<_> = (0..8 * 3600)
            .map(|t| {
                if t % 100 == 0 {
                    accel_at(t, 20.0, 0.0, 0.0)
                } else {
                    accel_at(t, 0.01, 0.02, 1.0)
                }
            })
            .collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let report = validator().validate(&session).unwrap();
        assert!(!report
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::Saturation));
    }

    #[test]
    fn test_excessive_gap_coverage_rejects_session() {
        let start = session_start();
        let end = start + Duration::hours(8);
        // Samples only during the first 70 % of the night: 30 % gap epochs
        let cutoff = (8 * 3600) * 7 / 10;
        let accel = (0..cutoff).map(|t| accel_at(t, 0.01, 0.02, 1.0)).collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let report = validator().validate(&session).unwrap();
        assert!(!report.analyzable);
        assert!(report.gap_epoch_ratio > 0.2);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::GapCoverage && i.reject));
    }

    #[test]
    fn test_irregular_sampling_flags_without_rejecting() {
        let start = session_start();
        let end = start + Duration::hours(8);
        // Samples every 3 s against a nominal 1 s interval
        let accel = (0..8 * 3600)
            .step_by(3)
            .map(|t| accel_at(t, 0.01, 0.02, 1.0))
            .collect();
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        let report = validator().validate(&session).unwrap();
        assert!(report.analyzable);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == QualityIssueKind::IrregularSampling && !i.reject));
    }

    #[test]
    fn test_score_is_monotonic_in_issue_severity() {
        let start = session_start();
        let end = start + Duration::hours(8);

        let session_with_pinned = |pinned: i64| {
            let accel: Vec<_> = (0..8 * 3600)
                .map(|t| {
                    if t < pinned {
                        accel_at(t, 20.0, 0.0, 0.0)
                    } else {
                        accel_at(t, 0.01, 0.02, 1.0)
                    }
                })
                .collect();
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap()
        };

        let mild = validator().validate(&session_with_pinned(600)).unwrap();
        let severe = validator().validate(&session_with_pinned(3600)).unwrap();
        assert!(severe.overall_score <= mild.overall_score);
    }
}
