//! # Night-Level Statistics
//!
//! Reduces the smoothed stage sequence into the summary metrics a sleep
//! report is built from, plus the merged stage intervals the API returns.
//!
//! ## Conventions:
//! - All durations are epoch-length multiples, reported in minutes.
//! - Stage percentages are computed against total sleep time, not total
//!   recording time; sleep efficiency is the one metric that divides by
//!   the recording length.
//! - Metrics that can genuinely be absent (REM latency on a night with no
//!   detected REM, onset latency when the user never slept) are `Option`
//!   and serialize as `null`, never as a fake zero.

use crate::staging::engine::ClassifiedEpoch;
use crate::staging::stage::SleepStage;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Minutes and share of total sleep time for one sleep stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageBreakdown {
    pub minutes: f64,
    /// Percentage of total sleep time (0 when there was no sleep)
    pub percent_of_sleep: f64,
}

/// Aggregate sleep metrics for one night.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub total_recording_minutes: f64,
    /// Minutes spent in any non-Wake stage
    pub total_sleep_minutes: f64,
    /// Total sleep time over total recording time, in `[0, 1]`
    pub sleep_efficiency: f64,
    /// Recording start to the first non-Wake epoch; None if the night
    /// contains no sleep at all
    pub sleep_onset_latency_minutes: Option<f64>,
    /// Wake minutes after sleep onset and before the final sleep epoch
    pub wake_after_sleep_onset_minutes: f64,
    /// Number of distinct Wake runs strictly inside the sleep period
    pub awakenings: u32,
    /// Sleep onset to the first REM epoch; None when no REM was detected
    pub rem_latency_minutes: Option<f64>,
    pub wake_minutes: f64,
    pub n1: StageBreakdown,
    pub n2: StageBreakdown,
    pub n3: StageBreakdown,
    pub rem: StageBreakdown,
}

/// A maximal run of consecutive epochs sharing one smoothed stage.
#[derive(Debug, Clone, Serialize)]
pub struct StageInterval {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub stage: SleepStage,
    /// Mean probability the classifier assigned to this stage across the run
    pub confidence: f64,
}

/// Computes `SummaryStatistics` from a smoothed stage sequence.
pub struct StatisticsAggregator {
    epoch_seconds: u32,
}

impl StatisticsAggregator {
    pub fn new(epoch_seconds: u32) -> Self {
        Self { epoch_seconds }
    }

    /// Reduce one night's stage sequence.
    ///
    /// `recording_minutes` is the actual session length, which can be
    /// slightly shorter than `stages.len() · epoch` when a padded partial
    /// epoch was kept; efficiency divides by real time in bed.
    pub fn aggregate(&self, stages: &[SleepStage], recording_minutes: f64) -> SummaryStatistics {
        let epoch_minutes = self.epoch_seconds as f64 / 60.0;

        let count_of = |stage: SleepStage| stages.iter().filter(|&&s| s == stage).count();
        let minutes_of = |stage: SleepStage| count_of(stage) as f64 * epoch_minutes;

        let sleep_epochs = stages.iter().filter(|s| s.is_sleep()).count();
        let total_sleep_minutes = sleep_epochs as f64 * epoch_minutes;

        let onset = stages.iter().position(|s| s.is_sleep());
        let last_sleep = stages.iter().rposition(|s| s.is_sleep());

        let sleep_onset_latency_minutes = onset.map(|i| i as f64 * epoch_minutes);

        let rem_latency_minutes = match (onset, stages.iter().position(|&s| s == SleepStage::Rem))
        {
            (Some(onset), Some(first_rem)) => Some((first_rem - onset) as f64 * epoch_minutes),
            _ => None,
        };

        // Wake strictly between onset and the final sleep epoch: both the
        // minutes (WASO) and the number of distinct runs (awakenings)
        let mut waso_epochs = 0usize;
        let mut awakenings = 0u32;
        if let (Some(onset), Some(last_sleep)) = (onset, last_sleep) {
            let mut in_wake_run = false;
            for &stage in &stages[onset..last_sleep] {
                if stage == SleepStage::Wake {
                    waso_epochs += 1;
                    if !in_wake_run {
                        awakenings += 1;
                        in_wake_run = true;
                    }
                } else {
                    in_wake_run = false;
                }
            }
        }

        let sleep_efficiency = if recording_minutes > 0.0 {
            (total_sleep_minutes / recording_minutes).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let breakdown = |stage: SleepStage| {
            let minutes = minutes_of(stage);
            StageBreakdown {
                minutes,
                percent_of_sleep: if total_sleep_minutes > 0.0 {
                    minutes / total_sleep_minutes * 100.0
                } else {
                    0.0
                },
            }
        };

        SummaryStatistics {
            total_recording_minutes: recording_minutes,
            total_sleep_minutes,
            sleep_efficiency,
            sleep_onset_latency_minutes,
            wake_after_sleep_onset_minutes: waso_epochs as f64 * epoch_minutes,
            awakenings,
            rem_latency_minutes,
            wake_minutes: minutes_of(SleepStage::Wake),
            n1: breakdown(SleepStage::N1),
            n2: breakdown(SleepStage::N2),
            n3: breakdown(SleepStage::N3),
            rem: breakdown(SleepStage::Rem),
        }
    }
}

/// Merge consecutive equal-stage epochs into intervals with run-averaged
/// confidence.
pub fn merge_intervals(epochs: &[ClassifiedEpoch]) -> Vec<StageInterval> {
    let mut intervals: Vec<StageInterval> = Vec::new();
    let mut confidence_sum = 0.0;
    let mut run_length = 0usize;

    for epoch in epochs {
        let confidence = epoch.probabilities.get(epoch.stage);

        if let Some(interval) = intervals.last_mut() {
            if interval.stage == epoch.stage {
                interval.end_time = epoch.end;
                confidence_sum += confidence;
                run_length += 1;
                interval.confidence = confidence_sum / run_length as f64;
                continue;
            }
        }

        confidence_sum = confidence;
        run_length = 1;
        intervals.push(StageInterval {
            start_time: epoch.start,
            end_time: epoch.end,
            stage: epoch.stage,
            confidence,
        });
    }

    intervals
}
