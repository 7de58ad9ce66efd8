//! # Epoch Segmentation
//!
//! Slices a validated recording into the fixed-duration analysis windows
//! ("epochs") the rest of the pipeline operates on.
//!
//! ## Window layout:
//! Epoch `k` is anchored at `recording_start + k · epoch_seconds` and covers
//! the half-open interval `[window_start, window_start + epoch_seconds)`.
//! The windows tile the recording with no gaps and no overlap, so every
//! sample lands in exactly one epoch.
//!
//! ## Trailing partial window:
//! When the recording length is not an exact multiple of the epoch length,
//! the final window only partially overlaps the recording. It is kept (with
//! its full nominal duration) when the overlap is at least the configured
//! fill ratio, and dropped otherwise.
//!
//! Segmentation is deterministic and idempotent: the same session always
//! produces the same epoch sequence.

use crate::error::{AppError, AppResult};
use crate::sensor::types::{AccelerometerSample, AudioSample, RecordingSession};
use chrono::{DateTime, Duration, Utc};

/// One fixed-duration analysis window and the samples that fall inside it.
#[derive(Debug, Clone)]
pub struct Epoch {
    /// Position in the night, starting at 0
    pub index: usize,
    /// Window start (inclusive)
    pub start: DateTime<Utc>,
    /// Window end (exclusive); always `start + epoch_seconds`, even for a
    /// kept partial window at the end of the night
    pub end: DateTime<Utc>,
    pub accelerometer: Vec<AccelerometerSample>,
    pub audio: Vec<AudioSample>,
}

impl Epoch {
    /// A gap epoch has no samples in either modality.
    pub fn is_gap(&self) -> bool {
        self.accelerometer.is_empty() && self.audio.is_empty()
    }
}

/// Splits a session into its epoch sequence.
pub struct EpochSegmenter {
    epoch_seconds: u32,
    min_fill_ratio: f64,
}

impl EpochSegmenter {
    pub fn new(epoch_seconds: u32, min_fill_ratio: f64) -> Self {
        Self {
            epoch_seconds,
            min_fill_ratio,
        }
    }

    /// Number of epoch windows a recording of the given length produces.
    ///
    /// Shared with the quality validator so gap-coverage is computed over
    /// exactly the grid that segmentation will later use.
    pub fn epoch_count(&self, duration_seconds: f64) -> usize {
        let epoch = self.epoch_seconds as f64;
        let full = (duration_seconds / epoch).floor() as usize;
        let remainder = duration_seconds - full as f64 * epoch;

        if remainder > 0.0 && remainder / epoch >= self.min_fill_ratio {
            full + 1
        } else {
            full
        }
    }

    /// Map a timestamp to the index of the epoch window containing it.
    ///
    /// Only meaningful for timestamps inside the session bounds; callers
    /// must still range-check the result against `epoch_count`.
    pub fn epoch_index_of(&self, start: DateTime<Utc>, timestamp: DateTime<Utc>) -> usize {
        let offset = (timestamp - start).num_milliseconds() as f64 / 1000.0;
        (offset / self.epoch_seconds as f64).floor() as usize
    }

    /// Produce the ordered, gapless epoch sequence for a session.
    ///
    /// ## Sample assignment:
    /// Both streams are already sorted by timestamp, so each window is a
    /// contiguous run found with two binary searches per modality.
    ///
    /// ## Errors:
    /// `InsufficientData` when the recording is too short to yield even one
    /// epoch window.
    pub fn segment(&self, session: &RecordingSession) -> AppResult<Vec<Epoch>> {
        let count = self.epoch_count(session.duration_seconds());

        if count == 0 {
            return Err(AppError::InsufficientData {
                user_id: session.user_id.clone(),
                detail: format!(
                    "recording of {:.1}s cannot be segmented into any {}s epoch",
                    session.duration_seconds(),
                    self.epoch_seconds
                ),
            });
        }

        let epoch_len = Duration::seconds(self.epoch_seconds as i64);
        let mut epochs = Vec::with_capacity(count);

        for index in 0..count {
            let start = session.recording_start + epoch_len * index as i32;
            let end = start + epoch_len;

            let accelerometer = slice_window(&session.accelerometer, |s| s.timestamp, start, end);
            let audio = slice_window(&session.audio, |s| s.timestamp, start, end);

            epochs.push(Epoch {
                index,
                start,
                end,
                accelerometer,
                audio,
            });
        }

        Ok(epochs)
    }
}

/// Copy the samples whose timestamp falls in `[start, end)` out of a
/// timestamp-sorted slice.
fn slice_window<T: Clone>(
    samples: &[T],
    timestamp: impl Fn(&T) -> DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<T> {
    let lo = samples.partition_point(|s| timestamp(s) < start);
    let hi = samples.partition_point(|s| timestamp(s) < end);
    samples[lo..hi].to_vec()
}
