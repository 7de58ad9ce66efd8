//! # Sensor Data Model
//!
//! Plain data types for one night of raw sensor input: timestamped
//! accelerometer triples, timestamped audio frames (amplitude envelope plus
//! fixed frequency-band energies), and the `RecordingSession` that owns both
//! streams for the duration of a single analysis call.
//!
//! ## Input Assumptions:
//! - Samples may arrive out of order or duplicated; `RecordingSession::assemble`
//!   re-sorts them by timestamp before any component sees them.
//! - Every audio frame must carry exactly `AUDIO_BANDS` band energies.
//! - Every timestamp must fall inside `[recording_start, recording_end)`.
//!   Anything else is a malformed sample, reported with its original index.

use crate::error::{AppError, AppResult};
use crate::staging::features::AUDIO_BANDS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One three-axis accelerometer reading, in g.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccelerometerSample {
    pub timestamp: DateTime<Utc>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerometerSample {
    /// Euclidean magnitude of the acceleration vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// One audio frame: amplitude envelope in `[0, 1]` plus per-band energies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSample {
    pub timestamp: DateTime<Utc>,
    pub amplitude: f64,
    pub frequency_bands: Vec<f64>,
}

/// One night of raw sensor data for one user.
///
/// ## Ownership:
/// A session exclusively owns its samples for one analysis call. Nothing in
/// the pipeline retains them afterwards; the engine is stateless across
/// requests.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub user_id: String,
    pub recording_start: DateTime<Utc>,
    pub recording_end: DateTime<Utc>,
    pub accelerometer: Vec<AccelerometerSample>,
    pub audio: Vec<AudioSample>,
}

impl RecordingSession {
    /// Build a session from raw request data, enforcing the structural
    /// invariants every downstream component relies on.
    ///
    /// ## Checks (in order):
    /// 1. `recording_end > recording_start`
    /// 2. Every sample timestamp lies in `[recording_start, recording_end)`
    ///    (reported against the sample's position in the incoming array)
    /// 3. Every audio frame carries exactly `AUDIO_BANDS` band energies
    ///
    /// ## Normalization:
    /// Both streams are stably sorted by timestamp afterwards, so duplicates
    /// and out-of-order arrival are tolerated rather than rejected.
    pub fn assemble(
        user_id: String,
        recording_start: DateTime<Utc>,
        recording_end: DateTime<Utc>,
        mut accelerometer: Vec<AccelerometerSample>,
        mut audio: Vec<AudioSample>,
    ) -> AppResult<Self> {
        if recording_end <= recording_start {
            return Err(AppError::ValidationError(format!(
                "recording_end ({}) must be after recording_start ({})",
                recording_end, recording_start
            )));
        }

        for (index, sample) in accelerometer.iter().enumerate() {
            if sample.timestamp < recording_start || sample.timestamp >= recording_end {
                return Err(AppError::MalformedSample {
                    modality: "accelerometer",
                    index,
                    detail: format!(
                        "timestamp {} is outside the session bounds [{}, {})",
                        sample.timestamp, recording_start, recording_end
                    ),
                });
            }
        }

        for (index, sample) in audio.iter().enumerate() {
            if sample.timestamp < recording_start || sample.timestamp >= recording_end {
                return Err(AppError::MalformedSample {
                    modality: "audio",
                    index,
                    detail: format!(
                        "timestamp {} is outside the session bounds [{}, {})",
                        sample.timestamp, recording_start, recording_end
                    ),
                });
            }
            if sample.frequency_bands.len() != AUDIO_BANDS {
                return Err(AppError::MalformedSample {
                    modality: "audio",
                    index,
                    detail: format!(
                        "expected {} frequency bands, got {}",
                        AUDIO_BANDS,
                        sample.frequency_bands.len()
                    ),
                });
            }
        }

        // Stable sort keeps duplicate timestamps in arrival order, which
        // makes re-assembly of identical input byte-identical.
        accelerometer.sort_by_key(|s| s.timestamp);
        audio.sort_by_key(|s| s.timestamp);

        Ok(Self {
            user_id,
            recording_start,
            recording_end,
            accelerometer,
            audio,
        })
    }

    /// Recording length in seconds.
    pub fn duration_seconds(&self) -> f64 {
        (self.recording_end - self.recording_start).num_milliseconds() as f64 / 1000.0
    }

    /// Recording length in minutes.
    pub fn duration_minutes(&self) -> f64 {
        self.duration_seconds() / 60.0
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_assemble_sorts_out_of_order_samples() {
        let start = session_start();
        let end = start + Duration::hours(8);

        let accel = vec![accel_at(20, 0.0, 0.0, 1.0), accel_at(5, 0.0, 0.0, 1.0)];
        let session =
            RecordingSession::assemble("u".to_string(), start, end, accel, vec![]).unwrap();

        assert!(session.accelerometer[0].timestamp <= session.accelerometer[1].timestamp);
    }

    #[test]
    fn test_assemble_rejects_inverted_bounds() {
        let start = session_start();
        let result =
            RecordingSession::assemble("u".to_string(), start, start, vec![], vec![]);
        assert!(matches!(result, Err(AppError::ValidationError(_))));
    }

    #[test]
    fn test_out_of_bounds_timestamp_reports_index() {
        let start = session_start();
        let end = start + Duration::hours(8);

        let accel = vec![
            accel_at(5, 0.0, 0.0, 1.0),
            // One hour past the end of the session
            accel_at(9 * 3600, 0.0, 0.0, 1.0),
        ];
        let result = RecordingSession::assemble("u".to_string(), start, end, accel, vec![]);

        match result {
            Err(AppError::MalformedSample { modality, index, .. }) => {
                assert_eq!(modality, "accelerometer");
                assert_eq!(index, 1);
            }
            other => panic!("expected MalformedSample, got {:?}", other),
        }
    }

    #[test]
    fn test_band_count_mismatch_reports_index() {
        let start = session_start();
        let end = start + Duration::hours(8);

        let mut short_bands = audio_at(10, 0.2, 0.1);
        short_bands.frequency_bands.truncate(6);
        let audio = vec![audio_at(5, 0.2, 0.1), short_bands];

        let result = RecordingSession::assemble("u".to_string(), start, end, vec![], audio);

        match result {
            Err(AppError::MalformedSample { modality, index, .. }) => {
                assert_eq!(modality, "audio");
                assert_eq!(index, 1);
            }
            other => panic!("expected MalformedSample, got {:?}", other),
        }
    }

    #[test]
    fn test_duration_helpers() {
        let start = session_start();
        let end = start + Duration::hours(8);
        let session =
            RecordingSession::assemble("u".to_string(), start, end, vec![], vec![]).unwrap();

        assert_eq!(session.duration_seconds(), 8.0 * 3600.0);
        assert_eq!(session.duration_minutes(), 480.0);
    }
}
