//! # Per-Epoch Feature Extraction
//!
//! Turns one epoch of raw samples into the fixed-schema numeric record the
//! classifier consumes.
//!
//! ## Feature Families:
//! - **Accelerometer-derived**: activity count (summed magnitude deltas),
//!   per-axis variance, zero-crossing rate of the mean-centered magnitude,
//!   mean magnitude, and a motion-energy proxy (mean squared magnitude).
//! - **Audio-derived**: amplitude envelope mean/variance, mean energy per
//!   frequency band, and a spectral flatness proxy (geometric over
//!   arithmetic mean of the band energies).
//!
//! ## Width invariant:
//! Every epoch of a session yields a vector with exactly the same fields.
//! A modality with no samples contributes zero sentinels rather than
//! shrinking the vector, so the classifier's input width never varies.
//!
//! Extraction is a pure function of a single epoch: deterministic, and
//! never looking at neighboring epochs (cross-epoch smoothing belongs to
//! the temporal smoother).

use crate::sensor::segment::Epoch;

/// Number of audio frequency bands every sample must carry.
pub const AUDIO_BANDS: usize = 8;

/// Total feature count: 7 accelerometer + 3 audio scalars + 8 band means.
pub const FEATURE_COUNT: usize = 18;

/// Fixed-schema feature record for one epoch.
///
/// The field order here, `NAMES`, and `to_model_input()` all agree; the
/// model artifact is validated against `NAMES` at load time, so a schema
/// drift between extractor and classifier fails loudly at startup instead
/// of silently misclassifying.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    pub activity_count: f64,
    pub accel_variance_x: f64,
    pub accel_variance_y: f64,
    pub accel_variance_z: f64,
    pub zero_crossing_rate: f64,
    pub mean_magnitude: f64,
    pub motion_energy: f64,
    pub amplitude_mean: f64,
    pub amplitude_variance: f64,
    pub spectral_flatness: f64,
    pub band_energy: [f64; AUDIO_BANDS],
}

impl FeatureVector {
    /// Canonical feature names, in `to_model_input()` order.
    pub const NAMES: [&'static str; FEATURE_COUNT] = [
        "activity_count",
        "accel_variance_x",
        "accel_variance_y",
        "accel_variance_z",
        "zero_crossing_rate",
        "mean_magnitude",
        "motion_energy",
        "amplitude_mean",
        "amplitude_variance",
        "spectral_flatness",
        "band_energy_0",
        "band_energy_1",
        "band_energy_2",
        "band_energy_3",
        "band_energy_4",
        "band_energy_5",
        "band_energy_6",
        "band_energy_7",
    ];

    /// The all-zero sentinel used for gap epochs.
    pub fn zeroed() -> Self {
        Self {
            activity_count: 0.0,
            accel_variance_x: 0.0,
            accel_variance_y: 0.0,
            accel_variance_z: 0.0,
            zero_crossing_rate: 0.0,
            mean_magnitude: 0.0,
            motion_energy: 0.0,
            amplitude_mean: 0.0,
            amplitude_variance: 0.0,
            spectral_flatness: 0.0,
            band_energy: [0.0; AUDIO_BANDS],
        }
    }

    /// Flatten into the ordered array the model scores.
    pub fn to_model_input(&self) -> [f64; FEATURE_COUNT] {
        let mut input = [0.0; FEATURE_COUNT];
        input[0] = self.activity_count;
        input[1] = self.accel_variance_x;
        input[2] = self.accel_variance_y;
        input[3] = self.accel_variance_z;
        input[4] = self.zero_crossing_rate;
        input[5] = self.mean_magnitude;
        input[6] = self.motion_energy;
        input[7] = self.amplitude_mean;
        input[8] = self.amplitude_variance;
        input[9] = self.spectral_flatness;
        input[10..].copy_from_slice(&self.band_energy);
        input
    }
}

/// Extract the feature record for one epoch.
///
/// An epoch missing one modality gets zero sentinels for that family only;
/// a gap epoch gets the full zero vector.
pub fn extract(epoch: &Epoch) -> FeatureVector {
    let mut features = FeatureVector::zeroed();

    if !epoch.accelerometer.is_empty() {
        let magnitudes: Vec<f64> = epoch.accelerometer.iter().map(|s| s.magnitude()).collect();

        features.activity_count = magnitudes
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).abs())
            .sum();

        features.accel_variance_x =
            variance(epoch.accelerometer.iter().map(|s| s.x), epoch.accelerometer.len());
        features.accel_variance_y =
            variance(epoch.accelerometer.iter().map(|s| s.y), epoch.accelerometer.len());
        features.accel_variance_z =
            variance(epoch.accelerometer.iter().map(|s| s.z), epoch.accelerometer.len());

        features.mean_magnitude = mean(&magnitudes);
        features.motion_energy =
            magnitudes.iter().map(|m| m * m).sum::<f64>() / magnitudes.len() as f64;
        features.zero_crossing_rate = zero_crossing_rate(&magnitudes);
    }

    if !epoch.audio.is_empty() {
        let amplitudes: Vec<f64> = epoch.audio.iter().map(|s| s.amplitude).collect();
        features.amplitude_mean = mean(&amplitudes);
        features.amplitude_variance = variance(amplitudes.iter().copied(), amplitudes.len());

        for (band, slot) in features.band_energy.iter_mut().enumerate() {
            *slot = epoch
                .audio
                .iter()
                .map(|s| s.frequency_bands[band])
                .sum::<f64>()
                / epoch.audio.len() as f64;
        }

        features.spectral_flatness = spectral_flatness(&features.band_energy);
    }

    features
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance. Zero for fewer than two values.
fn variance(values: impl Iterator<Item = f64> + Clone, n: usize) -> f64 {
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64
}

/// Sign changes of the mean-centered signal, per transition.
fn zero_crossing_rate(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let mean = mean(values);
    let crossings = values
        .windows(2)
        .filter(|pair| {
            let a = pair[0] - mean;
            let b = pair[1] - mean;
            (a < 0.0 && b >= 0.0) || (a >= 0.0 && b < 0.0)
        })
        .count();

    crossings as f64 / (values.len() - 1) as f64
}

/// Geometric mean over arithmetic mean of the band energies.
///
/// Approaches 1 for a flat (noise-like) spectrum and 0 for a spectrum
/// concentrated in one band. Zero or negative band energies collapse the
/// geometric mean to 0.
fn spectral_flatness(bands: &[f64; AUDIO_BANDS]) -> f64 {
    let arithmetic = bands.iter().sum::<f64>() / AUDIO_BANDS as f64;
    if arithmetic <= 0.0 {
        return 0.0;
    }

    if bands.iter().any(|&b| b <= 0.0) {
        return 0.0;
    }

    let log_sum: f64 = bands.iter().map(|b| b.ln()).sum();
    let geometric = (log_sum / AUDIO_BANDS as f64).exp();

    geometric / arithmetic
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::types::test_support::*;
    use chrono::Duration;

    fn epoch_with(
        accelerometer: Vec<crate::sensor::types::AccelerometerSample>,
        audio: Vec<crate::sensor::types::AudioSample>,
    ) -> Epoch {
        let start = session_start();
        Epoch {
            index: 0,
            start,
            end: start + Duration::seconds(30),
            accelerometer,
            audio,
        }
    }

    #[test]
    fn test_gap_epoch_yields_full_width_sentinel() {
        let epoch = epoch_with(vec![], vec![]);
        let features = extract(&epoch);

        assert_eq!(features, FeatureVector::zeroed());
        assert_eq!(features.to_model_input().len(), FEATURE_COUNT);
        assert_eq!(FeatureVector::NAMES.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_activity_count_sums_magnitude_deltas() {
        // Magnitudes 1.0, 2.0, 1.5 -> deltas 1.0 + 0.5
        let epoch = epoch_with(
            vec![
                accel_at(0, 1.0, 0.0, 0.0),
                accel_at(1, 2.0, 0.0, 0.0),
                accel_at(2, 1.5, 0.0, 0.0),
            ],
            vec![],
        );
        let features = extract(&epoch);
        assert!((features.activity_count - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_axis_variance() {
        // x values 1, 3 -> population variance 1.0
        let epoch = epoch_with(
            vec![accel_at(0, 1.0, 0.0, 0.0), accel_at(1, 3.0, 0.0, 0.0)],
            vec![],
        );
        let features = extract(&epoch);
        assert!((features.accel_variance_x - 1.0).abs() < 1e-12);
        assert_eq!(features.accel_variance_y, 0.0);
    }

    #[test]
    fn test_constant_signal_has_no_crossings() {
        let epoch = epoch_with(
            (0..10).map(|t| accel_at(t, 0.0, 0.0, 1.0)).collect(),
            vec![],
        );
        let features = extract(&epoch);
        assert_eq!(features.zero_crossing_rate, 0.0);
        assert!((features.mean_magnitude - 1.0).abs() < 1e-12);
        assert!((features.motion_energy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_alternating_signal_crosses_every_step() {
        let epoch = epoch_with(
            (0..10)
                .map(|t| accel_at(t, 0.0, 0.0, if t % 2 == 0 { 0.5 } else { 1.5 }))
                .collect(),
            vec![],
        );
        let features = extract(&epoch);
        assert!((features.zero_crossing_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_audio_band_means_and_flatness() {
        let audio = vec![audio_at(0, 0.2, 0.5), audio_at(1, 0.4, 0.5)];
        let epoch = epoch_with(vec![], audio);
        let features = extract(&epoch);

        assert!((features.amplitude_mean - 0.3).abs() < 1e-12);
        for band in features.band_energy {
            assert!((band - 0.5).abs() < 1e-12);
        }
        // Uniform bands are a perfectly flat spectrum
        assert!((features.spectral_flatness - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_peaked_spectrum_is_less_flat_than_uniform() {
        let mut peaked = audio_at(0, 0.2, 0.01);
        peaked.frequency_bands[3] = 0.9;
        let epoch = epoch_with(vec![], vec![peaked]);
        let features = extract(&epoch);

        assert!(features.spectral_flatness < 0.5);
        assert!(features.spectral_flatness > 0.0);
    }

    #[test]
    fn test_missing_audio_leaves_audio_family_zeroed() {
        let epoch = epoch_with(vec![accel_at(0, 0.0, 0.0, 1.0)], vec![]);
        let features = extract(&epoch);

        assert_eq!(features.amplitude_mean, 0.0);
        assert_eq!(features.spectral_flatness, 0.0);
        assert!((features.mean_magnitude - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let epoch = epoch_with(
            (0..30).map(|t| accel_at(t, 0.1 * t as f64, 0.0, 1.0)).collect(),
            (0..30).map(|t| audio_at(t, 0.2, 0.3)).collect(),
        );
        assert_eq!(extract(&epoch), extract(&epoch));
    }
}
