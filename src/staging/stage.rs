//! # Sleep Stage Alphabet
//!
//! Defines the five-stage label set used throughout the classification
//! pipeline, plus the per-epoch probability vector the classifier emits.
//!
//! ## Stage Labels:
//! - **Wake**: Conscious, moving or resting
//! - **N1**: Light sleep, transition from wakefulness
//! - **N2**: Established light sleep (the bulk of a typical night)
//! - **N3**: Deep, slow-wave sleep
//! - **REM**: Rapid eye movement sleep
//!
//! The alphabet is deliberately a fixed-size enumerated type: the smoother's
//! transition table and the model's output layer are both indexed by
//! `SleepStage::index()`, so every component agrees on ordering at compile time.

use anyhow::{anyhow, Result};

/// Number of stage labels. Sizes the probability vectors and the
/// smoother's transition table.
pub const STAGE_COUNT: usize = 5;

/// The five sleep stage labels, in model output order.
///
/// ## Ordering:
/// The discriminant order (Wake, N1, N2, N3, REM) matches the class order
/// of the trained model artifact. `index()`/`from_index()` round-trip
/// through that ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SleepStage {
    Wake,
    N1,
    N2,
    N3,
    #[serde(rename = "REM")]
    Rem,
}

impl SleepStage {
    /// All stages in model output order.
    pub const ALL: [SleepStage; STAGE_COUNT] = [
        SleepStage::Wake,
        SleepStage::N1,
        SleepStage::N2,
        SleepStage::N3,
        SleepStage::Rem,
    ];

    /// Position of this stage in the model output order.
    pub fn index(self) -> usize {
        match self {
            SleepStage::Wake => 0,
            SleepStage::N1 => 1,
            SleepStage::N2 => 2,
            SleepStage::N3 => 3,
            SleepStage::Rem => 4,
        }
    }

    /// Inverse of `index()`. Returns None for out-of-range indices.
    pub fn from_index(index: usize) -> Option<Self> {
        SleepStage::ALL.get(index).copied()
    }

    /// Whether this stage counts as sleep (everything except Wake).
    pub fn is_sleep(self) -> bool {
        !matches!(self, SleepStage::Wake)
    }

    /// The canonical label string used in API responses and model artifacts.
    pub fn label(self) -> &'static str {
        match self {
            SleepStage::Wake => "Wake",
            SleepStage::N1 => "N1",
            SleepStage::N2 => "N2",
            SleepStage::N3 => "N3",
            SleepStage::Rem => "REM",
        }
    }
}

impl std::str::FromStr for SleepStage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Wake" => Ok(SleepStage::Wake),
            "N1" => Ok(SleepStage::N1),
            "N2" => Ok(SleepStage::N2),
            "N3" => Ok(SleepStage::N3),
            "REM" => Ok(SleepStage::Rem),
            _ => Err(anyhow!("Unknown sleep stage label: {}", s)),
        }
    }
}

impl std::fmt::Display for SleepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Calibrated probability distribution over the five stages for one epoch.
///
/// ## Invariants:
/// - Every value is in `[0, 1]`
/// - Values sum to 1 within floating tolerance (the classifier applies
///   softmax calibration before constructing one of these)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageProbability([f64; STAGE_COUNT]);

impl StageProbability {
    /// Wrap an already-calibrated probability vector.
    ///
    /// The caller is responsible for normalization; `is_normalized()` can
    /// verify it. The classifier is the only production constructor.
    pub fn new(values: [f64; STAGE_COUNT]) -> Self {
        StageProbability(values)
    }

    /// Probability assigned to one stage.
    pub fn get(&self, stage: SleepStage) -> f64 {
        self.0[stage.index()]
    }

    /// The full probability vector in model output order.
    pub fn values(&self) -> &[f64; STAGE_COUNT] {
        &self.0
    }

    /// The most probable stage.
    ///
    /// Exact ties resolve to the earlier stage in model output order, which
    /// keeps repeated runs byte-identical.
    pub fn argmax(&self) -> SleepStage {
        let mut best = 0;
        for i in 1..STAGE_COUNT {
            if self.0[i] > self.0[best] {
                best = i;
            }
        }
        // best is always < STAGE_COUNT
        SleepStage::from_index(best).unwrap_or(SleepStage::Wake)
    }

    /// Probability of the most probable stage (the per-epoch confidence score).
    pub fn max_probability(&self) -> f64 {
        self.0.iter().copied().fold(0.0, f64::max)
    }

    /// Gap between the top stage and the runner-up.
    ///
    /// Used by the smoother's de-flicker rule: a large margin means the
    /// classifier was genuinely confident, not flickering.
    pub fn margin(&self) -> f64 {
        let mut top = f64::MIN;
        let mut second = f64::MIN;
        for &v in &self.0 {
            if v > top {
                second = top;
                top = v;
            } else if v > second {
                second = v;
            }
        }
        top - second
    }

    /// Check the sum-to-one invariant within the given tolerance.
    pub fn is_normalized(&self, tolerance: f64) -> bool {
        let sum: f64 = self.0.iter().sum();
        (sum - 1.0).abs() <= tolerance && self.0.iter().all(|&v| (0.0..=1.0).contains(&v))
    }
}
