//! # Stage Classification
//!
//! Maps feature vectors to calibrated stage probability distributions using
//! the loaded model. Each epoch is classified independently, with no
//! look-ahead and no look-behind, and a whole night is scored in one batch
//! call so the model handle is touched once per request.
//!
//! ## Calibration:
//! The ensemble emits raw margins, not probabilities. A numerically stable
//! softmax turns them into a distribution that sums to 1 within floating
//! tolerance, which is the invariant every downstream consumer relies on.

use crate::staging::features::FeatureVector;
use crate::staging::model::StageModel;
use crate::staging::stage::{StageProbability, STAGE_COUNT};
use std::sync::Arc;
use tracing::debug;

/// Classifies epochs against a shared, immutable model handle.
pub struct StageClassifier {
    model: Arc<StageModel>,
}

impl StageClassifier {
    pub fn new(model: Arc<StageModel>) -> Self {
        Self { model }
    }

    /// Classify every epoch of a session in one pass.
    ///
    /// The output is index-aligned with the input: `result[i]` is the
    /// calibrated distribution for `features[i]`.
    pub fn classify_batch(&self, features: &[FeatureVector]) -> Vec<StageProbability> {
        let probabilities: Vec<StageProbability> = features
            .iter()
            .map(|f| StageProbability::new(softmax(self.model.raw_scores(f))))
            .collect();

        debug!(
            epochs = probabilities.len(),
            model = self.model.backend_name(),
            "Batch classification finished"
        );

        probabilities
    }
}

/// Numerically stable softmax: shift by the maximum before exponentiating
/// so large margins cannot overflow.
fn softmax(scores: [f64; STAGE_COUNT]) -> [f64; STAGE_COUNT] {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut out = [0.0; STAGE_COUNT];
    let mut sum = 0.0;

    for (slot, score) in out.iter_mut().zip(scores) {
        *slot = (score - max).exp();
        sum += *slot;
    }
    for slot in &mut out {
        *slot /= sum;
    }

    out
}
