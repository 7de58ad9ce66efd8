//! # Stage Classifier Model
//!
//! Loads the pre-trained gradient-boosted tree ensemble from its artifact
//! file and exposes raw per-stage scoring. The artifact is read exactly
//! once, at process startup, and the resulting model is immutable: safe to
//! share behind an `Arc` across every concurrent analysis.
//!
//! ## Artifact Format:
//! A JSON document with the trained ensemble:
//! - `classes`: stage labels in output order (must match the pipeline's)
//! - `feature_names`: input schema (must match the extractor's)
//! - `base_scores`: per-class starting margins
//! - `trees`: per-class regression trees as flat node arrays; split nodes
//!   reference children by index, leaves carry the additive margin
//!
//! ## Degraded Fallback:
//! A missing or unparseable artifact is a degraded-quality condition, not a
//! hard error: the engine falls back to a deterministic prior-frequency
//! model (typical overnight stage shares) and every result is tagged
//! `model_degraded` so callers can tell the difference.

use crate::staging::features::{FeatureVector, FEATURE_COUNT};
use crate::staging::stage::{SleepStage, STAGE_COUNT};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

/// Typical share of the night spent in each stage, used by the fallback
/// model. Order matches `SleepStage::ALL`.
const STAGE_PRIORS: [f64; STAGE_COUNT] = [0.15, 0.10, 0.45, 0.13, 0.17];

/// One node of a regression tree.
///
/// Split nodes route on `input[feature] < threshold` (left on true); leaves
/// carry the additive margin for the tree's class.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        leaf: f64,
    },
}

/// One boosted regression tree contributing to a single class margin.
#[derive(Debug, Clone, Deserialize)]
struct BoostedTree {
    class_index: usize,
    nodes: Vec<TreeNode>,
}

impl BoostedTree {
    /// Walk the tree for one input vector and return the leaf margin.
    fn evaluate(&self, input: &[f64; FEATURE_COUNT]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if input[*feature] < *threshold { *left } else { *right };
                }
                TreeNode::Leaf { leaf } => return *leaf,
            }
        }
    }
}

/// The on-disk artifact document.
#[derive(Debug, Clone, Deserialize)]
struct EnsembleArtifact {
    model_version: String,
    classes: Vec<String>,
    feature_names: Vec<String>,
    base_scores: Vec<f64>,
    trees: Vec<BoostedTree>,
}

/// A validated, loaded gradient-boosted ensemble.
#[derive(Debug, Clone)]
pub struct GradientBoostedEnsemble {
    version: String,
    base_scores: [f64; STAGE_COUNT],
    trees: Vec<BoostedTree>,
}

impl GradientBoostedEnsemble {
    /// Validate an artifact document and build the ensemble.
    ///
    /// ## Checks:
    /// - Class labels match the pipeline's stage alphabet, in order
    /// - Feature names match the extractor's schema, in order
    /// - Every tree targets a valid class and every node reference is
    ///   in-bounds and strictly forward (so traversal always terminates)
    fn from_artifact(artifact: EnsembleArtifact) -> Result<Self> {
        let expected_classes: Vec<&str> = SleepStage::ALL.iter().map(|s| s.label()).collect();
        if artifact.classes != expected_classes {
            return Err(anyhow!(
                "artifact class order {:?} does not match {:?}",
                artifact.classes,
                expected_classes
            ));
        }

        if artifact.feature_names != FeatureVector::NAMES {
            return Err(anyhow!(
                "artifact feature schema does not match the extractor ({} vs {} features)",
                artifact.feature_names.len(),
                FEATURE_COUNT
            ));
        }

        if artifact.base_scores.len() != STAGE_COUNT {
            return Err(anyhow!(
                "expected {} base scores, got {}",
                STAGE_COUNT,
                artifact.base_scores.len()
            ));
        }

        for (tree_index, tree) in artifact.trees.iter().enumerate() {
            if tree.class_index >= STAGE_COUNT {
                return Err(anyhow!(
                    "tree {} targets class {}, only {} classes exist",
                    tree_index,
                    tree.class_index,
                    STAGE_COUNT
                ));
            }
            if tree.nodes.is_empty() {
                return Err(anyhow!("tree {} has no nodes", tree_index));
            }
            for (node_index, node) in tree.nodes.iter().enumerate() {
                if let TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } = node
                {
                    if *feature >= FEATURE_COUNT {
                        return Err(anyhow!(
                            "tree {} node {} splits on feature {}, schema has {}",
                            tree_index,
                            node_index,
                            feature,
                            FEATURE_COUNT
                        ));
                    }
                    // Forward-only references rule out cycles
                    if *left <= node_index || *right <= node_index {
                        return Err(anyhow!(
                            "tree {} node {} has a non-forward child reference",
                            tree_index,
                            node_index
                        ));
                    }
                    if *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        return Err(anyhow!(
                            "tree {} node {} references a node out of bounds",
                            tree_index,
                            node_index
                        ));
                    }
                }
            }
        }

        let mut base_scores = [0.0; STAGE_COUNT];
        base_scores.copy_from_slice(&artifact.base_scores);

        Ok(Self {
            version: artifact.model_version,
            base_scores,
            trees: artifact.trees,
        })
    }

    /// Raw per-class margins for one input: base scores plus every tree's
    /// leaf contribution.
    fn score(&self, input: &[f64; FEATURE_COUNT]) -> [f64; STAGE_COUNT] {
        let mut scores = self.base_scores;
        for tree in &self.trees {
            scores[tree.class_index] += tree.evaluate(input);
        }
        scores
    }
}

/// Which scoring implementation is serving.
#[derive(Debug, Clone)]
enum ModelBackend {
    Ensemble(GradientBoostedEnsemble),
    /// Deterministic prior-frequency distribution; used when no artifact
    /// could be loaded
    Fallback,
}

/// The process-wide classifier model handle.
///
/// ## Thread Safety:
/// Immutable after construction. Share it as `Arc<StageModel>`; concurrent
/// analyses score through `&self` with no locking.
#[derive(Debug, Clone)]
pub struct StageModel {
    backend: ModelBackend,
    degraded: bool,
}

impl StageModel {
    /// Load the ensemble artifact, falling back to the prior model on any
    /// failure.
    ///
    /// The file handle is scoped to this call (read fully, then released)
    /// and the outcome is logged either way so a degraded deployment is
    /// visible in the startup log.
    pub fn load_or_fallback(path: &Path) -> Self {
        match Self::load_artifact(path) {
            Ok(ensemble) => {
                info!(
                    path = %path.display(),
                    version = %ensemble.version,
                    trees = ensemble.trees.len(),
                    "Stage classifier ensemble loaded"
                );
                Self {
                    backend: ModelBackend::Ensemble(ensemble),
                    degraded: false,
                }
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "Stage classifier artifact unavailable, running on the prior-frequency fallback"
                );
                Self::fallback()
            }
        }
    }

    /// The deterministic fallback model, directly constructible for tests.
    pub fn fallback() -> Self {
        Self {
            backend: ModelBackend::Fallback,
            degraded: true,
        }
    }

    /// Build a model from an already-validated ensemble (injection point
    /// for deterministic tests).
    pub fn from_ensemble(ensemble: GradientBoostedEnsemble) -> Self {
        Self {
            backend: ModelBackend::Ensemble(ensemble),
            degraded: false,
        }
    }

    /// Parse and validate an artifact from disk.
    pub fn load_artifact(path: &Path) -> Result<GradientBoostedEnsemble> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading model artifact {}", path.display()))?;
        let artifact: EnsembleArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("parsing model artifact {}", path.display()))?;
        GradientBoostedEnsemble::from_artifact(artifact)
    }

    /// Raw (uncalibrated) per-stage scores for one feature vector.
    ///
    /// The fallback backend returns log-priors, so softmax calibration
    /// downstream reproduces the prior distribution exactly.
    pub fn raw_scores(&self, features: &FeatureVector) -> [f64; STAGE_COUNT] {
        match &self.backend {
            ModelBackend::Ensemble(ensemble) => ensemble.score(&features.to_model_input()),
            ModelBackend::Fallback => {
                let mut scores = [0.0; STAGE_COUNT];
                for (slot, prior) in scores.iter_mut().zip(STAGE_PRIORS) {
                    *slot = prior.ln();
                }
                scores
            }
        }
    }

    /// Whether results produced with this model must be tagged as degraded.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Version string reported in responses and health checks.
    pub fn version(&self) -> &str {
        match &self.backend {
            ModelBackend::Ensemble(ensemble) => &ensemble.version,
            ModelBackend::Fallback => "prior-fallback-v1",
        }
    }

    /// Short name of the serving backend.
    pub fn backend_name(&self) -> &'static str {
        match &self.backend {
            ModelBackend::Ensemble(_) => "gradient_boosted_ensemble",
            ModelBackend::Fallback => "prior_fallback",
        }
    }

    /// Liveness probe: score a fixed vector and check the output is finite.
    ///
    /// Cheap enough to run from the health endpoint on every request.
    pub fn health_probe(&self) -> bool {
        let scores = self.raw_scores(&FeatureVector::zeroed());
        scores.iter().all(|s| s.is_finite())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::io::Write;

    fn features_with_activity(activity: f64) -> FeatureVector {
        let mut f = FeatureVector::zeroed();
        f.activity_count = activity;
        f
    }

    #[test]
    fn test_tree_traversal_routes_on_threshold() {
        let model = StageModel::from_ensemble(motion_keyed_ensemble());

        let still = model.raw_scores(&features_with_activity(0.5));
        assert!(still[SleepStage::N2.index()] > still[SleepStage::Wake.index()]);

        let restless = model.raw_scores(&features_with_activity(10.0));
        assert!(restless[SleepStage::Wake.index()] > restless[SleepStage::N2.index()]);
    }

    #[test]
    fn test_artifact_round_trip_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(motion_keyed_artifact_json().as_bytes()).unwrap();

        let model = StageModel::load_or_fallback(file.path());
        assert!(!model.is_degraded());
        assert_eq!(model.version(), "test-ensemble-v1");
        assert_eq!(model.backend_name(), "gradient_boosted_ensemble");

        let scores = model.raw_scores(&features_with_activity(10.0));
        assert!(scores[SleepStage::Wake.index()] > scores[SleepStage::N2.index()]);
    }

    #[test]
    fn test_missing_artifact_falls_back_degraded() {
        let model = StageModel::load_or_fallback(Path::new("/nonexistent/ensemble.json"));
        assert!(model.is_degraded());
        assert_eq!(model.backend_name(), "prior_fallback");
        assert!(model.health_probe());
    }

    #[test]
    fn test_corrupt_artifact_falls_back_degraded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();

        let model = StageModel::load_or_fallback(file.path());
        assert!(model.is_degraded());
    }

    #[test]
    fn test_fallback_scores_are_log_priors() {
        let model = StageModel::fallback();
        let scores = model.raw_scores(&FeatureVector::zeroed());
        for (score, prior) in scores.iter().zip(STAGE_PRIORS) {
            assert!((score - prior.ln()).abs() < 1e-12);
        }
    }

    #[test]
    fn test_wrong_feature_schema_is_rejected() {
        let mut doc: serde_json::Value =
            serde_json::from_str(&motion_keyed_artifact_json()).unwrap();
        doc["feature_names"] = serde_json::json!(["only_one_feature"]);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.to_string().as_bytes()).unwrap();

        assert!(StageModel::load_artifact(file.path()).is_err());
        // And the public entry point degrades instead of failing
        assert!(StageModel::load_or_fallback(file.path()).is_degraded());
    }

    #[test]
    fn test_backward_child_reference_is_rejected() {
        let mut doc: serde_json::Value =
            serde_json::from_str(&motion_keyed_artifact_json()).unwrap();
        doc["trees"][0]["nodes"][0]["left"] = serde_json::json!(0);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(doc.to_string().as_bytes()).unwrap();

        assert!(StageModel::load_artifact(file.path()).is_err());
    }

    #[test]
    fn test_health_probe_passes_on_loaded_ensemble() {
        let model = StageModel::from_ensemble(motion_keyed_ensemble());
        assert!(model.health_probe());
    }
}
