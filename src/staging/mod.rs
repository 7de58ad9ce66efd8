//! # Staging Module
//!
//! The classification half of the pipeline: feature extraction, the
//! pre-trained stage model, probability calibration, temporal smoothing,
//! and night-level statistics.
//!
//! ## Key Components:
//! - **Feature Extractor**: Fixed-schema numeric record per epoch
//! - **Stage Model**: Gradient-boosted ensemble loaded once at startup,
//!   with a deterministic degraded fallback
//! - **Stage Classifier**: Batch scoring plus softmax calibration
//! - **Temporal Smoother**: Viterbi smoothing over a physiological
//!   transition-penalty table
//! - **Statistics Aggregator**: Summary metrics and stage intervals
//! - **Analysis Engine**: The sequential orchestration of all of the above

pub mod classifier;  // Batch classification and calibration
pub mod engine;      // Pipeline orchestration
pub mod features;    // Per-epoch feature extraction
pub mod model;       // Model artifact loading and fallback
pub mod smoother;    // Temporal smoothing dynamic program
pub mod stage;       // Stage labels and probability vectors
pub mod stats;       // Night-level statistics

pub use engine::{AnalysisEngine, AnalysisOutcome, ClassifiedEpoch};
