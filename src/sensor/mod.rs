//! # Sensor Module
//!
//! Everything that handles raw sensor input before classification begins.
//!
//! ## Key Components:
//! - **Data model**: Timestamped accelerometer and audio samples and the
//!   `RecordingSession` owning one night of both
//! - **Quality Validator**: Sufficiency and integrity checks that gate the
//!   rest of the pipeline
//! - **Epoch Segmenter**: Fixed-duration windows tiling the recording
//!
//! ## Input Expectations:
//! - **Accelerometer**: three-axis readings in g, nominally 1 Hz
//! - **Audio**: amplitude envelope in `[0, 1]` plus 8 frequency-band
//!   energies per frame, nominally 1 Hz
//! - Both streams tolerate out-of-order and duplicate timestamps

pub mod quality;   // Data quality validation and the analyzable gate
pub mod segment;   // Epoch segmentation
pub mod types;     // Raw sample and session types
