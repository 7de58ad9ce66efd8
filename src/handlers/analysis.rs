//! # Sleep Analysis Endpoint
//!
//! `POST /api/v1/analyze` is the main entry point of the service. Takes one
//! night of raw sensor data, runs the full analysis pipeline, and returns
//! the quality report, the classified epoch sequence, merged stage
//! intervals, and the summary statistics.
//!
//! ## Request Body:
//! ```json
//! {
//!   "user_id": "…",
//!   "recording_start": "2025-03-10T22:00:00Z",
//!   "recording_end": "2025-03-11T06:00:00Z",
//!   "accelerometer_data": [{"timestamp": "…", "x": 0.0, "y": 0.0, "z": 1.0}],
//!   "audio_data": [{"timestamp": "…", "amplitude": 0.1,
//!                   "frequency_bands": [0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1, 0.1]}]
//! }
//! ```
//!
//! ## Blocking Dispatch:
//! The pipeline is CPU-bound, so the handler runs it via `web::block` on
//! the blocking worker pool. The async request loop never stalls behind a
//! long analysis, and concurrent requests proceed independently.

use crate::error::AppError;
use crate::sensor::types::{AccelerometerSample, AudioSample, RecordingSession};
use crate::staging::stage::SleepStage;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// The analysis request body, mirroring what the mobile client uploads.
#[derive(Debug, Deserialize)]
pub struct SleepAnalysisRequest {
    pub user_id: String,
    pub recording_start: DateTime<Utc>,
    pub recording_end: DateTime<Utc>,
    pub accelerometer_data: Vec<AccelerometerSample>,
    pub audio_data: Vec<AudioSample>,
}

/// Run a full sleep analysis for one recording session.
pub async fn analyze_sleep(
    state: web::Data<AppState>,
    body: web::Json<SleepAnalysisRequest>,
) -> Result<HttpResponse, AppError> {
    let request = body.into_inner();
    let analysis_id = Uuid::new_v4();

    info!(
        analysis_id = %analysis_id,
        user_id = %request.user_id,
        "Analysis request accepted"
    );

    let session = RecordingSession::assemble(
        request.user_id,
        request.recording_start,
        request.recording_end,
        request.accelerometer_data,
        request.audio_data,
    )?;

    let config = state.get_config();
    let engine = state.engine.clone();

    // The pipeline is pure CPU work; park it on the blocking pool and keep
    // the running-analyses gauge honest around it
    state.increment_active_analyses();
    let blocked = web::block(move || engine.analyze(&session, &config)).await;
    state.decrement_active_analyses();

    let outcome = blocked
        .map_err(|e| AppError::Internal(format!("Analysis worker failed: {}", e)))??;

    let epochs: Vec<_> = outcome
        .epochs
        .iter()
        .map(|epoch| {
            json!({
                "epoch_index": epoch.index,
                "start_time": epoch.start.to_rfc3339(),
                "end_time": epoch.end.to_rfc3339(),
                "stage": epoch.stage,
                "raw_stage": epoch.raw_stage,
                "probabilities": {
                    "wake": epoch.probabilities.get(SleepStage::Wake),
                    "n1": epoch.probabilities.get(SleepStage::N1),
                    "n2": epoch.probabilities.get(SleepStage::N2),
                    "n3": epoch.probabilities.get(SleepStage::N3),
                    "rem": epoch.probabilities.get(SleepStage::Rem)
                }
            })
        })
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "analysis_id": analysis_id,
        "analysis_timestamp": chrono::Utc::now().to_rfc3339(),
        "recording_start": request.recording_start.to_rfc3339(),
        "recording_end": request.recording_end.to_rfc3339(),
        "model": {
            "version": outcome.model_version,
            "degraded": outcome.model_degraded
        },
        "quality_report": outcome.quality,
        "stage_intervals": outcome.intervals,
        "epochs": epochs,
        "summary_statistics": outcome.summary
    })))
}
