use crate::staging::stage::SleepStage;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// `GET /api/v1/model`: which classifier is serving and in what state.
pub async fn get_model_info(state: web::Data<AppState>) -> HttpResponse {
    let model = state.engine.model();
    let class_names: Vec<&str> = SleepStage::ALL.iter().map(|s| s.label()).collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "model": {
            "version": model.version(),
            "backend": model.backend_name(),
            "degraded": model.is_degraded(),
            "operational": model.health_probe(),
            "class_names": class_names
        }
    }))
}
