use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use crate::api::AppState;

pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    // A live scan answers from its in-memory snapshot.
    if let Some(handle) = state.active_scans.get(&id) {
        let snapshot = handle.orchestrator.status();
        return Ok(Json(serde_json::to_value(&snapshot).unwrap_or_else(
            |_| json!({"error": "snapshot serialization failed"}),
        )));
    }

    // Otherwise fall back to the persisted scan record.
    match state.db.get_scan(&id) {
        Ok(Some(scan)) => Ok(Json(json!({
            "scan_id": id,
            "estado": scan["estado"],
            "puntuacion": scan["puntuacion"],
            "fecha_inicio": scan["fecha_inicio"],
            "fecha_fin": scan["fecha_fin"],
        }))),
        Ok(None) => Err((StatusCode::NOT_FOUND, Json(json!({"error": "Scan not found"})))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))),
    }
}
