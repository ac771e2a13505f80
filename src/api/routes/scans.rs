use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::api::models::CreateScanRequest;
use crate::api::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn create_scan(
    State(state): State<AppState>,
    Json(req): Json<CreateScanRequest>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    if !req.flags.sqli && !req.flags.xss {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "al menos un escáner (sqli, xss) debe estar habilitado"})),
        ));
    }

    let scan_id = uuid::Uuid::new_v4().to_string();
    state
        .db
        .create_scan(
            &scan_id,
            &req.usuario_id,
            req.alias.as_deref(),
            &req.url,
            req.flags.sqli,
            req.flags.xss,
        )
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            )
        })?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": scan_id,
            "estado": "pendiente",
            "url": req.url,
        })),
    ))
}

pub async fn list_scans(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);

    let scans = state
        .db
        .list_scans(limit, offset)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))))?;

    Ok(Json(json!({ "scans": scans, "total": scans.len() })))
}

pub async fn get_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.db.get_scan(&id) {
        Ok(Some(scan)) => Ok(Json(scan)),
        Ok(None) => Err((StatusCode::NOT_FOUND, Json(json!({"error": "Scan not found"})))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()})))),
    }
}

pub async fn stop_scan(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    if let Some(handle) = state.active_scans.get(&id) {
        handle.orchestrator.stop().await;
        Ok(Json(json!({"stopped": true})))
    } else {
        Err((StatusCode::NOT_FOUND, Json(json!({"error": "No active scan found"}))))
    }
}
