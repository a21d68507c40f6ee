//! /filter/reload and /reply-cache/clear handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use peerwire_core::ErrorKind;
use peerwire_services::ReloadReport;

use super::ApiState;

pub async fn handle_filter_reload(
    State(state): State<ApiState>,
) -> Result<Json<ReloadReport>, (StatusCode, String)> {
    let outcome = state
        .spam
        .reload_ip_filter()
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    match outcome {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            let status = match e.kind() {
                ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, e.to_string()))
        }
    }
}

#[derive(Serialize)]
pub struct ClearResponse {
    pub cleared: usize,
}

pub async fn handle_reply_cache_clear(State(state): State<ApiState>) -> Json<ClearResponse> {
    let cleared = state.reply_cache.len();
    state.reply_cache.clear();
    tracing::info!(cleared, "reply handler cache cleared");
    Json(ClearResponse { cleared })
}
