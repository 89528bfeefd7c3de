//! Health check endpoint

use axum::{
    Json,
    extract::Query,
    extract::State as AxumState,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;

use crate::SharedState;

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.get("format").map(String::as_str) != Some("json") {
        return "githook - healthy".into_response();
    }

    let config = state.config();
    let enabled_targets = config.target.iter().filter(|t| t.is_enabled()).count();

    Json(json!({
        "name": "githook",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at,
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "total_targets": config.target.len(),
        "enabled_targets": enabled_targets,
        "status": "healthy"
    }))
    .into_response()
}
