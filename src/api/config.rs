//! Config API endpoints

use axum::{
    Json,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, info};

use crate::api::authorize_admin;
use crate::{SharedState, reload_config};

/// POST /api/reload - Reload configuration from disk
/// Deployments already running keep the target they resolved.
pub async fn reload_config_endpoint(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = authorize_admin(&state, &headers) {
        return status.into_response();
    }

    match reload_config(&state.config_path).await {
        Ok(new_config) => {
            let target_count = new_config.target.len();
            *state.config_mut() = new_config;
            info!(
                "Configuration reloaded from {:?} ({} targets)",
                state.config_path, target_count
            );
            Json(json!({
                "status": "success",
                "message": "Configuration reloaded successfully",
                "total_targets": target_count
            }))
            .into_response()
        }
        Err(e) => {
            error!("Failed to reload config: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
                .into_response()
        }
    }
}
