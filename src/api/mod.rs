//! HTTP surface: the webhook route plus health and admin endpoints

pub mod config;
pub mod handlers;
pub mod targets;
pub mod webhook;

use axum::http::{HeaderMap, StatusCode, header};
use axum::{Router, routing};
use constant_time_eq::constant_time_eq;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::SharedState;

// Re-export handlers
pub use config::reload_config_endpoint;
pub use handlers::root;
pub use targets::{generate_target_keys, list_targets};
pub use webhook::handle_webhook;

/// Build the application router. Admin routes are only mounted when an
/// admin token is configured at startup.
pub fn router(state: SharedState) -> Router {
    let admin_enabled = state.config().admin_token().is_some();

    let mut app = Router::new()
        .route("/", routing::get(root))
        .route("/githook/{name}", routing::any(handle_webhook))
        .route("/githook/{name}/", routing::any(handle_webhook));

    if admin_enabled {
        app = app
            .route("/api/targets", routing::get(list_targets))
            .route("/api/targets/{name}/keys", routing::post(generate_target_keys))
            .route("/api/reload", routing::post(reload_config_endpoint));
    } else {
        info!("No admin_token configured, admin API disabled");
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Check `Authorization: Bearer <admin_token>` against the current config.
pub(crate) fn authorize_admin(state: &SharedState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let config = state.config();
    let Some(expected) = config.admin_token() else {
        return Err(StatusCode::NOT_FOUND);
    };

    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(()),
        _ => {
            warn!("Rejected admin request with missing or wrong token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
