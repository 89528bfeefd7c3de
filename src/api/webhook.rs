//! Webhook handler for push notifications

use axum::{
    body::Bytes,
    extract::State as AxumState,
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::SharedState;
use crate::deploy::{self, ExecutionResult};
use crate::webhook::{self, RequestContext};

/// Handles a notification for the target named in the path.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = Uuid::now_v7();
    let span = info_span!("webhook", %delivery_id, target = %name);

    async move {
        // Resolve and drop the config lock before anything awaits
        let (target, timeout) = {
            let config = state.config();
            (config.resolve_target(&name), config.command_timeout())
        };

        let Some(target) = target else {
            warn!("No enabled, eligible target named '{}'", name);
            return ExecutionResult::new(StatusCode::NOT_FOUND, "Not Found").into_response();
        };

        let request = RequestContext::new(headers, params, body);
        let event = match webhook::parse(&request) {
            Ok(event) => event,
            Err(e) => {
                info!("Could not parse notification: {}", e);
                return ExecutionResult::new(StatusCode::BAD_REQUEST, e.to_string())
                    .into_response();
            }
        };

        let result = deploy::execute(
            &target,
            &event,
            state.git.as_ref(),
            &state.repo_locks,
            timeout,
        )
        .await;
        info!("Responding {}", result.status);
        result.into_response()
    }
    .instrument(span)
    .await
}
