//! Target admin endpoints

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};

use crate::SharedState;
use crate::api::authorize_admin;
use crate::error::GithookError;
use crate::keys;

/// What an operator needs to wire up one target. Never includes the secret.
#[derive(Debug, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub branch: String,
    pub repo_path: String,
    pub enabled: bool,
    pub eligible: bool,
    pub payload_url: Option<String>,
    pub key_path: Option<String>,
    pub public_key: Option<String>,
}

/// GET /api/targets - List configured targets
pub async fn list_targets(
    AxumState(state): AxumState<SharedState>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = authorize_admin(&state, &headers) {
        return status.into_response();
    }

    // Collect under the lock, read key files after releasing it
    let mut summaries: Vec<(TargetSummary, Option<std::path::PathBuf>)> = {
        let config = state.config();
        config
            .target
            .iter()
            .map(|t| {
                let key_path = t.key_path(&config.server.keys_dir);
                let summary = TargetSummary {
                    name: t.name.clone(),
                    branch: t.branch.clone(),
                    repo_path: t.repo_path.clone(),
                    enabled: t.is_enabled(),
                    eligible: t.is_eligible(),
                    payload_url: config.payload_url(&t.name),
                    key_path: key_path.as_ref().map(|p| p.display().to_string()),
                    public_key: None,
                };
                (summary, key_path)
            })
            .collect()
    };

    for (summary, key_path) in &mut summaries {
        if let Some(key_path) = key_path {
            summary.public_key = keys::read_public_key(key_path.as_path()).await;
        }
    }

    let targets: Vec<TargetSummary> = summaries.into_iter().map(|(s, _)| s).collect();
    Json(json!({
        "targets": targets,
        "count": targets.len()
    }))
    .into_response()
}

/// POST /api/targets/{name}/keys - Generate the deploy key pair for a target
pub async fn generate_target_keys(
    AxumState(state): AxumState<SharedState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(status) = authorize_admin(&state, &headers) {
        return status.into_response();
    }

    let key_path = {
        let config = state.config();
        match config.find_target(&name) {
            Some(target) => target.key_path(&config.server.keys_dir),
            None => {
                return (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": GithookError::UnknownTarget(name).to_string()})),
                )
                    .into_response();
            }
        }
    };

    let Some(key_path) = key_path else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Target has no secret and no key_path to store a key at"})),
        )
            .into_response();
    };

    match keys::generate_keys(&key_path).await {
        Ok(public_key) => {
            info!("Generated deploy key for target '{}'", name);
            Json(json!({
                "status": "success",
                "key_path": key_path.display().to_string(),
                "public_key": public_key,
            }))
            .into_response()
        }
        Err(e) => {
            error!("Failed to generate deploy key for '{}': {}", name, e);
            let status = match &e {
                GithookError::KeyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(json!({"status": "error", "message": e.to_string()}))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{config, send, state_with};
    use crate::git::testing::RecordingGit;
    use crate::keys::public_key_path;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;

    fn admin_config(keys_dir: &std::path::Path) -> String {
        format!(
            r#"
[server]
public_url = "https://example.org"
keys_dir = "{keys}"
admin_token = "letmein"

[[target]]
name = "site"
secret = "s3cr3t"
repo_path = "/srv/site"
branch = "main"
"#,
            keys = keys_dir.display()
        )
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::get(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admin_routes_absent_without_token() {
        let state = state_with(
            config("[[target]]\nname = \"site\"\n"),
            Arc::new(RecordingGit::succeeding()),
        );
        let (status, _) = send(state, get("/api/targets", Some("anything"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn listing_requires_bearer_token() {
        let keys = tempfile::tempdir().unwrap();
        let state = state_with(
            config(&admin_config(keys.path())),
            Arc::new(RecordingGit::succeeding()),
        );

        let (status, _) = send(state.clone(), get("/api/targets", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(state, get("/api/targets", Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_targets_with_payload_url_and_public_key() {
        let keys = tempfile::tempdir().unwrap();
        let cfg = config(&admin_config(keys.path()));
        let key_path = cfg.target[0].key_path(&cfg.server.keys_dir).unwrap();
        std::fs::write(&key_path, "private").unwrap();
        std::fs::write(public_key_path(&key_path), "ssh-ed25519 AAAA githook\n").unwrap();

        let state = state_with(cfg, Arc::new(RecordingGit::succeeding()));
        let (status, body) = send(state, get("/api/targets", Some("letmein"))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(!body.contains("s3cr3t"));
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["count"], 1);
        let site = &json["targets"][0];
        assert_eq!(site["payload_url"], "https://example.org/githook/site");
        assert_eq!(site["branch"], "main");
        assert_eq!(site["public_key"], "ssh-ed25519 AAAA githook\n");
    }

    #[tokio::test]
    async fn key_generation_refuses_existing_key_and_unknown_target() {
        let keys = tempfile::tempdir().unwrap();
        let cfg = config(&admin_config(keys.path()));
        let key_path = cfg.target[0].key_path(&cfg.server.keys_dir).unwrap();
        std::fs::write(&key_path, "private").unwrap();
        let state = state_with(cfg, Arc::new(RecordingGit::succeeding()));

        let post = |uri: &str| {
            Request::post(uri)
                .header("Authorization", "Bearer letmein")
                .body(Body::empty())
                .unwrap()
        };

        let (status, _) = send(state.clone(), post("/api/targets/site/keys")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(std::fs::read_to_string(&key_path).unwrap(), "private");

        let (status, _) = send(state, post("/api/targets/missing/keys")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
