pub mod api;
pub mod auth;
pub mod deploy;
pub mod error;
pub mod git;
pub mod keys;
pub mod logging;
pub mod repo_lock;
pub mod webhook;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{GithookError, Result};
use crate::git::GitRunner;
use crate::logging::{DEFAULT_MAX_LOG_FILES, FileLogger, LogRotation};
use crate::repo_lock::RepoLocks;

const DEFAULT_KEYS_DIR: &str = ".keys";
const DEFAULT_BRANCH: &str = "master";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GithookConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub target: Vec<TargetConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// Externally reachable base URL, used to print payload URLs.
    pub public_url: Option<String>,
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    pub admin_token: Option<String>,
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_log_max_files")]
    pub log_max_files: usize,
    #[serde(default)]
    pub log_rotation: LogRotation,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            public_url: None,
            keys_dir: default_keys_dir(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            admin_token: None,
            log_dir: None,
            log_max_files: DEFAULT_MAX_LOG_FILES,
            log_rotation: LogRotation::default(),
        }
    }
}

impl ServerSettings {
    /// Rolling file logger for `log_dir`, if one is configured
    pub fn file_logger(&self) -> Option<FileLogger> {
        self.log_dir.clone().map(|dir| {
            FileLogger::new(dir)
                .with_max_files(self.log_max_files)
                .with_rotation(self.log_rotation)
        })
    }
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from(DEFAULT_KEYS_DIR)
}

fn default_log_max_files() -> usize {
    DEFAULT_MAX_LOG_FILES
}

fn default_command_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub repo_path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    pub key_path: Option<PathBuf>,
    pub enabled: Option<bool>,
}

impl TargetConfig {
    /// Unpublished targets are invisible to the webhook route.
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// A target needs both a secret and a repository path to run.
    pub fn is_eligible(&self) -> bool {
        !self.secret.is_empty() && !self.repo_path.is_empty()
    }

    /// Returns the deploy key location for this target.
    /// An explicit `key_path` wins; an explicit empty one disables the key.
    /// Otherwise the path is derived from the secret under `keys_dir`.
    pub fn key_path(&self, keys_dir: &Path) -> Option<PathBuf> {
        match &self.key_path {
            Some(path) if path.as_os_str().is_empty() => None,
            Some(path) => Some(path.clone()),
            None if self.secret.is_empty() => None,
            None => Some(keys::key_path_for_secret(keys_dir, &self.secret)),
        }
    }
}

/// The four values the deployment executor consumes for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTarget {
    pub secret: String,
    pub repo_path: PathBuf,
    pub branch: String,
    pub key_path: Option<PathBuf>,
}

impl GithookConfig {
    pub fn find_target(&self, name: &str) -> Option<&TargetConfig> {
        self.target.iter().find(|t| t.name == name)
    }

    /// Maps a route identifier to an executable target.
    /// Returns None for unknown, disabled or ineligible targets.
    pub fn resolve_target(&self, name: &str) -> Option<DeploymentTarget> {
        let target = self.find_target(name)?;
        if !target.is_enabled() || !target.is_eligible() {
            debug!("Target '{}' is disabled or missing a secret/repo_path", name);
            return None;
        }

        // A derived key that was never generated means a public repository:
        // git runs without ssh-agent instead of failing on `ssh-add`.
        let key_path = match target.key_path(&self.server.keys_dir) {
            Some(path) if target.key_path.is_none() && !path.exists() => None,
            other => other,
        };

        Some(DeploymentTarget {
            secret: target.secret.clone(),
            repo_path: PathBuf::from(&target.repo_path),
            branch: target.branch.clone(),
            key_path,
        })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.server.command_timeout_secs)
    }

    /// Returns the configured admin token, treating an empty one as absent.
    pub fn admin_token(&self) -> Option<&str> {
        self.server
            .admin_token
            .as_deref()
            .filter(|token| !token.is_empty())
    }

    /// URL to paste into the provider's webhook settings.
    pub fn payload_url(&self, name: &str) -> Option<String> {
        self.server
            .public_url
            .as_ref()
            .map(|base| format!("{}/githook/{}", base.trim_end_matches('/'), name))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.command_timeout_secs == 0 {
            return Err(GithookError::ConfigError(
                "command_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if self.server.log_max_files == 0 {
            return Err(GithookError::ConfigError(
                "log_max_files must be greater than zero".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for target in &self.target {
            if target.name.is_empty() || target.name.contains('/') {
                return Err(GithookError::ConfigError(format!(
                    "Invalid target name '{}'",
                    target.name
                )));
            }
            if !seen.insert(target.name.as_str()) {
                return Err(GithookError::ConfigError(format!(
                    "Duplicate target name '{}'",
                    target.name
                )));
            }
        }
        Ok(())
    }
}

pub fn parse_config(config_str: &str) -> Result<GithookConfig> {
    let config: GithookConfig = toml::from_str(config_str)?;
    config.validate()?;
    Ok(config)
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<GithookConfig> {
    let path = path.as_ref();
    let config_str = std::fs::read_to_string(path).map_err(|e| {
        GithookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_config(&config_str).map_err(|e| {
        GithookError::ConfigError(format!(
            "Failed to parse config file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Re-read the configuration file without blocking the runtime
pub async fn reload_config(path: impl AsRef<Path>) -> Result<GithookConfig> {
    let path = path.as_ref();
    let config_str = tokio::fs::read_to_string(path).await.map_err(|e| {
        GithookError::ConfigError(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    parse_config(&config_str)
}

pub struct AppState {
    pub config: RwLock<GithookConfig>,
    pub config_path: PathBuf,
    pub repo_locks: RepoLocks,
    pub git: Arc<dyn GitRunner>,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: GithookConfig, config_path: PathBuf, git: Arc<dyn GitRunner>) -> Self {
        Self {
            config: RwLock::new(config),
            config_path,
            repo_locks: RepoLocks::new(),
            git,
            start_time: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> RwLockReadGuard<'_, GithookConfig> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config_mut(&self) -> RwLockWriteGuard<'_, GithookConfig> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }
}

pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[server]
public_url = "https://example.org/"
keys_dir = "/var/lib/githook/keys"

[[target]]
name = "theme"
secret = "s3cr3t"
repo_path = "/srv/www/theme"

[[target]]
name = "plugin"
secret = "other"
repo_path = "/srv/www/plugin"
branch = ""
key_path = ""

[[target]]
name = "draft"
secret = "draft"
repo_path = "/srv/www/draft"
enabled = false

[[target]]
name = "unconfigured"
secret = "x"
"#;

    #[test]
    fn parses_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.command_timeout_secs, 120);
        assert_eq!(config.target.len(), 4);
        assert_eq!(config.target[0].branch, "master");
        assert_eq!(config.target[1].branch, "");
        assert!(config.admin_token().is_none());
    }

    #[test]
    fn resolves_only_enabled_and_eligible_targets() {
        let config = parse_config(SAMPLE).unwrap();
        assert!(config.resolve_target("theme").is_some());
        assert!(config.resolve_target("draft").is_none());
        assert!(config.resolve_target("unconfigured").is_none());
        assert!(config.resolve_target("missing").is_none());
    }

    #[test]
    fn missing_derived_key_runs_without_credential() {
        let config = parse_config(SAMPLE).unwrap();
        let theme = config.resolve_target("theme").unwrap();
        assert_eq!(theme.key_path, None);
        assert_eq!(theme.repo_path, PathBuf::from("/srv/www/theme"));

        let derived = config.target[0].key_path(&config.server.keys_dir).unwrap();
        assert!(derived.starts_with("/var/lib/githook/keys"));
    }

    #[test]
    fn explicit_key_path_is_kept_even_if_missing() {
        let config = parse_config(
            r#"
[[target]]
name = "site"
secret = "s"
repo_path = "/srv/site"
key_path = "/nonexistent/deploy_key"
"#,
        )
        .unwrap();
        let site = config.resolve_target("site").unwrap();
        assert_eq!(site.key_path, Some(PathBuf::from("/nonexistent/deploy_key")));
    }

    #[test]
    fn empty_key_path_disables_the_key() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.target[1].key_path(&config.server.keys_dir), None);
    }

    #[test]
    fn payload_url_trims_trailing_slash() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(
            config.payload_url("theme").as_deref(),
            Some("https://example.org/githook/theme")
        );
    }

    #[test]
    fn rejects_duplicate_target_names() {
        let err = parse_config(
            r#"
[[target]]
name = "a"
[[target]]
name = "a"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate target name"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let err = parse_config("[server]\ncommand_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, GithookError::ConfigError(_)));
    }

    #[test]
    fn log_file_settings_come_from_server_section() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.server.log_max_files, 5);
        assert_eq!(config.server.log_rotation, LogRotation::Daily);
        assert!(config.server.file_logger().is_none());

        let config = parse_config(
            "[server]\nlog_dir = \"logs\"\nlog_max_files = 10\nlog_rotation = \"hourly\"\n",
        )
        .unwrap();
        assert_eq!(config.server.log_max_files, 10);
        assert_eq!(config.server.log_rotation, LogRotation::Hourly);
        assert!(config.server.file_logger().is_some());

        let err = parse_config("[server]\nlog_max_files = 0\n").unwrap_err();
        assert!(matches!(err, GithookError::ConfigError(_)));
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config("/nonexistent/githook.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
