//! Deployment executor: authenticate, filter by branch, sync the working tree.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::DeploymentTarget;
use crate::auth::authenticate;
use crate::git::{GitInvocation, GitRunner, ProcessOutput};
use crate::repo_lock::RepoLocks;
use crate::webhook::NotificationEvent;

const HEADS_PREFIX: &str = "refs/heads/";

/// Status and plain-text body returned for one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: StatusCode,
    pub message: String,
}

impl ExecutionResult {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ExecutionResult {
    fn into_response(self) -> Response {
        (
            self.status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.message,
        )
            .into_response()
    }
}

/// True when a push to `git_ref` should deploy a target tracking `branch`.
pub fn branch_matches(branch: &str, git_ref: Option<&str>) -> bool {
    if branch.is_empty() {
        return true;
    }
    match git_ref {
        Some(git_ref) => {
            git_ref == branch || git_ref.strip_prefix(HEADS_PREFIX) == Some(branch)
        }
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    #[error("=== ERROR: DIR `{}` does not exist ===\n", .0.display())]
    Missing(PathBuf),

    #[error("=== ERROR: DIR `{}` is not a directory ===\n", .0.display())]
    NotADirectory(PathBuf),

    #[error("=== ERROR: DIR `{}` is not a repository ===\n", .0.display())]
    NotARepository(PathBuf),
}

/// Make sure `repo_path` is a directory holding a `.git` entry.
pub async fn check_repository(repo_path: &Path) -> Result<(), RepositoryError> {
    match tokio::fs::metadata(repo_path).await {
        Err(_) => Err(RepositoryError::Missing(repo_path.to_path_buf())),
        Ok(meta) if !meta.is_dir() => Err(RepositoryError::NotADirectory(repo_path.to_path_buf())),
        Ok(_) => {
            if tokio::fs::try_exists(repo_path.join(".git"))
                .await
                .unwrap_or(false)
            {
                Ok(())
            } else {
                Err(RepositoryError::NotARepository(repo_path.to_path_buf()))
            }
        }
    }
}

/// The git operations a deployment may run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step<'a> {
    ResetToHead,
    Pull,
    ResetToCommit(&'a str),
}

impl Step<'_> {
    pub fn args(&self) -> Vec<String> {
        match self {
            Step::ResetToHead => vec!["reset".into(), "--hard".into(), "HEAD".into()],
            Step::Pull => vec!["pull".into()],
            Step::ResetToCommit(sha) => vec!["reset".into(), "--hard".into(), sha.to_string()],
        }
    }

    fn success_header(&self) -> String {
        match self {
            Step::ResetToHead => "=== Reset to head OK ===".to_string(),
            Step::Pull => "=== Pull OK ===".to_string(),
            Step::ResetToCommit(sha) => format!("=== Reset to '{}' OK ===", sha),
        }
    }

    fn failure_header(&self, repo_path: &Path) -> String {
        match self {
            Step::ResetToHead => format!(
                "=== ERROR: Reset to head failed in '{}' ===",
                repo_path.display()
            ),
            Step::Pull => format!("=== ERROR: Pull failed in '{}' ===", repo_path.display()),
            Step::ResetToCommit(sha) => format!(
                "=== ERROR: Reset to '{}' failed in '{}' ===",
                sha,
                repo_path.display()
            ),
        }
    }
}

impl fmt::Display for Step<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "git {}", self.args().join(" "))
    }
}

/// Ordered record of every step attempted in one request
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    buffer: String,
}

impl Transcript {
    pub fn record(&mut self, header: &str, output: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(header);
        self.buffer.push('\n');
        self.buffer.push_str(output);
        if !output.ends_with('\n') {
            self.buffer.push('\n');
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

/// Runs the git steps for one authenticated notification
pub struct Deployer<'a> {
    target: &'a DeploymentTarget,
    git: &'a dyn GitRunner,
    timeout: Duration,
    transcript: Transcript,
}

impl<'a> Deployer<'a> {
    pub fn new(target: &'a DeploymentTarget, git: &'a dyn GitRunner, timeout: Duration) -> Self {
        Self {
            target,
            git,
            timeout,
            transcript: Transcript::default(),
        }
    }

    /// Run one step and append its output. Returns false when the step failed.
    async fn run_step(&mut self, step: Step<'_>) -> bool {
        let invocation = GitInvocation {
            repo_path: self.target.repo_path.clone(),
            args: step.args(),
            key_path: self.target.key_path.clone(),
            timeout: self.timeout,
        };

        let result = match self.git.run(&invocation).await {
            Ok(output) => output,
            Err(e) => {
                error!("{} failed to start: {}", step, e);
                ProcessOutput {
                    exit_code: None,
                    output: format!("{} failed to start: {}\n", step, e),
                    timed_out: false,
                }
            }
        };

        if result.success() {
            info!("{} succeeded", step);
            self.transcript.record(&step.success_header(), &result.output);
            true
        } else {
            error!("{} failed (exit code {:?})", step, result.exit_code);
            self.transcript
                .record(&step.failure_header(&self.target.repo_path), &result.output);
            false
        }
    }

    /// Optional reset to head, pull, then an optional reset to the requested commit.
    pub async fn run(mut self, event: &NotificationEvent) -> ExecutionResult {
        if event.reset_to_head() && !self.run_step(Step::ResetToHead).await {
            return self.finish(StatusCode::INTERNAL_SERVER_ERROR);
        }

        // Pre-deployment hooks would run here.

        if !self.run_step(Step::Pull).await {
            return self.finish(StatusCode::INTERNAL_SERVER_ERROR);
        }

        if let Some(sha) = event.target_commit() {
            if !self.run_step(Step::ResetToCommit(sha)).await {
                return self.finish(StatusCode::INTERNAL_SERVER_ERROR);
            }
        }

        // Post-deployment hooks would run here.

        self.finish(StatusCode::OK)
    }

    fn finish(self, status: StatusCode) -> ExecutionResult {
        ExecutionResult::new(status, self.transcript.into_string())
    }
}

/// Full pipeline for one notification: authentication, branch filter,
/// per-repository lock, repository check and the git steps.
pub async fn execute(
    target: &DeploymentTarget,
    event: &NotificationEvent,
    git: &dyn GitRunner,
    locks: &RepoLocks,
    timeout: Duration,
) -> ExecutionResult {
    if let Err(e) = authenticate(&target.secret, event) {
        warn!("Rejected notification: {}", e);
        return ExecutionResult::new(StatusCode::FORBIDDEN, e.to_string());
    }

    if !branch_matches(&target.branch, event.git_ref()) {
        let git_ref = event.git_ref().unwrap_or("(none)");
        info!(
            "Skipping event for '{}', target only deploys '{}'",
            git_ref, target.branch
        );
        return ExecutionResult::new(
            StatusCode::OK,
            format!(
                "Event was for branch '{}' but this hook only deploys the '{}' branch",
                git_ref, target.branch
            ),
        );
    }

    let _guard = locks.acquire(&target.repo_path).await;

    if let Err(e) = check_repository(&target.repo_path).await {
        warn!("{}", e.to_string().trim());
        return ExecutionResult::new(StatusCode::BAD_REQUEST, e.to_string());
    }

    info!("Deploying '{}'", target.repo_path.display());
    Deployer::new(target, git, timeout).run(event).await
}
