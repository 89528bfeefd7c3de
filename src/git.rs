//! Git invocation under a scoped deploy key.
//!
//! The executor only sees the [`GitRunner`] trait; [`SystemGit`] is the
//! production implementation shelling out to `git`, wrapped in `ssh-agent`
//! when the target has a deploy key.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Loads the key into a throwaway agent, then replaces the shell with git.
/// `$0` is the key path and `$@` the git arguments, so neither is parsed by the shell.
const AGENT_SCRIPT: &str = r#"ssh-add "$0" 2>&1; exec git "$@" 2>&1"#;
const PLAIN_SCRIPT: &str = r#"exec git "$@" 2>&1"#;

/// One git command to run for a deployment step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation {
    pub repo_path: PathBuf,
    pub args: Vec<String>,
    pub key_path: Option<PathBuf>,
    pub timeout: Duration,
}

impl GitInvocation {
    pub fn command_line(&self) -> String {
        format!("git {}", self.args.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// None when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    /// stdout and stderr, merged
    pub output: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run one git command to completion. An `Err` means the process could not be started.
    async fn run(&self, invocation: &GitInvocation) -> std::io::Result<ProcessOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemGit;

impl SystemGit {
    fn build_command(invocation: &GitInvocation) -> Command {
        let mut cmd = match &invocation.key_path {
            Some(key_path) => {
                let mut cmd = Command::new("ssh-agent");
                cmd.arg("sh").arg("-c").arg(AGENT_SCRIPT).arg(key_path);
                cmd
            }
            None => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(PLAIN_SCRIPT).arg("git");
                cmd
            }
        };

        cmd.args(&invocation.args)
            .current_dir(&invocation.repo_path)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl GitRunner for SystemGit {
    async fn run(&self, invocation: &GitInvocation) -> std::io::Result<ProcessOutput> {
        debug!(
            "Running (cwd = '{}', key = {:?}): {}",
            invocation.repo_path.display(),
            invocation.key_path,
            invocation.command_line()
        );

        let mut cmd = Self::build_command(invocation);
        match timeout(invocation.timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                Ok(ProcessOutput {
                    exit_code: output.status.code(),
                    output: text,
                    timed_out: false,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                // Dropping the output future kills the child.
                warn!(
                    "{} timed out after {}s in '{}'",
                    invocation.command_line(),
                    invocation.timeout.as_secs(),
                    invocation.repo_path.display()
                );
                Ok(ProcessOutput {
                    exit_code: None,
                    output: format!(
                        "{} timed out after {}s\n",
                        invocation.command_line(),
                        invocation.timeout.as_secs()
                    ),
                    timed_out: true,
                })
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn invocation(key_path: Option<&str>) -> GitInvocation {
        GitInvocation {
            repo_path: PathBuf::from("/srv/site"),
            args: vec!["reset".into(), "--hard".into(), "abc123".into()],
            key_path: key_path.map(PathBuf::from),
            timeout: Duration::from_secs(5),
        }
    }

    fn args_of(cmd: &Command) -> Vec<&OsStr> {
        cmd.as_std().get_args().collect()
    }

    #[test]
    fn wraps_git_in_ssh_agent_when_key_is_set() {
        let cmd = SystemGit::build_command(&invocation(Some("/keys/deploy")));
        assert_eq!(cmd.as_std().get_program(), "ssh-agent");
        assert_eq!(
            args_of(&cmd),
            ["sh", "-c", AGENT_SCRIPT, "/keys/deploy", "reset", "--hard", "abc123"]
        );
        assert_eq!(
            cmd.as_std().get_current_dir(),
            Some(std::path::Path::new("/srv/site"))
        );
    }

    #[test]
    fn runs_plain_git_without_key() {
        let cmd = SystemGit::build_command(&invocation(None));
        assert_eq!(cmd.as_std().get_program(), "sh");
        assert_eq!(
            args_of(&cmd),
            ["-c", PLAIN_SCRIPT, "git", "reset", "--hard", "abc123"]
        );
    }

    #[test]
    fn disables_terminal_prompts() {
        let cmd = SystemGit::build_command(&invocation(None));
        let prompt = cmd
            .as_std()
            .get_envs()
            .find(|(k, _)| *k == "GIT_TERMINAL_PROMPT")
            .and_then(|(_, v)| v);
        assert_eq!(prompt, Some(OsStr::new("0")));
    }

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let status = std::process::Command::new("git")
            .arg("init")
            .arg("-q")
            .current_dir(dir.path())
            .status()
            .unwrap();
        assert!(status.success());
        dir
    }

    fn in_repo(dir: &tempfile::TempDir, args: &[&str], timeout: Duration) -> GitInvocation {
        GitInvocation {
            repo_path: dir.path().to_path_buf(),
            args: args.iter().map(|a| a.to_string()).collect(),
            key_path: None,
            timeout,
        }
    }

    #[tokio::test]
    async fn reports_exit_code_of_real_git() {
        let repo = init_repo();
        let output = SystemGit
            .run(&in_repo(&repo, &["status"], Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(0));
        assert!(output.success());
    }

    #[tokio::test]
    async fn failed_git_keeps_its_error_output() {
        let repo = init_repo();
        let output = SystemGit
            .run(&in_repo(&repo, &["reset", "--hard", "abc123"], Duration::from_secs(30)))
            .await
            .unwrap();
        assert_eq!(output.exit_code, Some(128));
        assert!(!output.success());
        assert!(output.output.contains("fatal"), "got: {}", output.output);
    }

    #[tokio::test]
    async fn expired_timeout_is_a_failure() {
        let repo = init_repo();
        let output = SystemGit
            .run(&in_repo(&repo, &["status"], Duration::from_nanos(1)))
            .await
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
        assert!(!output.success());
        assert!(output.output.contains("timed out"));
    }

    #[test]
    fn timed_out_output_is_not_success() {
        let output = ProcessOutput {
            exit_code: Some(0),
            output: String::new(),
            timed_out: true,
        };
        assert!(!output.success());
        assert_eq!(invocation(None).command_line(), "git reset --hard abc123");
    }
}
