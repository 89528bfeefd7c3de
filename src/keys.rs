//! Deploy key provisioning.

use sha1::{Digest, Sha1};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{GithookError, Result};

const KEY_COMMENT: &str = "githook";

/// `<keys_dir>/<hex sha1 of the secret>`
pub fn key_path_for_secret(keys_dir: &Path, secret: &str) -> PathBuf {
    keys_dir.join(hex::encode(Sha1::digest(secret.as_bytes())))
}

pub fn public_key_path(key_path: &Path) -> PathBuf {
    let mut path = OsString::from(key_path.as_os_str());
    path.push(".pub");
    PathBuf::from(path)
}

/// Public half of the pair, if both halves exist
pub async fn read_public_key(key_path: &Path) -> Option<String> {
    if !tokio::fs::try_exists(key_path).await.unwrap_or(false) {
        return None;
    }
    tokio::fs::read_to_string(public_key_path(key_path)).await.ok()
}

/// Generate an ed25519 key pair without passphrase at `key_path`.
/// Existing keys are never overwritten.
pub async fn generate_keys(key_path: &Path) -> Result<String> {
    let key_error = |message: String| GithookError::KeyGeneration {
        path: key_path.display().to_string(),
        message,
    };

    if tokio::fs::try_exists(key_path).await? {
        return Err(GithookError::KeyExists(key_path.display().to_string()));
    }
    if let Some(parent) = key_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    info!("Generating deploy key at '{}'", key_path.display());
    let output = Command::new("ssh-keygen")
        .args(["-q", "-t", "ed25519", "-N", "", "-C", KEY_COMMENT, "-f"])
        .arg(key_path)
        .output()
        .await
        .map_err(|e| key_error(format!("ssh-keygen failed to start: {}", e)))?;

    if !output.status.success() {
        let msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("ssh-keygen failed: {}", msg);
        return Err(key_error(msg));
    }

    read_public_key(key_path)
        .await
        .ok_or_else(|| key_error("ssh-keygen did not produce a public key".to_string()))
}
