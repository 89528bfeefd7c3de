use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serializes deployments per repository path
#[derive(Default)]
pub struct RepoLocks {
    /// one lock per working tree
    locks: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl RepoLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other deployment holds `repo_path`.
    /// The lock is released when the returned guard is dropped.
    pub async fn acquire(&self, repo_path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(repo_path.to_path_buf()).or_default())
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn same_path_is_exclusive() {
        let locks = Arc::new(RepoLocks::new());
        let guard = locks.acquire(Path::new("/srv/site")).await;

        let blocked = timeout(Duration::from_millis(50), locks.acquire(Path::new("/srv/site"))).await;
        assert!(blocked.is_err(), "second acquire must wait");

        drop(guard);
        let reacquired =
            timeout(Duration::from_millis(500), locks.acquire(Path::new("/srv/site"))).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn different_paths_do_not_block() {
        let locks = RepoLocks::new();
        let _site = locks.acquire(Path::new("/srv/site")).await;
        let other = timeout(Duration::from_millis(500), locks.acquire(Path::new("/srv/other"))).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let locks = Arc::new(RepoLocks::new());
        let guard = locks.acquire(Path::new("/srv/site")).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/srv/site")).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }
}
