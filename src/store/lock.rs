//! Per-branch exclusive locks.
//!
//! Every head mutation runs under the branch lock. Two-branch operations take
//! both locks in lexicographic order so concurrent merges in opposite
//! directions cannot deadlock. Guards release on drop.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

use crate::error::{Result, VersioningError};
use crate::model::{LockOperation, LockState};

pub struct BranchLockManager {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    holders: Arc<Mutex<HashMap<String, LockState>>>,
    timeout: Duration,
}

impl BranchLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            holders: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock for one branch, waiting at most the configured timeout
    pub async fn acquire(&self, branch: &str, operation: LockOperation) -> Result<BranchGuard> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks
                .entry(branch.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        match tokio::time::timeout(self.timeout, mutex.lock_owned()).await {
            Ok(permit) => {
                self.holders.lock().insert(
                    branch.to_string(),
                    LockState::Locked {
                        operation,
                        acquired_at: Utc::now(),
                    },
                );
                log::debug!("Locked branch '{}' for {:?}", branch, operation);
                Ok(BranchGuard {
                    branch: branch.to_string(),
                    holders: Arc::clone(&self.holders),
                    _permit: permit,
                })
            }
            Err(_) => {
                let waited_ms = self.timeout.as_millis() as u64;
                log::warn!(
                    "Timed out after {}ms waiting for lock on branch '{}'",
                    waited_ms,
                    branch
                );
                Err(VersioningError::BranchBusy {
                    branch: branch.to_string(),
                    waited_ms,
                })
            }
        }
    }

    /// Lock two branches in lexicographic order. The same name twice takes a
    /// single lock.
    pub async fn acquire_pair(
        &self,
        a: &str,
        b: &str,
        operation: LockOperation,
    ) -> Result<BranchPairGuard> {
        if a == b {
            let first = self.acquire(a, operation).await?;
            return Ok(BranchPairGuard {
                first,
                second: None,
            });
        }

        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.acquire(low, operation).await?;
        // on timeout `first` drops here and releases the low lock
        let second = self.acquire(high, operation).await?;
        Ok(BranchPairGuard {
            first,
            second: Some(second),
        })
    }

    pub fn lock_state(&self, branch: &str) -> LockState {
        self.holders
            .lock()
            .get(branch)
            .cloned()
            .unwrap_or(LockState::Unlocked)
    }

    pub fn is_locked(&self, branch: &str) -> bool {
        self.lock_state(branch).is_locked()
    }

    /// Whether a lock entry exists for `branch`
    pub fn tracks(&self, branch: &str) -> bool {
        self.locks.lock().contains_key(branch)
    }

    /// Remove the lock entry of a branch that nobody holds or waits on.
    /// Returns `false` and keeps the entry otherwise.
    pub fn forget(&self, branch: &str) -> bool {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(branch)
            .map(|mutex| Arc::strong_count(mutex) == 1)
            .unwrap_or(false);
        if idle {
            locks.remove(branch);
        }
        idle
    }
}

/// Exclusive hold on one branch
pub struct BranchGuard {
    branch: String,
    holders: Arc<Mutex<HashMap<String, LockState>>>,
    _permit: OwnedMutexGuard<()>,
}

impl BranchGuard {
    pub fn branch(&self) -> &str {
        &self.branch
    }
}

impl Drop for BranchGuard {
    fn drop(&mut self) {
        self.holders.lock().remove(&self.branch);
        log::debug!("Released lock on branch '{}'", self.branch);
    }
}

impl std::fmt::Debug for BranchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchGuard").field("branch", &self.branch).finish()
    }
}

/// Hold on a source/target pair; released together
#[derive(Debug)]
pub struct BranchPairGuard {
    first: BranchGuard,
    second: Option<BranchGuard>,
}

impl BranchPairGuard {
    pub fn holds(&self, branch: &str) -> bool {
        self.first.branch() == branch
            || self.second.as_ref().map(|g| g.branch() == branch).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(ms: u64) -> Arc<BranchLockManager> {
        Arc::new(BranchLockManager::new(Duration::from_millis(ms)))
    }

    #[tokio::test]
    async fn test_guard_releases_on_drop() {
        let locks = manager(50);
        {
            let guard = locks.acquire("main", LockOperation::Commit).await.unwrap();
            assert_eq!(guard.branch(), "main");
            assert!(matches!(
                locks.lock_state("main"),
                LockState::Locked { operation: LockOperation::Commit, .. }
            ));
        }
        assert_eq!(locks.lock_state("main"), LockState::Unlocked);
        assert!(locks.acquire("main", LockOperation::Merge).await.is_ok());
    }

    #[tokio::test]
    async fn test_second_holder_times_out_with_busy() {
        let locks = manager(30);
        let _held = locks.acquire("main", LockOperation::Merge).await.unwrap();

        let err = locks.acquire("main", LockOperation::Commit).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, VersioningError::BranchBusy { ref branch, waited_ms: 30 } if branch == "main"));

        // other branches are unaffected
        assert!(locks.acquire("feature", LockOperation::Commit).await.is_ok());
    }

    #[tokio::test]
    async fn test_pair_releases_first_lock_when_second_times_out() {
        let locks = manager(30);
        let _held = locks.acquire("main", LockOperation::Commit).await.unwrap();

        // "feature" < "main": feature is taken first, then main times out
        let err = locks
            .acquire_pair("main", "feature", LockOperation::Merge)
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::BranchBusy { .. }));
        assert!(!locks.is_locked("feature"));
    }

    #[tokio::test]
    async fn test_opposite_pairs_do_not_deadlock() {
        let locks = manager(2_000);
        let mut tasks = Vec::new();
        for i in 0..20 {
            let locks = Arc::clone(&locks);
            tasks.push(tokio::spawn(async move {
                let (a, b) = if i % 2 == 0 { ("main", "feature") } else { ("feature", "main") };
                let guard = locks.acquire_pair(a, b, LockOperation::Merge).await.unwrap();
                assert!(guard.holds("main") && guard.holds("feature"));
                tokio::task::yield_now().await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(!locks.is_locked("main"));
        assert!(!locks.is_locked("feature"));
    }

    #[tokio::test]
    async fn test_same_branch_pair_takes_one_lock() {
        let locks = manager(30);
        let guard = locks.acquire_pair("main", "main", LockOperation::Admin).await.unwrap();
        assert!(guard.holds("main"));
    }

    #[tokio::test]
    async fn test_forget_only_drops_idle_entries() {
        let locks = manager(30);
        let guard = locks.acquire("feature", LockOperation::Admin).await.unwrap();
        assert!(!locks.forget("feature"));
        assert!(locks.tracks("feature"));

        drop(guard);
        assert!(locks.forget("feature"));
        assert!(!locks.tracks("feature"));
        assert!(!locks.forget("feature"));

        // a fresh entry is created on the next acquire
        assert!(locks.acquire("feature", LockOperation::Commit).await.is_ok());
        assert!(locks.tracks("feature"));
    }
}
