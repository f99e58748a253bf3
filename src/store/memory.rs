use anyhow::Result;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::model::{Branch, Commit};
use crate::store::traits::{BranchStore, SnapshotStore};

/// In-process store keeping compressed commits and branch records in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    commits: RwLock<HashMap<String, Commit>>,
    branches: RwLock<BTreeMap<String, Branch>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.read().len()
    }

    /// Total compressed payload size across all commits
    pub fn stored_bytes(&self) -> usize {
        self.commits.read().values().map(|c| c.data.len()).sum()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn get_commit(&self, hash: &str) -> Result<Option<Commit>> {
        Ok(self.commits.read().get(hash).cloned())
    }

    async fn put_commit(&self, commit: Commit) -> Result<()> {
        let mut commits = self.commits.write();
        // commits are content addressed: an existing hash already holds identical data
        commits.entry(commit.hash.clone()).or_insert(commit);
        Ok(())
    }

    async fn commit_exists(&self, hash: &str) -> Result<bool> {
        Ok(self.commits.read().contains_key(hash))
    }
}

#[async_trait::async_trait]
impl BranchStore for MemoryStore {
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self.branches.read().get(name).cloned())
    }

    async fn list_branches(&self) -> Result<Vec<Branch>> {
        Ok(self.branches.read().values().cloned().collect())
    }

    async fn upsert_branch(&self, branch: Branch) -> Result<()> {
        self.branches.write().insert(branch.name.clone(), branch);
        Ok(())
    }

    async fn delete_branch(&self, name: &str) -> Result<bool> {
        Ok(self.branches.write().remove(name).is_some())
    }
}
