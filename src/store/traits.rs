use anyhow::Result;
use std::sync::Arc;

use crate::error::VersioningError;
use crate::model::{Branch, Commit, CommitMeta, ProtectionRules, SchemaChangedEvent, SchemaSnapshot};

/// Content-addressed storage of immutable commits
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get_commit(&self, hash: &str) -> Result<Option<Commit>>;
    async fn put_commit(&self, commit: Commit) -> Result<()>;
    async fn commit_exists(&self, hash: &str) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait BranchStore: Send + Sync {
    async fn get_branch(&self, name: &str) -> Result<Option<Branch>>;
    async fn list_branches(&self) -> Result<Vec<Branch>>;
    async fn upsert_branch(&self, branch: Branch) -> Result<()>;
    async fn delete_branch(&self, name: &str) -> Result<bool>;
}

/// Snapshot-level view over commits and branches.
///
/// Implemented for every store that provides both halves; adapters only
/// write the low-level commit and branch operations.
#[async_trait::async_trait]
pub trait SchemaRepository: SnapshotStore + BranchStore {
    /// Snapshot at `commit_id`, or at the branch head when no commit is given
    async fn get_snapshot(
        &self,
        branch_id: &str,
        commit_id: Option<&str>,
    ) -> crate::error::Result<Arc<SchemaSnapshot>> {
        let hash = match commit_id {
            Some(hash) => hash.to_string(),
            None => {
                self.get_branch(branch_id)
                    .await?
                    .ok_or_else(|| VersioningError::BranchNotFound(branch_id.to_string()))?
                    .head_commit_id
            }
        };

        let commit = self
            .get_commit(&hash)
            .await?
            .ok_or_else(|| VersioningError::CommitNotFound(hash.clone()))?;
        Ok(Arc::new(commit.to_snapshot()?))
    }

    /// Persist an uncommitted snapshot as a new commit whose parent is
    /// `snapshot.parent_commit_id`. Returns the new commit id.
    async fn put_snapshot(
        &self,
        snapshot: &SchemaSnapshot,
        meta: CommitMeta,
    ) -> crate::error::Result<String> {
        let mismatches = snapshot.key_mismatches();
        if !mismatches.is_empty() {
            return Err(VersioningError::Validation(mismatches));
        }
        if let Some(parent) = &snapshot.parent_commit_id {
            if !self.commit_exists(parent).await? {
                return Err(VersioningError::CommitNotFound(parent.clone()));
            }
        }

        let commit = Commit::from_snapshot(snapshot, snapshot.parent_commit_id.clone(), meta)?;
        let hash = commit.hash.clone();
        log::debug!(
            "Storing commit {} on '{}' ({} entities, {} bytes)",
            hash,
            commit.branch_id,
            commit.entity_count,
            commit.data_size
        );
        self.put_commit(commit).await?;
        Ok(hash)
    }

    /// Parent of a commit; `None` for a root commit
    async fn get_ancestry(&self, commit_id: &str) -> crate::error::Result<Option<String>> {
        let commit = self
            .get_commit(commit_id)
            .await?
            .ok_or_else(|| VersioningError::CommitNotFound(commit_id.to_string()))?;
        Ok(commit.parent_hash)
    }
}

impl<T: SnapshotStore + BranchStore + ?Sized> SchemaRepository for T {}

/// Sink for schema change notifications
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SchemaChangedEvent) -> Result<()>;
}

/// Lookup of the protection rules that apply to a branch
pub trait ProtectionPolicy: Send + Sync {
    fn rules_for(&self, branch: &Branch) -> ProtectionRules;
}
