use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Result, VersioningError};
use crate::logic::diff::DiffEngine;
use crate::logic::history;
use crate::logic::validate::RuleRegistry;
use crate::model::{
    format_violations, is_valid_branch_name, Branch, BranchStatus, Commit, CommitMeta,
    EntityDefinition, LockOperation, ProtectionRules, SchemaChangedEvent, SchemaSnapshot,
};
use crate::store::{
    BranchLockManager, ConfiguredProtectionPolicy, EventPublisher, ProtectionPolicy,
    SchemaRepository,
};

/// Branch lifecycle and direct commits, serialized per branch by the lock manager
pub struct BranchManager<S> {
    store: Arc<S>,
    locks: Arc<BranchLockManager>,
    publisher: Arc<dyn EventPublisher>,
    policy: Arc<dyn ProtectionPolicy>,
    rules: RuleRegistry,
    default_branch: String,
    max_ancestry_depth: usize,
}

impl<S: SchemaRepository> BranchManager<S> {
    pub fn new(store: Arc<S>, publisher: Arc<dyn EventPublisher>, config: &AppConfig) -> Self {
        Self {
            store,
            locks: Arc::new(BranchLockManager::new(config.merge.lock_timeout())),
            publisher,
            policy: Arc::new(ConfiguredProtectionPolicy::new(config.protection.clone())),
            rules: RuleRegistry::standard(),
            default_branch: config.repository.default_branch.clone(),
            max_ancestry_depth: config.merge.max_ancestry_depth,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn ProtectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = rules;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<BranchLockManager> {
        &self.locks
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    pub fn policy(&self) -> &Arc<dyn ProtectionPolicy> {
        &self.policy
    }

    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// Create the default branch on an empty root commit. Returns the existing
    /// branch when the repository is already initialised.
    pub async fn init_repository(&self, author: Option<String>) -> Result<Branch> {
        let _guard = self
            .locks
            .acquire(&self.default_branch, LockOperation::Admin)
            .await?;

        if let Some(existing) = self.store.get_branch(&self.default_branch).await? {
            return Ok(self.with_lock_state(existing));
        }

        let root = self
            .store
            .put_snapshot(
                &SchemaSnapshot::empty(&self.default_branch),
                CommitMeta::new(author, "Initial commit"),
            )
            .await?;
        let mut branch = Branch::new(
            &self.default_branch,
            root,
            None,
            Some("Default branch".to_string()),
        );
        branch.protection = self.policy.rules_for(&branch);
        self.store.upsert_branch(branch.clone()).await?;

        log::info!("Initialised repository with branch '{}'", self.default_branch);
        Ok(branch)
    }

    pub async fn get_branch(&self, name: &str) -> Result<Branch> {
        let branch = self
            .store
            .get_branch(name)
            .await?
            .ok_or_else(|| VersioningError::BranchNotFound(name.to_string()))?;
        Ok(self.with_lock_state(branch))
    }

    pub async fn list_branches(&self) -> Result<Vec<Branch>> {
        let branches = self.store.list_branches().await?;
        Ok(branches
            .into_iter()
            .map(|b| self.with_lock_state(b))
            .collect())
    }

    /// Branch off the current head of `from`
    pub async fn create_branch(
        &self,
        name: &str,
        from: &str,
        description: Option<String>,
    ) -> Result<Branch> {
        if !is_valid_branch_name(name) {
            return Err(VersioningError::InvalidBranchName(name.to_string()));
        }

        let _guard = self.locks.acquire(name, LockOperation::Admin).await?;
        if self.store.get_branch(name).await?.is_some() {
            return Err(VersioningError::BranchExists(name.to_string()));
        }
        let parent = self.get_branch(from).await?;

        let branch = Branch::new(
            name,
            parent.head_commit_id.clone(),
            Some(parent.name.clone()),
            description,
        );
        self.store.upsert_branch(branch.clone()).await?;

        log::info!(
            "Created branch '{}' from '{}' at {}",
            name,
            from,
            parent.head_commit_id
        );
        Ok(branch)
    }

    pub async fn delete_branch(&self, name: &str) -> Result<()> {
        if name == self.default_branch {
            return Err(VersioningError::Protected {
                branch: name.to_string(),
                reason: "the default branch cannot be deleted".to_string(),
            });
        }

        let guard = self.locks.acquire(name, LockOperation::Admin).await?;
        let branch = self.get_branch(name).await?;
        if self.policy.rules_for(&branch).protected {
            return Err(VersioningError::Protected {
                branch: name.to_string(),
                reason: "protected branches cannot be deleted".to_string(),
            });
        }

        self.store.delete_branch(name).await?;
        drop(guard);
        self.locks.forget(name);
        log::info!("Deleted branch '{}'", name);
        Ok(())
    }

    /// Mark a branch read-only. Archived branches accept no commits or merges.
    pub async fn archive_branch(&self, name: &str) -> Result<Branch> {
        if name == self.default_branch {
            return Err(VersioningError::Protected {
                branch: name.to_string(),
                reason: "the default branch cannot be archived".to_string(),
            });
        }

        let _guard = self.locks.acquire(name, LockOperation::Admin).await?;
        let mut branch = self.get_branch(name).await?;
        branch.status = BranchStatus::Archived;
        self.store.upsert_branch(branch.clone()).await?;
        Ok(branch)
    }

    pub async fn set_protection(&self, name: &str, rules: ProtectionRules) -> Result<Branch> {
        let _guard = self.locks.acquire(name, LockOperation::Admin).await?;
        let mut branch = self.get_branch(name).await?;
        branch.protection = rules;
        self.store.upsert_branch(branch.clone()).await?;
        Ok(branch)
    }

    /// Commit a full set of definitions as the new schema of `branch`.
    /// Returns the new head commit id, or the current head when nothing changed.
    pub async fn commit(
        &self,
        branch: &str,
        definitions: Vec<EntityDefinition>,
        author: Option<String>,
        message: &str,
    ) -> Result<String> {
        let _guard = self.locks.acquire(branch, LockOperation::Commit).await?;
        let current = self.writable_branch(branch).await?;
        let parent = self
            .store
            .get_snapshot(branch, Some(&current.head_commit_id))
            .await?;

        let mut next = SchemaSnapshot::from_definitions(branch, definitions)?;
        next.parent_commit_id = Some(current.head_commit_id.clone());
        next.bump_versions_from(&parent);

        if next.same_entities(&parent) {
            log::debug!("Nothing to commit on '{}'", branch);
            return Ok(current.head_commit_id);
        }

        self.write_head(current, &parent, next, CommitMeta::new(author, message))
            .await
    }

    /// New commit on `branch` restoring the content of one of its ancestors
    pub async fn revert(
        &self,
        branch: &str,
        commit_id: &str,
        author: Option<String>,
    ) -> Result<String> {
        let _guard = self.locks.acquire(branch, LockOperation::Revert).await?;
        let current = self.writable_branch(branch).await?;

        if !history::is_ancestor(
            self.store.as_ref(),
            commit_id,
            &current.head_commit_id,
            self.max_ancestry_depth,
        )
        .await?
        {
            return Err(VersioningError::CommitNotFound(commit_id.to_string()));
        }

        let parent = self
            .store
            .get_snapshot(branch, Some(&current.head_commit_id))
            .await?;
        let restored = self.store.get_snapshot(branch, Some(commit_id)).await?;

        let mut next = SchemaSnapshot::empty(branch);
        next.entities = restored.entities.clone();
        next.parent_commit_id = Some(current.head_commit_id.clone());
        next.bump_versions_from(&parent);

        let short: String = commit_id.chars().take(12).collect();
        self.write_head(
            current,
            &parent,
            next,
            CommitMeta::new(author, format!("Revert to {}", short)),
        )
        .await
    }

    /// Point a branch at any stored commit, bypassing ancestry checks
    pub async fn force_update_head(&self, branch: &str, commit_id: &str) -> Result<Branch> {
        let _guard = self.locks.acquire(branch, LockOperation::Admin).await?;
        let current = self.get_branch(branch).await?;

        if !self.policy.rules_for(&current).allows_force_update() {
            return Err(VersioningError::Protected {
                branch: branch.to_string(),
                reason: "force updates are not allowed".to_string(),
            });
        }
        if !self.store.commit_exists(commit_id).await? {
            return Err(VersioningError::CommitNotFound(commit_id.to_string()));
        }

        let before = self
            .store
            .get_snapshot(branch, Some(&current.head_commit_id))
            .await?;
        let after = self.store.get_snapshot(branch, Some(commit_id)).await?;
        let previous = current.head_commit_id.clone();

        log::warn!(
            "Force-updating '{}' from {} to {}",
            branch,
            previous,
            commit_id
        );
        let updated = self.advance_head(current, commit_id).await?;
        self.publish(SchemaChangedEvent::new(
            branch,
            commit_id,
            Some(previous),
            DiffEngine::diff(&before, &after).summary(),
        ))
        .await;
        Ok(updated)
    }

    /// Commits reachable from the head, newest first
    pub async fn history(&self, branch: &str, limit: usize) -> Result<Vec<Commit>> {
        let current = self.get_branch(branch).await?;
        let chain = history::ancestor_chain(
            self.store.as_ref(),
            &current.head_commit_id,
            limit.saturating_sub(1).min(self.max_ancestry_depth),
        )
        .await?;

        let mut commits = Vec::with_capacity(chain.len());
        for hash in chain.into_iter().take(limit) {
            let commit = self
                .store
                .get_commit(&hash)
                .await?
                .ok_or_else(|| VersioningError::CommitNotFound(hash.clone()))?;
            commits.push(commit);
        }
        Ok(commits)
    }

    /// Move a branch head. The caller must hold the branch lock.
    pub(crate) async fn advance_head(&self, mut branch: Branch, commit_id: &str) -> Result<Branch> {
        debug_assert!(
            self.locks.is_locked(&branch.name),
            "head of '{}' moved without its lock",
            branch.name
        );
        branch.head_commit_id = commit_id.to_string();
        branch.lock_state = Default::default();
        self.store.upsert_branch(branch.clone()).await?;
        Ok(branch)
    }

    /// Publish an event; failures are logged and otherwise ignored
    pub(crate) async fn publish(&self, event: SchemaChangedEvent) {
        let branch = event.branch.clone();
        if let Err(e) = self.publisher.publish(event).await {
            log::warn!("Failed to publish schema change for '{}': {}", branch, e);
        }
    }

    async fn writable_branch(&self, name: &str) -> Result<Branch> {
        let branch = self.get_branch(name).await?;
        if branch.status == BranchStatus::Archived {
            return Err(VersioningError::Protected {
                branch: name.to_string(),
                reason: "branch is archived".to_string(),
            });
        }
        Ok(branch)
    }

    /// Validate `next` against `parent`, store it and move the head
    async fn write_head(
        &self,
        current: Branch,
        parent: &SchemaSnapshot,
        next: SchemaSnapshot,
        meta: CommitMeta,
    ) -> Result<String> {
        let result = self.rules.check(parent, &next);
        if !result.valid {
            let blocking: Vec<_> = result.blocking().cloned().collect();
            log::info!(
                "Rejected commit on '{}': {}",
                current.name,
                format_violations(&blocking)
            );
            return Err(VersioningError::Validation(blocking));
        }
        for warning in result.violations.iter().filter(|v| !v.is_blocking()) {
            log::warn!("Commit on '{}': {}", current.name, warning);
        }

        let summary = DiffEngine::diff(parent, &next).summary();
        let branch = current.name.clone();
        let previous = current.head_commit_id.clone();

        let commit_id = self.store.put_snapshot(&next, meta).await?;
        self.advance_head(current, &commit_id).await?;

        log::info!(
            "Committed {} on '{}' (+{} -{} ~{})",
            commit_id,
            branch,
            summary.added,
            summary.removed,
            summary.modified
        );
        self.publish(SchemaChangedEvent::new(&branch, &commit_id, Some(previous), summary))
            .await;
        Ok(commit_id)
    }

    fn with_lock_state(&self, mut branch: Branch) -> Branch {
        branch.lock_state = self.locks.lock_state(&branch.name);
        branch
    }
}
