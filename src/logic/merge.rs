//! Merge orchestration: fast-forward, three-way merge and dry runs.
//!
//! A merge holds the locks of both branches from initiation to completion.
//! Analysis (diff, conflict detection, resolution, synthesis) is pure; the
//! only suspension points are repository access and lock acquisition. A merge
//! that ends in conflict or is cancelled writes nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::MergeConfig;
use crate::error::{Result, VersioningError};
use crate::logic::branch_ops::BranchManager;
use crate::logic::conflict::{sort_conflicts, ConflictDetector};
use crate::logic::diff::DiffEngine;
use crate::logic::history;
use crate::logic::resolve::MergeResolver;
use crate::model::{
    generate_id, Branch, Change, CommitMeta, Conflict, ConflictKind, Id, LockOperation,
    MergeKind, MergePhase, MergeResult, MergeStats, MergeStatus, RuleKind, SchemaChangedEvent,
    SchemaSnapshot, Severity, Violation,
};
use crate::store::{BranchPairGuard, SchemaRepository};

/// Caller-supplied knobs for a single merge
#[derive(Debug, Clone, Default)]
pub struct MergeOptions {
    pub author: Option<String>,
    pub message: Option<String>,
    /// Manual resolutions keyed by the conflicting entity id
    pub resolutions: HashMap<Id, Change>,
    pub cancellation: CancellationToken,
}

impl MergeOptions {
    pub fn new(author: Option<String>) -> Self {
        Self {
            author,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_resolution(mut self, resolution: Change) -> Self {
        self.resolutions.insert(resolution.entity_id.clone(), resolution);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// Receives every phase transition of every merge
pub trait MergeObserver: Send + Sync {
    fn on_transition(&self, merge_id: &str, from: MergePhase, to: MergePhase);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogMergeObserver;

impl MergeObserver for LogMergeObserver {
    fn on_transition(&self, merge_id: &str, from: MergePhase, to: MergePhase) {
        log::debug!("Merge {}: {} -> {}", merge_id, from, to);
    }
}

/// Phase bookkeeping for one merge. Dropping a tracker that never reached a
/// terminal phase (an error was propagated) reports ABORTED.
struct PhaseTracker<'a> {
    merge_id: Id,
    source: String,
    target: String,
    phase: MergePhase,
    started: Instant,
    settled: bool,
    observer: &'a dyn MergeObserver,
}

impl<'a> PhaseTracker<'a> {
    fn new(source: &str, target: &str, observer: &'a dyn MergeObserver) -> Self {
        let merge_id = generate_id();
        log::debug!("Merge {} of '{}' into '{}' initiated", merge_id, source, target);
        Self {
            merge_id,
            source: source.to_string(),
            target: target.to_string(),
            phase: MergePhase::Initiated,
            started: Instant::now(),
            settled: false,
            observer,
        }
    }

    fn advance(&mut self, next: MergePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal merge transition {} -> {}",
            self.phase,
            next
        );
        self.observer.on_transition(&self.merge_id, self.phase, next);
        self.phase = next;
    }

    /// Move to `next` unless cancellation was requested, in which case the
    /// merge moves to ABORTED and `false` is returned
    fn advance_unless_cancelled(&mut self, next: MergePhase, token: &CancellationToken) -> bool {
        if token.is_cancelled() {
            log::info!("Merge {} cancelled during {}", self.merge_id, self.phase);
            self.advance(MergePhase::Aborted);
            return false;
        }
        self.advance(next);
        true
    }

    fn finish(
        mut self,
        status: MergeStatus,
        merge_kind: MergeKind,
        merge_commit_id: Option<String>,
        conflicts: Vec<Conflict>,
        auto_resolved_count: usize,
    ) -> MergeResult {
        self.settled = true;
        MergeResult {
            merge_id: self.merge_id.clone(),
            source_branch: self.source.clone(),
            target_branch: self.target.clone(),
            status,
            merge_kind,
            merge_commit_id,
            final_phase: self.phase,
            stats: MergeStats {
                duration_ms: self.started.elapsed().as_millis() as u64,
                conflict_count: conflicts.len(),
                auto_resolved_count,
            },
            conflicts,
        }
    }

    fn up_to_date(mut self, head: &str) -> MergeResult {
        self.advance(MergePhase::Completed);
        self.finish(
            MergeStatus::Success,
            MergeKind::UpToDate,
            Some(head.to_string()),
            Vec::new(),
            0,
        )
    }

    fn aborted(self, merge_kind: MergeKind) -> MergeResult {
        self.finish(MergeStatus::Aborted, merge_kind, None, Vec::new(), 0)
    }
}

impl Drop for PhaseTracker<'_> {
    fn drop(&mut self) {
        if !self.settled && !self.phase.is_terminal() {
            log::warn!(
                "Merge {} of '{}' into '{}' failed during {}",
                self.merge_id,
                self.source,
                self.target,
                self.phase
            );
            self.observer
                .on_transition(&self.merge_id, self.phase, MergePhase::Aborted);
        }
    }
}

/// Outcome of the pure analysis of a three-way merge
struct MergePlan {
    conflicts: Vec<Conflict>,
    auto_resolved: usize,
    /// Present only when every conflict is resolved and the result validates
    merged: Option<SchemaSnapshot>,
}

pub struct MergeEngine<S> {
    branches: Arc<BranchManager<S>>,
    observer: Arc<dyn MergeObserver>,
    config: MergeConfig,
}

impl<S: SchemaRepository> MergeEngine<S> {
    pub fn new(branches: Arc<BranchManager<S>>, config: MergeConfig) -> Self {
        Self {
            branches,
            observer: Arc::new(LogMergeObserver),
            config,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn MergeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn branches(&self) -> &Arc<BranchManager<S>> {
        &self.branches
    }

    fn store(&self) -> &S {
        self.branches.store().as_ref()
    }

    /// Most recent common ancestor of two commits, within the configured depth
    pub async fn find_common_ancestor(&self, left: &str, right: &str) -> Result<String> {
        history::find_common_ancestor(self.store(), left, right, self.config.max_ancestry_depth)
            .await
    }

    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        history::is_ancestor(
            self.store(),
            ancestor,
            descendant,
            self.config.max_ancestry_depth,
        )
        .await
    }

    /// Preview a merge without taking locks or writing anything
    pub async fn dry_run(&self, source: &str, target: &str) -> Result<MergeResult> {
        let (source_branch, target_branch) = self.load_pair(source, target).await?;
        let mut tracker = PhaseTracker::new(source, target, self.observer.as_ref());
        let source_head = source_branch.head_commit_id.as_str();
        let target_head = target_branch.head_commit_id.as_str();

        if source_head == target_head {
            return Ok(tracker.up_to_date(target_head));
        }
        let ancestor = self.find_common_ancestor(target_head, source_head).await?;
        if ancestor == source_head {
            return Ok(tracker.up_to_date(target_head));
        }
        if ancestor == target_head {
            tracker.advance(MergePhase::Completed);
            return Ok(tracker.finish(
                MergeStatus::Success,
                MergeKind::FastForward,
                None,
                Vec::new(),
                0,
            ));
        }

        let threshold = self.threshold_for(&target_branch);
        let (ancestor_snap, source_snap, target_snap) = self
            .load_snapshots(&ancestor, &source_branch, &target_branch)
            .await?;
        let never = CancellationToken::new();
        let plan = match self.plan(
            &mut tracker,
            &never,
            &ancestor_snap,
            &source_snap,
            &target_snap,
            threshold,
            &HashMap::new(),
        )? {
            Some(plan) => plan,
            None => return Ok(tracker.aborted(MergeKind::ThreeWay)),
        };

        let status = if plan.merged.is_some() {
            MergeStatus::Success
        } else {
            MergeStatus::Conflict
        };
        Ok(tracker.finish(
            status,
            MergeKind::ThreeWay,
            None,
            plan.conflicts,
            plan.auto_resolved,
        ))
    }

    /// Move the target head to the source head. Only valid when the target
    /// head is an ancestor of the source head.
    pub async fn fast_forward(
        &self,
        source: &str,
        target: &str,
        options: MergeOptions,
    ) -> Result<MergeResult> {
        let mut tracker = PhaseTracker::new(source, target, self.observer.as_ref());
        let Some(_guard) = self.lock_pair(source, target, &options.cancellation).await? else {
            tracker.advance(MergePhase::Aborted);
            return Ok(tracker.aborted(MergeKind::FastForward));
        };
        let (source_branch, target_branch) = self.load_pair(source, target).await?;
        self.fast_forward_locked(tracker, source_branch, target_branch, &options)
            .await
    }

    /// Merge `source` into `target` against an explicitly chosen common ancestor
    pub async fn three_way_merge(
        &self,
        source: &str,
        target: &str,
        ancestor_commit_id: &str,
        options: MergeOptions,
    ) -> Result<MergeResult> {
        let mut tracker = PhaseTracker::new(source, target, self.observer.as_ref());
        let Some(_guard) = self.lock_pair(source, target, &options.cancellation).await? else {
            tracker.advance(MergePhase::Aborted);
            return Ok(tracker.aborted(MergeKind::ThreeWay));
        };
        let (source_branch, target_branch) = self.load_pair(source, target).await?;

        let source_head = source_branch.head_commit_id.clone();
        let target_head = target_branch.head_commit_id.clone();
        if !self.is_ancestor(ancestor_commit_id, &source_head).await?
            || !self.is_ancestor(ancestor_commit_id, &target_head).await?
        {
            return Err(VersioningError::DivergedHistory {
                left: target_head,
                right: source_head,
                max_depth: self.config.max_ancestry_depth,
            });
        }

        self.three_way_locked(
            tracker,
            source_branch,
            target_branch,
            ancestor_commit_id,
            &options,
        )
        .await
    }

    /// Find the common ancestor and fast-forward or three-way merge as needed
    pub async fn merge(
        &self,
        source: &str,
        target: &str,
        options: MergeOptions,
    ) -> Result<MergeResult> {
        let mut tracker = PhaseTracker::new(source, target, self.observer.as_ref());
        let Some(_guard) = self.lock_pair(source, target, &options.cancellation).await? else {
            tracker.advance(MergePhase::Aborted);
            return Ok(tracker.aborted(MergeKind::ThreeWay));
        };
        let (source_branch, target_branch) = self.load_pair(source, target).await?;

        let source_head = source_branch.head_commit_id.clone();
        let target_head = target_branch.head_commit_id.clone();
        if source_head == target_head {
            return Ok(tracker.up_to_date(&target_head));
        }

        let ancestor = self.find_common_ancestor(&target_head, &source_head).await?;
        if ancestor == source_head {
            log::info!("'{}' already contains '{}'", target, source);
            Ok(tracker.up_to_date(&target_head))
        } else if ancestor == target_head {
            self.fast_forward_locked(tracker, source_branch, target_branch, &options)
                .await
        } else {
            self.three_way_locked(tracker, source_branch, target_branch, &ancestor, &options)
                .await
        }
    }

    async fn fast_forward_locked(
        &self,
        mut tracker: PhaseTracker<'_>,
        source_branch: Branch,
        target_branch: Branch,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        let source_head = source_branch.head_commit_id.clone();
        let target_head = target_branch.head_commit_id.clone();

        if source_head == target_head {
            return Ok(tracker.up_to_date(&target_head));
        }
        if !self.is_ancestor(&target_head, &source_head).await? {
            return Err(VersioningError::NotFastForward {
                source_branch: source_branch.name,
                target: target_branch.name,
            });
        }

        let before = self
            .store()
            .get_snapshot(&target_branch.name, Some(&target_head))
            .await?;
        let after = self
            .store()
            .get_snapshot(&source_branch.name, Some(&source_head))
            .await?;

        if !tracker.advance_unless_cancelled(MergePhase::Committing, &options.cancellation) {
            return Ok(tracker.aborted(MergeKind::FastForward));
        }
        let target_name = target_branch.name.clone();
        self.branches.advance_head(target_branch, &source_head).await?;
        tracker.advance(MergePhase::Completed);

        log::info!(
            "Fast-forwarded '{}' from {} to {}",
            target_name,
            target_head,
            source_head
        );
        self.branches
            .publish(
                SchemaChangedEvent::new(
                    &target_name,
                    &source_head,
                    Some(target_head),
                    DiffEngine::diff(&before, &after).summary(),
                )
                .with_merge_kind(MergeKind::FastForward),
            )
            .await;

        Ok(tracker.finish(
            MergeStatus::Success,
            MergeKind::FastForward,
            Some(source_head),
            Vec::new(),
            0,
        ))
    }

    async fn three_way_locked(
        &self,
        mut tracker: PhaseTracker<'_>,
        source_branch: Branch,
        target_branch: Branch,
        ancestor_commit_id: &str,
        options: &MergeOptions,
    ) -> Result<MergeResult> {
        let source_head = source_branch.head_commit_id.clone();
        let target_head = target_branch.head_commit_id.clone();
        if ancestor_commit_id == source_head {
            return Ok(tracker.up_to_date(&target_head));
        }

        let threshold = self.threshold_for(&target_branch);
        let (ancestor, source_snap, target_snap) = self
            .load_snapshots(ancestor_commit_id, &source_branch, &target_branch)
            .await?;

        let Some(plan) = self.plan(
            &mut tracker,
            &options.cancellation,
            &ancestor,
            &source_snap,
            &target_snap,
            threshold,
            &options.resolutions,
        )?
        else {
            return Ok(tracker.aborted(MergeKind::ThreeWay));
        };

        let Some(merged) = plan.merged else {
            log::info!(
                "Merge {} of '{}' into '{}' stopped with {} unresolved conflicts",
                tracker.merge_id,
                source_branch.name,
                target_branch.name,
                plan.conflicts
                    .iter()
                    .filter(|c| c.suggested_resolution.is_none())
                    .count()
            );
            return Ok(tracker.finish(
                MergeStatus::Conflict,
                MergeKind::ThreeWay,
                None,
                plan.conflicts,
                plan.auto_resolved,
            ));
        };

        if !tracker.advance_unless_cancelled(MergePhase::Committing, &options.cancellation) {
            return Ok(tracker.aborted(MergeKind::ThreeWay));
        }

        if merged.same_entities(&target_snap) {
            // everything from the source is already on the target
            tracker.advance(MergePhase::Completed);
            return Ok(tracker.finish(
                MergeStatus::Success,
                MergeKind::ThreeWay,
                Some(target_head),
                plan.conflicts,
                plan.auto_resolved,
            ));
        }

        let meta = CommitMeta {
            author: options.author.clone(),
            message: Some(options.message.clone().unwrap_or_else(|| {
                format!("Merge '{}' into '{}'", source_branch.name, target_branch.name)
            })),
            merged_from: Some(source_head),
        };
        let summary = DiffEngine::diff(&target_snap, &merged).summary();
        let target_name = target_branch.name.clone();

        let commit_id = self.store().put_snapshot(&merged, meta).await?;
        self.branches.advance_head(target_branch, &commit_id).await?;
        tracker.advance(MergePhase::Completed);

        log::info!(
            "Merged '{}' into '{}' as {} ({} conflicts, {} auto-resolved)",
            source_branch.name,
            target_name,
            commit_id,
            plan.conflicts.len(),
            plan.auto_resolved
        );
        self.branches
            .publish(
                SchemaChangedEvent::new(&target_name, &commit_id, Some(target_head), summary)
                    .with_merge_kind(MergeKind::ThreeWay),
            )
            .await;

        Ok(tracker.finish(
            MergeStatus::Success,
            MergeKind::ThreeWay,
            Some(commit_id),
            plan.conflicts,
            plan.auto_resolved,
        ))
    }

    /// Diff both sides, detect and resolve conflicts, then synthesize and
    /// validate the merged snapshot. `None` when cancelled.
    #[allow(clippy::too_many_arguments)]
    fn plan(
        &self,
        tracker: &mut PhaseTracker<'_>,
        cancel: &CancellationToken,
        ancestor: &SchemaSnapshot,
        source: &SchemaSnapshot,
        target: &SchemaSnapshot,
        threshold: Severity,
        manual: &HashMap<Id, Change>,
    ) -> Result<Option<MergePlan>> {
        if !tracker.advance_unless_cancelled(MergePhase::Diffing, cancel) {
            return Ok(None);
        }
        let source_changes = DiffEngine::diff(ancestor, source);
        let target_changes = DiffEngine::diff(ancestor, target);
        log::debug!(
            "Merge {}: {} source changes, {} target changes",
            tracker.merge_id,
            source_changes.len(),
            target_changes.len()
        );

        if !tracker.advance_unless_cancelled(MergePhase::ConflictDetection, cancel) {
            return Ok(None);
        }
        let mut conflicts = ConflictDetector::detect_conflicts(ancestor, &source_changes, &target_changes);

        let unknown: Vec<Violation> = manual
            .keys()
            .filter(|id| !conflicts.iter().any(|c| &c.entity_id == *id))
            .map(|id| {
                Violation::error(
                    RuleKind::ResolutionTarget,
                    id.clone(),
                    "resolution supplied for an entity without a conflict",
                )
            })
            .collect();
        if !unknown.is_empty() {
            return Err(VersioningError::Validation(unknown));
        }

        if !tracker.advance_unless_cancelled(MergePhase::AutoResolving, cancel) {
            return Ok(None);
        }
        let mut resolutions: HashMap<Id, Change> = HashMap::new();
        let mut auto_resolved = 0;
        for conflict in conflicts.iter_mut().filter(|c| c.severity <= threshold) {
            if manual.contains_key(&conflict.entity_id) {
                continue;
            }
            let outcome = MergeResolver::auto_resolve(conflict);
            let applied = match outcome.applied_change {
                Some(change) if outcome.resolved => Some(change),
                // only a threshold raised above WARN lets the incoming change win outright
                _ if conflict.severity > Severity::Warn => conflict.source_change.clone(),
                _ => None,
            };
            match applied {
                Some(change) => {
                    resolutions.insert(conflict.entity_id.clone(), change.clone());
                    conflict.suggested_resolution = Some(change);
                    auto_resolved += 1;
                }
                None if conflict.severity <= Severity::Warn => {
                    log::info!(
                        "Merge {}: no valid combination of both sides for '{}'",
                        tracker.merge_id,
                        conflict.entity_id
                    );
                    conflict.severity = Severity::Error;
                    conflict.conflict_kind = ConflictKind::IncompatibleOverlap;
                    conflict.description = format!(
                        "{}; combining both sides yields an invalid definition",
                        conflict.description
                    );
                }
                None => {}
            }
        }
        sort_conflicts(&mut conflicts);

        let needs_manual = conflicts.iter().any(|c| c.severity > threshold) || !manual.is_empty();
        if needs_manual {
            if !tracker.advance_unless_cancelled(MergePhase::AwaitingManualResolution, cancel) {
                return Ok(None);
            }
            for conflict in conflicts.iter_mut() {
                let Some(resolution) = manual.get(&conflict.entity_id) else {
                    continue;
                };
                let result = MergeResolver::apply_manual_resolution(conflict, resolution);
                if !result.valid {
                    return Err(VersioningError::Validation(result.violations));
                }
                resolutions.insert(conflict.entity_id.clone(), resolution.clone());
                conflict.suggested_resolution = Some(resolution.clone());
            }
        }

        if conflicts.iter().any(|c| c.suggested_resolution.is_none()) {
            return Ok(Some(MergePlan {
                conflicts,
                auto_resolved,
                merged: None,
            }));
        }

        // ancestor -> target changes -> source changes, resolutions substituted
        let mut merged = ancestor.clone();
        merged.branch_id = target.branch_id.clone();
        merged.commit_id = String::new();
        merged.parent_commit_id = Some(target.commit_id.clone());
        for change in &target_changes.changes {
            merged.apply(change);
        }
        for change in &source_changes.changes {
            merged.apply(resolutions.get(&change.entity_id).unwrap_or(change));
        }
        for (entity_id, resolution) in &resolutions {
            if source_changes.get(entity_id).is_none() {
                merged.apply(resolution);
            }
        }
        merged.bump_versions_from(target);

        let validation = self.branches.rules().check(target, &merged);
        let violations: Vec<Conflict> = validation
            .blocking()
            .map(|v| Conflict {
                entity_id: v.entity_id.clone(),
                conflict_kind: ConflictKind::ConstraintViolation,
                severity: Severity::Error,
                source_change: source_changes.get(&v.entity_id).cloned(),
                target_change: target_changes.get(&v.entity_id).cloned(),
                overlapping_fields: Vec::new(),
                description: v.message.clone(),
                suggested_resolution: None,
            })
            .collect();

        if !violations.is_empty() {
            log::info!(
                "Merge {}: merged schema breaks {} rules",
                tracker.merge_id,
                violations.len()
            );
            conflicts.extend(violations);
            sort_conflicts(&mut conflicts);
            return Ok(Some(MergePlan {
                conflicts,
                auto_resolved,
                merged: None,
            }));
        }

        Ok(Some(MergePlan {
            conflicts,
            auto_resolved,
            merged: Some(merged),
        }))
    }

    /// Lower of the configured threshold and the target branch's own setting
    fn threshold_for(&self, target: &Branch) -> Severity {
        let configured = self.config.auto_resolve_threshold;
        match self.branches.policy().rules_for(target).auto_resolve_threshold {
            Some(branch_threshold) => branch_threshold.min(configured),
            None => configured,
        }
    }

    async fn load_pair(&self, source: &str, target: &str) -> Result<(Branch, Branch)> {
        let source_branch = self.branches.get_branch(source).await?;
        let target_branch = self.branches.get_branch(target).await?;
        if !target_branch.can_be_merged() {
            return Err(VersioningError::Protected {
                branch: target.to_string(),
                reason: "branch is archived".to_string(),
            });
        }
        Ok((source_branch, target_branch))
    }

    async fn load_snapshots(
        &self,
        ancestor: &str,
        source: &Branch,
        target: &Branch,
    ) -> Result<(Arc<SchemaSnapshot>, Arc<SchemaSnapshot>, Arc<SchemaSnapshot>)> {
        let store = self.store();
        let ancestor = store.get_snapshot(&target.name, Some(ancestor)).await?;
        let source = store
            .get_snapshot(&source.name, Some(&source.head_commit_id))
            .await?;
        let target = store
            .get_snapshot(&target.name, Some(&target.head_commit_id))
            .await?;
        Ok((ancestor, source, target))
    }

    /// Lock both branches; `None` when cancelled while waiting
    async fn lock_pair(
        &self,
        source: &str,
        target: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<BranchPairGuard>> {
        let locks = self.branches.locks();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            guard = locks.acquire_pair(source, target, LockOperation::Merge) => guard.map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::model::entity::fixtures::*;
    use crate::model::{Cardinality, EntityDefinition};
    use crate::store::{MemoryStore, RecordingEventPublisher, SnapshotStore};

    struct Fixture {
        engine: MergeEngine<MemoryStore>,
        events: Arc<RecordingEventPublisher>,
    }

    async fn fixture(config: AppConfig) -> Fixture {
        let events = Arc::new(RecordingEventPublisher::new());
        let branches = Arc::new(BranchManager::new(
            Arc::new(MemoryStore::new()),
            events.clone(),
            &config,
        ));
        branches.init_repository(None).await.unwrap();
        Fixture {
            engine: MergeEngine::new(branches, config.merge.clone()),
            events,
        }
    }

    fn base_schema(max_length: Option<u32>, required: bool) -> Vec<EntityDefinition> {
        let mut invoice = object_type("Invoice", "Invoice");
        if let EntityDefinition::ObjectType(o) = &mut invoice {
            o.properties = vec!["P".to_string()];
        }
        vec![
            invoice,
            object_type("Customer", "Customer"),
            string_property("P", "Invoice", max_length, required),
            link_type("billedTo", "Invoice", "Customer", Cardinality::ManyToOne),
        ]
    }

    /// main at base, `feature` branched from it
    async fn branched(f: &Fixture) -> String {
        let branches = f.engine.branches();
        let base = branches
            .commit("main", base_schema(Some(10), true), None, "base")
            .await
            .unwrap();
        branches.create_branch("feature", "main", None).await.unwrap();
        base
    }

    #[tokio::test]
    async fn test_fast_forward_moves_target_to_source_head() {
        let f = fixture(AppConfig::default()).await;
        branched(&f).await;
        let branches = f.engine.branches();
        let head = branches
            .commit("feature", base_schema(Some(20), true), None, "wider")
            .await
            .unwrap();

        let result = f.engine.merge("feature", "main", MergeOptions::default()).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.merge_kind, MergeKind::FastForward);
        assert_eq!(result.merge_commit_id.as_deref(), Some(head.as_str()));
        assert_eq!(result.final_phase, MergePhase::Completed);

        let main = branches.store().get_snapshot("main", None).await.unwrap();
        let feature = branches.store().get_snapshot("feature", None).await.unwrap();
        assert_eq!(main.entities, feature.entities);
        assert_eq!(
            f.events.events().last().unwrap().merge_kind,
            Some(MergeKind::FastForward)
        );
    }

    #[tokio::test]
    async fn test_fast_forward_rejects_diverged_target() {
        let f = fixture(AppConfig::default()).await;
        branched(&f).await;
        let branches = f.engine.branches();
        branches
            .commit("feature", base_schema(Some(20), true), None, "a")
            .await
            .unwrap();
        branches
            .commit("main", base_schema(Some(10), false), None, "b")
            .await
            .unwrap();

        let err = f
            .engine
            .fast_forward("feature", "main", MergeOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::NotFastForward { .. }));
    }

    #[tokio::test]
    async fn test_up_to_date_merges_write_nothing() {
        let f = fixture(AppConfig::default()).await;
        let base = branched(&f).await;

        let result = f.engine.merge("feature", "main", MergeOptions::default()).await.unwrap();
        assert_eq!(result.merge_kind, MergeKind::UpToDate);
        assert_eq!(result.merge_commit_id.as_deref(), Some(base.as_str()));
        assert_eq!(f.events.events().len(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_edits_merge_cleanly() {
        let f = fixture(AppConfig::default()).await;
        let base = branched(&f).await;
        let branches = f.engine.branches();
        let source_head = branches
            .commit("feature", base_schema(Some(20), true), None, "wider")
            .await
            .unwrap();
        let target_head = branches
            .commit("main", base_schema(Some(10), false), None, "optional")
            .await
            .unwrap();

        let preview = f.engine.dry_run("feature", "main").await.unwrap();
        assert!(preview.is_success());
        assert!(preview.merge_commit_id.is_none());

        let result = f
            .engine
            .three_way_merge("feature", "main", &base, MergeOptions::new(Some("carol".to_string())))
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.merge_kind, MergeKind::ThreeWay);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].severity, Severity::Info);
        assert_eq!(result.stats.auto_resolved_count, 1);

        let commit_id = result.merge_commit_id.unwrap();
        let commit = branches.store().get_commit(&commit_id).await.unwrap().unwrap();
        assert_eq!(commit.parent_hash.as_deref(), Some(target_head.as_str()));
        assert_eq!(commit.merged_from.as_deref(), Some(source_head.as_str()));
        assert_eq!(commit.author.as_deref(), Some("carol"));

        let merged = branches.store().get_snapshot("main", None).await.unwrap();
        assert!(merged
            .get("P")
            .unwrap()
            .same_content(&string_property("P", "Invoice", Some(20), false)));
    }

    #[tokio::test]
    async fn test_manual_resolution_unblocks_error_conflict() {
        let f = fixture(AppConfig::default()).await;
        let base = branched(&f).await;
        let branches = f.engine.branches();
        branches
            .commit("feature", base_schema(Some(5), true), None, "narrower")
            .await
            .unwrap();
        branches
            .commit("main", base_schema(Some(20), true), None, "wider")
            .await
            .unwrap();

        let blocked = f.engine.merge("feature", "main", MergeOptions::default()).await.unwrap();
        assert_eq!(blocked.status, MergeStatus::Conflict);
        assert_eq!(blocked.final_phase, MergePhase::AwaitingManualResolution);
        assert_eq!(blocked.unresolved().count(), 1);

        let ancestor = branches.store().get_snapshot("main", Some(&base)).await.unwrap();
        let resolution = Change::modified(
            ancestor.get("P").unwrap().clone(),
            string_property("P", "Invoice", Some(12), true),
            Vec::new(),
        );
        let result = f
            .engine
            .merge(
                "feature",
                "main",
                MergeOptions::default().with_resolution(resolution),
            )
            .await
            .unwrap();
        assert!(result.is_success());

        let merged = branches.store().get_snapshot("main", None).await.unwrap();
        assert!(merged
            .get("P")
            .unwrap()
            .same_content(&string_property("P", "Invoice", Some(12), true)));
        // version climbs past both sides
        assert_eq!(merged.get("P").unwrap().version(), 3);
    }

    #[tokio::test]
    async fn test_resolution_for_unconflicted_entity_is_rejected() {
        let f = fixture(AppConfig::default()).await;
        branched(&f).await;
        let branches = f.engine.branches();
        branches
            .commit("feature", base_schema(Some(20), true), None, "a")
            .await
            .unwrap();
        branches
            .commit("main", base_schema(Some(10), false), None, "b")
            .await
            .unwrap();

        let stray = Change::added(object_type("Order", "Order"));
        let err = f
            .engine
            .merge("feature", "main", MergeOptions::default().with_resolution(stray))
            .await
            .unwrap_err();
        assert!(matches!(err, VersioningError::Validation(_)));
    }

    #[tokio::test]
    async fn test_branch_threshold_lowers_configured_threshold() {
        let f = fixture(AppConfig::default()).await;
        branched(&f).await;
        let branches = f.engine.branches();
        branches
            .set_protection(
                "main",
                crate::model::ProtectionRules {
                    auto_resolve_threshold: Some(Severity::Info),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        // both widen: WARN, above the branch threshold of INFO
        branches
            .commit("feature", base_schema(Some(30), true), None, "a")
            .await
            .unwrap();
        branches
            .commit("main", base_schema(Some(20), true), None, "b")
            .await
            .unwrap();

        let result = f.engine.merge("feature", "main", MergeOptions::default()).await.unwrap();
        assert_eq!(result.status, MergeStatus::Conflict);
        assert_eq!(result.conflicts[0].severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_cancelled_merge_is_aborted() {
        let f = fixture(AppConfig::default()).await;
        branched(&f).await;
        let branches = f.engine.branches();
        branches
            .commit("feature", base_schema(Some(20), true), None, "a")
            .await
            .unwrap();
        branches
            .commit("main", base_schema(Some(10), false), None, "b")
            .await
            .unwrap();
        let head = branches.get_branch("main").await.unwrap().head_commit_id;

        let token = CancellationToken::new();
        token.cancel();
        let result = f
            .engine
            .merge("feature", "main", MergeOptions::default().with_cancellation(token))
            .await
            .unwrap();
        assert_eq!(result.status, MergeStatus::Aborted);
        assert_eq!(result.final_phase, MergePhase::Aborted);
        assert_eq!(branches.get_branch("main").await.unwrap().head_commit_id, head);
    }

    #[tokio::test]
    async fn test_dry_run_of_fast_forward_completes() {
        let f = fixture(AppConfig::default()).await;
        let base = branched(&f).await;
        let branches = f.engine.branches();
        branches
            .commit("feature", base_schema(Some(20), true), None, "wider")
            .await
            .unwrap();

        let preview = f.engine.dry_run("feature", "main").await.unwrap();
        assert!(preview.is_success());
        assert_eq!(preview.merge_kind, MergeKind::FastForward);
        assert_eq!(preview.final_phase, MergePhase::Completed);
        assert!(preview.merge_commit_id.is_none());
        assert_eq!(branches.get_branch("main").await.unwrap().head_commit_id, base);
    }

    #[tokio::test]
    async fn test_disjoint_edits_that_combine_invalid_become_errors() {
        let f = fixture(AppConfig::default()).await;
        let branches = f.engine.branches();
        branches
            .commit("main", base_schema(Some(20), true), None, "base")
            .await
            .unwrap();
        branches.create_branch("feature", "main", None).await.unwrap();

        let mut raised_min = base_schema(Some(20), true);
        if let EntityDefinition::Property(p) = &mut raised_min[2] {
            p.constraints.min_length = Some(15);
        }
        branches.commit("feature", raised_min, None, "min 15").await.unwrap();
        let head = branches
            .commit("main", base_schema(Some(12), true), None, "max 12")
            .await
            .unwrap();

        let result = f.engine.merge("feature", "main", MergeOptions::default()).await.unwrap();
        assert_eq!(result.status, MergeStatus::Conflict);
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.entity_id, "P");
        assert_eq!(conflict.severity, Severity::Error);
        assert_eq!(conflict.conflict_kind, ConflictKind::IncompatibleOverlap);
        assert!(conflict.suggested_resolution.is_none());
        assert_eq!(result.stats.auto_resolved_count, 0);

        assert_eq!(branches.get_branch("main").await.unwrap().head_commit_id, head);
        let main = branches.store().get_snapshot("main", None).await.unwrap();
        match main.get("P") {
            Some(EntityDefinition::Property(p)) => {
                assert_eq!(p.constraints.max_length, Some(12));
                assert_eq!(p.constraints.min_length, None);
            }
            other => panic!("expected property P, got {:?}", other),
        }
    }
}
