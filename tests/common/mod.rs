#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use ontology_versioning::{
    bootstrap, AppConfig, Branch, BranchStore, Cardinality, Commit, DataType, EntityDefinition,
    EntityStatus, LinkTypeDef, MemoryStore, MergeEngine, MergePhase, MergeObserver,
    ObjectTypeDef, PropertyConstraints, PropertyDef, RecordingEventPublisher, SchemaRepository,
    SchemaSnapshot, SnapshotStore,
};

/// Merge engine over an arbitrary store, with recorded events
pub struct TestRepo<S> {
    pub engine: Arc<MergeEngine<S>>,
    pub events: Arc<RecordingEventPublisher>,
}

impl<S: SchemaRepository + 'static> TestRepo<S> {
    pub async fn with_store(store: Arc<S>, config: AppConfig) -> Self {
        let events = Arc::new(RecordingEventPublisher::new());
        let engine = bootstrap(store, events.clone(), &config)
            .await
            .expect("bootstrap repository");
        Self {
            engine: Arc::new(engine),
            events,
        }
    }

    pub async fn commit(&self, branch: &str, definitions: Vec<EntityDefinition>) -> String {
        self.engine
            .branches()
            .commit(branch, definitions, Some("tester".to_string()), "test commit")
            .await
            .expect("commit")
    }

    pub async fn branch(&self, name: &str) -> String {
        self.engine
            .branches()
            .create_branch(name, "main", None)
            .await
            .expect("create branch")
            .head_commit_id
    }

    pub async fn head(&self, branch: &str) -> String {
        self.engine
            .branches()
            .get_branch(branch)
            .await
            .expect("branch")
            .head_commit_id
    }

    pub async fn snapshot(&self, branch: &str) -> Arc<SchemaSnapshot> {
        self.engine
            .branches()
            .store()
            .get_snapshot(branch, None)
            .await
            .expect("snapshot")
    }
}

impl TestRepo<MemoryStore> {
    pub async fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config).await
    }

    pub fn commit_count(&self) -> usize {
        self.engine.branches().store().commit_count()
    }
}

pub fn object_type(api_name: &str) -> EntityDefinition {
    object_type_with(api_name, api_name, &[])
}

pub fn object_type_with(api_name: &str, display_name: &str, properties: &[&str]) -> EntityDefinition {
    EntityDefinition::ObjectType(ObjectTypeDef {
        api_name: api_name.to_string(),
        display_name: display_name.to_string(),
        description: None,
        status: EntityStatus::Active,
        version: 1,
        primary_key: None,
        properties: properties.iter().map(|p| p.to_string()).collect(),
        interfaces: Vec::new(),
    })
}

pub fn string_property(
    api_name: &str,
    object_type: &str,
    max_length: Option<u32>,
    required: bool,
) -> EntityDefinition {
    EntityDefinition::Property(PropertyDef {
        api_name: api_name.to_string(),
        display_name: api_name.to_string(),
        description: None,
        status: EntityStatus::Active,
        version: 1,
        object_type: object_type.to_string(),
        data_type: DataType::String,
        constraints: PropertyConstraints {
            required,
            max_length,
            ..Default::default()
        },
    })
}

pub fn link_type(api_name: &str, source: &str, target: &str, cardinality: Cardinality) -> EntityDefinition {
    EntityDefinition::LinkType(LinkTypeDef {
        api_name: api_name.to_string(),
        display_name: api_name.to_string(),
        description: None,
        status: EntityStatus::Active,
        version: 1,
        source: source.to_string(),
        target: target.to_string(),
        cardinality,
        required: false,
    })
}

/// Invoice with property P, Customer, and `billedTo` Invoice -> Customer
pub fn invoicing(p_max_length: Option<u32>, p_required: bool) -> Vec<EntityDefinition> {
    vec![
        object_type_with("Invoice", "Invoice", &["P"]),
        object_type("Customer"),
        string_property("P", "Invoice", p_max_length, p_required),
        link_type("billedTo", "Invoice", "Customer", Cardinality::ManyToOne),
    ]
}

/// Memory store whose commit writes can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.inner.commit_count()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for FlakyStore {
    async fn get_commit(&self, hash: &str) -> anyhow::Result<Option<Commit>> {
        self.inner.get_commit(hash).await
    }

    async fn put_commit(&self, commit: Commit) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("disk full while writing {}", commit.hash);
        }
        self.inner.put_commit(commit).await
    }

    async fn commit_exists(&self, hash: &str) -> anyhow::Result<bool> {
        self.inner.commit_exists(hash).await
    }
}

#[async_trait::async_trait]
impl BranchStore for FlakyStore {
    async fn get_branch(&self, name: &str) -> anyhow::Result<Option<Branch>> {
        self.inner.get_branch(name).await
    }

    async fn list_branches(&self) -> anyhow::Result<Vec<Branch>> {
        self.inner.list_branches().await
    }

    async fn upsert_branch(&self, branch: Branch) -> anyhow::Result<()> {
        self.inner.upsert_branch(branch).await
    }

    async fn delete_branch(&self, name: &str) -> anyhow::Result<bool> {
        self.inner.delete_branch(name).await
    }
}

/// Tracks how many merges sit in COMMITTING at the same time
#[derive(Default)]
pub struct CommittingObserver {
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub aborted: AtomicUsize,
    pub completed: AtomicUsize,
    /// Pause inside COMMITTING to widen any race window
    pause_ms: u64,
}

impl CommittingObserver {
    pub fn with_pause(pause_ms: u64) -> Self {
        Self {
            pause_ms,
            ..Default::default()
        }
    }
}

impl MergeObserver for CommittingObserver {
    fn on_transition(&self, _merge_id: &str, from: MergePhase, to: MergePhase) {
        if to == MergePhase::Committing {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if self.pause_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(self.pause_ms));
            }
        }
        if from == MergePhase::Committing {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
        match to {
            MergePhase::Completed => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            MergePhase::Aborted => {
                self.aborted.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
    }
}
