pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

pub use config::AppConfig;
pub use error::{Result, VersioningError};

// Export logic types
pub use logic::{
    BranchManager, ConflictDetector, DiffEngine, LogMergeObserver, MergeEngine, MergeObserver,
    MergeOptions, MergeResolver, MergeRule, RuleRegistry,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{
    BranchLockManager, BranchStore, ConfiguredProtectionPolicy, EventPublisher,
    LogEventPublisher, MemoryStore, ProtectionPolicy, RecordingEventPublisher, SchemaRepository,
    SnapshotStore, StoredProtectionPolicy,
};

use std::sync::Arc;

/// Wire the branch manager and merge engine over `store` and make sure the
/// default branch exists
pub async fn bootstrap<S: SchemaRepository>(
    store: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    config: &AppConfig,
) -> Result<MergeEngine<S>> {
    let branches = Arc::new(BranchManager::new(store, publisher, config));
    branches.init_repository(None).await?;
    Ok(MergeEngine::new(branches, config.merge.clone()))
}

/// Load configuration, initialise logging and open an in-memory repository
pub async fn open_in_memory() -> anyhow::Result<MergeEngine<MemoryStore>> {
    let config = AppConfig::load()?;
    config.init_logging();

    let engine = bootstrap(
        Arc::new(MemoryStore::new()),
        Arc::new(LogEventPublisher),
        &config,
    )
    .await?;
    Ok(engine)
}
