use anyhow::Result;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::model::{Branch, ProtectionRules, SchemaChangedEvent};
use crate::store::traits::{EventPublisher, ProtectionPolicy};

/// Writes every event to the log at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventPublisher;

#[async_trait::async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: SchemaChangedEvent) -> Result<()> {
        log::info!(
            "Schema of '{}' changed to {} (+{} -{} ~{})",
            event.branch,
            event.commit_id,
            event.summary.added,
            event.summary.removed,
            event.summary.modified
        );
        Ok(())
    }
}

/// Keeps published events in memory, for tests and embedding hosts that poll
#[derive(Debug, Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<SchemaChangedEvent>>,
}

impl RecordingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SchemaChangedEvent> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<SchemaChangedEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(&self, event: SchemaChangedEvent) -> Result<()> {
        self.events.lock().push(event);
        Ok(())
    }
}

/// Protection rules as stored on the branch record
#[derive(Debug, Default, Clone, Copy)]
pub struct StoredProtectionPolicy;

impl ProtectionPolicy for StoredProtectionPolicy {
    fn rules_for(&self, branch: &Branch) -> ProtectionRules {
        branch.protection.clone()
    }
}

/// Rules from configuration take precedence over the stored branch rules
#[derive(Debug, Default, Clone)]
pub struct ConfiguredProtectionPolicy {
    overrides: HashMap<String, ProtectionRules>,
}

impl ConfiguredProtectionPolicy {
    pub fn new(overrides: HashMap<String, ProtectionRules>) -> Self {
        Self { overrides }
    }
}

impl ProtectionPolicy for ConfiguredProtectionPolicy {
    fn rules_for(&self, branch: &Branch) -> ProtectionRules {
        self.overrides
            .get(&branch.name)
            .cloned()
            .unwrap_or_else(|| branch.protection.clone())
    }
}
