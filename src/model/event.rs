use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ChangeSummary, MergeKind};

/// Emitted after a branch head moves to a new schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaChangedEvent {
    pub branch: String,
    pub commit_id: String,
    pub previous_commit_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge_kind: Option<MergeKind>,
    pub summary: ChangeSummary,
    pub occurred_at: DateTime<Utc>,
}

impl SchemaChangedEvent {
    pub fn new(
        branch: impl Into<String>,
        commit_id: impl Into<String>,
        previous_commit_id: Option<String>,
        summary: ChangeSummary,
    ) -> Self {
        Self {
            branch: branch.into(),
            commit_id: commit_id.into(),
            previous_commit_id,
            merge_kind: None,
            summary,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_merge_kind(mut self, kind: MergeKind) -> Self {
        self.merge_kind = Some(kind);
        self
    }
}
