use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{EntityDefinition, Id, SchemaSnapshot};

/// A commit is the stored, immutable form of a schema snapshot.
/// The entity payload is kept as a gzip-compressed JSON blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Commit {
    /// SHA-256 hash of the commit content
    pub hash: String,
    /// Branch the commit was created on
    pub branch_id: String,
    /// Parent commit hash (None for the root commit)
    pub parent_hash: Option<String>,
    /// Source head folded in by a merge commit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_from: Option<String>,
    pub author: Option<String>,
    pub message: Option<String>,
    /// When the commit was created
    pub created_at: String, // ISO 8601 string

    /// Compressed binary payload
    pub data: Vec<u8>,
    /// Uncompressed size for monitoring
    pub data_size: i64,
    /// Metadata for quick access without decompressing
    pub entity_count: i32,
}

/// Content stored in a commit's binary data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CommitData {
    pub entities: BTreeMap<Id, EntityDefinition>,
}

/// Descriptive fields supplied when writing a snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitMeta {
    pub author: Option<String>,
    pub message: Option<String>,
    pub merged_from: Option<String>,
}

impl CommitMeta {
    pub fn new(author: Option<String>, message: impl Into<String>) -> Self {
        Self {
            author,
            message: Some(message.into()),
            merged_from: None,
        }
    }
}

impl Commit {
    pub fn new(
        branch_id: &str,
        parent_hash: Option<String>,
        commit_data: &CommitData,
        meta: CommitMeta,
    ) -> Result<Self> {
        let serialized =
            serde_json::to_string(commit_data).context("failed to serialize commit data")?;
        let compressed_data = Self::compress_data(serialized.as_bytes())?;
        let hash = Self::calculate_hash(
            branch_id,
            parent_hash.as_deref(),
            meta.merged_from.as_deref(),
            &serialized,
            meta.author.as_deref(),
            meta.message.as_deref(),
        );

        Ok(Self {
            hash,
            branch_id: branch_id.to_string(),
            parent_hash,
            merged_from: meta.merged_from,
            author: meta.author,
            message: meta.message,
            created_at: chrono::Utc::now().to_rfc3339(),
            data: compressed_data,
            data_size: serialized.len() as i64,
            entity_count: commit_data.entities.len() as i32,
        })
    }

    /// Commit the entities of an uncommitted snapshot
    pub fn from_snapshot(
        snapshot: &SchemaSnapshot,
        parent_hash: Option<String>,
        meta: CommitMeta,
    ) -> Result<Self> {
        let data = CommitData {
            entities: snapshot.entities.clone(),
        };
        Self::new(&snapshot.branch_id, parent_hash, &data, meta)
    }

    /// Calculate SHA-256 hash for the commit
    fn calculate_hash(
        branch_id: &str,
        parent_hash: Option<&str>,
        merged_from: Option<&str>,
        data: &str,
        author: Option<&str>,
        message: Option<&str>,
    ) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(format!("branch:{}\n", branch_id));
        if let Some(parent) = parent_hash {
            hasher.update(format!("parent:{}\n", parent));
        }
        if let Some(merged) = merged_from {
            hasher.update(format!("merged:{}\n", merged));
        }
        if let Some(author) = author {
            hasher.update(format!("author:{}\n", author));
        }
        if let Some(message) = message {
            hasher.update(format!("message:{}\n", message));
        }
        hasher.update(format!("data:{}\n", data));

        hex::encode(hasher.finalize())
    }

    fn compress_data(data: &[u8]) -> Result<Vec<u8>> {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        Ok(encoder.finish()?)
    }

    fn decompress_data(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
        use flate2::read::GzDecoder;
        use std::io::Read;

        // gzip magic bytes (1f 8b); anything else is stored raw
        if data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b {
            let mut decoder = GzDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder.read_to_end(&mut decompressed)?;
            Ok(decompressed)
        } else {
            Ok(data.to_vec())
        }
    }

    pub fn get_data(&self) -> Result<CommitData> {
        let bytes = Self::decompress_data(&self.data)
            .with_context(|| format!("failed to decompress commit {}", self.hash))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to decode commit {}", self.hash))
    }

    pub fn to_snapshot(&self) -> Result<SchemaSnapshot> {
        let data = self.get_data()?;
        Ok(SchemaSnapshot {
            branch_id: self.branch_id.clone(),
            commit_id: self.hash.clone(),
            parent_commit_id: self.parent_hash.clone(),
            entities: data.entities,
        })
    }
}
