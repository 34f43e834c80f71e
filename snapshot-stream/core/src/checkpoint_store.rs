// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Full copy of one reducer's counts at the close of epoch `sequence`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub reducer_id: String,
    pub sequence: u64,
    pub counts: BTreeMap<String, i64>,
}

impl CheckpointRecord {
    pub fn new(reducer_id: impl Into<String>, sequence: u64, counts: BTreeMap<String, i64>) -> Self {
        Self {
            reducer_id: reducer_id.into(),
            sequence,
            counts,
        }
    }

    /// `{reducerId}_{sequence}`, the key every backend stores the record under
    pub fn name(&self) -> String {
        record_name(&self.reducer_id, self.sequence)
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }

    /// Serialized form: a JSON object of key to count
    pub fn to_json(&self) -> Result<Vec<u8>, StorageError> {
        serde_json::to_vec(&self.counts).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn from_json(reducer_id: &str, sequence: u64, bytes: &[u8]) -> Result<Self, StorageError> {
        let counts = serde_json::from_slice(bytes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Self::new(reducer_id, sequence, counts))
    }
}

pub fn record_name(reducer_id: &str, sequence: u64) -> String {
    format!("{}_{}", reducer_id, sequence)
}

/// Inverse of [`record_name`] for one reducer; `None` for other reducers' names
pub fn parse_record_name(reducer_id: &str, name: &str) -> Option<u64> {
    name.strip_prefix(reducer_id)?
        .strip_prefix('_')?
        .parse()
        .ok()
}

#[derive(Debug, Error)]
pub enum StorageError {
    /// Records are immutable once written
    #[error("checkpoint {sequence} of {reducer_id} already exists")]
    AlreadyExists { reducer_id: String, sequence: u64 },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable home for checkpoint records
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Persist a record; fails if one already exists under the same name
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError>;

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError>;

    /// Stored sequence numbers of one reducer, ascending
    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError>;
}
