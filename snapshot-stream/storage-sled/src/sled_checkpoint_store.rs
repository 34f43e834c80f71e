// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use async_trait::async_trait;
use sled::Db;
use snapshot_stream_core::checkpoint_store::{parse_record_name, record_name};
use snapshot_stream_core::{CheckpointRecord, CheckpointStore, StorageError};
use std::path::Path;
use std::sync::Arc;
use tokio::task::spawn_blocking;
use tracing::debug;

/// Checkpoint records in a sled tree, keyed `{reducerId}_{sequence}`
#[derive(Clone)]
pub struct SledCheckpointStore {
    db: Arc<Db>,
}

impl SledCheckpointStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref()).map_err(backend)?;
        Ok(Self { db: Arc::new(db) })
    }
}

fn backend(e: sled::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Backend(format!("Task panicked: {:?}", e))
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        let key = record.name();
        let value = record.to_json()?;
        let reducer_id = record.reducer_id.clone();
        let sequence = record.sequence;
        let db = self.db.clone();
        spawn_blocking(move || {
            // Insert only if absent
            db.compare_and_swap(key.as_bytes(), None::<&[u8]>, Some(value))
                .map_err(backend)?
                .map_err(|_| StorageError::AlreadyExists {
                    reducer_id,
                    sequence,
                })?;
            db.flush().map_err(backend)?;
            debug!(%key, "checkpoint stored");
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        let key = record_name(reducer_id, sequence);
        let reducer_id = reducer_id.to_string();
        let db = self.db.clone();
        spawn_blocking(move || {
            let Some(value) = db.get(key.as_bytes()).map_err(backend)? else {
                return Ok(None);
            };
            CheckpointRecord::from_json(&reducer_id, sequence, &value).map(Some)
        })
        .await
        .map_err(join_error)?
    }

    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError> {
        let reducer_id = reducer_id.to_string();
        let db = self.db.clone();
        spawn_blocking(move || {
            let prefix = format!("{}_", reducer_id);
            let mut sequences = Vec::new();
            for entry in db.scan_prefix(prefix.as_bytes()) {
                let (key, _) = entry.map_err(backend)?;
                let Ok(name) = std::str::from_utf8(&key) else {
                    continue;
                };
                if let Some(sequence) = parse_record_name(&reducer_id, name) {
                    sequences.push(sequence);
                }
            }
            // sled orders keys bytewise, so "_10" sorts before "_2"
            sequences.sort_unstable();
            Ok(sequences)
        })
        .await
        .map_err(join_error)?
    }
}
