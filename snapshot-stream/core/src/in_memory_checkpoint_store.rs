// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::checkpoint_store::{CheckpointRecord, CheckpointStore, StorageError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

type Records = BTreeMap<(String, u64), CheckpointRecord>;

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    records: Arc<Mutex<Records>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, ordered by reducer then sequence
    pub fn records(&self) -> Vec<CheckpointRecord> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        records.values().cloned().collect()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        let mut records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let key = (record.reducer_id.clone(), record.sequence);
        if records.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                reducer_id: record.reducer_id.clone(),
                sequence: record.sequence,
            });
        }
        records.insert(key, record.clone());
        Ok(())
    }

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records.get(&(reducer_id.to_string(), sequence)).cloned())
    }

    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(records
            .keys()
            .filter(|(id, _)| id == reducer_id)
            .map(|(_, sequence)| *sequence)
            .collect())
    }
}
