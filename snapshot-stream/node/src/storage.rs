// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use async_trait::async_trait;
use snapshot_stream_core::{
    CheckpointBackend, CheckpointRecord, CheckpointStore, FlatFileCheckpointStore, PipelineConfig,
    StorageError,
};
use snapshot_stream_storage_sled::SledCheckpointStore;

/// Checkpoint backend selected by the configuration
#[derive(Clone)]
pub enum Storage {
    FlatFile(FlatFileCheckpointStore),
    Sled(SledCheckpointStore),
}

impl Storage {
    /// Sled databases are per reducer so reducers in separate processes never
    /// contend for the same database lock
    pub async fn open(config: &PipelineConfig, reducer_id: &str) -> Result<Self, StorageError> {
        match config.checkpoint_backend {
            CheckpointBackend::FlatFile => Ok(Storage::FlatFile(
                FlatFileCheckpointStore::new(config.checkpoint_dir.clone()).await?,
            )),
            CheckpointBackend::Sled => {
                let path = config.checkpoint_dir.join(format!("{}.sled", reducer_id));
                Ok(Storage::Sled(SledCheckpointStore::open(path)?))
            }
        }
    }
}

#[async_trait]
impl CheckpointStore for Storage {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        match self {
            Storage::FlatFile(store) => store.save(record).await,
            Storage::Sled(store) => store.save(record).await,
        }
    }

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        match self {
            Storage::FlatFile(store) => store.load(reducer_id, sequence).await,
            Storage::Sled(store) => store.load(reducer_id, sequence).await,
        }
    }

    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError> {
        match self {
            Storage::FlatFile(store) => store.sequences(reducer_id).await,
            Storage::Sled(store) => store.sequences(reducer_id).await,
        }
    }
}
