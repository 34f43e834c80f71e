// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::checkpoint_store::{
    parse_record_name, record_name, CheckpointRecord, CheckpointStore, StorageError,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{
    fs::{self, File},
    io::{AsyncWriteExt, BufWriter},
    sync::Mutex,
};

const EXTENSION: &str = "json";

/// One JSON file per record: `{dir}/{reducerId}_{sequence}.json`
///
/// Records are written to a hidden temporary file and renamed into place,
/// so a reader never sees a half-written checkpoint.
#[derive(Clone)]
pub struct FlatFileCheckpointStore {
    dir: PathBuf,
    mutex: Arc<Mutex<()>>,
}

impl FlatFileCheckpointStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            mutex: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, reducer_id: &str, sequence: u64) -> PathBuf {
        self.dir
            .join(format!("{}.{}", record_name(reducer_id, sequence), EXTENSION))
    }

    fn temp_path_for(&self, record: &CheckpointRecord) -> PathBuf {
        self.dir.join(format!(".{}.{}.tmp", record.name(), EXTENSION))
    }
}

#[async_trait]
impl CheckpointStore for FlatFileCheckpointStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        let _lock = self.mutex.lock().await;
        let path = self.path_for(&record.reducer_id, record.sequence);
        if fs::try_exists(&path).await? {
            return Err(StorageError::AlreadyExists {
                reducer_id: record.reducer_id.clone(),
                sequence: record.sequence,
            });
        }

        let bytes = record.to_json()?;
        let temp_path = self.temp_path_for(record);
        let file = File::create(&temp_path).await?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        if let Err(e) = fs::rename(&temp_path, &path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        let path = self.path_for(reducer_id, sequence);
        match fs::read(&path).await {
            Ok(bytes) => CheckpointRecord::from_json(reducer_id, sequence, &bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError> {
        let mut entries = fs::read_dir(&self.dir).await?;
        let mut sequences = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(sequence) = parse_record_name(reducer_id, stem) {
                sequences.push(sequence);
            }
        }
        sequences.sort_unstable();
        Ok(sequences)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn record(sequence: u64, apple: i64) -> CheckpointRecord {
        let mut counts = BTreeMap::new();
        counts.insert("apple".to_string(), apple);
        CheckpointRecord::new("Reducer#1", sequence, counts)
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileCheckpointStore::new(dir.path()).await.unwrap();

        store.save(&record(1, 8)).await.unwrap();

        let on_disk = std::fs::read_to_string(dir.path().join("Reducer#1_1.json")).unwrap();
        assert_eq!(on_disk, r#"{"apple":8}"#);
        assert_eq!(
            store.load("Reducer#1", 1).await.unwrap(),
            Some(record(1, 8))
        );
        assert_eq!(store.load("Reducer#1", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_are_immutable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileCheckpointStore::new(dir.path()).await.unwrap();

        store.save(&record(1, 8)).await.unwrap();
        let err = store.save(&record(1, 99)).await.unwrap_err();

        assert!(matches!(err, StorageError::AlreadyExists { sequence: 1, .. }));
        assert_eq!(
            store.load("Reducer#1", 1).await.unwrap(),
            Some(record(1, 8))
        );
    }

    #[tokio::test]
    async fn test_sequences_ignore_other_reducers_and_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FlatFileCheckpointStore::new(dir.path()).await.unwrap();

        store.save(&record(2, 1)).await.unwrap();
        store.save(&record(1, 1)).await.unwrap();
        store
            .save(&CheckpointRecord::new("Reducer#2", 1, BTreeMap::new()))
            .await
            .unwrap();
        std::fs::write(dir.path().join(".Reducer#1_3.json.tmp"), b"{").unwrap();

        assert_eq!(store.sequences("Reducer#1").await.unwrap(), vec![1, 2]);
        assert_eq!(store.sequences("Reducer#2").await.unwrap(), vec![1]);
    }
}
