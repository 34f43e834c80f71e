// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use async_trait::async_trait;
use snapshot_stream_core::{
    AggregateStore, CheckpointCoordinator, CheckpointRecord, CheckpointStore, CoordinatorOptions,
    InMemoryCheckpointStore, MarkerOutcome, PipelineError, StorageError,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fails the first `failures` saves, then delegates
#[derive(Clone)]
struct FlakyStore {
    inner: InMemoryCheckpointStore,
    failures: Arc<AtomicU32>,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryCheckpointStore::new(),
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }

    /// Fails every save until [`FlakyStore::heal`] is called
    fn broken() -> Self {
        Self::new(u32::MAX)
    }

    fn heal(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl CheckpointStore for FlakyStore {
    async fn save(&self, record: &CheckpointRecord) -> Result<(), StorageError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(StorageError::Backend("disk full".to_string()));
        }
        self.inner.save(record).await
    }

    async fn load(
        &self,
        reducer_id: &str,
        sequence: u64,
    ) -> Result<Option<CheckpointRecord>, StorageError> {
        self.inner.load(reducer_id, sequence).await
    }

    async fn sequences(&self, reducer_id: &str) -> Result<Vec<u64>, StorageError> {
        self.inner.sequences(reducer_id).await
    }
}

fn upstream() -> Vec<String> {
    vec!["Mapper#1".to_string(), "Mapper#2".to_string()]
}

fn coordinator<C: CheckpointStore>(
    storage: C,
    options: CoordinatorOptions,
) -> Arc<CheckpointCoordinator<C>> {
    Arc::new(CheckpointCoordinator::new(
        "Reducer#1",
        upstream(),
        AggregateStore::new(),
        storage,
        options,
    ))
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ============================================================
// Quorum and commit
// ============================================================

#[tokio::test]
async fn test_liveness_quorum_commits_exactly_once() {
    let storage = InMemoryCheckpointStore::new();
    let coordinator = coordinator(storage.clone(), CoordinatorOptions::default());
    coordinator.store().apply("apple", 3);

    let first = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
    };
    settle().await;
    let second = coordinator.report_marker("Mapper#2").await.unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(second, MarkerOutcome::Committed { epoch: 1 });
    assert_eq!(first, MarkerOutcome::Released { epoch: 1 });

    let records = storage.records();
    assert_eq!(records.len(), 1, "one record per completed quorum");
    assert_eq!(records[0].sequence, 1);
    assert_eq!(records[0].counts.get("apple"), Some(&3));
    assert_eq!(coordinator.last_committed(), 1);
    assert_eq!(coordinator.current_epoch().await, 2);
    assert_eq!(coordinator.missing_markers().await, upstream());
}

#[tokio::test]
async fn test_safety_first_marker_parks_until_quorum() {
    let coordinator = coordinator(InMemoryCheckpointStore::new(), CoordinatorOptions::default());

    let parked = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#2").await })
    };
    settle().await;

    assert!(!parked.is_finished(), "must wait for Mapper#1's marker");
    assert_eq!(coordinator.missing_markers().await, vec!["Mapper#1"]);
    assert_eq!(coordinator.last_committed(), 0);

    coordinator.report_marker("Mapper#1").await.unwrap();
    assert_eq!(
        parked.await.unwrap().unwrap(),
        MarkerOutcome::Released { epoch: 1 }
    );
}

#[tokio::test]
async fn test_safety_sequence_numbers_increase_by_one() {
    let storage = InMemoryCheckpointStore::new();
    let coordinator = coordinator(storage.clone(), CoordinatorOptions::default());

    for epoch in 1..=3u64 {
        coordinator.store().apply("the", 1);
        let parked = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
        };
        let outcome = coordinator.report_marker("Mapper#2").await;
        // Either side may have completed the quorum
        let outcomes = [outcome.unwrap(), parked.await.unwrap().unwrap()];
        assert!(outcomes.iter().all(|o| o.epoch() == epoch));
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, MarkerOutcome::Committed { .. }))
                .count(),
            1
        );
    }

    assert_eq!(storage.sequences("Reducer#1").await.unwrap(), vec![1, 2, 3]);
    // Full snapshots, not deltas
    let totals: Vec<i64> = storage.records().iter().map(|r| r.total()).collect();
    assert_eq!(totals, vec![1, 2, 3]);
}

// ============================================================
// Rejected markers
// ============================================================

#[tokio::test]
async fn test_safety_unknown_sender_is_rejected() {
    let coordinator = coordinator(InMemoryCheckpointStore::new(), CoordinatorOptions::default());

    let err = coordinator.report_marker("Mapper#9").await.unwrap_err();

    assert!(matches!(err, PipelineError::UnknownSender(id) if id == "Mapper#9"));
    assert_eq!(coordinator.missing_markers().await.len(), 2);
}

#[tokio::test]
async fn test_safety_duplicate_marker_in_same_epoch_is_rejected() {
    let coordinator = coordinator(InMemoryCheckpointStore::new(), CoordinatorOptions::default());

    let _parked = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
    };
    settle().await;

    let err = coordinator.report_marker("Mapper#1").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DuplicateMarker { epoch: 1, .. }
    ));
}

#[tokio::test]
async fn test_safety_sender_binds_to_one_live_channel() {
    let coordinator = coordinator(InMemoryCheckpointStore::new(), CoordinatorOptions::default());

    coordinator.claim_sender("Mapper#1").unwrap();
    let err = coordinator.claim_sender("Mapper#1").unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateChannel(id) if id == "Mapper#1"));
    coordinator.claim_sender("Mapper#2").unwrap();

    coordinator.release_sender("Mapper#1");
    coordinator.claim_sender("Mapper#1").unwrap();

    let err = coordinator.claim_sender("Mapper#9").unwrap_err();
    assert!(matches!(err, PipelineError::UnknownSender(_)));
}

// ============================================================
// Persistence failures
// ============================================================

#[tokio::test]
async fn test_safety_completing_channel_stays_parked_until_durable() {
    let storage = FlakyStore::broken();
    let options = CoordinatorOptions {
        persist_attempts: 1,
        persist_backoff: Duration::from_millis(5),
        ..CoordinatorOptions::default()
    };
    let coordinator = coordinator(storage.clone(), options);
    coordinator.store().apply("apple", 8);

    let parked = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
    };
    settle().await;
    let completing = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#2").await })
    };
    settle().await;

    assert!(!completing.is_finished(), "completing channel must not resume");
    assert!(!parked.is_finished(), "parked channel waits for the commit");
    assert_eq!(coordinator.current_epoch().await, 1, "epoch must not advance");
    assert!(
        coordinator.missing_markers().await.is_empty(),
        "quorum must not be cleared"
    );
    assert_eq!(coordinator.last_committed(), 0);

    // Updates arriving meanwhile belong to the next epoch
    coordinator.store().apply("apple", 100);
    storage.heal();

    assert_eq!(
        completing.await.unwrap().unwrap(),
        MarkerOutcome::Committed { epoch: 1 }
    );
    assert_eq!(
        parked.await.unwrap().unwrap(),
        MarkerOutcome::Released { epoch: 1 }
    );
    let stored = storage.load("Reducer#1", 1).await.unwrap().unwrap();
    assert_eq!(stored.counts.get("apple"), Some(&8));
    assert_eq!(coordinator.current_epoch().await, 2);
    assert_eq!(coordinator.retry_commit().await.unwrap(), None);
}

#[tokio::test]
async fn test_safety_persistence_failure_surfaces_after_quorum_timeout() {
    let storage = FlakyStore::broken();
    let options = CoordinatorOptions {
        quorum_timeout: Some(Duration::from_millis(100)),
        persist_attempts: 1,
        persist_backoff: Duration::from_millis(5),
    };
    let coordinator = coordinator(storage.clone(), options);
    coordinator.store().apply("apple", 8);

    let parked = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let err = coordinator.report_marker("Mapper#2").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::PersistenceFailure { sequence: 1, .. }
    ));
    match parked.await.unwrap() {
        Err(PipelineError::QuorumTimeout { epoch: 1, missing }) => assert!(missing.is_empty()),
        other => panic!("Expected QuorumTimeout, got {other:?}"),
    }
    assert_eq!(coordinator.current_epoch().await, 1);
    assert_eq!(coordinator.last_committed(), 0);

    storage.heal();
    assert_eq!(coordinator.retry_commit().await.unwrap(), Some(1));
    let stored = storage.load("Reducer#1", 1).await.unwrap().unwrap();
    assert_eq!(stored.counts.get("apple"), Some(&8));
    assert_eq!(coordinator.current_epoch().await, 2);
}

#[tokio::test]
async fn test_liveness_commit_is_retried_within_attempts() {
    let storage = FlakyStore::new(2);
    let options = CoordinatorOptions {
        persist_attempts: 3,
        persist_backoff: Duration::from_millis(1),
        ..CoordinatorOptions::default()
    };
    let coordinator = coordinator(storage.clone(), options);

    let parked = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.report_marker("Mapper#1").await })
    };
    settle().await;

    assert_eq!(
        coordinator.report_marker("Mapper#2").await.unwrap(),
        MarkerOutcome::Committed { epoch: 1 }
    );
    parked.await.unwrap().unwrap();
    assert_eq!(storage.sequences("Reducer#1").await.unwrap(), vec![1]);
}

// ============================================================
// Quorum timeout
// ============================================================

#[tokio::test]
async fn test_safety_quorum_timeout_reports_missing_senders() {
    let options = CoordinatorOptions {
        quorum_timeout: Some(Duration::from_millis(50)),
        ..CoordinatorOptions::default()
    };
    let coordinator = coordinator(InMemoryCheckpointStore::new(), options);

    let err = coordinator.report_marker("Mapper#1").await.unwrap_err();

    match err {
        PipelineError::QuorumTimeout { epoch, missing } => {
            assert_eq!(epoch, 1);
            assert_eq!(missing, vec!["Mapper#2"]);
        }
        other => panic!("Expected QuorumTimeout, got {other:?}"),
    }
    assert_eq!(coordinator.last_committed(), 0);
}
