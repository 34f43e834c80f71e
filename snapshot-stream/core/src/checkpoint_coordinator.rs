// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::aggregate_store::AggregateStore;
use crate::checkpoint_store::{CheckpointRecord, CheckpointStore, StorageError};
use crate::error::PipelineError;
use std::collections::BTreeSet;
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// How long a parked channel waits for the rest of the quorum; `None` waits forever
    pub quorum_timeout: Option<Duration>,
    /// Back-to-back commit attempts before the completing channel starts
    /// waiting `persist_backoff` between retries
    pub persist_attempts: u32,
    pub persist_backoff: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            quorum_timeout: None,
            persist_attempts: 3,
            persist_backoff: Duration::from_millis(100),
        }
    }
}

/// How a reported marker was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// This marker completed the quorum and its caller wrote the checkpoint
    Committed { epoch: u64 },
    /// The caller parked until another channel committed the epoch
    Released { epoch: u64 },
}

impl MarkerOutcome {
    pub fn epoch(&self) -> u64 {
        match self {
            MarkerOutcome::Committed { epoch } | MarkerOutcome::Released { epoch } => *epoch,
        }
    }
}

struct QuorumState {
    /// Sequence number the next checkpoint is written under
    sequence: u64,
    quorum: BTreeSet<String>,
    /// Snapshot of a completed quorum whose commit has not succeeded yet
    pending: Option<CheckpointRecord>,
}

/// Marker quorum and checkpoint commit for one reducer
///
/// Every upstream channel reports its marker here and then stays parked until
/// the epoch's checkpoint is durable. The channel whose marker completes the
/// quorum snapshots the store, persists it, advances the sequence and clears
/// the quorum while holding the state lock, which releases every parked
/// channel of that epoch at once.
pub struct CheckpointCoordinator<C: CheckpointStore> {
    reducer_id: String,
    upstream: BTreeSet<String>,
    store: AggregateStore,
    storage: C,
    options: CoordinatorOptions,
    state: Mutex<QuorumState>,
    committed: watch::Sender<u64>,
    /// Sender ids bound to a live channel
    bound: StdMutex<BTreeSet<String>>,
}

impl<C: CheckpointStore> CheckpointCoordinator<C> {
    pub fn new(
        reducer_id: impl Into<String>,
        upstream: impl IntoIterator<Item = String>,
        store: AggregateStore,
        storage: C,
        options: CoordinatorOptions,
    ) -> Self {
        let (committed, _) = watch::channel(0);
        Self {
            reducer_id: reducer_id.into(),
            upstream: upstream.into_iter().collect(),
            store,
            storage,
            options,
            state: Mutex::new(QuorumState {
                sequence: 1,
                quorum: BTreeSet::new(),
                pending: None,
            }),
            committed,
            bound: StdMutex::new(BTreeSet::new()),
        }
    }

    pub fn reducer_id(&self) -> &str {
        &self.reducer_id
    }

    pub fn upstream(&self) -> &BTreeSet<String> {
        &self.upstream
    }

    pub fn is_upstream(&self, sender_id: &str) -> bool {
        self.upstream.contains(sender_id)
    }

    pub fn store(&self) -> &AggregateStore {
        &self.store
    }

    pub fn storage(&self) -> &C {
        &self.storage
    }

    /// Sequence number of the last committed checkpoint, 0 before the first
    pub fn last_committed(&self) -> u64 {
        *self.committed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.committed.subscribe()
    }

    fn bound(&self) -> MutexGuard<'_, BTreeSet<String>> {
        self.bound.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Binds `sender_id` to a channel; only one live channel may speak for a sender
    pub fn claim_sender(&self, sender_id: &str) -> Result<(), PipelineError> {
        if !self.is_upstream(sender_id) {
            return Err(PipelineError::UnknownSender(sender_id.to_string()));
        }
        if !self.bound().insert(sender_id.to_string()) {
            return Err(PipelineError::DuplicateChannel(sender_id.to_string()));
        }
        Ok(())
    }

    pub fn release_sender(&self, sender_id: &str) {
        self.bound().remove(sender_id);
    }

    /// Epoch currently being accumulated
    pub async fn current_epoch(&self) -> u64 {
        self.state.lock().await.sequence
    }

    /// Upstream ids that have not delivered a marker for the current epoch
    pub async fn missing_markers(&self) -> Vec<String> {
        let state = self.state.lock().await;
        self.upstream
            .iter()
            .filter(|id| !state.quorum.contains(*id))
            .cloned()
            .collect()
    }

    /// Records `sender_id`'s marker and returns once its epoch is committed
    pub async fn report_marker(&self, sender_id: &str) -> Result<MarkerOutcome, PipelineError> {
        if !self.is_upstream(sender_id) {
            return Err(PipelineError::UnknownSender(sender_id.to_string()));
        }

        let mut state = self.state.lock().await;
        let epoch = state.sequence;
        if !state.quorum.insert(sender_id.to_string()) {
            return Err(PipelineError::DuplicateMarker {
                sender: sender_id.to_string(),
                epoch,
            });
        }
        info!(
            reducer = %self.reducer_id,
            sender = sender_id,
            epoch,
            received = state.quorum.len(),
            expected = self.upstream.len(),
            "marker received"
        );

        if state.quorum.len() == self.upstream.len() {
            state.pending = Some(CheckpointRecord::new(
                self.reducer_id.clone(),
                epoch,
                self.store.snapshot(),
            ));
            match self.commit_with_retry(&mut state).await {
                Ok(()) => return Ok(MarkerOutcome::Committed { epoch }),
                Err(e) => warn!(
                    reducer = %self.reducer_id,
                    epoch,
                    error = %e,
                    "checkpoint not durable yet, channel stays parked"
                ),
            }
            drop(state);
            self.commit_until_durable(epoch).await?;
            return Ok(MarkerOutcome::Committed { epoch });
        }

        let mut committed = self.committed.subscribe();
        drop(state);
        self.wait_for_commit(&mut committed, epoch).await?;
        Ok(MarkerOutcome::Released { epoch })
    }

    /// Re-attempts a commit left pending by a persistence failure
    ///
    /// Returns the committed epoch, or `None` when nothing was pending.
    pub async fn retry_commit(&self) -> Result<Option<u64>, PipelineError> {
        let mut state = self.state.lock().await;
        if state.pending.is_none() {
            return Ok(None);
        }
        let epoch = state.sequence;
        self.commit(&mut state).await?;
        Ok(Some(epoch))
    }

    /// Keeps retrying the pending commit of `epoch` until it is durable, or
    /// until the quorum timeout runs out
    async fn commit_until_durable(&self, epoch: u64) -> Result<(), PipelineError> {
        let deadline = self.options.quorum_timeout.map(|limit| Instant::now() + limit);
        loop {
            tokio::time::sleep(self.options.persist_backoff).await;
            // retry_commit from elsewhere may have won the race
            if self.last_committed() >= epoch {
                return Ok(());
            }
            match self.retry_commit().await {
                Ok(_) => return Ok(()),
                Err(e) if deadline.is_some_and(|d| Instant::now() >= d) => return Err(e),
                Err(e) => warn!(
                    reducer = %self.reducer_id,
                    epoch,
                    error = %e,
                    "checkpoint commit failed, retrying"
                ),
            }
        }
    }

    async fn wait_for_commit(
        &self,
        committed: &mut watch::Receiver<u64>,
        epoch: u64,
    ) -> Result<(), PipelineError> {
        let released = committed.wait_for(|last| *last >= epoch);
        let outcome = match self.options.quorum_timeout {
            Some(limit) => tokio::time::timeout(limit, released)
                .await
                .map(|result| result.map(|_| ())),
            None => Ok(released.await.map(|_| ())),
        };

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(PipelineError::ChannelClosed {
                peer: self.reducer_id.clone(),
            }),
            Err(_) => {
                let missing = self.missing_markers().await;
                warn!(
                    reducer = %self.reducer_id,
                    epoch,
                    ?missing,
                    "quorum timed out"
                );
                Err(PipelineError::QuorumTimeout { epoch, missing })
            }
        }
    }

    async fn commit_with_retry(&self, state: &mut QuorumState) -> Result<(), PipelineError> {
        let attempts = self.options.persist_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.commit(state).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < attempts => {
                    warn!(
                        reducer = %self.reducer_id,
                        attempt,
                        error = %e,
                        "checkpoint commit failed, retrying"
                    );
                    tokio::time::sleep(self.options.persist_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persists the pending record, then advances the sequence and clears the quorum.
    /// On failure nothing but the pending record is kept.
    async fn commit(&self, state: &mut QuorumState) -> Result<(), PipelineError> {
        let Some(record) = state.pending.as_ref() else {
            return Ok(());
        };

        if let Err(source) = self.storage.save(record).await {
            let stored = matches!(source, StorageError::AlreadyExists { .. })
                && self.already_stored(record).await;
            if !stored {
                return Err(PipelineError::PersistenceFailure {
                    reducer_id: self.reducer_id.clone(),
                    sequence: record.sequence,
                    source,
                });
            }
        }

        let epoch = record.sequence;
        info!(
            reducer = %self.reducer_id,
            epoch,
            keys = record.counts.len(),
            total = record.total(),
            "checkpoint committed"
        );
        state.pending = None;
        state.sequence += 1;
        state.quorum.clear();
        self.committed.send_replace(epoch);
        Ok(())
    }

    /// An earlier attempt may have written the record before reporting failure
    async fn already_stored(&self, record: &CheckpointRecord) -> bool {
        matches!(
            self.storage.load(&record.reducer_id, record.sequence).await,
            Ok(Some(stored)) if stored == *record
        )
    }
}
