use crate::error::PipelineError;
use crate::work_queue::{WorkQueue, WorkUnit};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct QueueState {
    next_id: u64,
    ready: VecDeque<WorkUnit>,
    pending: BTreeMap<u64, (WorkUnit, String)>,
    acked: u64,
}

/// Shared queue for mappers running in the same process
#[derive(Clone, Default)]
pub struct InMemoryWorkQueue {
    state: Arc<Mutex<QueueState>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_locations(
        locations: impl IntoIterator<Item = String>,
    ) -> Result<Self, PipelineError> {
        let queue = Self::new();
        for location in locations {
            queue.enqueue(location).await?;
        }
        Ok(queue)
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Units not handed out yet
    pub fn ready(&self) -> usize {
        self.lock().ready.len()
    }

    /// Delivered but unacknowledged units with the consumer that holds them
    pub fn pending(&self) -> Vec<(WorkUnit, String)> {
        self.lock().pending.values().cloned().collect()
    }

    pub fn acked(&self) -> u64 {
        self.lock().acked
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, location: String) -> Result<WorkUnit, PipelineError> {
        let mut state = self.lock();
        state.next_id += 1;
        let unit = WorkUnit {
            id: state.next_id,
            location,
        };
        state.ready.push_back(unit.clone());
        Ok(unit)
    }

    async fn dequeue(&self, consumer: &str) -> Result<Option<WorkUnit>, PipelineError> {
        let mut state = self.lock();
        let Some(unit) = state.ready.pop_front() else {
            return Ok(None);
        };
        state
            .pending
            .insert(unit.id, (unit.clone(), consumer.to_string()));
        Ok(Some(unit))
    }

    async fn ack(&self, unit: &WorkUnit) -> Result<(), PipelineError> {
        let mut state = self.lock();
        if state.pending.remove(&unit.id).is_none() {
            return Err(PipelineError::Queue(format!(
                "unit {} ({}) is not pending",
                unit.id, unit.location
            )));
        }
        state.acked += 1;
        Ok(())
    }
}
