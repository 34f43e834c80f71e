use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reference to one chunk of input, e.g. a file path, handed out by a [`WorkQueue`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: u64,
    pub location: String,
}

/// Consumer-group style queue feeding the mappers
///
/// Every unit is delivered to one consumer and stays pending until acked.
/// Units are never redelivered by the pipeline itself.
#[async_trait]
pub trait WorkQueue: Send + Sync + 'static {
    async fn enqueue(&self, location: String) -> Result<WorkUnit, PipelineError>;

    /// Next unit for `consumer`, or `None` once the queue is exhausted
    async fn dequeue(&self, consumer: &str) -> Result<Option<WorkUnit>, PipelineError>;

    async fn ack(&self, unit: &WorkUnit) -> Result<(), PipelineError>;
}
