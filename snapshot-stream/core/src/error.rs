use crate::checkpoint_store::StorageError;
use thiserror::Error;

/// Failure to turn bytes on a channel into a [`crate::ChannelMessage`] or back
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by mappers, channel handlers and the checkpoint coordinator
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("channel to {peer} closed")]
    ChannelClosed { peer: String },

    #[error("checkpoint {sequence} of {reducer_id} could not be persisted: {source}")]
    PersistenceFailure {
        reducer_id: String,
        sequence: u64,
        #[source]
        source: StorageError,
    },

    #[error("quorum for epoch {epoch} timed out, still missing markers from {missing:?}")]
    QuorumTimeout { epoch: u64, missing: Vec<String> },

    #[error("sender '{0}' is not a configured upstream mapper")]
    UnknownSender(String),

    #[error("channel bound to '{expected}' received a frame from '{actual}'")]
    SenderMismatch { expected: String, actual: String },

    #[error("'{0}' is already bound to another live channel")]
    DuplicateChannel(String),

    #[error("'{sender}' sent a second marker for epoch {epoch}")]
    DuplicateMarker { sender: String, epoch: u64 },

    #[error("invalid key '{0}'")]
    InvalidKey(String),

    #[error("could not connect to {endpoint} after {attempts} attempts: {source}")]
    Connect {
        endpoint: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("work queue error: {0}")]
    Queue(String),

    #[error("could not read work unit: {0}")]
    Input(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FrameError> for PipelineError {
    fn from(error: FrameError) -> Self {
        match error {
            FrameError::Malformed(reason) => PipelineError::MalformedFrame(reason),
            FrameError::Io(e) => PipelineError::Io(e),
        }
    }
}
