//! Streaming word count with marker-based consistent checkpoints.
//!
//! Mappers push partitioned counts to reducers over ordered TCP channels and
//! periodically send a marker on every channel. A reducer checkpoints its
//! store once every upstream mapper's marker has arrived, parking each channel
//! after its marker so the snapshot is a consistent cut.

mod error;
pub use error::{FrameError, PipelineError};

mod channel_message;
pub use channel_message::{ChannelMessage, MARKER_KEY, MARKER_VALUE};

pub mod channel_codec;
pub use channel_codec::ChannelCodec;

mod partition_rule;
pub use partition_rule::{FirstLetterPartition, HashPartition, PartitionRule};

mod aggregate_store;
pub use aggregate_store::AggregateStore;

pub mod checkpoint_store;
pub use checkpoint_store::{CheckpointRecord, CheckpointStore, StorageError};

mod in_memory_checkpoint_store;
pub use in_memory_checkpoint_store::InMemoryCheckpointStore;

mod flat_file_checkpoint_store;
pub use flat_file_checkpoint_store::FlatFileCheckpointStore;

mod checkpoint_coordinator;
pub use checkpoint_coordinator::{CheckpointCoordinator, CoordinatorOptions, MarkerOutcome};

mod work_queue;
pub use work_queue::{WorkQueue, WorkUnit};

mod in_memory_work_queue;
pub use in_memory_work_queue::InMemoryWorkQueue;

mod unit_reader;
pub use unit_reader::{PartialAggregate, UnitReader};

pub mod mapper;
pub use mapper::{Mapper, MapperOptions, MapperSummary};

mod channel_handler;
pub use channel_handler::{ChannelHandler, ChannelSummary};

mod reducer_server;
pub use reducer_server::{ReducerServer, ReducerSettings, ReducerSummary};

mod config;
pub use config::{CheckpointBackend, PipelineConfig, ReducerEndpoint};
