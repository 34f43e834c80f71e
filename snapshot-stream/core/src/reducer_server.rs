use crate::aggregate_store::AggregateStore;
use crate::channel_codec::DEFAULT_MAX_FRAME_LENGTH;
use crate::channel_handler::{ChannelHandler, ChannelSummary};
use crate::checkpoint_coordinator::{CheckpointCoordinator, CoordinatorOptions};
use crate::checkpoint_store::CheckpointStore;
use crate::error::PipelineError;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ReducerSettings {
    pub reducer_id: String,
    pub listen: String,
    /// Every mapper that must deliver a marker before a checkpoint is taken
    pub upstream: Vec<String>,
    pub coordinator: CoordinatorOptions,
    pub max_frame_length: usize,
}

impl ReducerSettings {
    pub fn new(reducer_id: impl Into<String>, listen: impl Into<String>, upstream: Vec<String>) -> Self {
        Self {
            reducer_id: reducer_id.into(),
            listen: listen.into(),
            upstream,
            coordinator: CoordinatorOptions::default(),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReducerSummary {
    pub accepted: usize,
    pub closed: usize,
    pub failed: usize,
    pub updates: u64,
    pub markers: u64,
    /// Sequence of the last committed checkpoint, 0 when none was taken
    pub last_checkpoint: u64,
}

type HandlerResult = (String, Result<ChannelSummary, PipelineError>);

/// Accepts one persistent channel per upstream mapper and owns the reducer's
/// store and checkpoint coordinator
pub struct ReducerServer<C: CheckpointStore> {
    listener: TcpListener,
    coordinator: Arc<CheckpointCoordinator<C>>,
    max_frame_length: usize,
}

impl<C: CheckpointStore> ReducerServer<C> {
    pub async fn bind(settings: ReducerSettings, storage: C) -> Result<Self, PipelineError> {
        let listener = TcpListener::bind(&settings.listen).await?;
        let coordinator = CheckpointCoordinator::new(
            settings.reducer_id,
            settings.upstream,
            AggregateStore::new(),
            storage,
            settings.coordinator,
        );
        Ok(Self {
            listener,
            coordinator: Arc::new(coordinator),
            max_frame_length: settings.max_frame_length,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, PipelineError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn reducer_id(&self) -> &str {
        self.coordinator.reducer_id()
    }

    pub fn store(&self) -> AggregateStore {
        self.coordinator.store().clone()
    }

    pub fn coordinator(&self) -> Arc<CheckpointCoordinator<C>> {
        self.coordinator.clone()
    }

    /// Serves until `shutdown` fires; channels still open are aborted
    pub async fn run(self, shutdown: CancellationToken) -> Result<ReducerSummary, PipelineError> {
        self.serve(shutdown, false).await
    }

    /// Serves until every upstream mapper has closed its channel cleanly
    pub async fn run_to_completion(self) -> Result<ReducerSummary, PipelineError> {
        self.run_until_drained(CancellationToken::new()).await
    }

    /// Like `run_to_completion`, but `shutdown` can stop a reducer whose
    /// upstream will never drain
    pub async fn run_until_drained(
        self,
        shutdown: CancellationToken,
    ) -> Result<ReducerSummary, PipelineError> {
        self.serve(shutdown, true).await
    }

    async fn serve(
        self,
        shutdown: CancellationToken,
        stop_when_drained: bool,
    ) -> Result<ReducerSummary, PipelineError> {
        let reducer_id = self.coordinator.reducer_id().to_string();
        let expected = self.coordinator.upstream().len();
        info!(reducer = %reducer_id, addr = %self.local_addr()?, expected, "listening");

        let mut handlers: JoinSet<HandlerResult> = JoinSet::new();
        let mut summary = ReducerSummary::default();

        loop {
            // Failed channels do not count towards draining
            if stop_when_drained && summary.closed >= expected && handlers.is_empty() {
                break;
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(reducer = %reducer_id, "shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        summary.accepted += 1;
                        info!(reducer = %reducer_id, peer = %addr, "accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(reducer = %reducer_id, peer = %addr, error = %e, "set_nodelay failed");
                        }
                        let peer = addr.to_string();
                        let handler = ChannelHandler::new(
                            self.coordinator.clone(),
                            peer.clone(),
                            self.max_frame_length,
                        );
                        handlers.spawn(async move {
                            let result = handler.run(stream).await;
                            (peer, result)
                        });
                    }
                    Err(e) => warn!(reducer = %reducer_id, error = %e, "accept failed"),
                },
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    record_handler(&reducer_id, joined, &mut summary);
                }
            }
        }

        handlers.shutdown().await;
        summary.last_checkpoint = self.coordinator.last_committed();
        info!(
            reducer = %reducer_id,
            accepted = summary.accepted,
            failed = summary.failed,
            last_checkpoint = summary.last_checkpoint,
            "reducer stopped"
        );
        Ok(summary)
    }
}

fn record_handler(
    reducer_id: &str,
    joined: Result<HandlerResult, JoinError>,
    summary: &mut ReducerSummary,
) {
    match joined {
        Ok((_, Ok(channel))) => {
            summary.closed += 1;
            summary.updates += channel.updates;
            summary.markers += channel.markers;
        }
        Ok((peer, Err(e))) => {
            summary.failed += 1;
            warn!(reducer = %reducer_id, %peer, error = %e, "channel terminated");
        }
        Err(e) => {
            summary.failed += 1;
            error!(reducer = %reducer_id, error = %e, "channel handler panicked");
        }
    }
}
