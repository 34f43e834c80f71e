use crate::channel_codec::ChannelCodec;
use crate::channel_message::ChannelMessage;
use crate::checkpoint_coordinator::CheckpointCoordinator;
use crate::checkpoint_store::CheckpointStore;
use crate::error::PipelineError;
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSummary {
    /// Mapper the channel is bound to, once its first frame arrived
    pub sender_id: Option<String>,
    pub updates: u64,
    pub markers: u64,
}

/// Serves one inbound mapper channel for its whole lifetime
///
/// Updates go straight into the reducer's store. A marker hands control to the
/// coordinator and no further frame is read from this channel until the
/// marker's epoch is committed.
pub struct ChannelHandler<C: CheckpointStore> {
    coordinator: Arc<CheckpointCoordinator<C>>,
    peer: String,
    max_frame_length: usize,
}

impl<C: CheckpointStore> ChannelHandler<C> {
    pub fn new(
        coordinator: Arc<CheckpointCoordinator<C>>,
        peer: impl Into<String>,
        max_frame_length: usize,
    ) -> Self {
        Self {
            coordinator,
            peer: peer.into(),
            max_frame_length,
        }
    }

    /// Reads frames until the peer closes the channel or a frame is rejected
    pub async fn run<T>(&self, channel: T) -> Result<ChannelSummary, PipelineError>
    where
        T: AsyncRead + Unpin + Send,
    {
        let mut frames =
            FramedRead::new(channel, ChannelCodec::with_max_frame_length(self.max_frame_length));
        let mut summary = ChannelSummary::default();
        let mut claim: Option<SenderClaim<C>> = None;

        while let Some(frame) = frames.next().await {
            let message = frame?;
            if claim.is_none() {
                claim = Some(self.bind_sender(&mut summary, message.sender_id())?);
            } else {
                check_sender(&summary, message.sender_id())?;
            }

            match message {
                ChannelMessage::Update { key, value, .. } => {
                    debug!(reducer = %self.coordinator.reducer_id(), peer = %self.peer, %key, value, "update");
                    self.coordinator.store().apply(&key, value);
                    summary.updates += 1;
                }
                ChannelMessage::Marker { sender_id } => {
                    let outcome = self.coordinator.report_marker(&sender_id).await?;
                    summary.markers += 1;
                    debug!(
                        reducer = %self.coordinator.reducer_id(),
                        sender = %sender_id,
                        ?outcome,
                        "channel resumed"
                    );
                }
            }
        }

        info!(
            reducer = %self.coordinator.reducer_id(),
            peer = %self.peer,
            sender = ?summary.sender_id,
            updates = summary.updates,
            markers = summary.markers,
            "channel closed"
        );
        Ok(summary)
    }

    fn bind_sender(
        &self,
        summary: &mut ChannelSummary,
        sender_id: &str,
    ) -> Result<SenderClaim<C>, PipelineError> {
        self.coordinator.claim_sender(sender_id)?;
        let claim = SenderClaim {
            coordinator: self.coordinator.clone(),
            sender_id: sender_id.to_string(),
        };

        info!(
            reducer = %self.coordinator.reducer_id(),
            peer = %self.peer,
            sender = sender_id,
            "channel bound"
        );
        summary.sender_id = Some(sender_id.to_string());
        Ok(claim)
    }
}

fn check_sender(summary: &ChannelSummary, sender_id: &str) -> Result<(), PipelineError> {
    match &summary.sender_id {
        Some(bound) if bound != sender_id => Err(PipelineError::SenderMismatch {
            expected: bound.clone(),
            actual: sender_id.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Frees the sender id for a new channel once this one is gone, however it ended
struct SenderClaim<C: CheckpointStore> {
    coordinator: Arc<CheckpointCoordinator<C>>,
    sender_id: String,
}

impl<C: CheckpointStore> Drop for SenderClaim<C> {
    fn drop(&mut self) {
        self.coordinator.release_sender(&self.sender_id);
    }
}
