use crate::channel_codec::{ChannelCodec, DEFAULT_MAX_FRAME_LENGTH};
use crate::channel_message::ChannelMessage;
use crate::error::{FrameError, PipelineError};
use crate::partition_rule::PartitionRule;
use crate::unit_reader::{PartialAggregate, UnitReader};
use crate::work_queue::{WorkQueue, WorkUnit};
use futures::SinkExt;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MapperOptions {
    /// Work units processed between two markers
    pub marker_interval: u64,
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub max_frame_length: usize,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            marker_interval: 5,
            connect_attempts: 20,
            connect_backoff: Duration::from_millis(500),
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapperSummary {
    pub units: u64,
    pub updates: u64,
    pub markers: u64,
}

/// Outbound channel to one reducer
struct Downstream {
    endpoint: String,
    frames: FramedWrite<TcpStream, ChannelCodec>,
}

/// Pulls work units, partitions their counts across the reducers and
/// delimits epochs with a marker on every channel
pub struct Mapper<Q, R, P> {
    id: String,
    queue: Q,
    reader: Arc<R>,
    partition: P,
    options: MapperOptions,
}

impl<Q, R, P> Mapper<Q, R, P>
where
    Q: WorkQueue,
    R: UnitReader,
    P: PartitionRule,
{
    pub fn new(id: impl Into<String>, queue: Q, reader: R, partition: P, options: MapperOptions) -> Self {
        Self {
            id: id.into(),
            queue,
            reader: Arc::new(reader),
            partition,
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connects to `reducers` (index-aligned with the partition rule) and runs
    /// until the queue is exhausted. Every channel is closed on the way out.
    pub async fn run(&self, reducers: &[String]) -> Result<MapperSummary, PipelineError> {
        if reducers.len() != self.partition.partitions() {
            return Err(PipelineError::Config(format!(
                "{} routes to {} reducers but {} endpoints were given",
                self.id,
                self.partition.partitions(),
                reducers.len()
            )));
        }

        let mut channels = Vec::with_capacity(reducers.len());
        for endpoint in reducers {
            let stream = connect_with_retry(
                endpoint,
                self.options.connect_attempts,
                self.options.connect_backoff,
            )
            .await?;
            info!(mapper = %self.id, reducer = %endpoint, "connected");
            channels.push(Downstream {
                endpoint: endpoint.clone(),
                frames: FramedWrite::new(
                    stream,
                    ChannelCodec::with_max_frame_length(self.options.max_frame_length),
                ),
            });
        }

        let result = self.process(&mut channels).await;

        for mut channel in channels {
            if let Err(e) = channel.frames.close().await {
                warn!(mapper = %self.id, reducer = %channel.endpoint, error = %e, "close failed");
            }
        }

        match &result {
            Ok(summary) => info!(
                mapper = %self.id,
                units = summary.units,
                updates = summary.updates,
                markers = summary.markers,
                "work queue exhausted"
            ),
            Err(e) => warn!(mapper = %self.id, error = %e, "mapper stopped"),
        }
        result
    }

    async fn process(&self, channels: &mut [Downstream]) -> Result<MapperSummary, PipelineError> {
        let interval = self.options.marker_interval.max(1);
        let mut summary = MapperSummary::default();

        while let Some(unit) = self.queue.dequeue(&self.id).await? {
            info!(mapper = %self.id, unit = %unit.location, "processing work unit");
            let partial = self.read_unit(&unit).await?;

            for (key, count) in partial {
                if key.contains(',') {
                    return Err(PipelineError::InvalidKey(key));
                }
                let index = self.partition.partition(&key);
                let channel = channels.get_mut(index).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "key '{}' routed to missing reducer {}",
                        key, index
                    ))
                })?;
                debug!(mapper = %self.id, reducer = %channel.endpoint, %key, count, "update");
                let endpoint = &channel.endpoint;
                channel
                    .frames
                    .feed(ChannelMessage::update(key, count, self.id.as_str()))
                    .await
                    .map_err(|e| channel_error(endpoint, e))?;
                summary.updates += 1;
            }
            for channel in channels.iter_mut() {
                let endpoint = &channel.endpoint;
                channel
                    .frames
                    .flush()
                    .await
                    .map_err(|e| channel_error(endpoint, e))?;
            }

            self.queue.ack(&unit).await?;
            summary.units += 1;

            if summary.units % interval == 0 {
                for channel in channels.iter_mut() {
                    let endpoint = &channel.endpoint;
                    channel
                        .frames
                        .send(ChannelMessage::marker(self.id.as_str()))
                        .await
                        .map_err(|e| channel_error(endpoint, e))?;
                }
                summary.markers += 1;
                info!(mapper = %self.id, marker = summary.markers, "markers sent");
            }
        }

        Ok(summary)
    }

    async fn read_unit(&self, unit: &WorkUnit) -> Result<PartialAggregate, PipelineError> {
        let reader = self.reader.clone();
        let unit = unit.clone();
        tokio::task::spawn_blocking(move || reader.read(&unit))
            .await
            .map_err(|e| PipelineError::Input(format!("reader task failed: {}", e)))?
    }
}

fn channel_error(endpoint: &str, error: FrameError) -> PipelineError {
    match error {
        FrameError::Io(e)
            if matches!(
                e.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) =>
        {
            PipelineError::ChannelClosed {
                peer: endpoint.to_string(),
            }
        }
        other => other.into(),
    }
}

/// Connects to a reducer, retrying while it is still starting up
pub async fn connect_with_retry(
    endpoint: &str,
    attempts: u32,
    backoff: Duration,
) -> Result<TcpStream, PipelineError> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(endpoint).await {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(source) if attempt >= attempts => {
                return Err(PipelineError::Connect {
                    endpoint: endpoint.to_string(),
                    attempts,
                    source,
                })
            }
            Err(e) => {
                debug!(%endpoint, attempt, error = %e, "connect failed, retrying");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
