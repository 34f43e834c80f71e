use crate::inputs::{collect_inputs, inputs_for_mapper, Routing};
use crate::storage::Storage;
use anyhow::{anyhow, bail, Context, Result};
use snapshot_stream_core::{
    AggregateStore, CheckpointCoordinator, CheckpointStore, InMemoryWorkQueue, Mapper,
    MapperSummary, PipelineConfig, PipelineError, ReducerServer, ReducerSummary,
};
use snapshot_stream_word_count::{generate_csv_files, GeneratorOptions, WordCountReader};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type MapperHandle = JoinSet<(String, Result<MapperSummary, PipelineError>)>;

pub async fn run_reducer(
    config: &PipelineConfig,
    index: usize,
    exit_when_drained: bool,
    shutdown: CancellationToken,
) -> Result<()> {
    let settings = config.reducer_settings(index)?;
    let storage = Storage::open(config, &settings.reducer_id).await?;
    let server = ReducerServer::bind(settings, storage).await?;

    let summary = if exit_when_drained {
        server.run_until_drained(shutdown).await?
    } else {
        server.run(shutdown).await?
    };
    print_reducer_summary(config, index, &summary);
    Ok(())
}

pub async fn run_mapper(
    config: &PipelineConfig,
    index: usize,
    pattern: &str,
    shutdown: CancellationToken,
) -> Result<()> {
    let id = config.mapper_id(index)?.to_string();
    let inputs = inputs_for_mapper(&collect_inputs(pattern)?, index, config.mappers.len());
    info!(mapper = %id, units = inputs.len(), "work units assigned");

    let queue = InMemoryWorkQueue::from_locations(inputs).await?;
    let mapper = Mapper::new(
        id.clone(),
        queue,
        WordCountReader::new(),
        Routing::for_reducers(config.reducers.len()),
        config.mapper_options(),
    );

    let endpoints = config.reducer_endpoints();
    let summary = tokio::select! {
        result = mapper.run(&endpoints) => result?,
        _ = shutdown.cancelled() => bail!("{} interrupted", id),
    };
    println!(
        "{}: {} units, {} updates, {} markers",
        id, summary.units, summary.updates, summary.markers
    );
    Ok(())
}

struct LocalReducer {
    id: String,
    store: AggregateStore,
    coordinator: Arc<CheckpointCoordinator<Storage>>,
    handle: JoinHandle<Result<ReducerSummary, PipelineError>>,
}

/// Runs the whole configured pipeline in this process
pub async fn run_local(
    config: &PipelineConfig,
    pattern: &str,
    top: usize,
    drain_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<()> {
    let inputs = collect_inputs(pattern)?;
    if inputs.is_empty() {
        bail!("no input files match '{}'", pattern);
    }

    let reducer_stop = shutdown.child_token();
    let mut reducers = Vec::with_capacity(config.reducers.len());
    let mut endpoints = Vec::with_capacity(config.reducers.len());
    for index in 0..config.reducers.len() {
        let settings = config.reducer_settings(index)?;
        let storage = Storage::open(config, &settings.reducer_id).await?;
        let server = ReducerServer::bind(settings, storage).await?;
        endpoints.push(server.local_addr()?.to_string());
        reducers.push(LocalReducer {
            id: server.reducer_id().to_string(),
            store: server.store(),
            coordinator: server.coordinator(),
            handle: tokio::spawn(server.run_until_drained(reducer_stop.clone())),
        });
    }

    let mut mappers: MapperHandle = JoinSet::new();
    let mut marker_counts = Vec::with_capacity(config.mappers.len());
    for (index, id) in config.mappers.iter().enumerate() {
        let units = inputs_for_mapper(&inputs, index, config.mappers.len());
        marker_counts.push(units.len() as u64 / config.marker_interval);

        let mapper = Mapper::new(
            id.clone(),
            InMemoryWorkQueue::from_locations(units).await?,
            WordCountReader::new(),
            Routing::for_reducers(config.reducers.len()),
            config.mapper_options(),
        );
        let endpoints = endpoints.clone();
        mappers.spawn(async move {
            let result = mapper.run(&endpoints).await;
            (mapper.id().to_string(), result)
        });
    }
    if marker_counts.windows(2).any(|pair| pair[0] != pair[1]) {
        warn!(
            ?marker_counts,
            "mappers will send different numbers of markers; the last epoch cannot complete"
        );
    }

    wait_for_mappers(&mut mappers, &shutdown).await?;

    let deadline = tokio::time::Instant::now() + drain_timeout;
    let mut last_checkpoints = Vec::with_capacity(reducers.len());
    for reducer in &mut reducers {
        let drained = tokio::time::timeout_at(deadline, &mut reducer.handle).await;
        let summary = match drained {
            Ok(joined) => joined?,
            Err(_) => {
                let epoch = reducer.coordinator.current_epoch().await;
                let missing = reducer.coordinator.missing_markers().await;
                warn!(
                    reducer = %reducer.id,
                    epoch,
                    ?missing,
                    "reducer did not drain in time, stopping it"
                );
                reducer_stop.cancel();
                (&mut reducer.handle).await?
            }
        };
        last_checkpoints.push((reducer.id.clone(), summary?.last_checkpoint));
    }

    let mut merged = BTreeMap::new();
    for reducer in &reducers {
        for (key, count) in reducer.store.snapshot() {
            *merged.entry(key).or_insert(0) += count;
        }
    }
    print_top_words(&merged, top);
    for (id, sequence) in last_checkpoints {
        println!("{}: last checkpoint {}", id, sequence);
    }
    Ok(())
}

async fn wait_for_mappers(mappers: &mut MapperHandle, shutdown: &CancellationToken) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                mappers.shutdown().await;
                bail!("interrupted");
            }
            joined = mappers.join_next() => match joined {
                None => return Ok(()),
                Some(Ok((id, Ok(summary)))) => info!(
                    mapper = %id,
                    units = summary.units,
                    markers = summary.markers,
                    "mapper finished"
                ),
                Some(Ok((id, Err(e)))) => {
                    mappers.shutdown().await;
                    return Err(anyhow!(e).context(format!("{} failed", id)));
                }
                Some(Err(e)) => {
                    mappers.shutdown().await;
                    return Err(anyhow!(e).context("mapper task panicked"));
                }
            },
        }
    }
}

pub fn run_generate(dir: &Path, options: &GeneratorOptions) -> Result<()> {
    let paths = generate_csv_files(dir, options, &mut rand::rng())
        .with_context(|| format!("failed to generate inputs in {}", dir.display()))?;
    println!("Generated {} files in {}", paths.len(), dir.display());
    Ok(())
}

pub async fn run_checkpoints(
    config: &PipelineConfig,
    reducer: Option<&str>,
    sequence: Option<u64>,
) -> Result<()> {
    let reducer_ids: Vec<String> = match reducer {
        Some(id) => vec![id.to_string()],
        None => config.reducers.iter().map(|r| r.id.clone()).collect(),
    };

    for reducer_id in reducer_ids {
        let storage = Storage::open(config, &reducer_id).await?;

        if let Some(sequence) = sequence {
            let record = storage
                .load(&reducer_id, sequence)
                .await?
                .ok_or_else(|| anyhow!("no checkpoint {} for {}", sequence, reducer_id))?;
            println!("{}", serde_json::to_string_pretty(&record.counts)?);
            continue;
        }

        println!("=== {} ===", reducer_id);
        let sequences = storage.sequences(&reducer_id).await?;
        if sequences.is_empty() {
            println!("  No checkpoints");
        }
        for sequence in sequences {
            if let Some(record) = storage.load(&reducer_id, sequence).await? {
                println!(
                    "  #{:<6} keys: {:<6} total: {}",
                    record.sequence,
                    record.counts.len(),
                    record.total()
                );
            }
        }
    }
    Ok(())
}

fn print_reducer_summary(config: &PipelineConfig, index: usize, summary: &ReducerSummary) {
    let id = config
        .reducers
        .get(index)
        .map(|r| r.id.as_str())
        .unwrap_or("reducer");
    println!(
        "{}: {} channels closed, {} failed, {} updates, last checkpoint {}",
        id, summary.closed, summary.failed, summary.updates, summary.last_checkpoint
    );
}

/// Most frequent first, ties broken alphabetically
fn top_words(counts: &BTreeMap<String, i64>, top: usize) -> Vec<(&str, i64)> {
    let mut words: Vec<(&str, i64)> = counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    words.truncate(top);
    words
}

fn print_top_words(counts: &BTreeMap<String, i64>, top: usize) {
    println!("\n=== Top {} words ===", top);
    for (word, count) in top_words(counts, top) {
        println!("  {:<12} {}", word, count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_words_orders_by_count_then_word() {
        let counts = BTreeMap::from([
            ("fox".to_string(), 3),
            ("dog".to_string(), 5),
            ("cat".to_string(), 3),
            ("ant".to_string(), 1),
        ]);

        assert_eq!(top_words(&counts, 3), vec![("dog", 5), ("cat", 3), ("fox", 3)]);
    }
}
