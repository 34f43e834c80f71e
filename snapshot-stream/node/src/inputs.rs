use anyhow::{Context, Result};
use glob::glob;
use snapshot_stream_core::{FirstLetterPartition, HashPartition, PartitionRule};
use tracing::warn;

/// Sorted paths matching `pattern`
pub fn collect_inputs(pattern: &str) -> Result<Vec<String>> {
    let entries = glob(pattern).context(format!("Invalid glob pattern: {pattern}"))?;

    let mut inputs = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => inputs.push(path.to_string_lossy().into_owned()),
            Err(e) => warn!(error = %e, "error matching input pattern"),
        }
    }
    inputs.sort();
    Ok(inputs)
}

/// Inputs owned by mapper `index` of `mappers`: every Nth one, so the mappers
/// together cover each input exactly once
pub fn inputs_for_mapper(inputs: &[String], index: usize, mappers: usize) -> Vec<String> {
    inputs
        .iter()
        .skip(index)
        .step_by(mappers.max(1))
        .cloned()
        .collect()
}

/// Key routing for a pipeline with `reducers` reducers: the first-letter
/// split for two, hashing otherwise
#[derive(Debug, Clone, Copy)]
pub enum Routing {
    FirstLetter(FirstLetterPartition),
    Hash(HashPartition),
}

impl Routing {
    pub fn for_reducers(reducers: usize) -> Self {
        if reducers == 2 {
            Routing::FirstLetter(FirstLetterPartition::default())
        } else {
            Routing::Hash(HashPartition::new(reducers))
        }
    }
}

impl PartitionRule for Routing {
    fn partition(&self, key: &str) -> usize {
        match self {
            Routing::FirstLetter(rule) => rule.partition(key),
            Routing::Hash(rule) => rule.partition(key),
        }
    }

    fn partitions(&self) -> usize {
        match self {
            Routing::FirstLetter(rule) => rule.partitions(),
            Routing::Hash(rule) => rule.partitions(),
        }
    }
}
