use crate::channel_codec::DEFAULT_MAX_FRAME_LENGTH;
use crate::checkpoint_coordinator::CoordinatorOptions;
use crate::error::PipelineError;
use crate::mapper::MapperOptions;
use crate::reducer_server::ReducerSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointBackend {
    FlatFile,
    Sled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReducerEndpoint {
    pub id: String,
    pub listen: String,
}

/// Topology and tuning shared by every mapper and reducer of a pipeline
///
/// The position of a reducer in `reducers` is its partition index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reducers: Vec<ReducerEndpoint>,
    pub mappers: Vec<String>,
    pub marker_interval: u64,
    pub checkpoint_backend: CheckpointBackend,
    pub checkpoint_dir: PathBuf,
    pub quorum_timeout_ms: Option<u64>,
    pub persist_attempts: u32,
    pub persist_backoff_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub max_frame_length: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reducers: vec![
                ReducerEndpoint {
                    id: "Reducer#1".to_string(),
                    listen: "127.0.0.1:5023".to_string(),
                },
                ReducerEndpoint {
                    id: "Reducer#2".to_string(),
                    listen: "127.0.0.1:5024".to_string(),
                },
            ],
            mappers: vec!["Mapper#1".to_string(), "Mapper#2".to_string()],
            marker_interval: 5,
            checkpoint_backend: CheckpointBackend::FlatFile,
            checkpoint_dir: PathBuf::from("checkpoints"),
            quorum_timeout_ms: None,
            persist_attempts: 3,
            persist_backoff_ms: 100,
            connect_attempts: 20,
            connect_backoff_ms: 500,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig =
            serde_json::from_str(contents).map_err(|e| PipelineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.reducers.is_empty() {
            return Err(PipelineError::Config("no reducers configured".to_string()));
        }
        if self.mappers.is_empty() {
            return Err(PipelineError::Config("no mappers configured".to_string()));
        }
        if self.marker_interval == 0 {
            return Err(PipelineError::Config(
                "marker_interval must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let ids = self
            .reducers
            .iter()
            .map(|r| r.id.as_str())
            .chain(self.mappers.iter().map(String::as_str));
        for id in ids {
            if id.is_empty() || id.contains(',') {
                return Err(PipelineError::Config(format!("invalid id '{}'", id)));
            }
            if !seen.insert(id) {
                return Err(PipelineError::Config(format!("duplicate id '{}'", id)));
            }
        }
        Ok(())
    }

    pub fn reducer_endpoints(&self) -> Vec<String> {
        self.reducers.iter().map(|r| r.listen.clone()).collect()
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            quorum_timeout: self.quorum_timeout_ms.map(Duration::from_millis),
            persist_attempts: self.persist_attempts,
            persist_backoff: Duration::from_millis(self.persist_backoff_ms),
        }
    }

    pub fn mapper_options(&self) -> MapperOptions {
        MapperOptions {
            marker_interval: self.marker_interval,
            connect_attempts: self.connect_attempts,
            connect_backoff: Duration::from_millis(self.connect_backoff_ms),
            max_frame_length: self.max_frame_length,
        }
    }

    pub fn reducer_settings(&self, index: usize) -> Result<ReducerSettings, PipelineError> {
        let endpoint = self.reducers.get(index).ok_or_else(|| {
            PipelineError::Config(format!(
                "reducer index {} out of range (0..{})",
                index,
                self.reducers.len()
            ))
        })?;
        Ok(ReducerSettings {
            reducer_id: endpoint.id.clone(),
            listen: endpoint.listen.clone(),
            upstream: self.mappers.clone(),
            coordinator: self.coordinator_options(),
            max_frame_length: self.max_frame_length,
        })
    }

    pub fn mapper_id(&self, index: usize) -> Result<&str, PipelineError> {
        self.mappers.get(index).map(String::as_str).ok_or_else(|| {
            PipelineError::Config(format!(
                "mapper index {} out of range (0..{})",
                index,
                self.mappers.len()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_describe_two_by_two_pipeline() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.reducer_endpoints(),
            vec!["127.0.0.1:5023", "127.0.0.1:5024"]
        );
        assert_eq!(config.mappers, vec!["Mapper#1", "Mapper#2"]);
        assert_eq!(config.coordinator_options().quorum_timeout, None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = PipelineConfig::from_json(
            r#"{ "marker_interval": 2, "checkpoint_backend": "sled", "quorum_timeout_ms": 1500 }"#,
        )
        .unwrap();
        assert_eq!(config.marker_interval, 2);
        assert_eq!(config.checkpoint_backend, CheckpointBackend::Sled);
        assert_eq!(
            config.coordinator_options().quorum_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.reducers.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_topologies() {
        let mut config = PipelineConfig::default();
        config.marker_interval = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.mappers.push("Mapper#1".to_string());
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.mappers = vec!["Mapper,1".to_string()];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.reducers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reducer_settings_use_every_mapper_as_upstream() {
        let config = PipelineConfig::default();
        let settings = config.reducer_settings(1).unwrap();
        assert_eq!(settings.reducer_id, "Reducer#2");
        assert_eq!(settings.listen, "127.0.0.1:5024");
        assert_eq!(settings.upstream, config.mappers);
        assert!(config.reducer_settings(2).is_err());
    }
}
