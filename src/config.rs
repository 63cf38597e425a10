//! Layered configuration: defaults, then the global TOML file, then the
//! per-library `config.toml` in the data directory, then `REFBASE_*`
//! environment overrides. An explicit path (argument or
//! `REFBASE_CONFIG`) replaces the global/project pair entirely.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::vector::Metric;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Config {
    pub fn load(explicit_path: Option<&Path>, data_root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("REFBASE_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if let Some(patch) = Self::load_patch(&path)? {
                config.merge_patch(patch);
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(data_root)? {
                config.merge_patch(project);
            }
        }

        if config.storage.data_dir.as_os_str().is_empty() {
            config.storage.data_dir = data_root.to_path_buf();
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Default configuration rooted at the given data directory.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.storage.data_dir = data_dir.into();
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("storage.data_dir is not set".to_string()));
        }
        if !(0.0..=1.0).contains(&self.storage.duplicate_threshold) {
            return Err(Error::Config(format!(
                "storage.duplicate_threshold {} outside [0, 1]",
                self.storage.duplicate_threshold
            )));
        }
        if self.storage.flush_interval.is_zero() {
            return Err(Error::Config(
                "storage.flush_interval must be positive".to_string(),
            ));
        }
        if self.vector.dimension == 0 {
            return Err(Error::Config("vector.dimension must be positive".to_string()));
        }
        if self.vector.block_size == 0 {
            return Err(Error::Config("vector.block_size must be positive".to_string()));
        }
        if self.query.semantic_k == 0 {
            return Err(Error::Config("query.semantic_k must be positive".to_string()));
        }
        Ok(())
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let Some(dir) = dirs::config_dir() else {
            return Ok(None);
        };
        Self::load_patch(&dir.join("refbase/config.toml"))
    }

    fn load_project(data_root: &Path) -> Result<Option<ConfigPatch>> {
        Self::load_patch(&data_root.join("config.toml"))
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| Error::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
        if let Some(patch) = patch.vector {
            self.vector.merge(patch);
        }
        if let Some(patch) = patch.query {
            self.query.merge(patch);
        }
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_string("REFBASE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }
        if let Some(value) = env_bool("REFBASE_TRASH_ENABLED") {
            self.storage.trash_enabled = value;
        }
        if let Some(value) = env_u64("REFBASE_FLUSH_INTERVAL_SECS")? {
            self.storage.flush_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_f32("REFBASE_DUPLICATE_THRESHOLD")? {
            self.storage.duplicate_threshold = value;
        }

        if let Some(value) = env_usize("REFBASE_VECTOR_DIMENSION")? {
            self.vector.dimension = value;
        }
        if let Some(value) = env_usize("REFBASE_VECTOR_BLOCK_SIZE")? {
            self.vector.block_size = value;
        }
        if let Some(value) = env_string("REFBASE_VECTOR_METRIC") {
            self.vector.metric = parse_metric(&value)?;
        }
        if let Some(value) = env_string("REFBASE_VECTOR_COLLECTION") {
            self.vector.collection = value;
        }

        if let Some(value) = env_usize("REFBASE_QUERY_SEMANTIC_K")? {
            self.query.semantic_k = value;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory holding the row store, the trash area, and the vector
    /// database. Filled from the load-time data root when left empty.
    #[serde(default)]
    pub data_dir: PathBuf,
    #[serde(default = "default_trash_enabled")]
    pub trash_enabled: bool,
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            trash_enabled: default_trash_enabled(),
            flush_interval: default_flush_interval(),
            duplicate_threshold: default_duplicate_threshold(),
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.data_dir {
            self.data_dir = value;
        }
        if let Some(value) = patch.trash_enabled {
            self.trash_enabled = value;
        }
        if let Some(value) = patch.flush_interval {
            self.flush_interval = value;
        }
        if let Some(value) = patch.duplicate_threshold {
            self.duplicate_threshold = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
            block_size: default_block_size(),
            metric: Metric::default(),
            collection: default_collection(),
        }
    }
}

impl VectorConfig {
    fn merge(&mut self, patch: VectorPatch) {
        if let Some(value) = patch.dimension {
            self.dimension = value;
        }
        if let Some(value) = patch.block_size {
            self.block_size = value;
        }
        if let Some(value) = patch.metric {
            self.metric = value;
        }
        if let Some(value) = patch.collection {
            self.collection = value;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_semantic_k")]
    pub semantic_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            semantic_k: default_semantic_k(),
        }
    }
}

impl QueryConfig {
    fn merge(&mut self, patch: QueryPatch) {
        if let Some(value) = patch.semantic_k {
            self.semantic_k = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub storage: Option<StoragePatch>,
    pub vector: Option<VectorPatch>,
    pub query: Option<QueryPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub data_dir: Option<PathBuf>,
    pub trash_enabled: Option<bool>,
    #[serde(default, with = "humantime_serde::option")]
    pub flush_interval: Option<Duration>,
    pub duplicate_threshold: Option<f32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct VectorPatch {
    pub dimension: Option<usize>,
    pub block_size: Option<usize>,
    pub metric: Option<Metric>,
    pub collection: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct QueryPatch {
    pub semantic_k: Option<usize>,
}

fn default_trash_enabled() -> bool {
    true
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_duplicate_threshold() -> f32 {
    0.8
}

fn default_dimension() -> usize {
    768
}

fn default_block_size() -> usize {
    1024
}

fn default_collection() -> String {
    "doc_features".to_string()
}

fn default_semantic_k() -> usize {
    16
}

fn parse_metric(value: &str) -> Result<Metric> {
    match value.to_lowercase().as_str() {
        "cosine" => Ok(Metric::Cosine),
        "l2" => Ok(Metric::L2),
        _ => Err(Error::Config(format!(
            "invalid metric {value} (expected cosine|l2)"
        ))),
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn env_u64(key: &str) -> Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<f32>()
            .map(Some)
            .map_err(|err| Error::Config(format!("invalid {key} value {value}: {err}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.storage.trash_enabled);
        assert_eq!(config.storage.flush_interval, Duration::from_secs(10));
        assert_eq!(config.vector.dimension, 768);
        assert_eq!(config.vector.block_size, 1024);
        assert_eq!(config.vector.metric, Metric::Cosine);
        assert_eq!(config.query.semantic_k, 16);
    }

    #[test]
    fn test_project_patch_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            r#"
[storage]
trash_enabled = false
flush_interval = "30s"

[vector]
dimension = 384
metric = "l2"
"#,
        )
        .unwrap();

        let config = Config::load(None, dir.path()).unwrap();
        assert!(!config.storage.trash_enabled);
        assert_eq!(config.storage.flush_interval, Duration::from_secs(30));
        assert_eq!(config.vector.dimension, 384);
        assert_eq!(config.vector.metric, Metric::L2);
        assert_eq!(config.storage.data_dir, dir.path());
        // Untouched sections keep their defaults.
        assert_eq!(config.query.semantic_k, 16);
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let mut config = Config::for_data_dir("/tmp/refbase-test");
        config.vector.dimension = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::for_data_dir("/tmp/refbase-test");
        config.storage.duplicate_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_metric_names() {
        assert_eq!(parse_metric("cosine").unwrap(), Metric::Cosine);
        assert_eq!(parse_metric("L2").unwrap(), Metric::L2);
        assert!(parse_metric("dot").is_err());
    }
}
