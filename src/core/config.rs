// src/core/config.rs

use crate::core::common::EdisError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Represents the configuration for an Edis server.
///
/// Supports loading from a TOML file and provides sensible default values.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory under which every shard keeps its store.
    /// Shard `i` lives at `<data_dir>/edis-<i>`.
    /// Default: "edis-data"
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of logical databases (shards).
    /// Default: 16
    #[serde(default = "default_databases")]
    pub databases: usize,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("edis-data")
}

fn default_databases() -> usize {
    16
}

impl Default for Config {
    fn default() -> Self {
        Config { data_dir: default_data_dir(), databases: default_databases() }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    ///
    /// If the specified file does not exist, default configuration values are
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns `EdisError::Config` if the file cannot be parsed, or an IO
    /// error for any other read failure.
    pub fn load_from_file(path: &Path) -> Result<Self, EdisError> {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).map_err(|e| {
                EdisError::Config(format!(
                    "failed to parse config file '{}': {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(EdisError::from(e)),
        }
    }

    /// On-disk directory of one shard.
    pub fn shard_path(&self, index: usize) -> PathBuf {
        self.data_dir.join(format!("edis-{index}"))
    }
}
