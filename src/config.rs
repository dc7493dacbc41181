// config.rs
//
// Run configuration for the orchestrator

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration for one orchestrator run.
///
/// Loadable from a JSON file; every field has a default so partial
/// configurations work. CLI flags override the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// User the orchestrator logs in as on instances.
    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,

    /// Private key used for instance authentication.
    #[serde(default)]
    pub ssh_private_key: PathBuf,

    /// SSH port on the instances.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Per-command timeout in seconds. 0 disables the timeout.
    #[serde(default)]
    pub command_timeout_secs: u64,

    /// Upper bound on concurrent per-instance work. 1 keeps fan-outs
    /// strictly sequential.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Directory artifacts are created under.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,

    /// Blob names restore jobs may reference without a local producer.
    #[serde(default)]
    pub external_blob_names: Vec<String>,
}

fn default_ssh_username() -> String {
    "vcap".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_parallelism() -> usize {
    1
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ssh_username: default_ssh_username(),
            ssh_private_key: PathBuf::new(),
            ssh_port: default_ssh_port(),
            command_timeout_secs: 0,
            parallelism: default_parallelism(),
            artifact_root: default_artifact_root(),
            external_blob_names: Vec::new(),
        }
    }
}

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration at {path} could not be parsed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RunConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The per-command timeout, if one is configured.
    pub fn command_timeout(&self) -> Option<Duration> {
        if self.command_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.command_timeout_secs))
        }
    }
}
