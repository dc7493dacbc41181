// instance/error.rs
//
// Errors raised by the instance facade

use thiserror::Error;

use crate::ssh::SshError;

use super::scripts::ScriptKind;

/// Errors that can occur while driving one instance's lifecycle
#[derive(Error, Debug)]
pub enum InstanceError {
    #[error("{kind} script for job {job} on {instance} returned {exit_code}: {stderr}")]
    ScriptFailed {
        instance: String,
        job: String,
        kind: ScriptKind,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command `{cmd}` on {instance} returned {exit_code}: {stderr}")]
    CommandFailed {
        instance: String,
        cmd: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Metadata script for job {job} produced invalid YAML: {source}")]
    InvalidMetadata {
        job: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Ssh(#[from] SshError),
}

impl InstanceError {
    /// Whether the underlying transport was canceled or timed out.
    pub fn is_canceled(&self) -> bool {
        matches!(self, InstanceError::Ssh(err) if err.is_canceled())
    }
}
