// deployment/error.rs
//
// Errors raised by deployment lookup and fan-out operations

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::instance::InstanceError;
use crate::ssh::SshError;

/// Errors that can occur while resolving or driving a deployment
#[derive(Error, Debug)]
pub enum DeploymentError {
    #[error("Director request failed: {0}")]
    Director(String),

    #[error("Instance {group}/{id} has no address the orchestrator can reach")]
    Unreachable { group: String, id: String },

    #[error("Job {job} on {instance} restores blob {blob}, which no job in deployment {deployment} produces")]
    UnmatchedRestoreName {
        deployment: String,
        instance: String,
        job: String,
        blob: String,
    },

    #[error("Checksum mismatch for {archive} drained from {instance}")]
    ChecksumMismatch { instance: String, archive: String },

    #[error("No archive in the artifact for restorable instance {instance}")]
    MissingArchive { instance: String },

    #[error("Cleanup failed: {}", .0.iter().map(|(instance, err)| format!("{}: {}", instance, err)).collect::<Vec<_>>().join("; "))]
    Cleanup(Vec<(String, InstanceError)>),

    #[error(transparent)]
    Instance(#[from] InstanceError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

impl DeploymentError {
    /// Whether this failure came from run cancellation (or a command
    /// timeout) rather than a real remote error.
    pub fn is_canceled(&self) -> bool {
        match self {
            DeploymentError::Ssh(err) => err.is_canceled(),
            DeploymentError::Instance(err) => err.is_canceled(),
            DeploymentError::Cleanup(failures) => {
                !failures.is_empty() && failures.iter().all(|(_, err)| err.is_canceled())
            }
            _ => false,
        }
    }
}
