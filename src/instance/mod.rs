// instance/mod.rs
//
// Per-instance job model and remote lifecycle facade

pub mod error;
pub mod job;
pub mod jobs;
pub mod metadata;
pub mod remote;
pub mod scripts;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use error::InstanceError;
pub use job::Job;
pub use jobs::Jobs;
pub use metadata::JobMetadata;
pub use remote::DeployedInstance;
pub use scripts::{Script, ScriptKind, JOBS_DIR, REMOTE_ARTIFACT_DIR};

/// Identity of one instance as recorded in artifact manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub name: String,
    pub index: String,
    pub id: String,
}
