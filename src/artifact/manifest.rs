// artifact/manifest.rs
//
// On-disk metadata document recorded inside each artifact directory

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::InstanceIdentity;

/// The `metadata` document of one artifact: which deployment it came from,
/// the per-archive checksum maps, and the deployment manifest snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub deployment_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backed_up_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub instances: Vec<InstanceRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_artifacts: Vec<BlobRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_manifest: Option<String>,
}

/// Checksums for one instance archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub name: String,
    pub index: String,
    pub id: String,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

impl InstanceRecord {
    pub fn identity(&self) -> InstanceIdentity {
        InstanceIdentity {
            name: self.name.clone(),
            index: self.index.clone(),
            id: self.id.clone(),
        }
    }
}

/// Checksums for one named blob archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobRecord {
    pub name: String,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}
