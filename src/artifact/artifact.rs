// artifact/artifact.rs
//
// One artifact directory: archives, checksum records, manifest snapshot

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use log::debug;
use sha2::{Digest, Sha256};

use crate::instance::InstanceIdentity;

use super::error::ArtifactError;
use super::manifest::{ArtifactMetadata, BlobRecord, InstanceRecord};

const METADATA_FILE: &str = "metadata";

/// Key of one archive inside an artifact: either an instance's default
/// archive or a named blob shared across jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKey {
    Instance(InstanceIdentity),
    Blob(String),
}

impl ArtifactKey {
    pub fn instance(identity: InstanceIdentity) -> Self {
        ArtifactKey::Instance(identity)
    }

    pub fn blob(name: impl Into<String>) -> Self {
        ArtifactKey::Blob(name.into())
    }

    /// Archive file name inside the artifact directory.
    pub fn file_name(&self) -> String {
        match self {
            ArtifactKey::Instance(identity) => {
                format!("{}-{}.tgz", identity.name, identity.index)
            }
            ArtifactKey::Blob(name) => format!("{}.tgz", name),
        }
    }
}

/// A filesystem-backed artifact for one deployment.
///
/// Archives are opaque byte streams written once each; the `metadata`
/// document carries per-archive checksums and the deployment manifest.
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    dir: PathBuf,
}

impl Artifact {
    pub(crate) fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: dir.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create the archive file for `key`. Each key is written exactly once.
    pub fn create_file(&self, key: &ArtifactKey) -> Result<File, ArtifactError> {
        let path = self.dir.join(key.file_name());
        debug!("Creating archive {}", path.display());
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    ArtifactError::ArchiveExists { path: path.clone() }
                } else {
                    ArtifactError::io(path.clone(), source)
                }
            })
    }

    /// Open the archive file for `key` read-only.
    pub fn read_file(&self, key: &ArtifactKey) -> Result<File, ArtifactError> {
        let path = self.dir.join(key.file_name());
        File::open(&path).map_err(|source| ArtifactError::io(path.clone(), source))
    }

    /// Whether an archive exists for `key`.
    pub fn has_file(&self, key: &ArtifactKey) -> bool {
        self.dir.join(key.file_name()).exists()
    }

    /// Persist the checksum map for `key` into the metadata document.
    pub fn add_checksum(
        &self,
        key: &ArtifactKey,
        checksums: BTreeMap<String, String>,
    ) -> Result<(), ArtifactError> {
        let mut metadata = self.metadata()?;
        match key {
            ArtifactKey::Instance(identity) => {
                match metadata.instances.iter_mut().find(|record| {
                    record.name == identity.name && record.index == identity.index
                }) {
                    Some(record) => record.checksums = checksums,
                    None => metadata.instances.push(InstanceRecord {
                        name: identity.name.clone(),
                        index: identity.index.clone(),
                        id: identity.id.clone(),
                        checksums,
                    }),
                }
            }
            ArtifactKey::Blob(name) => {
                match metadata
                    .custom_artifacts
                    .iter_mut()
                    .find(|record| &record.name == name)
                {
                    Some(record) => record.checksums = checksums,
                    None => metadata.custom_artifacts.push(BlobRecord {
                        name: name.clone(),
                        checksums,
                    }),
                }
            }
        }
        self.write_metadata(&metadata)
    }

    /// Stored checksum map for `key`, if recorded.
    pub fn recorded_checksum(
        &self,
        key: &ArtifactKey,
    ) -> Result<Option<BTreeMap<String, String>>, ArtifactError> {
        let metadata = self.metadata()?;
        Ok(match key {
            ArtifactKey::Instance(identity) => metadata
                .instances
                .iter()
                .find(|record| record.name == identity.name && record.index == identity.index)
                .map(|record| record.checksums.clone()),
            ArtifactKey::Blob(name) => metadata
                .custom_artifacts
                .iter()
                .find(|record| &record.name == name)
                .map(|record| record.checksums.clone()),
        })
    }

    /// Recompute SHA-256 checksums from the stored archive for `key`.
    ///
    /// Entry paths are normalized the same way as remote `sha256sum`
    /// output, so the two maps compare directly.
    pub fn calculate_checksum(
        &self,
        key: &ArtifactKey,
    ) -> Result<BTreeMap<String, String>, ArtifactError> {
        let path = self.dir.join(key.file_name());
        let file = File::open(&path).map_err(|source| ArtifactError::io(path.clone(), source))?;
        let mut archive = tar::Archive::new(GzDecoder::new(file));

        let mut checksums = BTreeMap::new();
        let entries = archive
            .entries()
            .map_err(|source| ArtifactError::io(path.clone(), source))?;
        for entry in entries {
            let mut entry = entry.map_err(|source| ArtifactError::io(path.clone(), source))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let entry_path = entry
                .path()
                .map_err(|source| ArtifactError::io(path.clone(), source))?
                .to_string_lossy()
                .into_owned();
            let entry_path = entry_path.strip_prefix("./").unwrap_or(&entry_path);
            if entry_path.is_empty() {
                continue;
            }

            let mut hasher = Sha256::new();
            let mut buffer = [0u8; 8192];
            loop {
                let read = entry
                    .read(&mut buffer)
                    .map_err(|source| ArtifactError::io(path.clone(), source))?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            checksums.insert(entry_path.to_string(), hex::encode(hasher.finalize()));
        }
        Ok(checksums)
    }

    /// Persist the deployment manifest snapshot.
    pub fn save_manifest(&self, manifest: &str) -> Result<(), ArtifactError> {
        let mut metadata = self.metadata()?;
        metadata.deployment_manifest = Some(manifest.to_string());
        self.write_metadata(&metadata)
    }

    /// Compare the stored instance identities against a live deployment.
    ///
    /// True iff the deployment name matches and every recorded instance is
    /// present in the supplied list with the same name, index and id.
    pub fn deployment_matches(
        &self,
        deployment_name: &str,
        instances: &[InstanceIdentity],
    ) -> Result<bool, ArtifactError> {
        let metadata = self.metadata()?;
        if metadata.deployment_name != deployment_name {
            return Ok(false);
        }
        Ok(metadata
            .instances
            .iter()
            .all(|record| instances.contains(&record.identity())))
    }

    /// Load the metadata document.
    pub fn metadata(&self) -> Result<ArtifactMetadata, ArtifactError> {
        let path = self.dir.join(METADATA_FILE);
        let contents =
            std::fs::read_to_string(&path).map_err(|source| ArtifactError::io(path.clone(), source))?;
        serde_yaml::from_str(&contents).map_err(|source| ArtifactError::Metadata { path, source })
    }

    pub(crate) fn write_metadata(&self, metadata: &ArtifactMetadata) -> Result<(), ArtifactError> {
        let path = self.dir.join(METADATA_FILE);
        let contents = serde_yaml::to_string(metadata)
            .map_err(|source| ArtifactError::Metadata {
                path: path.clone(),
                source,
            })?;
        std::fs::write(&path, contents).map_err(|source| ArtifactError::io(path, source))
    }
}
