// artifact/store.rs
//
// Creates and opens artifact directories under a local root

use std::path::PathBuf;

use chrono::Utc;
use log::info;

use super::artifact::Artifact;
use super::error::ArtifactError;
use super::manifest::ArtifactMetadata;

/// Filesystem-backed store of artifacts, one directory per deployment.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Whether an artifact for `name` already exists.
    pub fn exists(&self, name: &str) -> bool {
        self.root.join(name).exists()
    }

    /// Create a fresh artifact directory. Fails if one already exists.
    pub fn create(&self, name: &str) -> Result<Artifact, ArtifactError> {
        let dir = self.root.join(name);
        if dir.exists() {
            return Err(ArtifactError::AlreadyExists {
                name: name.to_string(),
                path: dir,
            });
        }
        std::fs::create_dir_all(&dir).map_err(|source| ArtifactError::io(dir.clone(), source))?;
        info!("Created artifact directory {}", dir.display());

        let artifact = Artifact::new(name, dir);
        artifact.write_metadata(&ArtifactMetadata {
            deployment_name: name.to_string(),
            backed_up_at: Some(Utc::now()),
            ..ArtifactMetadata::default()
        })?;
        Ok(artifact)
    }

    /// Open an existing artifact directory. Fails if missing.
    pub fn open(&self, name: &str) -> Result<Artifact, ArtifactError> {
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(ArtifactError::NotFound {
                name: name.to_string(),
                path: dir,
            });
        }
        Ok(Artifact::new(name, dir))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use sha2::{Digest, Sha256};

    use super::*;
    use crate::artifact::artifact::ArtifactKey;
    use crate::instance::InstanceIdentity;

    fn identity(name: &str, index: &str, id: &str) -> InstanceIdentity {
        InstanceIdentity {
            name: name.to_string(),
            index: index.to_string(),
            id: id.to_string(),
        }
    }

    fn store() -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        (dir, store)
    }

    /// Build a small gzipped tar the way the remote side would.
    fn write_archive(artifact: &Artifact, key: &ArtifactKey, files: &[(&str, &[u8])]) {
        let file = artifact.create_file(key).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("./{}", path), *contents)
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
    }

    fn sha256_hex(contents: &[u8]) -> String {
        hex::encode(Sha256::digest(contents))
    }

    #[test]
    fn create_fails_when_artifact_already_exists() {
        let (_dir, store) = store();
        store.create("my-deployment").unwrap();

        let err = store.create("my-deployment").unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn open_fails_when_artifact_is_missing() {
        let (_dir, store) = store();
        assert!(store.open("absent").is_err());
    }

    #[test]
    fn create_records_the_deployment_name() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();

        let metadata = artifact.metadata().unwrap();
        assert_eq!(metadata.deployment_name, "my-deployment");
        assert!(metadata.backed_up_at.is_some());
    }

    #[test]
    fn archive_files_are_unique_per_key() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();
        let key = ArtifactKey::instance(identity("redis", "0", "abc"));

        artifact.create_file(&key).unwrap();
        let err = artifact.create_file(&key).unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
    }

    #[test]
    fn calculated_checksums_match_file_contents() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();
        let key = ArtifactKey::instance(identity("redis", "0", "abc"));
        write_archive(
            &artifact,
            &key,
            &[("dump.rdb", b"dump-bytes"), ("nested/log", b"log-bytes")],
        );

        let checksums = artifact.calculate_checksum(&key).unwrap();

        assert_eq!(checksums.len(), 2);
        assert_eq!(checksums["dump.rdb"], sha256_hex(b"dump-bytes"));
        assert_eq!(checksums["nested/log"], sha256_hex(b"log-bytes"));
    }

    #[test]
    fn add_checksum_round_trips_through_metadata() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();
        let key = ArtifactKey::instance(identity("redis", "0", "abc"));
        let mut checksums = BTreeMap::new();
        checksums.insert("dump.rdb".to_string(), "aaa111".to_string());

        artifact.add_checksum(&key, checksums.clone()).unwrap();

        assert_eq!(artifact.recorded_checksum(&key).unwrap(), Some(checksums));
        let metadata = artifact.metadata().unwrap();
        assert_eq!(metadata.instances.len(), 1);
        assert_eq!(metadata.instances[0].id, "abc");
    }

    #[test]
    fn blob_checksums_are_recorded_as_custom_artifacts() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();
        let key = ArtifactKey::blob("broker-blob");
        let mut checksums = BTreeMap::new();
        checksums.insert("state".to_string(), "bbb222".to_string());

        artifact.add_checksum(&key, checksums.clone()).unwrap();

        let metadata = artifact.metadata().unwrap();
        assert_eq!(metadata.custom_artifacts.len(), 1);
        assert_eq!(metadata.custom_artifacts[0].name, "broker-blob");
        assert_eq!(metadata.custom_artifacts[0].checksums, checksums);
    }

    #[test]
    fn deployment_matches_compares_identities() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();
        artifact
            .add_checksum(
                &ArtifactKey::instance(identity("redis", "0", "abc")),
                BTreeMap::new(),
            )
            .unwrap();

        let live = vec![identity("redis", "0", "abc"), identity("api", "0", "def")];
        assert!(artifact.deployment_matches("my-deployment", &live).unwrap());

        let renamed = vec![identity("redis", "0", "other-id")];
        assert!(!artifact.deployment_matches("my-deployment", &renamed).unwrap());

        assert!(!artifact.deployment_matches("other-deployment", &live).unwrap());
    }

    #[test]
    fn save_manifest_stores_the_snapshot() {
        let (_dir, store) = store();
        let artifact = store.create("my-deployment").unwrap();

        artifact.save_manifest("---\nname: my-deployment\n").unwrap();

        let metadata = artifact.metadata().unwrap();
        assert_eq!(
            metadata.deployment_manifest.as_deref(),
            Some("---\nname: my-deployment\n")
        );
    }
}
