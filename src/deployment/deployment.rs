// deployment/deployment.rs
//
// A deployment's instances, fan-out lifecycle operations, and invariants

use std::collections::{BTreeSet, HashSet};

use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};

use crate::artifact::{Artifact, ArtifactKey};
use crate::instance::{DeployedInstance, InstanceError, InstanceIdentity, Job};

use super::error::DeploymentError;

/// The ordered set of instances that make up one deployment.
///
/// Fan-outs run in stable `(group, index)` order with bounded parallelism
/// (default sequential). The first failure stops a phase, except `cleanup`
/// which always visits every instance and aggregates all errors.
#[derive(Debug)]
pub struct Deployment {
    name: String,
    instances: Vec<DeployedInstance>,
    parallelism: usize,
    external_blob_names: Vec<String>,
    metadata_lock: tokio::sync::Mutex<()>,
}

impl Deployment {
    pub fn new(name: impl Into<String>, mut instances: Vec<DeployedInstance>) -> Self {
        instances.sort_by(|a, b| {
            (a.group_name(), a.index()).cmp(&(b.group_name(), b.index()))
        });
        Self {
            name: name.into(),
            instances,
            parallelism: 1,
            external_blob_names: Vec::new(),
            metadata_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Bound the per-instance fan-out. 1 keeps phases strictly sequential.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Blob names restore jobs may reference without a producer in this
    /// deployment.
    pub fn with_external_blob_names(mut self, names: Vec<String>) -> Self {
        self.external_blob_names = names;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instances(&self) -> &[DeployedInstance] {
        &self.instances
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn identities(&self) -> Vec<InstanceIdentity> {
        self.instances.iter().map(DeployedInstance::identity).collect()
    }

    /// Whether any instance carries a backup script.
    pub fn has_backup_script(&self) -> bool {
        self.instances.iter().any(DeployedInstance::is_backupable)
    }

    /// Whether any instance carries a restore script.
    pub fn is_restorable(&self) -> bool {
        self.instances.iter().any(DeployedInstance::is_restorable)
    }

    pub fn all_backupable(&self) -> Vec<&DeployedInstance> {
        self.instances.iter().filter(|i| i.is_backupable()).collect()
    }

    pub fn all_restorable(&self) -> Vec<&DeployedInstance> {
        self.instances.iter().filter(|i| i.is_restorable()).collect()
    }

    /// Whether non-empty blob names are unique across all jobs.
    pub fn has_unique_custom_backup_names(&self) -> bool {
        let mut seen = HashSet::new();
        for instance in &self.instances {
            for job in instance.jobs() {
                if let Some(blob) = job.blob_name() {
                    if !seen.insert(blob) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Check that every blob name referenced by a restore job has a
    /// producer in this deployment or is explicitly permitted.
    pub fn custom_artifact_names_match(&self) -> Result<(), DeploymentError> {
        let produced: HashSet<&str> = self
            .instances
            .iter()
            .flat_map(|i| i.jobs().iter())
            .filter(|j| j.is_backupable())
            .filter_map(Job::blob_name)
            .collect();

        for instance in &self.instances {
            for job in instance.jobs().restorable() {
                let Some(blob) = job.restore_blob_name() else {
                    continue;
                };
                if produced.contains(blob)
                    || self.external_blob_names.iter().any(|n| n == blob)
                {
                    continue;
                }
                return Err(DeploymentError::UnmatchedRestoreName {
                    deployment: self.name.clone(),
                    instance: instance.address(),
                    job: job.name().to_string(),
                    blob: blob.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Whether any instance already has a remote staging directory.
    pub async fn remote_artifact_dir_exists(&self) -> Result<bool, DeploymentError> {
        for instance in &self.instances {
            if instance.remote_artifact_dir_exists().await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub async fn pre_backup_lock(&self) -> Result<(), DeploymentError> {
        info!("Locking deployment {} for backup...", self.name);
        let targets = self
            .instances
            .iter()
            .filter(|i| i.is_pre_backupable())
            .collect();
        self.try_fan_out(targets, DeployedInstance::pre_backup_lock)
            .await
    }

    pub async fn backup(&self) -> Result<(), DeploymentError> {
        info!("Running backup scripts across {}...", self.name);
        self.try_fan_out(self.all_backupable(), DeployedInstance::backup)
            .await
    }

    pub async fn post_backup_unlock(&self) -> Result<(), DeploymentError> {
        info!("Unlocking deployment {}...", self.name);
        let targets = self
            .instances
            .iter()
            .filter(|i| i.is_post_backupable())
            .collect();
        self.try_fan_out(targets, DeployedInstance::post_backup_unlock)
            .await
    }

    pub async fn restore(&self) -> Result<(), DeploymentError> {
        info!("Running restore scripts across {}...", self.name);
        self.try_fan_out(self.all_restorable(), DeployedInstance::restore)
            .await
    }

    /// Clean up every instance, aggregating all failures.
    pub async fn cleanup(&self) -> Result<(), DeploymentError> {
        info!("Cleaning up deployment {}...", self.name);
        let results: Vec<(String, Result<(), InstanceError>)> =
            stream::iter(self.instances.iter().map(|instance| async move {
                (instance.address(), instance.cleanup().await)
            }))
            .buffered(self.parallelism)
            .collect()
            .await;

        let failures: Vec<(String, InstanceError)> = results
            .into_iter()
            .filter_map(|(address, result)| result.err().map(|err| (address, err)))
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeploymentError::Cleanup(failures))
        }
    }

    /// Drain: stream every staged backup into the artifact and verify
    /// each archive's checksums against the remote ones.
    pub async fn copy_remote_backup_to_local(
        &self,
        artifact: &Artifact,
    ) -> Result<(), DeploymentError> {
        stream::iter(self.all_backupable().into_iter().map(Ok::<_, DeploymentError>))
            .try_for_each_concurrent(self.parallelism, |instance| {
                self.drain_instance(instance, artifact)
            })
            .await
    }

    /// Push archives back onto restorable instances.
    pub async fn copy_local_backup_to_remote(
        &self,
        artifact: &Artifact,
    ) -> Result<(), DeploymentError> {
        stream::iter(self.all_restorable().into_iter().map(Ok::<_, DeploymentError>))
            .try_for_each_concurrent(self.parallelism, |instance| {
                self.push_instance(instance, artifact)
            })
            .await
    }

    async fn drain_instance(
        &self,
        instance: &DeployedInstance,
        artifact: &Artifact,
    ) -> Result<(), DeploymentError> {
        info!("Copying backup from {}...", instance.address());
        let key = ArtifactKey::instance(instance.identity());
        self.drain_archive(instance, artifact, &key, None).await?;

        let blobs: BTreeSet<&str> = instance
            .jobs()
            .with_named_blobs()
            .into_iter()
            .filter(|j| j.is_backupable())
            .filter_map(Job::blob_name)
            .collect();
        for blob in blobs {
            let key = ArtifactKey::blob(blob);
            self.drain_archive(instance, artifact, &key, Some(blob)).await?;
        }
        Ok(())
    }

    async fn drain_archive(
        &self,
        instance: &DeployedInstance,
        artifact: &Artifact,
        key: &ArtifactKey,
        blob: Option<&str>,
    ) -> Result<(), DeploymentError> {
        let file = artifact.create_file(key)?;
        instance
            .stream_backup_from_remote(blob, Box::new(file))
            .await?;

        let local = artifact.calculate_checksum(key)?;
        let remote = instance.backup_checksum(blob).await?;
        if local != remote {
            return Err(DeploymentError::ChecksumMismatch {
                instance: instance.address(),
                archive: key.file_name(),
            });
        }
        debug!(
            "Verified {} file(s) in {} from {}",
            local.len(),
            key.file_name(),
            instance.address()
        );

        let _guard = self.metadata_lock.lock().await;
        artifact.add_checksum(key, local)?;
        Ok(())
    }

    async fn push_instance(
        &self,
        instance: &DeployedInstance,
        artifact: &Artifact,
    ) -> Result<(), DeploymentError> {
        info!("Copying backup to {}...", instance.address());
        let key = ArtifactKey::instance(instance.identity());
        let needs_default = instance
            .jobs()
            .restorable()
            .iter()
            .any(|j| j.restore_blob_name().is_none());

        if artifact.has_file(&key) {
            let reader = artifact.read_file(&key)?;
            instance
                .stream_backup_to_remote(None, Box::new(reader))
                .await?;
        } else if needs_default {
            return Err(DeploymentError::MissingArchive {
                instance: instance.address(),
            });
        }

        let blobs: BTreeSet<&str> = instance
            .jobs()
            .restorable()
            .into_iter()
            .filter_map(Job::restore_blob_name)
            .collect();
        for blob in blobs {
            let blob_key = ArtifactKey::blob(blob);
            if !artifact.has_file(&blob_key) {
                return Err(DeploymentError::MissingArchive {
                    instance: instance.address(),
                });
            }
            let reader = artifact.read_file(&blob_key)?;
            instance
                .stream_backup_to_remote(Some(blob), Box::new(reader))
                .await?;
        }
        Ok(())
    }

    async fn try_fan_out<'a, F, Fut>(
        &self,
        instances: Vec<&'a DeployedInstance>,
        f: F,
    ) -> Result<(), DeploymentError>
    where
        F: Fn(&'a DeployedInstance) -> Fut,
        Fut: std::future::Future<Output = Result<(), InstanceError>>,
    {
        stream::iter(instances.into_iter().map(Ok::<_, DeploymentError>))
            .try_for_each_concurrent(self.parallelism, |instance| {
                let work = f(instance);
                async move { work.await.map_err(DeploymentError::from) }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::instance::metadata::JobMetadata;
    use crate::instance::{Jobs, Script};
    use crate::ssh::fake::FakeSshConnection;

    fn instance(
        group: &str,
        index: &str,
        id: &str,
        scripts: &[&str],
        names: &[(&str, &str, Option<&str>)],
    ) -> (DeployedInstance, FakeSshConnection) {
        let ssh = FakeSshConnection::new();
        let metadata: HashMap<String, JobMetadata> = names
            .iter()
            .map(|(job, backup, restore)| {
                (
                    job.to_string(),
                    JobMetadata {
                        backup_name: Some(backup.to_string()),
                        restore_name: restore.map(str::to_string),
                    },
                )
            })
            .collect();
        let jobs = Jobs::classify(scripts.iter().map(|p| Script::new(*p)), &metadata);
        let deployed =
            DeployedInstance::new(group, index, id, jobs, Box::new(ssh.clone()));
        (deployed, ssh)
    }

    fn backupable(group: &str, index: &str, id: &str) -> (DeployedInstance, FakeSshConnection) {
        let script = format!("/var/vcap/jobs/{}-job/bin/p-backup", group);
        instance(group, index, id, &[script.as_str()], &[])
    }

    /// A gzipped tar holding `files`, matching what `tar -zc` would stream.
    fn archive_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
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
        let mut bytes = builder.into_inner().unwrap().finish().unwrap();
        bytes.flush().unwrap();
        bytes
    }

    fn sha256_hex(contents: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(contents))
    }

    #[test]
    fn instances_are_ordered_by_group_and_index() {
        let (b1, _) = backupable("redis", "1", "id-3");
        let (a0, _) = backupable("api", "0", "id-1");
        let (b0, _) = backupable("redis", "0", "id-2");
        let deployment = Deployment::new("dep", vec![b1, a0, b0]);

        let order: Vec<(String, String)> = deployment
            .instances()
            .iter()
            .map(|i| (i.group_name().to_string(), i.index().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("api".to_string(), "0".to_string()),
                ("redis".to_string(), "0".to_string()),
                ("redis".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn all_backupable_filters_instances() {
        let (backup, _) = backupable("redis", "0", "id-1");
        let (restore_only, _) = instance(
            "api",
            "0",
            "id-2",
            &["/var/vcap/jobs/api/bin/p-restore"],
            &[],
        );
        let deployment = Deployment::new("dep", vec![backup, restore_only]);

        assert!(deployment.has_backup_script());
        assert_eq!(deployment.all_backupable().len(), 1);
        assert_eq!(deployment.all_backupable()[0].group_name(), "redis");
        assert_eq!(deployment.all_restorable().len(), 1);
        assert_eq!(deployment.all_restorable()[0].group_name(), "api");
    }

    #[test]
    fn duplicate_blob_names_are_rejected() {
        let (one, _) = instance(
            "redis",
            "0",
            "id-1",
            &["/var/vcap/jobs/redis/bin/p-backup"],
            &[("redis", "shared-name", None)],
        );
        let (two, _) = instance(
            "api",
            "0",
            "id-2",
            &["/var/vcap/jobs/api/bin/p-backup"],
            &[("api", "shared-name", None)],
        );
        let deployment = Deployment::new("dep", vec![one, two]);

        assert!(!deployment.has_unique_custom_backup_names());
    }

    #[test]
    fn restore_names_require_a_producer() {
        let (producer, _) = instance(
            "redis",
            "0",
            "id-1",
            &["/var/vcap/jobs/redis/bin/p-backup"],
            &[("redis", "redis-blob", None)],
        );
        let (consumer, _) = instance(
            "api",
            "0",
            "id-2",
            &["/var/vcap/jobs/api/bin/p-restore"],
            &[("api", "", Some("redis-blob"))],
        );
        let deployment = Deployment::new("dep", vec![producer, consumer]);
        assert!(deployment.custom_artifact_names_match().is_ok());

        let (orphan, _) = instance(
            "api",
            "0",
            "id-3",
            &["/var/vcap/jobs/api/bin/p-restore"],
            &[("api", "", Some("nobody-makes-this"))],
        );
        let deployment = Deployment::new("dep", vec![orphan]);
        let err = deployment.custom_artifact_names_match().unwrap_err();
        assert!(err.to_string().contains("nobody-makes-this"));
    }

    #[test]
    fn external_blob_names_are_permitted() {
        let (consumer, _) = instance(
            "api",
            "0",
            "id-1",
            &["/var/vcap/jobs/api/bin/p-restore"],
            &[("api", "", Some("from-elsewhere"))],
        );
        let deployment = Deployment::new("dep", vec![consumer])
            .with_external_blob_names(vec!["from-elsewhere".to_string()]);

        assert!(deployment.custom_artifact_names_match().is_ok());
    }

    #[tokio::test]
    async fn backup_stops_at_the_first_failing_instance() {
        let (one, ssh1) = backupable("api", "0", "id-1");
        let (two, ssh2) = backupable("redis", "0", "id-2");
        ssh2.stub_failure("p-backup", 1, "no space");
        let deployment = Deployment::new("dep", vec![one, two]);

        let err = deployment.backup().await.unwrap_err();

        assert!(err.to_string().contains("no space"));
        assert!(ssh1.commands().iter().any(|c| c.contains("p-backup")));
    }

    #[tokio::test]
    async fn cleanup_visits_every_instance_and_aggregates_failures() {
        let (one, ssh1) = backupable("api", "0", "id-1");
        let (two, ssh2) = backupable("redis", "0", "id-2");
        let (three, ssh3) = backupable("worker", "0", "id-3");
        ssh2.stub_failure("rm -rf", 1, "device busy");
        let deployment = Deployment::new("dep", vec![one, two, three]);

        let err = deployment.cleanup().await.unwrap_err();

        match &err {
            DeploymentError::Cleanup(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].0, "redis/id-2");
            }
            other => panic!("unexpected error: {}", other),
        }
        for ssh in [&ssh1, &ssh2, &ssh3] {
            assert_eq!(ssh.close_count(), 1);
        }
    }

    #[tokio::test]
    async fn remote_artifact_dir_check_finds_leftovers() {
        let (one, ssh1) = backupable("api", "0", "id-1");
        ssh1.stub_failure("stat", 1, "No such file or directory");
        let (two, ssh2) = backupable("redis", "0", "id-2");
        ssh2.stub_stdout("stat", "  File: /var/vcap/store/backup");
        let deployment = Deployment::new("dep", vec![one, two]);

        let (three, ssh3) = backupable("worker", "0", "id-3");
        ssh3.stub_failure("stat", 1, "No such file or directory");
        let clean = Deployment::new("dep", vec![three]);

        assert!(deployment.remote_artifact_dir_exists().await.unwrap());
        assert!(!clean.remote_artifact_dir_exists().await.unwrap());
    }

    #[tokio::test]
    async fn drain_verifies_checksums_and_records_them() {
        let bytes = archive_bytes(&[("dump.rdb", b"dump-bytes")]);
        let (one, ssh) = backupable("redis", "0", "id-1");
        ssh.set_stream_body(&bytes);
        ssh.stub_stdout(
            "sha256sum",
            &format!("{}  ./dump.rdb\n", sha256_hex(b"dump-bytes")),
        );
        let deployment = Deployment::new("dep", vec![one]);

        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactStore::new(dir.path()).create("dep").unwrap();
        deployment
            .copy_remote_backup_to_local(&artifact)
            .await
            .unwrap();

        let key = ArtifactKey::instance(InstanceIdentity {
            name: "redis".to_string(),
            index: "0".to_string(),
            id: "id-1".to_string(),
        });
        let recorded = artifact.recorded_checksum(&key).unwrap().unwrap();
        assert_eq!(recorded["dump.rdb"], sha256_hex(b"dump-bytes"));
    }

    #[tokio::test]
    async fn drain_fails_on_checksum_mismatch() {
        let bytes = archive_bytes(&[("dump.rdb", b"dump-bytes")]);
        let (one, ssh) = backupable("redis", "0", "id-1");
        ssh.set_stream_body(&bytes);
        ssh.stub_stdout("sha256sum", "deadbeef  ./dump.rdb\n");
        let deployment = Deployment::new("dep", vec![one]);

        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactStore::new(dir.path()).create("dep").unwrap();
        let err = deployment
            .copy_remote_backup_to_local(&artifact)
            .await
            .unwrap_err();

        assert!(matches!(err, DeploymentError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn push_streams_archives_to_restorable_instances() {
        let (one, ssh) = instance(
            "redis",
            "0",
            "id-1",
            &["/var/vcap/jobs/redis/bin/p-restore"],
            &[],
        );
        let deployment = Deployment::new("dep", vec![one]);

        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactStore::new(dir.path()).create("dep").unwrap();
        let key = ArtifactKey::instance(InstanceIdentity {
            name: "redis".to_string(),
            index: "0".to_string(),
            id: "id-1".to_string(),
        });
        artifact
            .create_file(&key)
            .unwrap()
            .write_all(b"archive-payload")
            .unwrap();

        deployment
            .copy_local_backup_to_remote(&artifact)
            .await
            .unwrap();

        assert_eq!(ssh.uploads().len(), 1);
        assert_eq!(ssh.uploads()[0].1, b"archive-payload");
    }

    #[tokio::test]
    async fn push_fails_when_a_restorable_instance_has_no_archive() {
        let (one, _ssh) = instance(
            "redis",
            "0",
            "id-1",
            &["/var/vcap/jobs/redis/bin/p-restore"],
            &[],
        );
        let deployment = Deployment::new("dep", vec![one]);

        let dir = tempfile::tempdir().unwrap();
        let artifact = ArtifactStore::new(dir.path()).create("dep").unwrap();

        let err = deployment
            .copy_local_backup_to_remote(&artifact)
            .await
            .unwrap_err();
        assert!(matches!(err, DeploymentError::MissingArchive { .. }));
    }
}
