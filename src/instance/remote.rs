// instance/remote.rs
//
// Facade over one remote instance: lifecycle scripts, streams, checksums

use std::collections::BTreeMap;
use std::io::{Read, Write};

use log::debug;

use crate::ssh::{CommandOutput, SshConnection};

use super::error::InstanceError;
use super::job::Job;
use super::jobs::Jobs;
use super::scripts::{ScriptKind, REMOTE_ARTIFACT_DIR};
use super::InstanceIdentity;

/// One remote VM of the deployment, tied to an open SSH connection.
///
/// The facade owns the connection; script invocations on one instance are
/// strictly sequential. Every remote command runs under sudo and has its
/// captured output logged at debug level.
pub struct DeployedInstance {
    group_name: String,
    index: String,
    id: String,
    jobs: Jobs,
    ssh: Box<dyn SshConnection>,
}

impl std::fmt::Debug for DeployedInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployedInstance")
            .field("group_name", &self.group_name)
            .field("index", &self.index)
            .field("id", &self.id)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

impl DeployedInstance {
    pub fn new(
        group_name: impl Into<String>,
        index: impl Into<String>,
        id: impl Into<String>,
        jobs: Jobs,
        ssh: Box<dyn SshConnection>,
    ) -> Self {
        Self {
            group_name: group_name.into(),
            index: index.into(),
            id: id.into(),
            jobs,
            ssh,
        }
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn jobs(&self) -> &Jobs {
        &self.jobs
    }

    pub fn identity(&self) -> InstanceIdentity {
        InstanceIdentity {
            name: self.group_name.clone(),
            index: self.index.clone(),
            id: self.id.clone(),
        }
    }

    /// Label used in logs and error messages.
    pub fn address(&self) -> String {
        format!("{}/{}", self.group_name, self.id)
    }

    pub fn is_backupable(&self) -> bool {
        self.jobs.any_are_backupable()
    }

    pub fn is_restorable(&self) -> bool {
        self.jobs.any_are_restorable()
    }

    pub fn is_pre_backupable(&self) -> bool {
        self.jobs.any_are_pre_backupable()
    }

    pub fn is_post_backupable(&self) -> bool {
        self.jobs.any_are_post_backupable()
    }

    /// Run every pre-backup-lock script, in job-name order.
    pub async fn pre_backup_lock(&self) -> Result<(), InstanceError> {
        for job in self.jobs.pre_backupable() {
            self.run_script(job, ScriptKind::PreBackupLock).await?;
        }
        Ok(())
    }

    /// Create the remote staging directory and run every backup script.
    pub async fn backup(&self) -> Result<(), InstanceError> {
        self.run_checked(&format!("sudo mkdir -p {}", REMOTE_ARTIFACT_DIR))
            .await?;
        for job in self.jobs.backupable() {
            self.run_script(job, ScriptKind::Backup).await?;
        }
        Ok(())
    }

    /// Run every post-backup-unlock script, in reverse of the lock order.
    pub async fn post_backup_unlock(&self) -> Result<(), InstanceError> {
        for job in self.jobs.post_backupable().into_iter().rev() {
            self.run_script(job, ScriptKind::PostBackupUnlock).await?;
        }
        Ok(())
    }

    /// Run every restore script, in job-name order.
    pub async fn restore(&self) -> Result<(), InstanceError> {
        for job in self.jobs.restorable() {
            self.run_script(job, ScriptKind::Restore).await?;
        }
        Ok(())
    }

    /// Whether the remote staging directory already exists.
    pub async fn remote_artifact_dir_exists(&self) -> Result<bool, InstanceError> {
        let output = self
            .ssh
            .run(&format!("sudo stat {}", REMOTE_ARTIFACT_DIR))
            .await?;
        Ok(output.success())
    }

    /// Stream the staged backup as a gzipped tar into `writer`.
    ///
    /// With `blob` set, streams that named blob's subdirectory; otherwise
    /// streams the staging directory minus any named blob subdirectories,
    /// which drain copies separately.
    pub async fn stream_backup_from_remote(
        &self,
        blob: Option<&str>,
        writer: Box<dyn Write + Send>,
    ) -> Result<(), InstanceError> {
        debug!("Streaming backup from {}", self.address());
        let cmd = self.stream_from_command(blob);
        let output = self.ssh.stream(&cmd, writer).await?;
        self.log_output(&cmd, &output);
        self.check_output(&cmd, &output)
    }

    /// Create the remote staging directory and unpack `reader` into it.
    pub async fn stream_backup_to_remote(
        &self,
        blob: Option<&str>,
        reader: Box<dyn Read + Send>,
    ) -> Result<(), InstanceError> {
        let dir = self.blob_dir(blob);
        self.run_checked(&format!("sudo mkdir -p {}/", dir)).await?;

        debug!("Streaming backup to {}", self.address());
        let cmd = format!("sudo sh -c 'tar -C {} -zx'", dir);
        let output = self.ssh.stream_stdin(&cmd, reader).await?;
        self.log_output(&cmd, &output);
        self.check_output(&cmd, &output)
    }

    /// SHA-256 of every file in the staged backup, keyed by relative path.
    pub async fn backup_checksum(
        &self,
        blob: Option<&str>,
    ) -> Result<BTreeMap<String, String>, InstanceError> {
        let dir = self.blob_dir(blob);
        let cmd = format!(
            "sudo sh -c 'cd {} && find . -type f | xargs -r sha256sum'",
            dir
        );
        let output = self.ssh.run(&cmd).await?;
        self.log_output(&cmd, &output);
        self.check_output(&cmd, &output)?;

        let mut checksums = parse_sha256_output(&output.stdout_string());
        if blob.is_none() {
            // Named blob contents are drained as their own archives.
            for name in self.jobs.named_blobs() {
                let prefix = format!("{}/", name);
                checksums.retain(|path, _| !path.starts_with(&prefix));
            }
        }
        Ok(checksums)
    }

    /// Remove the remote staging directory and release the connection.
    pub async fn cleanup(&self) -> Result<(), InstanceError> {
        debug!("Cleaning up {}", self.address());
        let removed = self
            .run_checked(&format!("sudo rm -rf {}", REMOTE_ARTIFACT_DIR))
            .await;
        let closed = self.ssh.close().await;
        removed?;
        closed?;
        Ok(())
    }

    fn blob_dir(&self, blob: Option<&str>) -> String {
        match blob {
            Some(name) => format!("{}/{}", REMOTE_ARTIFACT_DIR, name),
            None => REMOTE_ARTIFACT_DIR.to_string(),
        }
    }

    fn stream_from_command(&self, blob: Option<&str>) -> String {
        match blob {
            Some(name) => format!("sudo tar -C {}/{} -zc .", REMOTE_ARTIFACT_DIR, name),
            None => {
                let mut cmd = format!("sudo tar -C {} -zc", REMOTE_ARTIFACT_DIR);
                for name in self.jobs.named_blobs() {
                    cmd.push_str(&format!(" --exclude=./{}", name));
                }
                cmd.push_str(" .");
                cmd
            }
        }
    }

    async fn run_script(&self, job: &Job, kind: ScriptKind) -> Result<(), InstanceError> {
        let script = match job.script(kind) {
            Some(script) => script,
            None => return Ok(()),
        };
        debug!(
            "Running {} script for job {} on {}",
            kind,
            job.name(),
            self.address()
        );
        let cmd = format!("sudo {}", script.path());
        let output = self.ssh.run(&cmd).await?;
        self.log_output(&cmd, &output);
        if !output.success() {
            return Err(InstanceError::ScriptFailed {
                instance: self.address(),
                job: job.name().to_string(),
                kind,
                exit_code: output.exit_code,
                stderr: output.stderr_string(),
            });
        }
        Ok(())
    }

    async fn run_checked(&self, cmd: &str) -> Result<CommandOutput, InstanceError> {
        let output = self.ssh.run(cmd).await?;
        self.log_output(cmd, &output);
        self.check_output(cmd, &output)?;
        Ok(output)
    }

    fn check_output(&self, cmd: &str, output: &CommandOutput) -> Result<(), InstanceError> {
        if !output.success() {
            return Err(InstanceError::CommandFailed {
                instance: self.address(),
                cmd: cmd.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr_string(),
            });
        }
        Ok(())
    }

    fn log_output(&self, cmd: &str, output: &CommandOutput) {
        debug!("`{}` on {} exited {}", cmd, self.address(), output.exit_code);
        if !output.stdout.is_empty() {
            debug!("Stdout: {}", output.stdout_string());
        }
        if !output.stderr.is_empty() {
            debug!("Stderr: {}", output.stderr_string());
        }
    }
}

/// Parse `sha256sum` output into a path → hex map, normalizing `./` prefixes.
fn parse_sha256_output(stdout: &str) -> BTreeMap<String, String> {
    let mut checksums = BTreeMap::new();
    for line in stdout.lines() {
        let mut fields = line.split_whitespace();
        let (Some(sum), Some(path)) = (fields.next(), fields.next()) else {
            continue;
        };
        let path = path.strip_prefix("./").unwrap_or(path);
        checksums.insert(path.to_string(), sum.to_string());
    }
    checksums
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::instance::metadata::JobMetadata;
    use crate::instance::scripts::Script;
    use crate::ssh::fake::FakeSshConnection;

    #[derive(Clone)]
    struct SharedSink(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl SharedSink {
        fn new() -> Self {
            SharedSink(std::sync::Arc::new(std::sync::Mutex::new(Vec::new())))
        }

        fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn instance_with(scripts: &[&str], names: &[(&str, &str)]) -> (DeployedInstance, FakeSshConnection) {
        let ssh = FakeSshConnection::new();
        let metadata: HashMap<String, JobMetadata> = names
            .iter()
            .map(|(job, blob)| {
                (
                    job.to_string(),
                    JobMetadata {
                        backup_name: Some(blob.to_string()),
                        restore_name: None,
                    },
                )
            })
            .collect();
        let jobs = Jobs::classify(scripts.iter().map(|p| Script::new(*p)), &metadata);
        let instance = DeployedInstance::new("redis", "0", "fake-uuid", jobs, Box::new(ssh.clone()));
        (instance, ssh)
    }

    #[tokio::test]
    async fn locks_in_job_name_order() {
        let (instance, ssh) = instance_with(
            &[
                "/var/vcap/jobs/zookeeper/bin/p-pre-backup-lock",
                "/var/vcap/jobs/auctioneer/bin/p-pre-backup-lock",
            ],
            &[],
        );

        instance.pre_backup_lock().await.unwrap();

        assert_eq!(
            ssh.commands(),
            vec![
                "sudo /var/vcap/jobs/auctioneer/bin/p-pre-backup-lock",
                "sudo /var/vcap/jobs/zookeeper/bin/p-pre-backup-lock",
            ]
        );
    }

    #[tokio::test]
    async fn unlocks_in_reverse_lock_order() {
        let (instance, ssh) = instance_with(
            &[
                "/var/vcap/jobs/auctioneer/bin/p-post-backup-unlock",
                "/var/vcap/jobs/zookeeper/bin/p-post-backup-unlock",
            ],
            &[],
        );

        instance.post_backup_unlock().await.unwrap();

        assert_eq!(
            ssh.commands(),
            vec![
                "sudo /var/vcap/jobs/zookeeper/bin/p-post-backup-unlock",
                "sudo /var/vcap/jobs/auctioneer/bin/p-post-backup-unlock",
            ]
        );
    }

    #[tokio::test]
    async fn lock_aborts_on_first_failure() {
        let (instance, ssh) = instance_with(
            &[
                "/var/vcap/jobs/auctioneer/bin/p-pre-backup-lock",
                "/var/vcap/jobs/zookeeper/bin/p-pre-backup-lock",
            ],
            &[],
        );
        ssh.stub_failure("auctioneer", 1, "lock refused");

        let err = instance.pre_backup_lock().await.unwrap_err();

        assert!(err.to_string().contains("auctioneer"));
        assert!(err.to_string().contains("lock refused"));
        assert_eq!(ssh.commands().len(), 1);
    }

    #[tokio::test]
    async fn backup_creates_staging_dir_then_runs_scripts() {
        let (instance, ssh) = instance_with(&["/var/vcap/jobs/redis/bin/p-backup"], &[]);

        instance.backup().await.unwrap();

        assert_eq!(
            ssh.commands(),
            vec![
                "sudo mkdir -p /var/vcap/store/backup",
                "sudo /var/vcap/jobs/redis/bin/p-backup",
            ]
        );
    }

    #[tokio::test]
    async fn backup_failure_carries_exit_code_and_stderr() {
        let (instance, ssh) = instance_with(&["/var/vcap/jobs/redis/bin/p-backup"], &[]);
        ssh.stub_failure("p-backup", 2, "disk full");

        let err = instance.backup().await.unwrap_err();

        match err {
            InstanceError::ScriptFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "disk full");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn default_stream_excludes_named_blob_directories() {
        let (instance, ssh) = instance_with(
            &[
                "/var/vcap/jobs/redis/bin/p-backup",
                "/var/vcap/jobs/broker/bin/p-backup",
            ],
            &[("broker", "broker-blob")],
        );
        ssh.set_stream_body(b"archive-bytes");

        let sink = SharedSink::new();
        instance
            .stream_backup_from_remote(None, Box::new(sink.clone()))
            .await
            .unwrap();

        assert_eq!(sink.contents(), b"archive-bytes");
        assert_eq!(
            ssh.commands(),
            vec!["sudo tar -C /var/vcap/store/backup -zc --exclude=./broker-blob ."]
        );
    }

    #[tokio::test]
    async fn named_blob_streams_from_its_subdirectory() {
        let (instance, ssh) = instance_with(
            &["/var/vcap/jobs/broker/bin/p-backup"],
            &[("broker", "broker-blob")],
        );

        instance
            .stream_backup_from_remote(Some("broker-blob"), Box::new(std::io::sink()))
            .await
            .unwrap();

        assert_eq!(
            ssh.commands(),
            vec!["sudo tar -C /var/vcap/store/backup/broker-blob -zc ."]
        );
    }

    #[tokio::test]
    async fn stream_to_remote_creates_dir_then_unpacks() {
        let (instance, ssh) = instance_with(&["/var/vcap/jobs/redis/bin/p-restore"], &[]);

        instance
            .stream_backup_to_remote(None, Box::new(std::io::Cursor::new(b"payload".to_vec())))
            .await
            .unwrap();

        assert_eq!(
            ssh.commands(),
            vec![
                "sudo mkdir -p /var/vcap/store/backup/",
                "sudo sh -c 'tar -C /var/vcap/store/backup -zx'",
            ]
        );
        assert_eq!(ssh.uploads()[0].1, b"payload");
    }

    #[tokio::test]
    async fn checksum_parses_and_excludes_named_blobs() {
        let (instance, ssh) = instance_with(
            &[
                "/var/vcap/jobs/redis/bin/p-backup",
                "/var/vcap/jobs/broker/bin/p-backup",
            ],
            &[("broker", "broker-blob")],
        );
        ssh.stub_stdout(
            "sha256sum",
            "aaa111  ./dump.rdb\nbbb222  ./nested/appendonly.aof\nccc333  ./broker-blob/state\n",
        );

        let checksums = instance.backup_checksum(None).await.unwrap();

        assert_eq!(checksums.get("dump.rdb").map(String::as_str), Some("aaa111"));
        assert_eq!(
            checksums.get("nested/appendonly.aof").map(String::as_str),
            Some("bbb222")
        );
        assert!(!checksums.contains_key("broker-blob/state"));
    }

    #[tokio::test]
    async fn cleanup_removes_staging_dir_and_closes_connection() {
        let (instance, ssh) = instance_with(&["/var/vcap/jobs/redis/bin/p-backup"], &[]);

        instance.cleanup().await.unwrap();

        assert_eq!(ssh.commands(), vec!["sudo rm -rf /var/vcap/store/backup"]);
        assert_eq!(ssh.close_count(), 1);
    }

    #[tokio::test]
    async fn cleanup_closes_connection_even_when_removal_fails() {
        let (instance, ssh) = instance_with(&["/var/vcap/jobs/redis/bin/p-backup"], &[]);
        ssh.stub_failure("rm -rf", 1, "permission denied");

        let err = instance.cleanup().await.unwrap_err();

        assert!(err.to_string().contains("permission denied"));
        assert_eq!(ssh.close_count(), 1);
    }
}
