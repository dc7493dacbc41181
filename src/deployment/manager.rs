// deployment/manager.rs
//
// Resolves deployments from the director and discovers instance jobs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};

use crate::artifact::Artifact;
use crate::instance::{
    DeployedInstance, InstanceError, JobMetadata, Jobs, Script, ScriptKind,
};
use crate::ssh::{SshConnection, SshDialer};

use super::deployment::Deployment;
use super::director::{DirectorClient, VmSpec};
use super::error::DeploymentError;

const FIND_SCRIPTS_CMD: &str = "sudo find /var/vcap/jobs/*/bin/* -type f";

/// Resolves deployment metadata into a connected [`Deployment`].
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    async fn find(&self, name: &str) -> Result<Deployment, DeploymentError>;

    /// Snapshot the deployment manifest into the artifact.
    async fn save_manifest(&self, name: &str, artifact: &Artifact)
        -> Result<(), DeploymentError>;
}

/// Production manager: asks the director for VMs, dials each one over SSH
/// and classifies the lifecycle scripts found there.
pub struct DirectorDeploymentManager {
    director: Arc<dyn DirectorClient>,
    dialer: Arc<dyn SshDialer>,
    parallelism: usize,
    external_blob_names: Vec<String>,
}

impl DirectorDeploymentManager {
    pub fn new(
        director: Arc<dyn DirectorClient>,
        dialer: Arc<dyn SshDialer>,
        parallelism: usize,
        external_blob_names: Vec<String>,
    ) -> Self {
        Self {
            director,
            dialer,
            parallelism,
            external_blob_names,
        }
    }

    async fn discover_instance(
        &self,
        vm: VmSpec,
    ) -> Result<DeployedInstance, DeploymentError> {
        debug!("Discovering scripts on {}/{}", vm.group, vm.id);
        let connection = self.dialer.dial(&vm.host).await?;
        let jobs = discover_jobs(connection.as_ref(), &vm).await?;
        Ok(DeployedInstance::new(
            vm.group, vm.index, vm.id, jobs, connection,
        ))
    }
}

#[async_trait]
impl DeploymentManager for DirectorDeploymentManager {
    async fn find(&self, name: &str) -> Result<Deployment, DeploymentError> {
        info!("Looking up deployment {}...", name);
        let mut vms = self.director.vms(name).await?;
        vms.sort_by(|a, b| (&a.group, &a.index).cmp(&(&b.group, &b.index)));

        let mut instances = Vec::with_capacity(vms.len());
        for vm in vms {
            instances.push(self.discover_instance(vm).await?);
        }

        Ok(Deployment::new(name, instances)
            .with_parallelism(self.parallelism)
            .with_external_blob_names(self.external_blob_names.clone()))
    }

    async fn save_manifest(
        &self,
        name: &str,
        artifact: &Artifact,
    ) -> Result<(), DeploymentError> {
        let manifest = self.director.manifest(name).await?;
        artifact.save_manifest(&manifest)?;
        Ok(())
    }
}

async fn discover_jobs(
    connection: &dyn SshConnection,
    vm: &VmSpec,
) -> Result<Jobs, DeploymentError> {
    let output = connection
        .run(FIND_SCRIPTS_CMD)
        .await
        .map_err(InstanceError::from)?;

    // An instance with no jobs makes the glob fail; that is not an error.
    let scripts: Vec<Script> = if output.success() {
        output
            .stdout_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(Script::new)
            .collect()
    } else {
        debug!(
            "No lifecycle scripts found on {}/{}: {}",
            vm.group,
            vm.id,
            output.stderr_string()
        );
        Vec::new()
    };

    let mut metadata = HashMap::new();
    for script in &scripts {
        if script.kind() != Some(ScriptKind::Metadata) {
            continue;
        }
        let Some(job) = script.job_name() else {
            continue;
        };
        let output = connection
            .run(&format!("sudo {}", script.path()))
            .await
            .map_err(InstanceError::from)?;
        if !output.success() {
            return Err(InstanceError::ScriptFailed {
                instance: format!("{}/{}", vm.group, vm.id),
                job: job.to_string(),
                kind: ScriptKind::Metadata,
                exit_code: output.exit_code,
                stderr: output.stderr_string(),
            }
            .into());
        }
        metadata.insert(job.to_string(), JobMetadata::parse(job, &output.stdout_string())?);
    }

    Ok(Jobs::classify(scripts, &metadata))
}
