// orchestrator/restore.rs
//
// Restore runs: validate the artifact against the deployment, push
// archives, invoke restore scripts

use std::sync::Arc;

use log::info;

use crate::artifact::{Artifact, ArtifactStore};
use crate::deployment::{Deployment, DeploymentManager};

use super::error::{Error, OrchestratorError, Phase};
use super::workflow::{self, Event, Workflow};

/// Drives a deployment through a restore from a previously drained
/// artifact.
pub struct Restorer {
    manager: Arc<dyn DeploymentManager>,
    store: ArtifactStore,
}

impl Restorer {
    pub fn new(manager: Arc<dyn DeploymentManager>, store: ArtifactStore) -> Self {
        Self { manager, store }
    }

    /// Restore `deployment_name` from the artifact of the same name.
    pub async fn restore(&self, deployment_name: &str) -> Error {
        RestoreFlow {
            restorer: self,
            deployment_name: deployment_name.to_string(),
            workflow: Workflow::new(workflow::restore_transitions()),
            deployment: None,
            artifact: None,
            errors: Error::new(),
        }
        .run()
        .await
    }
}

struct RestoreFlow<'a> {
    restorer: &'a Restorer,
    deployment_name: String,
    workflow: Workflow,
    deployment: Option<Deployment>,
    artifact: Option<Artifact>,
    errors: Error,
}

impl RestoreFlow<'_> {
    async fn run(mut self) -> Error {
        for event in self.workflow.events() {
            if let Some(dst) = self.workflow.can_fire(event) {
                if self.handle(event).await {
                    self.workflow.fire(dst);
                }
            }
        }
        self.errors
    }

    async fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::CheckDeployment => self.check_deployment().await,
            Event::CheckArtifactMatches => self.check_artifact_matches().await,
            Event::CopyToRemote => self.copy_to_remote().await,
            Event::Restore => self.restore().await,
            Event::Cleanup => self.cleanup().await,
            _ => true,
        }
    }

    async fn check_deployment(&mut self) -> bool {
        info!("Starting restore of {}...", self.deployment_name);

        let artifact = match self.restorer.store.open(&self.deployment_name) {
            Ok(artifact) => artifact,
            Err(err) => {
                self.errors.push(OrchestratorError::General(err.to_string()));
                return false;
            }
        };
        self.artifact = Some(artifact);

        match self.restorer.manager.find(&self.deployment_name).await {
            Ok(deployment) => {
                self.deployment = Some(deployment);
                true
            }
            Err(err) => {
                self.errors.push(OrchestratorError::General(err.to_string()));
                false
            }
        }
    }

    async fn check_artifact_matches(&mut self) -> bool {
        let (Some(deployment), Some(artifact)) =
            (self.deployment.as_ref(), self.artifact.as_ref())
        else {
            return false;
        };

        if !deployment.is_restorable() {
            self.errors.push(OrchestratorError::Check(format!(
                "Deployment '{}' has no restore scripts",
                self.deployment_name
            )));
            return false;
        }

        match artifact.deployment_matches(&self.deployment_name, &deployment.identities()) {
            Ok(true) => true,
            Ok(false) => {
                self.errors.push(OrchestratorError::Check(format!(
                    "Deployment '{}' does not match the structure of the provided backup",
                    self.deployment_name
                )));
                false
            }
            Err(err) => {
                self.errors.push(OrchestratorError::General(err.to_string()));
                false
            }
        }
    }

    async fn copy_to_remote(&mut self) -> bool {
        let (Some(deployment), Some(artifact)) =
            (self.deployment.as_ref(), self.artifact.as_ref())
        else {
            return false;
        };
        match deployment.copy_local_backup_to_remote(artifact).await {
            Ok(()) => true,
            Err(err) => {
                self.errors.push(OrchestratorError::phase(Phase::Restore, &err));
                false
            }
        }
    }

    async fn restore(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return false;
        };
        if let Err(err) = deployment.restore().await {
            self.errors.push(OrchestratorError::phase(Phase::Restore, &err));
        } else {
            info!("Restore of {} complete", self.deployment_name);
        }
        true
    }

    async fn cleanup(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return true;
        };
        if let Err(err) = deployment.cleanup().await {
            self.errors.push(if err.is_canceled() {
                OrchestratorError::Canceled(Phase::Cleanup)
            } else {
                OrchestratorError::Cleanup(format!(
                    "Deployment '{}' failed while cleaning up with error: {}",
                    self.deployment_name, err
                ))
            });
        }
        true
    }
}
