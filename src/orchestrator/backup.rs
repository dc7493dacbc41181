// orchestrator/backup.rs
//
// Backup and backup pre-check runs over the workflow state machine

use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::artifact::{Artifact, ArtifactStore};
use crate::deployment::{Deployment, DeploymentManager};
use crate::instance::REMOTE_ARTIFACT_DIR;

use super::error::{Error, OrchestratorError, Phase};
use super::workflow::{self, Event, Workflow};

/// Drives a deployment through a backup run, or through the pre-check
/// flavour that validates invariants and cleans up without creating an
/// artifact.
pub struct Backuper {
    manager: Arc<dyn DeploymentManager>,
    store: ArtifactStore,
}

impl Backuper {
    pub fn new(manager: Arc<dyn DeploymentManager>, store: ArtifactStore) -> Self {
        Self { manager, store }
    }

    /// Run a full backup of `deployment_name`. The returned accumulation
    /// is empty iff every phase succeeded.
    pub async fn backup(&self, deployment_name: &str) -> Error {
        BackupFlow::new(self, deployment_name, workflow::backup_transitions())
            .run()
            .await
    }

    /// Run only the pre-checks: deployment resolution and backupability
    /// invariants, followed by cleanup.
    pub async fn check(&self, deployment_name: &str) -> Error {
        BackupFlow::new(self, deployment_name, workflow::backup_check_transitions())
            .run()
            .await
    }
}

struct BackupFlow<'a> {
    backuper: &'a Backuper,
    deployment_name: String,
    workflow: Workflow,
    deployment: Option<Deployment>,
    artifact: Option<Artifact>,
    errors: Error,
}

impl<'a> BackupFlow<'a> {
    fn new(
        backuper: &'a Backuper,
        deployment_name: &str,
        transitions: Vec<workflow::Transition>,
    ) -> Self {
        Self {
            backuper,
            deployment_name: deployment_name.to_string(),
            workflow: Workflow::new(transitions),
            deployment: None,
            artifact: None,
            errors: Error::new(),
        }
    }

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

    /// Returns whether the transition should happen; `false` cancels it.
    async fn handle(&mut self, event: Event) -> bool {
        match event {
            Event::CheckDeployment => self.check_deployment().await,
            Event::CheckIsBackupable => self.check_is_backupable().await,
            Event::CreateArtifact => self.create_artifact().await,
            Event::PreBackupLock => self.pre_backup_lock().await,
            Event::Backup => self.backup().await,
            Event::PostBackupUnlock => self.post_backup_unlock().await,
            Event::Drain => self.drain().await,
            Event::Cleanup => self.cleanup().await,
            _ => true,
        }
    }

    async fn check_deployment(&mut self) -> bool {
        info!("Running pre-checks for backup of {}...", self.deployment_name);

        if self.backuper.store.exists(&self.deployment_name) {
            self.errors.push(OrchestratorError::General(format!(
                "artifact {} already exists",
                self.deployment_name
            )));
            return false;
        }

        match self.backuper.manager.find(&self.deployment_name).await {
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

    async fn check_is_backupable(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return false;
        };
        let mut advance = true;

        if !deployment.has_backup_script() {
            self.errors.push(OrchestratorError::Check(format!(
                "Deployment '{}' has no backup scripts",
                self.deployment_name
            )));
            return false;
        }

        match deployment.remote_artifact_dir_exists().await {
            Ok(true) => {
                self.errors.push(OrchestratorError::Check(format!(
                    "Deployment '{}' - {} already exists on an instance",
                    self.deployment_name, REMOTE_ARTIFACT_DIR
                )));
                return false;
            }
            Ok(false) => {}
            Err(err) => {
                self.errors.push(OrchestratorError::phase(Phase::Check, &err));
                return false;
            }
        }

        if !deployment.has_unique_custom_backup_names() {
            self.errors.push(OrchestratorError::Check(format!(
                "Multiple jobs in deployment '{}' specified the same backup name",
                self.deployment_name
            )));
            advance = false;
        }

        if let Err(err) = deployment.custom_artifact_names_match() {
            self.errors.push(OrchestratorError::Check(err.to_string()));
            advance = false;
        }

        advance
    }

    async fn create_artifact(&mut self) -> bool {
        info!("Starting backup of {}...", self.deployment_name);

        let artifact = match self.backuper.store.create(&self.deployment_name) {
            Ok(artifact) => artifact,
            Err(err) => {
                self.errors.push(OrchestratorError::General(err.to_string()));
                return false;
            }
        };

        if let Err(err) = self
            .backuper
            .manager
            .save_manifest(&self.deployment_name, &artifact)
            .await
        {
            self.errors.push(OrchestratorError::General(err.to_string()));
            return false;
        }

        self.artifact = Some(artifact);
        true
    }

    async fn pre_backup_lock(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return false;
        };
        match deployment.pre_backup_lock().await {
            Ok(()) => true,
            Err(err) => {
                self.errors.push(OrchestratorError::phase(Phase::Lock, &err));
                false
            }
        }
    }

    async fn backup(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return false;
        };
        if let Err(err) = deployment.backup().await {
            self.errors.push(OrchestratorError::phase(Phase::Backup, &err));
        }
        // Advance regardless, so the unlock event fires from BackedUp.
        true
    }

    async fn post_backup_unlock(&mut self) -> bool {
        let Some(deployment) = self.deployment.as_ref() else {
            return false;
        };
        if let Err(err) = deployment.post_backup_unlock().await {
            self.errors
                .push(OrchestratorError::phase(Phase::PostBackupUnlock, &err));
        }
        true
    }

    async fn drain(&mut self) -> bool {
        if self.errors.is_fatal() {
            return false;
        }
        let (Some(deployment), Some(artifact)) =
            (self.deployment.as_ref(), self.artifact.as_ref())
        else {
            return false;
        };

        match deployment.copy_remote_backup_to_local(artifact).await {
            Ok(()) => {
                info!(
                    "Backup created of {} on {}",
                    self.deployment_name,
                    Utc::now()
                );
            }
            Err(err) => {
                self.errors.push(OrchestratorError::phase(Phase::Drain, &err));
            }
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
