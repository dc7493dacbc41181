// deployment/director.rs
//
// Client contract for the director API that tracks deployments

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use super::error::DeploymentError;

/// One VM of a deployment as the director reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmSpec {
    /// Instance group name.
    pub group: String,
    /// Index within the group.
    pub index: String,
    /// Director-assigned unique id.
    pub id: String,
    /// Address the orchestrator can SSH to.
    pub host: String,
}

/// Interface to the director that manages deployments.
#[async_trait]
pub trait DirectorClient: Send + Sync {
    /// The deployment's manifest as the director stores it.
    async fn manifest(&self, deployment: &str) -> Result<String, DeploymentError>;

    /// The deployment's VMs.
    async fn vms(&self, deployment: &str) -> Result<Vec<VmSpec>, DeploymentError>;
}

/// Director client speaking the HTTP API with basic auth.
pub struct HttpDirectorClient {
    base_url: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct DeploymentResponse {
    manifest: String,
}

#[derive(Deserialize)]
struct VmResponse {
    job: String,
    index: u32,
    id: String,
    #[serde(default)]
    ips: Vec<String>,
}

impl HttpDirectorClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        allow_insecure: bool,
    ) -> Result<Self, DeploymentError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|err| DeploymentError::Director(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, DeploymentError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| DeploymentError::Director(err.to_string()))?;
        response
            .json()
            .await
            .map_err(|err| DeploymentError::Director(err.to_string()))
    }
}

#[async_trait]
impl DirectorClient for HttpDirectorClient {
    async fn manifest(&self, deployment: &str) -> Result<String, DeploymentError> {
        let response: DeploymentResponse =
            self.get(&format!("/deployments/{}", deployment)).await?;
        Ok(response.manifest)
    }

    async fn vms(&self, deployment: &str) -> Result<Vec<VmSpec>, DeploymentError> {
        let response: Vec<VmResponse> = self
            .get(&format!("/deployments/{}/vms", deployment))
            .await?;
        response
            .into_iter()
            .map(|vm| {
                let host = vm.ips.first().cloned().ok_or(DeploymentError::Unreachable {
                    group: vm.job.clone(),
                    id: vm.id.clone(),
                })?;
                Ok(VmSpec {
                    group: vm.job,
                    index: vm.index.to_string(),
                    id: vm.id,
                    host,
                })
            })
            .collect()
    }
}
