//! Rancher Cattle platform over its v2 HTTP API.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::PlatformSettings;
use crate::core::models::{
    AccessDescriptor, ContainerState, ContainerStatus, ContainerSummary, Host, PlatformVolume,
    StoragePool, VolumeMount, WorkerSpec,
};
use crate::core::platform::Platform;
use crate::error::PlatformError;

/// Host name of the Cattle metadata service, resolvable only inside a Cattle environment.
pub const METADATA_HOST: &str = "rancher-metadata";

pub struct CattlePlatform {
    client: Client,
    url: String,
    metadata_url: String,
    access_key: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct Collection<T> {
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMount {
    #[serde(default)]
    path: String,
    #[serde(default)]
    instance_id: String,
}

#[derive(Deserialize)]
struct ApiVolume {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mounts: Option<Vec<ApiMount>>,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiStoragePool {
    #[serde(default)]
    host_ids: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ApiHost {
    id: String,
    #[serde(default)]
    hostname: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    environment: Option<BTreeMap<String, String>>,
    #[serde(default)]
    start_count: Option<u32>,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    removed: Option<String>,
}

#[derive(Deserialize)]
struct ApiHostAccess {
    url: String,
    token: String,
}

#[derive(Deserialize)]
struct ApiSelfContainer {
    name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRestartPolicy<'a> {
    maximum_retry_count: u32,
    name: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiCreateContainer<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    requested_host_id: Option<&'a str>,
    image_uuid: String,
    command: &'a [String],
    environment: &'a BTreeMap<String, String>,
    restart_policy: ApiRestartPolicy<'a>,
    data_volumes: &'a [String],
}

impl From<ApiVolume> for PlatformVolume {
    fn from(v: ApiVolume) -> Self {
        PlatformVolume {
            id: v.id,
            name: v.name.unwrap_or_default(),
            mountpoint: v
                .mounts
                .unwrap_or_default()
                .into_iter()
                .next()
                .map(|m| m.path),
            labels: v.labels.unwrap_or_default(),
        }
    }
}

impl From<&ApiContainer> for ContainerStatus {
    fn from(c: &ApiContainer) -> Self {
        let removed = c.removed.as_deref().is_some_and(|r| !r.is_empty())
            || matches!(c.state.as_str(), "removed" | "purged");
        ContainerStatus {
            state: ContainerState::parse(&c.state),
            restart_count: c.start_count.unwrap_or(0),
            exit_code: c.exit_code,
            removed,
        }
    }
}

impl From<ApiContainer> for ContainerSummary {
    fn from(c: ApiContainer) -> Self {
        ContainerSummary {
            id: c.id,
            name: c.name.unwrap_or_default(),
            state: ContainerState::parse(&c.state),
            environment: c.environment.unwrap_or_default(),
        }
    }
}

impl CattlePlatform {
    pub fn new(settings: &PlatformSettings) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|source| PlatformError::Http {
                endpoint: settings.url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            url: settings.url.trim_end_matches('/').to_string(),
            metadata_url: settings.metadata_url.trim_end_matches('/').to_string(),
            access_key: settings.access_key.clone(),
            secret_key: settings.secret_key.clone(),
        })
    }

    fn api(&self, method: Method, endpoint: &str) -> RequestBuilder {
        self.client
            .request(method, endpoint)
            .basic_auth(&self.access_key, Some(&self.secret_key))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, PlatformError> {
        let http = |source| PlatformError::Http {
            endpoint: endpoint.to_string(),
            source,
        };

        let response = request.send().await.map_err(http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlatformError::Status {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().await.map_err(http)
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, PlatformError> {
        debug!(endpoint = %endpoint, "GET");
        self.send(self.api(Method::GET, endpoint), endpoint).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, PlatformError> {
        debug!(endpoint = %endpoint, "POST");
        self.send(self.api(Method::POST, endpoint).json(body), endpoint)
            .await
    }

    async fn container(&self, id: &str) -> Result<ApiContainer, PlatformError> {
        self.get(&format!("{}/containers/{id}", self.url)).await
    }
}

#[async_trait]
impl Platform for CattlePlatform {
    fn name(&self) -> &'static str {
        "Cattle"
    }

    async fn list_volumes(&self) -> Result<Vec<PlatformVolume>, PlatformError> {
        let volumes: Collection<ApiVolume> = self
            .get(&format!("{}/volumes?limit=-2&all=true", self.url))
            .await?;
        Ok(volumes.data.into_iter().map(PlatformVolume::from).collect())
    }

    async fn storage_pools(
        &self,
        volume: &PlatformVolume,
    ) -> Result<Vec<StoragePool>, PlatformError> {
        let pools: Collection<ApiStoragePool> = self
            .get(&format!("{}/volumes/{}/storagepools", self.url, volume.id))
            .await?;
        Ok(pools
            .data
            .into_iter()
            .map(|p| StoragePool {
                host_ids: p.host_ids.unwrap_or_default(),
            })
            .collect())
    }

    async fn host(&self, host_id: &str) -> Result<Host, PlatformError> {
        let host: ApiHost = self.get(&format!("{}/hosts/{host_id}", self.url)).await?;
        Ok(Host {
            id: host.id,
            hostname: host.hostname.unwrap_or_default(),
        })
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, PlatformError> {
        let containers: Collection<ApiContainer> = self
            .get(&format!("{}/containers?limit=-2&all=true", self.url))
            .await?;
        Ok(containers
            .data
            .into_iter()
            .map(ContainerSummary::from)
            .collect())
    }

    async fn self_container_name(&self) -> Result<String, PlatformError> {
        let endpoint = format!("{}/self/container", self.metadata_url);
        let request = self
            .client
            .get(&endpoint)
            .header(reqwest::header::ACCEPT, "application/json");
        let container: ApiSelfContainer = self.send(request, &endpoint).await?;
        Ok(container.name)
    }

    async fn create_container(&self, spec: &WorkerSpec) -> Result<String, PlatformError> {
        let body = ApiCreateContainer {
            name: &spec.name,
            requested_host_id: spec.host_id.as_deref(),
            image_uuid: format!("docker:{}", spec.image),
            command: &spec.command,
            environment: &spec.environment,
            restart_policy: ApiRestartPolicy {
                maximum_retry_count: spec.restart_policy.max_retry,
                name: &spec.restart_policy.name,
            },
            data_volumes: &spec.binds,
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| PlatformError::Unavailable(format!("invalid worker spec: {e}")))?;

        let created: ApiContainer = self
            .post(&format!("{}/containers", self.url), &body)
            .await?;
        Ok(created.id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, PlatformError> {
        let container = self.container(id).await?;
        Ok(ContainerStatus::from(&container))
    }

    async fn delete_container(&self, id: &str) -> Result<(), PlatformError> {
        let endpoint = format!("{}/containers/{id}", self.url);
        debug!(endpoint = %endpoint, "DELETE");
        let response = self
            .api(Method::DELETE, &endpoint)
            .send()
            .await
            .map_err(|source| PlatformError::Http {
                endpoint: endpoint.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(PlatformError::Status {
                endpoint,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }

    async fn volume_mounts(&self, volume_id: &str) -> Result<Vec<VolumeMount>, PlatformError> {
        let volume: ApiVolume = self
            .get(&format!("{}/volumes/{volume_id}", self.url))
            .await?;
        Ok(volume
            .mounts
            .unwrap_or_default()
            .into_iter()
            .map(|m| VolumeMount {
                container_id: m.instance_id,
                path: m.path,
            })
            .collect())
    }

    async fn exec(
        &self,
        id: &str,
        command: &[String],
    ) -> Result<AccessDescriptor, PlatformError> {
        let body = json!({
            "attachStdin": false,
            "attachStdout": true,
            "command": command,
            "tty": false,
        });
        let access: ApiHostAccess = self
            .post(
                &format!("{}/containers/{id}?action=execute", self.url),
                &body,
            )
            .await?;
        Ok(AccessDescriptor {
            url: access.url,
            token: access.token,
        })
    }

    async fn container_logs(&self, id: &str) -> Result<AccessDescriptor, PlatformError> {
        // without follow the stream closes once the existing output is sent
        let body = json!({ "follow": false });
        let access: ApiHostAccess = self
            .post(&format!("{}/containers/{id}?action=logs", self.url), &body)
            .await?;
        Ok(AccessDescriptor {
            url: access.url,
            token: access.token,
        })
    }
}

/// True when the Cattle metadata service resolves, i.e. we run inside Cattle.
pub async fn detect() -> bool {
    tokio::net::lookup_host((METADATA_HOST, 80)).await.is_ok()
}
