use async_trait::async_trait;

use crate::core::models::{
    AccessDescriptor, ContainerStatus, ContainerSummary, Host, PlatformVolume, StoragePool,
    VolumeMount, WorkerSpec,
};
use crate::error::PlatformError;

/// Operations the backup workflow needs from a container orchestration platform.
///
/// Any platform able to list volumes, hosts, storage pools and containers,
/// create, inspect and delete containers, and hand out exec and log access
/// descriptors can back the job runner.
#[async_trait]
pub trait Platform: Send + Sync {
    fn name(&self) -> &'static str;

    /// All volumes known to the platform, attached or not.
    async fn list_volumes(&self) -> Result<Vec<PlatformVolume>, PlatformError>;

    async fn storage_pools(&self, volume: &PlatformVolume)
    -> Result<Vec<StoragePool>, PlatformError>;

    async fn host(&self, host_id: &str) -> Result<Host, PlatformError>;

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, PlatformError>;

    /// Name of the container this process runs in, from the metadata service.
    async fn self_container_name(&self) -> Result<String, PlatformError>;

    /// Submit a worker container. Returns the platform id of the worker.
    async fn create_container(&self, spec: &WorkerSpec) -> Result<String, PlatformError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, PlatformError>;

    /// Request deletion. Removal completes asynchronously.
    async fn delete_container(&self, id: &str) -> Result<(), PlatformError>;

    /// Containers mounting the volume, whatever their state.
    async fn volume_mounts(&self, volume_id: &str) -> Result<Vec<VolumeMount>, PlatformError>;

    /// Start `command` inside a running container and return the output stream access.
    async fn exec(&self, id: &str, command: &[String])
    -> Result<AccessDescriptor, PlatformError>;

    /// Access to the console output of a container.
    async fn container_logs(&self, id: &str) -> Result<AccessDescriptor, PlatformError>;
}
