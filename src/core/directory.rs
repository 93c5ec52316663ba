use tracing::{debug, error, warn};

use crate::core::models::{DEFAULT_MOUNTPOINT, PlatformVolume, Volume, VolumeConfig};
use crate::core::platform::Platform;
use crate::error::DirectoryError;

/// Lists platform volumes and resolves each one to the host owning its storage.
pub struct VolumeDirectory<'a> {
    platform: &'a dyn Platform,
    label_prefix: &'a str,
}

impl<'a> VolumeDirectory<'a> {
    pub fn new(platform: &'a dyn Platform, label_prefix: &'a str) -> Self {
        Self {
            platform,
            label_prefix,
        }
    }

    /// Every volume whose storage pool and host could be resolved.
    ///
    /// Volumes without a resolvable pool or host are logged and left out. An
    /// unresolvable host name degrades to an empty string.
    pub async fn volumes(&self) -> Result<Vec<Volume>, DirectoryError> {
        let listed = self
            .platform
            .list_volumes()
            .await
            .map_err(DirectoryError::ListVolumes)?;

        let mut volumes = Vec::with_capacity(listed.len());
        for raw in listed {
            if let Some(volume) = self.resolve(raw).await {
                volumes.push(volume);
            }
        }

        debug!(count = volumes.len(), "Volumes resolved");
        Ok(volumes)
    }

    async fn resolve(&self, raw: PlatformVolume) -> Option<Volume> {
        let pools = match self.platform.storage_pools(&raw).await {
            Ok(pools) => pools,
            Err(e) => {
                error!(volume = %raw.name, error = %e, "Failed to retrieve storage pool");
                return None;
            }
        };

        let Some(pool) = pools.first() else {
            error!(volume = %raw.name, "No storage pool for volume");
            return None;
        };

        let Some(host_id) = pool.host_ids.first().cloned() else {
            error!(volume = %raw.name, "No host for volume");
            return None;
        };

        let hostname = match self.platform.host(&host_id).await {
            Ok(host) => host.hostname,
            Err(e) => {
                warn!(volume = %raw.name, host = %host_id, error = %e, "Failed to retrieve host");
                String::new()
            }
        };

        let config = VolumeConfig::from_labels(&raw.labels, self.label_prefix);
        let mountpoint = raw
            .mountpoint
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_MOUNTPOINT.to_string());

        Some(Volume {
            id: raw.id,
            name: raw.name,
            mountpoint,
            host_id,
            hostname,
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedPlatform;
    use crate::core::models::{Host, StoragePool};

    fn raw(id: &str, name: &str, mountpoint: Option<&str>) -> PlatformVolume {
        PlatformVolume {
            id: id.into(),
            name: name.into(),
            mountpoint: mountpoint.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resolves_host_and_defaults_mountpoint() {
        let platform = SimulatedPlatform::new();
        platform.add_host(Host {
            id: "1h1".into(),
            hostname: "node-a".into(),
        });
        platform.add_volume(
            raw("1v1", "pgdata", None),
            vec![StoragePool {
                host_ids: vec!["1h1".into(), "1h2".into()],
            }],
        );

        let volumes = VolumeDirectory::new(&platform, "io.voltback")
            .volumes()
            .await
            .unwrap();

        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].mountpoint, "/data");
        assert_eq!(volumes[0].host_id, "1h1");
        assert_eq!(volumes[0].hostname, "node-a");
    }

    #[tokio::test]
    async fn skips_volumes_without_pool_or_host() {
        let platform = SimulatedPlatform::new();
        platform.add_volume(raw("1v1", "nopool", Some("/var/a")), vec![]);
        platform.add_volume(
            raw("1v2", "nohost", Some("/var/b")),
            vec![StoragePool { host_ids: vec![] }],
        );
        platform.add_volume(
            raw("1v3", "kept", Some("/var/c")),
            vec![StoragePool {
                host_ids: vec!["1h9".into()],
            }],
        );

        let volumes = VolumeDirectory::new(&platform, "io.voltback")
            .volumes()
            .await
            .unwrap();

        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "kept");
        assert_eq!(volumes[0].mountpoint, "/var/c");
        // host 1h9 is unknown: tolerated with an empty hostname
        assert_eq!(volumes[0].hostname, "");
    }
}
