use std::collections::BTreeMap;
use std::fmt;

/// Volume path used when the platform reports no mount for a volume.
pub const DEFAULT_MOUNTPOINT: &str = "/data";

/// A volume as reported by the platform, before host resolution.
#[derive(Debug, Clone, Default)]
pub struct PlatformVolume {
    pub id: String,
    pub name: String,
    /// Path of the first mount, if the volume is mounted anywhere.
    pub mountpoint: Option<String>,
    pub labels: BTreeMap<String, String>,
}

/// A storage pool backing volumes, bound to one or more hosts.
#[derive(Debug, Clone, Default)]
pub struct StoragePool {
    pub host_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Host {
    pub id: String,
    pub hostname: String,
}

/// Per-volume settings read from volume labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeConfig {
    pub ignore: bool,
    pub full_if_older_than: Option<String>,
    pub remove_older_than: Option<String>,
}

impl VolumeConfig {
    /// Read `<prefix>.ignore`, `<prefix>.full_if_older_than` and
    /// `<prefix>.remove_older_than`. Empty values count as unset.
    pub fn from_labels(labels: &BTreeMap<String, String>, prefix: &str) -> Self {
        let label = |key: &str| {
            labels
                .get(&format!("{prefix}.{key}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            ignore: label("ignore").is_some_and(|v| v.eq_ignore_ascii_case("true")),
            full_if_older_than: label("full_if_older_than"),
            remove_older_than: label("remove_older_than"),
        }
    }
}

/// A volume resolved to the host that owns its storage.
#[derive(Debug, Clone, Default)]
pub struct Volume {
    pub id: String,
    pub name: String,
    pub mountpoint: String,
    pub host_id: String,
    /// Empty when the host name could not be resolved.
    pub hostname: String,
    pub config: VolumeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Other(String),
}

impl ContainerState {
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => f.write_str("running"),
            Self::Stopped => f.write_str("stopped"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Entry of the platform's container listing.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub environment: BTreeMap<String, String>,
}

/// Observed status of a single container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub state: ContainerState,
    /// How many times the platform has started the container.
    pub restart_count: u32,
    /// Only set on platforms that report it.
    pub exit_code: Option<i32>,
    /// The platform has fully removed the container.
    pub removed: bool,
}

impl ContainerStatus {
    pub fn running(restart_count: u32) -> Self {
        Self {
            state: ContainerState::Running,
            restart_count,
            exit_code: None,
            removed: false,
        }
    }

    pub fn stopped(restart_count: u32) -> Self {
        Self {
            state: ContainerState::Stopped,
            restart_count,
            exit_code: None,
            removed: false,
        }
    }
}

/// A container mounting a given volume, and where it mounts it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub container_id: String,
    pub path: String,
}

/// URL plus token granting access to a console stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDescriptor {
    pub url: String,
    pub token: String,
}

/// A volume (or named cache volume) bound into a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// `source:target` or `source:target:ro`.
    pub fn bind(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }

    /// Parse a `source:target[:ro]` bind string.
    pub fn parse(bind: &str) -> Option<Self> {
        let mut parts = bind.splitn(3, ':');
        let source = parts.next().filter(|s| !s.is_empty())?;
        let target = parts.next().filter(|s| !s.is_empty())?;
        let read_only = match parts.next() {
            None => false,
            Some("ro") => true,
            Some("rw") => false,
            Some(_) => return None,
        };
        Some(Self {
            source: source.to_string(),
            target: target.to_string(),
            read_only,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    pub name: String,
    pub max_retry: u32,
}

impl RestartPolicy {
    pub fn on_failure(max_retry: u32) -> Self {
        Self {
            name: "on-failure".to_string(),
            max_retry,
        }
    }
}

/// Everything the platform needs to create a worker container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    /// Host the worker must run on; `None` lets the platform choose.
    pub host_id: Option<String>,
    pub image: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub binds: Vec<String>,
    pub restart_policy: RestartPolicy,
}

/// A command to run in a worker, with the volumes it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub image: String,
    pub command: Vec<String>,
    pub host_id: Option<String>,
    pub mounts: Vec<Mount>,
}

/// Lifecycle of a worker container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    /// First stop seen; may still be restarted by the platform.
    StoppedOnce,
    Terminated,
    Failed,
    Deleted,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::StoppedOnce => "stopped-once",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished worker job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub worker: String,
    /// `Terminated` or `Failed`.
    pub state: JobState,
    pub exit_code: i32,
    pub output: String,
}

impl JobOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == JobState::Terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_config_reads_prefixed_labels() {
        let labels = BTreeMap::from([
            ("io.voltback.ignore".to_string(), "true".to_string()),
            ("io.voltback.full_if_older_than".to_string(), "7D".to_string()),
            ("io.voltback.remove_older_than".to_string(), "  ".to_string()),
            ("other.full_if_older_than".to_string(), "1D".to_string()),
        ]);

        let config = VolumeConfig::from_labels(&labels, "io.voltback");
        assert!(config.ignore);
        assert_eq!(config.full_if_older_than.as_deref(), Some("7D"));
        assert_eq!(config.remove_older_than, None);
    }

    #[test]
    fn mount_bind_strings() {
        assert_eq!(Mount::new("pgdata", "/data").bind(), "pgdata:/data");
        assert_eq!(
            Mount::new("pgdata", "/data").read_only().bind(),
            "pgdata:/data:ro"
        );
        assert_eq!(
            Mount::parse("cache:/root/.cache:ro"),
            Some(Mount::new("cache", "/root/.cache").read_only())
        );
        assert_eq!(Mount::parse("nocolon"), None);
        assert_eq!(Mount::parse("a:/b:zz"), None);
    }

    #[test]
    fn container_state_parsing() {
        assert_eq!(ContainerState::parse("running"), ContainerState::Running);
        assert_eq!(ContainerState::parse("stopped"), ContainerState::Stopped);
        assert_eq!(
            ContainerState::parse("starting"),
            ContainerState::Other("starting".into())
        );
    }
}
