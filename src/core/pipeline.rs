//! Backup workflow for a single volume.
//!
//! Preparation runs the provider's dump command in every running container
//! that mounts the volume. Then four workers run one after the other against
//! the same destination: backup, retire old snapshots, clean up orphans and
//! verify. Each stage depends on the repository state left by the previous
//! one, so stages never overlap.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BackupSettings;
use crate::core::classifier::Provider;
use crate::core::exec::RemoteExec;
use crate::core::job_runner::RemoteJobRunner;
use crate::core::models::{ContainerState, JobOutcome, JobRequest, Mount, Volume};
use crate::core::platform::Platform;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Backup,
    Retire,
    Cleanup,
    Verify,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backup => "backup",
            Self::Retire => "retire",
            Self::Cleanup => "cleanup",
            Self::Verify => "verify",
        }
    }
}

/// One worker command and the mounts it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageJob {
    pub stage: Stage,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
}

/// The ordered stages backing up one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupJobSpec {
    pub volume: String,
    pub source: String,
    pub destination: String,
    pub stages: Vec<StageJob>,
}

/// Flat-namespace object stores cannot hold `/` in container paths.
pub fn path_separator(target_url: &str) -> &'static str {
    if target_url.starts_with("swift://") {
        "_"
    } else {
        "/"
    }
}

impl BackupJobSpec {
    pub fn new(volume: &Volume, provider: &dyn Provider, settings: &BackupSettings) -> Self {
        let sep = path_separator(&settings.target_url);
        let hostname = if volume.hostname.is_empty() {
            settings.hostname.as_str()
        } else {
            volume.hostname.as_str()
        };
        let destination = format!(
            "{}{sep}{hostname}{sep}{}",
            settings.target_url.trim_end_matches('/'),
            volume.name
        );

        let source = match provider.backup_dir() {
            "" => volume.mountpoint.clone(),
            dir => format!("{}/{dir}", volume.mountpoint.trim_end_matches('/')),
        };

        let full_if_older_than = volume
            .config
            .full_if_older_than
            .clone()
            .unwrap_or_else(|| settings.full_if_older_than.clone());
        let remove_older_than = volume
            .config
            .remove_older_than
            .clone()
            .unwrap_or_else(|| settings.remove_older_than.clone());

        let data = Mount::new(&volume.name, &volume.mountpoint).read_only();
        let cache = Mount::parse(&settings.cache_volume);
        let with_data: Vec<Mount> = std::iter::once(data).chain(cache.clone()).collect();
        let cache_only: Vec<Mount> = cache.into_iter().collect();

        let common = |args: &[&str]| -> Vec<String> {
            let mut command: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            command.extend(
                [
                    "--s3-use-new-style",
                    "--ssh-options",
                    "-oStrictHostKeyChecking=no",
                    "--no-encryption",
                    "--name",
                ]
                .map(String::from),
            );
            command.push(volume.name.clone());
            command
        };

        let mut backup = common(&["--full-if-older-than", full_if_older_than.as_str()]);
        backup.extend(["--allow-source-mismatch".to_string(), source.clone(), destination.clone()]);

        let mut retire = common(&["remove-older-than", remove_older_than.as_str()]);
        retire.extend(["--force".to_string(), destination.clone()]);

        let mut cleanup = common(&["cleanup"]);
        cleanup.extend([
            "--force".to_string(),
            "--extra-clean".to_string(),
            destination.clone(),
        ]);

        let mut verify = common(&["verify"]);
        verify.extend(["--allow-source-mismatch".to_string(), destination.clone(), source.clone()]);

        let stages = vec![
            StageJob {
                stage: Stage::Backup,
                command: backup,
                mounts: with_data.clone(),
            },
            StageJob {
                stage: Stage::Retire,
                command: retire,
                mounts: cache_only.clone(),
            },
            StageJob {
                stage: Stage::Cleanup,
                command: cleanup,
                mounts: cache_only,
            },
            StageJob {
                stage: Stage::Verify,
                command: verify,
                mounts: with_data,
            },
        ];

        Self {
            volume: volume.name.clone(),
            source,
            destination,
            stages,
        }
    }
}

/// Outcome of a volume's pipeline.
#[derive(Debug, Clone)]
pub struct VolumeReport {
    pub volume: String,
    pub provider: &'static str,
    pub prepared_containers: usize,
    pub stages: Vec<(Stage, JobOutcome)>,
}

impl VolumeReport {
    pub fn verify_exit_code(&self) -> Option<i32> {
        self.stages
            .iter()
            .find(|(stage, _)| *stage == Stage::Verify)
            .map(|(_, outcome)| outcome.exit_code)
    }
}

#[derive(Clone)]
pub struct BackupPipeline {
    platform: Arc<dyn Platform>,
    exec: RemoteExec,
    runner: RemoteJobRunner,
    settings: BackupSettings,
}

impl BackupPipeline {
    pub fn new(
        platform: Arc<dyn Platform>,
        exec: RemoteExec,
        runner: RemoteJobRunner,
        settings: BackupSettings,
    ) -> Self {
        Self {
            platform,
            exec,
            runner,
            settings,
        }
    }

    /// Run the preparation command in each running container mounting the volume.
    ///
    /// Returns how many containers ran it. Failures in one container are logged
    /// and do not stop the others.
    pub async fn prepare(
        &self,
        volume: &Volume,
        provider: &dyn Provider,
    ) -> Result<usize, PipelineError> {
        if provider.prepare_command("").is_none() {
            info!(volume = %volume.name, provider = provider.name(), "No preparation needed");
            return Ok(0);
        }

        let mounts = self
            .platform
            .volume_mounts(&volume.id)
            .await
            .map_err(|source| PipelineError::Mounts {
                volume: volume.name.clone(),
                source,
            })?;

        let mut prepared = 0;
        for mount in mounts {
            match self.platform.inspect_container(&mount.container_id).await {
                Ok(status) if status.state == ContainerState::Running => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(container = %mount.container_id, error = %e, "Failed to inspect container");
                    continue;
                }
            }

            let Some(command) = provider.prepare_command(&mount.path) else {
                continue;
            };

            info!(
                volume = %volume.name,
                container = %mount.container_id,
                provider = provider.name(),
                "Preparing volume"
            );
            match self.exec.run(&mount.container_id, &command).await {
                Ok(_) => prepared += 1,
                Err(e) => warn!(
                    volume = %volume.name,
                    container = %mount.container_id,
                    cmd = %command.join(" "),
                    error = %e,
                    "Preparation command failed"
                ),
            }
        }

        Ok(prepared)
    }

    /// Prepare, then run the four stages in order.
    pub async fn run(
        &self,
        volume: &Volume,
        provider: &dyn Provider,
    ) -> Result<VolumeReport, PipelineError> {
        let prepared_containers = match self.prepare(volume, provider).await {
            Ok(n) => n,
            Err(e) => {
                warn!(volume = %volume.name, error = %e, "Preparation skipped");
                0
            }
        };

        let spec = BackupJobSpec::new(volume, provider, &self.settings);
        info!(
            volume = %volume.name,
            source = %spec.source,
            destination = %spec.destination,
            "Backing up volume"
        );

        let mut stages = Vec::with_capacity(spec.stages.len());
        for job in spec.stages {
            let request = JobRequest {
                image: self.settings.image.clone(),
                command: job.command,
                host_id: Some(volume.host_id.clone()),
                mounts: job.mounts,
            };

            let outcome = self
                .runner
                .run(&request)
                .await
                .map_err(|source| PipelineError::Stage {
                    volume: volume.name.clone(),
                    stage: job.stage.as_str(),
                    source,
                })?;

            if !outcome.succeeded() {
                warn!(
                    volume = %volume.name,
                    stage = job.stage.as_str(),
                    exit_code = outcome.exit_code,
                    output = %outcome.output,
                    "Stage failed"
                );
            }
            stages.push((job.stage, outcome));
        }

        Ok(VolumeReport {
            volume: volume.name.clone(),
            provider: provider.name(),
            prepared_containers,
            stages,
        })
    }
}
