//! Runs a command in an ephemeral worker container and collects its output.
//!
//! A job goes through create, observe, log retrieval and delete. Deletion
//! happens on every path once the worker exists: success, failure, platform
//! errors, deadline expiry and cancellation.
//!
//! The platform has no "run and wait" primitive and does not always report an
//! exit code. Workers are created with an on-failure restart policy allowing a
//! single retry, and completion is inferred from the start counter:
//!
//! - stopped after one start: wait a grace period, and if it is still stopped
//!   after one start, the command succeeded (exit code 0 assumed);
//! - stopped after more than one start: the retry was consumed, the command
//!   failed;
//! - stopped without ever starting: the worker could not run (image pull,
//!   invalid spec), the command failed.
//!
//! This is a compatibility shim for platforms without exit codes. When the
//! platform reports an explicit exit code it is used instead.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use rand::Rng;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::models::{
    ContainerState, ContainerStatus, JobOutcome, JobRequest, JobState, RestartPolicy, WorkerSpec,
};
use crate::core::platform::Platform;
use crate::core::tunnel::TunnelConnector;
use crate::error::JobError;
use crate::logging::LogThrottle;

const WORKER_PREFIX: &str = "voltback-worker-";
const WORKER_SUFFIX_LEN: usize = 10;
const WORKER_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// `<length> <timestamp> <message>` as written by the platform's log stream.
static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)[0-9]{2,} [ZT\-:.0-9]+ (.*)$").expect("log line pattern is valid")
});

/// Timing of a job's poll loop and teardown.
#[derive(Debug, Clone)]
pub struct JobPolicy {
    pub poll_interval: Duration,
    /// Wait after the first observed stop before trusting it.
    pub grace_period: Duration,
    /// Deadline for the worker to finish; `None` waits forever.
    pub timeout: Option<Duration>,
    /// How long to wait for the platform to confirm removal.
    pub teardown_timeout: Duration,
}

impl Default for JobPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(5),
            timeout: Some(Duration::from_secs(4 * 3600)),
            teardown_timeout: Duration::from_secs(120),
        }
    }
}

/// What the poll loop does after one status observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    KeepPolling,
    /// Sleep for the grace period, then inspect again.
    Grace,
    Finished { state: JobState, exit_code: i32 },
}

/// Turns successive container statuses into a completion decision.
#[derive(Debug, Default)]
pub(crate) struct CompletionTracker {
    stopped_once: bool,
}

impl CompletionTracker {
    pub(crate) fn state(&self) -> JobState {
        if self.stopped_once {
            JobState::StoppedOnce
        } else {
            JobState::Running
        }
    }

    pub(crate) fn observe(&mut self, status: &ContainerStatus) -> PollStep {
        if status.state != ContainerState::Stopped {
            return PollStep::KeepPolling;
        }

        match status.exit_code {
            Some(0) => {
                return PollStep::Finished {
                    state: JobState::Terminated,
                    exit_code: 0,
                };
            }
            Some(code) if status.restart_count > 1 => {
                return PollStep::Finished {
                    state: JobState::Failed,
                    exit_code: code,
                };
            }
            _ => {}
        }

        match status.restart_count {
            1 if !self.stopped_once => {
                self.stopped_once = true;
                PollStep::Grace
            }
            1 => match status.exit_code {
                Some(code) => PollStep::Finished {
                    state: JobState::Failed,
                    exit_code: code,
                },
                None => PollStep::Finished {
                    state: JobState::Terminated,
                    exit_code: 0,
                },
            },
            _ => PollStep::Finished {
                state: JobState::Failed,
                exit_code: status.exit_code.unwrap_or(1),
            },
        }
    }
}

/// Schedules workers on the platform and waits for their result.
#[derive(Clone)]
pub struct RemoteJobRunner {
    platform: Arc<dyn Platform>,
    tunnel: Arc<dyn TunnelConnector>,
    policy: JobPolicy,
    cancel: CancellationToken,
}

impl RemoteJobRunner {
    pub fn new(
        platform: Arc<dyn Platform>,
        tunnel: Arc<dyn TunnelConnector>,
        policy: JobPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            tunnel,
            policy,
            cancel,
        }
    }

    /// Run `request` in a new worker and return its state, exit code and output.
    pub async fn run(&self, request: &JobRequest) -> Result<JobOutcome, JobError> {
        let environment = self.manager_environment().await?;

        let binds: Vec<String> = request.mounts.iter().map(|m| m.bind()).collect();
        let spec = WorkerSpec {
            name: worker_name(),
            host_id: request.host_id.clone().filter(|h| !h.is_empty()),
            image: request.image.clone(),
            command: request.command.clone(),
            environment,
            binds,
            restart_policy: RestartPolicy::on_failure(1),
        };

        let worker = self
            .platform
            .create_container(&spec)
            .await
            .map_err(|e| {
                error!(error = %e, image = %spec.image, "Failed to create worker container");
                JobError::ContainerCreate(e)
            })?;

        info!(
            worker = %worker,
            name = %spec.name,
            host = spec.host_id.as_deref().unwrap_or(""),
            state = %JobState::Created,
            "Worker created"
        );

        let result = self.observe(&worker, &spec).await;
        self.teardown(&worker).await;
        result
    }

    async fn observe(&self, worker: &str, spec: &WorkerSpec) -> Result<JobOutcome, JobError> {
        let finished = tokio::select! {
            _ = self.cancel.cancelled() => {
                warn!(worker = %worker, "Run cancelled, abandoning worker");
                return Err(JobError::Cancelled { worker: worker.to_string() });
            }
            finished = self.wait_bounded(worker) => finished?,
        };
        let (state, exit_code) = finished;

        let access = self
            .platform
            .container_logs(worker)
            .await
            .map_err(|source| JobError::LogAccess {
                worker: worker.to_string(),
                source,
            })?;

        let raw = self
            .tunnel
            .drain(&access)
            .await
            .map_err(|source| JobError::Tunnel {
                worker: worker.to_string(),
                source,
            })?;

        let output = extract_messages(&String::from_utf8_lossy(&raw));

        debug!(
            container = %worker,
            volumes = %spec.binds.join(","),
            cmd = %spec.command.join(" "),
            "{output}"
        );

        Ok(JobOutcome {
            worker: worker.to_string(),
            state,
            exit_code,
            output,
        })
    }

    async fn wait_bounded(&self, worker: &str) -> Result<(JobState, i32), JobError> {
        match self.policy.timeout {
            Some(after) => tokio::time::timeout(after, self.wait_for_completion(worker))
                .await
                .map_err(|_| {
                    error!(worker = %worker, ?after, "Worker deadline exceeded");
                    JobError::Timeout {
                        worker: worker.to_string(),
                        after,
                    }
                })?,
            None => self.wait_for_completion(worker).await,
        }
    }

    async fn wait_for_completion(&self, worker: &str) -> Result<(JobState, i32), JobError> {
        let mut tracker = CompletionTracker::default();
        let mut throttle = LogThrottle::new(Duration::from_secs(30));

        loop {
            let status = self
                .platform
                .inspect_container(worker)
                .await
                .map_err(|source| {
                    error!(worker = %worker, error = %source, "Failed to inspect worker");
                    JobError::Inspect {
                        worker: worker.to_string(),
                        source,
                    }
                })?;

            match tracker.observe(&status) {
                PollStep::KeepPolling => {
                    if throttle.should_log() {
                        debug!(
                            worker = %worker,
                            state = %tracker.state(),
                            container_state = %status.state,
                            "Waiting for worker"
                        );
                    }
                    tokio::time::sleep(self.policy.poll_interval).await;
                }
                PollStep::Grace => {
                    debug!(worker = %worker, state = %JobState::StoppedOnce, "Worker stopped, confirming");
                    tokio::time::sleep(self.policy.grace_period).await;
                }
                PollStep::Finished { state, exit_code } => {
                    info!(worker = %worker, state = %state, exit_code, "Worker finished");
                    return Ok((state, exit_code));
                }
            }
        }
    }

    /// Request deletion once, then wait until the platform no longer knows the worker.
    async fn teardown(&self, worker: &str) {
        if let Err(e) = self.platform.delete_container(worker).await {
            error!(worker = %worker, error = %e, "Failed to delete worker");
        }

        let started = Instant::now();
        loop {
            match self.platform.inspect_container(worker).await {
                Ok(status) if status.removed => break,
                Ok(_) => {}
                Err(e) if e.is_not_found() => break,
                Err(e) => warn!(worker = %worker, error = %e, "Failed to inspect worker during teardown"),
            }

            if started.elapsed() >= self.policy.teardown_timeout {
                error!(
                    worker = %worker,
                    after = ?self.policy.teardown_timeout,
                    "Worker removal not confirmed"
                );
                return;
            }
            tokio::time::sleep(self.policy.poll_interval).await;
        }

        debug!(worker = %worker, state = %JobState::Deleted, "Worker removed");
    }

    /// Environment of the container this process runs in, passed on to workers.
    async fn manager_environment(&self) -> Result<BTreeMap<String, String>, JobError> {
        let name = self.platform.self_container_name().await.map_err(|e| {
            error!(error = %e, "Failed to get current container");
            JobError::MetadataUnavailable(e)
        })?;

        let containers = self.platform.list_containers().await.map_err(|e| {
            error!(error = %e, "Failed to get container list");
            JobError::ContainerList(e)
        })?;

        containers
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| c.environment)
            .ok_or_else(|| {
                error!(name = %name, "Failed to find manager container");
                JobError::ManagerContainerNotFound(name)
            })
    }
}

/// Keep the message part of timestamped log lines, in order, newline-joined.
pub fn extract_messages(raw: &str) -> String {
    LOG_LINE
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n")
}

fn worker_name() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..WORKER_SUFFIX_LEN)
        .map(|_| WORKER_ALPHABET[rng.random_range(0..WORKER_ALPHABET.len())] as char)
        .collect();
    format!("{WORKER_PREFIX}{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_keeps_polling() {
        let mut tracker = CompletionTracker::default();
        assert_eq!(tracker.observe(&ContainerStatus::running(1)), PollStep::KeepPolling);
        assert_eq!(tracker.state(), JobState::Running);
    }

    #[test]
    fn confirmed_single_stop_is_success() {
        let mut tracker = CompletionTracker::default();
        assert_eq!(tracker.observe(&ContainerStatus::stopped(1)), PollStep::Grace);
        assert_eq!(tracker.state(), JobState::StoppedOnce);
        assert_eq!(
            tracker.observe(&ContainerStatus::stopped(1)),
            PollStep::Finished {
                state: JobState::Terminated,
                exit_code: 0
            }
        );
    }

    #[test]
    fn restart_after_grace_then_stop_is_failure() {
        let mut tracker = CompletionTracker::default();
        assert_eq!(tracker.observe(&ContainerStatus::stopped(1)), PollStep::Grace);
        assert_eq!(tracker.observe(&ContainerStatus::running(2)), PollStep::KeepPolling);
        assert_eq!(
            tracker.observe(&ContainerStatus::stopped(2)),
            PollStep::Finished {
                state: JobState::Failed,
                exit_code: 1
            }
        );
    }

    #[test]
    fn second_start_fails_without_grace() {
        let mut tracker = CompletionTracker::default();
        assert_eq!(
            tracker.observe(&ContainerStatus::stopped(2)),
            PollStep::Finished {
                state: JobState::Failed,
                exit_code: 1
            }
        );
    }

    #[test]
    fn stopped_without_start_fails_immediately() {
        let mut tracker = CompletionTracker::default();
        assert_eq!(
            tracker.observe(&ContainerStatus::stopped(0)),
            PollStep::Finished {
                state: JobState::Failed,
                exit_code: 1
            }
        );
        assert_eq!(tracker.state(), JobState::Running);
    }

    #[test]
    fn explicit_exit_code_wins() {
        let mut tracker = CompletionTracker::default();
        let mut status = ContainerStatus::stopped(1);
        status.exit_code = Some(0);
        assert_eq!(
            tracker.observe(&status),
            PollStep::Finished {
                state: JobState::Terminated,
                exit_code: 0
            }
        );

        let mut tracker = CompletionTracker::default();
        let mut status = ContainerStatus::stopped(2);
        status.exit_code = Some(3);
        assert_eq!(
            tracker.observe(&status),
            PollStep::Finished {
                state: JobState::Failed,
                exit_code: 3
            }
        );
    }

    #[test]
    fn nonzero_exit_after_grace_is_failure() {
        let mut tracker = CompletionTracker::default();
        let mut status = ContainerStatus::stopped(1);
        status.exit_code = Some(2);
        assert_eq!(tracker.observe(&status), PollStep::Grace);
        assert_eq!(
            tracker.observe(&status),
            PollStep::Finished {
                state: JobState::Failed,
                exit_code: 2
            }
        );
    }

    #[test]
    fn extracts_only_timestamped_messages() {
        let raw = "01 2024-03-01T10:00:00.123Z Local and Remote metadata are synchronized\n\
                   garbage without timestamp\n\
                   02 2024-03-01T10:00:01Z Last full backup date: none\r\n\
                   x\n\
                   01 2024-03-01T10:00:02Z done\n";
        assert_eq!(
            extract_messages(raw),
            "Local and Remote metadata are synchronized\nLast full backup date: none\ndone"
        );
    }

    #[test]
    fn no_matching_lines_yield_empty_output() {
        assert_eq!(extract_messages("noise\nmore noise\n"), "");
    }

    #[test]
    fn worker_names_are_prefixed_and_random() {
        let a = worker_name();
        let b = worker_name();
        assert!(a.starts_with(WORKER_PREFIX));
        assert_eq!(a.len(), WORKER_PREFIX.len() + WORKER_SUFFIX_LEN);
        assert!(
            a[WORKER_PREFIX.len()..]
                .bytes()
                .all(|c| WORKER_ALPHABET.contains(&c))
        );
        assert_ne!(a, b);
    }
}
