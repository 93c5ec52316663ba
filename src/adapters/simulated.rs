use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::models::{
    AccessDescriptor, ContainerState, ContainerStatus, ContainerSummary, Host, PlatformVolume,
    StoragePool, VolumeMount, WorkerSpec,
};
use crate::core::platform::Platform;
use crate::error::PlatformError;

/// In-memory platform with scripted worker behaviour.
///
/// Each created worker replays the next queued status script, one status per
/// inspection, repeating the last one. Without a script a worker reports
/// stopped after one start, which the job runner reads as success.
///
/// A deleted worker is reported removed on the first inspection unless a
/// removal lag is set, in which case it keeps reporting `removing` for that
/// many inspections first.
#[derive(Default)]
pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    volumes: Vec<(PlatformVolume, Vec<StoragePool>)>,
    hosts: HashMap<String, Host>,
    containers: Vec<ContainerSummary>,
    statuses: HashMap<String, ContainerStatus>,
    mounts: HashMap<String, Vec<VolumeMount>>,
    self_name: Option<String>,

    scripts: VecDeque<Vec<ContainerStatus>>,
    workers: HashMap<String, VecDeque<ContainerStatus>>,
    next_worker: u32,

    fail_metadata: bool,
    fail_create: bool,
    fail_logs: bool,
    fail_delete: bool,
    removal_lag: u32,
    teardown_errors: u32,

    removing: HashSet<String>,
    removal_checks: HashMap<String, u32>,

    created: Vec<(String, WorkerSpec)>,
    deleted: Vec<String>,
    exec_calls: Vec<(String, Vec<String>)>,
    log_requests: Vec<String>,
    inspections: usize,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exec_url(container: &str) -> String {
        format!("ws://simulated/exec/{container}")
    }

    pub fn logs_url(container: &str) -> String {
        format!("ws://simulated/logs/{container}")
    }

    /// Register the container this process pretends to run in.
    pub fn with_manager(self, name: &str, environment: BTreeMap<String, String>) -> Self {
        {
            let mut state = self.lock();
            state.self_name = Some(name.to_string());
            state.containers.push(ContainerSummary {
                id: format!("1i-{name}"),
                name: name.to_string(),
                state: ContainerState::Running,
                environment,
            });
        }
        self
    }

    pub fn add_host(&self, host: Host) {
        self.lock().hosts.insert(host.id.clone(), host);
    }

    pub fn add_volume(&self, volume: PlatformVolume, pools: Vec<StoragePool>) {
        self.lock().volumes.push((volume, pools));
    }

    /// Add an application container with the given state.
    pub fn add_container(&self, id: &str, name: &str, status: ContainerStatus) {
        let mut state = self.lock();
        state.containers.push(ContainerSummary {
            id: id.to_string(),
            name: name.to_string(),
            state: status.state.clone(),
            environment: BTreeMap::new(),
        });
        state.statuses.insert(id.to_string(), status);
    }

    pub fn set_volume_mounts(&self, volume_id: &str, mounts: Vec<VolumeMount>) {
        self.lock().mounts.insert(volume_id.to_string(), mounts);
    }

    /// Queue the status sequence of the next created worker.
    pub fn script_worker(&self, statuses: Vec<ContainerStatus>) {
        self.lock().scripts.push_back(statuses);
    }

    pub fn fail_metadata(&self) {
        self.lock().fail_metadata = true;
    }

    pub fn fail_create(&self) {
        self.lock().fail_create = true;
    }

    pub fn fail_container_logs(&self) {
        self.lock().fail_logs = true;
    }

    /// Reject delete requests; the worker stays in place.
    pub fn fail_delete(&self) {
        self.lock().fail_delete = true;
    }

    /// Report deleted workers as still `removing` for `inspections` checks.
    pub fn removal_lag(&self, inspections: u32) {
        self.lock().removal_lag = inspections;
    }

    /// Fail the next `count` inspections of deleted workers.
    pub fn fail_teardown_inspections(&self, count: u32) {
        self.lock().teardown_errors = count;
    }

    /// Workers created so far, with their platform ids.
    pub fn created(&self) -> Vec<(String, WorkerSpec)> {
        self.lock().created.clone()
    }

    /// Every delete request, accepted or not.
    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn exec_calls(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_calls.clone()
    }

    pub fn log_requests(&self) -> Vec<String> {
        self.lock().log_requests.clone()
    }

    pub fn inspections(&self) -> usize {
        self.lock().inspections
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(kind: &'static str, id: &str) -> PlatformError {
    PlatformError::NotFound {
        kind,
        id: id.to_string(),
    }
}

#[async_trait]
impl Platform for SimulatedPlatform {
    fn name(&self) -> &'static str {
        "Simulated"
    }

    async fn list_volumes(&self) -> Result<Vec<PlatformVolume>, PlatformError> {
        Ok(self.lock().volumes.iter().map(|(v, _)| v.clone()).collect())
    }

    async fn storage_pools(
        &self,
        volume: &PlatformVolume,
    ) -> Result<Vec<StoragePool>, PlatformError> {
        self.lock()
            .volumes
            .iter()
            .find(|(v, _)| v.id == volume.id)
            .map(|(_, pools)| pools.clone())
            .ok_or_else(|| not_found("volume", &volume.id))
    }

    async fn host(&self, host_id: &str) -> Result<Host, PlatformError> {
        self.lock()
            .hosts
            .get(host_id)
            .cloned()
            .ok_or_else(|| not_found("host", host_id))
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSummary>, PlatformError> {
        Ok(self.lock().containers.clone())
    }

    async fn self_container_name(&self) -> Result<String, PlatformError> {
        let state = self.lock();
        if state.fail_metadata {
            return Err(PlatformError::Unavailable("metadata service".to_string()));
        }
        state
            .self_name
            .clone()
            .ok_or_else(|| PlatformError::Unavailable("no self container".to_string()))
    }

    async fn create_container(&self, spec: &WorkerSpec) -> Result<String, PlatformError> {
        let mut state = self.lock();
        if state.fail_create {
            return Err(PlatformError::Unavailable("container create".to_string()));
        }

        state.next_worker += 1;
        let id = format!("1w{}", state.next_worker);
        let script = state
            .scripts
            .pop_front()
            .unwrap_or_else(|| vec![ContainerStatus::stopped(1)]);
        state.workers.insert(id.clone(), script.into());
        state.created.push((id.clone(), spec.clone()));
        Ok(id)
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerStatus, PlatformError> {
        let mut state = self.lock();
        state.inspections += 1;

        if state.removing.contains(id) {
            if state.teardown_errors > 0 {
                state.teardown_errors -= 1;
                return Err(PlatformError::Unavailable("container inspect".to_string()));
            }

            let lag = state.removal_lag;
            let checks = state.removal_checks.entry(id.to_string()).or_insert(0);
            *checks = checks.saturating_add(1);
            let removed = *checks > lag;
            return Ok(ContainerStatus {
                state: ContainerState::Other(
                    if removed { "removed" } else { "removing" }.to_string(),
                ),
                restart_count: 0,
                exit_code: None,
                removed,
            });
        }

        if let Some(script) = state.workers.get_mut(id) {
            let status = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            return status.ok_or_else(|| not_found("container", id));
        }

        state
            .statuses
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("container", id))
    }

    async fn delete_container(&self, id: &str) -> Result<(), PlatformError> {
        let mut state = self.lock();
        state.deleted.push(id.to_string());
        if state.fail_delete {
            return Err(PlatformError::Unavailable("container delete".to_string()));
        }
        state.removing.insert(id.to_string());
        Ok(())
    }

    async fn volume_mounts(&self, volume_id: &str) -> Result<Vec<VolumeMount>, PlatformError> {
        Ok(self.lock().mounts.get(volume_id).cloned().unwrap_or_default())
    }

    async fn exec(
        &self,
        id: &str,
        command: &[String],
    ) -> Result<AccessDescriptor, PlatformError> {
        self.lock()
            .exec_calls
            .push((id.to_string(), command.to_vec()));
        Ok(AccessDescriptor {
            url: Self::exec_url(id),
            token: "simulated".to_string(),
        })
    }

    async fn container_logs(&self, id: &str) -> Result<AccessDescriptor, PlatformError> {
        let mut state = self.lock();
        state.log_requests.push(id.to_string());
        if state.fail_logs {
            return Err(PlatformError::Unavailable("logs endpoint".to_string()));
        }
        Ok(AccessDescriptor {
            url: Self::logs_url(id),
            token: "simulated".to_string(),
        })
    }
}
