use std::time::Duration;

use thiserror::Error;

/// Failure talking to the orchestration platform API.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("request to {endpoint} failed: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} answered with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PlatformError::NotFound { .. })
            || matches!(self, PlatformError::Status { status: 404, .. })
    }
}

/// Failure while draining a log tunnel.
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("invalid tunnel url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to open tunnel: {0}")]
    Connect(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("tunnel stream broke: {0}")]
    Stream(#[source] Box<tokio_tungstenite::tungstenite::Error>),

    #[error("tunnel refused: {0}")]
    Refused(String),

    #[error("tunnel did not close within {0:?}")]
    Timeout(Duration),
}

/// Failure of a remote worker job.
///
/// Every variant raised after the worker was created is reported only once the
/// worker has been torn down.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("can't reach the metadata service: {0}")]
    MetadataUnavailable(#[source] PlatformError),

    #[error("can't get container list: {0}")]
    ContainerList(#[source] PlatformError),

    #[error("managing container {0} not found in container list")]
    ManagerContainerNotFound(String),

    #[error("can't create worker container: {0}")]
    ContainerCreate(#[source] PlatformError),

    #[error("can't inspect worker {worker}: {source}")]
    Inspect {
        worker: String,
        #[source]
        source: PlatformError,
    },

    #[error("can't access logs of worker {worker}: {source}")]
    LogAccess {
        worker: String,
        #[source]
        source: PlatformError,
    },

    #[error("can't read logs of worker {worker}: {source}")]
    Tunnel {
        worker: String,
        #[source]
        source: TunnelError,
    },

    #[error("worker {worker} did not finish within {after:?}")]
    Timeout { worker: String, after: Duration },

    #[error("worker {worker} was cancelled")]
    Cancelled { worker: String },
}

impl JobError {
    /// Setup failures that make every subsequent job impossible.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobError::MetadataUnavailable(_) | JobError::ManagerContainerNotFound(_)
        )
    }
}

/// Failure of a one-shot command inside a running container.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("can't request execution in container {container}: {source}")]
    Request {
        container: String,
        #[source]
        source: PlatformError,
    },

    #[error("can't read output of container {container}: {source}")]
    Tunnel {
        container: String,
        #[source]
        source: TunnelError,
    },

    #[error("output of container {container} is not valid base64: {source}")]
    Decode {
        container: String,
        #[source]
        source: base64::DecodeError,
    },
}

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("failed to list volumes: {0}")]
    ListVolumes(#[source] PlatformError),
}

/// Failure of a whole volume pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} stage failed for volume {volume}: {source}")]
    Stage {
        volume: String,
        stage: &'static str,
        #[source]
        source: JobError,
    },

    #[error("can't find containers mounting volume {volume}: {source}")]
    Mounts {
        volume: String,
        #[source]
        source: PlatformError,
    },
}

impl PipelineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Stage { source, .. } => source.is_fatal(),
            PipelineError::Mounts { .. } => false,
        }
    }
}
