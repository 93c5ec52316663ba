pub mod classifier;
pub mod directory;
pub mod exec;
pub mod filter;
pub mod job_runner;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod platform;
pub mod tunnel;

pub use classifier::{Provider, detect_provider};
pub use directory::VolumeDirectory;
pub use exec::RemoteExec;
pub use filter::{FilterDecision, VolumeFilter};
pub use job_runner::{JobPolicy, RemoteJobRunner};
pub use models::{JobOutcome, JobRequest, JobState, Mount, Volume};
pub use orchestrator::{Orchestrator, RunSummary};
pub use pipeline::{BackupJobSpec, BackupPipeline, Stage};
pub use platform::Platform;
pub use tunnel::{SimulatedTunnel, TunnelConnector, WebSocketTunnel};
