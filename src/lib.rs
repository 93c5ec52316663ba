//! Container volume backups driven through short-lived worker containers.
//!
//! Volumes are discovered on the orchestration platform, filtered, classified
//! by the workload that owns them, and then backed up by running the backup
//! tool inside workers pinned to the host that owns each volume.

pub mod adapters;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod logging;
