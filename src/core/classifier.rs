//! Workload detection for volumes.
//!
//! A volume's data directory is probed for marker files to find out which
//! service writes to it. The detected provider supplies the command that
//! dumps the data into a consistent state before the backup runs, and the
//! subdirectory of the volume that is actually backed up.

use std::path::Path;

use tracing::info;

/// Workload-specific backup preparation.
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Command to run in a container mounting the volume at `mount_path`.
    /// `None` when the workload needs no preparation.
    fn prepare_command(&self, mount_path: &str) -> Option<Vec<String>>;

    /// Subdirectory of the mountpoint handed to the backup tool; empty for the whole volume.
    fn backup_dir(&self) -> &'static str;
}

const DUMP_DIR: &str = "backups";

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

pub struct PostgreSqlProvider;

impl Provider for PostgreSqlProvider {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn prepare_command(&self, mount_path: &str) -> Option<Vec<String>> {
        Some(shell(format!(
            "mkdir -p {mount_path}/{DUMP_DIR} && pg_dumpall --clean -Upostgres > {mount_path}/{DUMP_DIR}/all.sql"
        )))
    }

    fn backup_dir(&self) -> &'static str {
        DUMP_DIR
    }
}

pub struct MySqlProvider;

impl Provider for MySqlProvider {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn prepare_command(&self, mount_path: &str) -> Option<Vec<String>> {
        Some(shell(format!(
            "mkdir -p {mount_path}/{DUMP_DIR} && mysqldump --all-databases --extended-insert --password=$MYSQL_ROOT_PASSWORD > {mount_path}/{DUMP_DIR}/all.sql"
        )))
    }

    fn backup_dir(&self) -> &'static str {
        DUMP_DIR
    }
}

pub struct OpenLdapProvider;

impl Provider for OpenLdapProvider {
    fn name(&self) -> &'static str {
        "OpenLDAP"
    }

    fn prepare_command(&self, mount_path: &str) -> Option<Vec<String>> {
        Some(shell(format!(
            "mkdir -p {mount_path}/{DUMP_DIR} && slapcat > {mount_path}/{DUMP_DIR}/all.ldif"
        )))
    }

    fn backup_dir(&self) -> &'static str {
        DUMP_DIR
    }
}

/// Plain files: backed up as they are.
pub struct DefaultProvider;

impl Provider for DefaultProvider {
    fn name(&self) -> &'static str {
        "Default"
    }

    fn prepare_command(&self, _mount_path: &str) -> Option<Vec<String>> {
        None
    }

    fn backup_dir(&self) -> &'static str {
        ""
    }
}

/// Pick the provider for the data found under `mountpoint`. First match wins.
pub fn detect_provider(mountpoint: &Path) -> Box<dyn Provider> {
    if is_file(&mountpoint.join("PG_VERSION")) {
        info!(mountpoint = %mountpoint.display(), "PG_VERSION file found, PostgreSQL datadir");
        return Box::new(PostgreSqlProvider);
    }

    if is_dir(&mountpoint.join("mysql")) {
        info!(mountpoint = %mountpoint.display(), "mysql directory found, MySQL datadir");
        return Box::new(MySqlProvider);
    }

    if is_file(&mountpoint.join("DB_CONFIG")) {
        info!(mountpoint = %mountpoint.display(), "DB_CONFIG file found, OpenLDAP datadir");
        return Box::new(OpenLdapProvider);
    }

    Box::new(DefaultProvider)
}

fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file())
}

fn is_dir(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_dir())
}
