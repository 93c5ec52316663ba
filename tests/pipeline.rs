//! Full backup runs against the simulated platform: discovery, filtering,
//! workload detection, preparation and the four worker stages.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::time::timeout;
use voltback::adapters::SimulatedPlatform;
use voltback::config::AppConfig;
use voltback::context::AppContext;
use voltback::core::metrics;
use voltback::core::models::{ContainerStatus, Host, PlatformVolume, StoragePool, VolumeMount};
use voltback::core::{Orchestrator, SimulatedTunnel};

const VERIFY_LOG: &str = "42 2024-05-02T01:00:00Z Verify complete: 12 files compared, 0 differences found.\n";

struct Harness {
    platform: Arc<SimulatedPlatform>,
    tunnel: Arc<SimulatedTunnel>,
    config: AppConfig,
}

impl Harness {
    fn new() -> Self {
        let env = BTreeMap::from([("SWIFT_USERNAME".to_string(), "backup".to_string())]);
        let platform = Arc::new(SimulatedPlatform::new().with_manager("voltback-manager", env));
        platform.add_host(Host {
            id: "1h1".into(),
            hostname: "node-a".into(),
        });
        platform.add_host(Host {
            id: "1h2".into(),
            hostname: "node-b".into(),
        });

        let tunnel = Arc::new(SimulatedTunnel::new().with_default_payload(VERIFY_LOG));

        let mut config = AppConfig::default();
        config.backup.target_url = "s3://s3.amazonaws.com/bucket".into();
        config.backup.hostname = "fallback".into();
        config.jobs.poll_interval_ms = 1;
        config.jobs.grace_period_secs = 0;
        config.jobs.teardown_timeout_secs = 1;

        Self {
            platform,
            tunnel,
            config,
        }
    }

    fn volume(&self, id: &str, name: &str, mountpoint: Option<&str>, host: &str) {
        self.platform.add_volume(
            PlatformVolume {
                id: id.into(),
                name: name.into(),
                mountpoint: mountpoint.map(String::from),
                labels: BTreeMap::new(),
            },
            vec![StoragePool {
                host_ids: vec![host.into()],
            }],
        );
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(AppContext::new(
            self.config.clone(),
            self.platform.clone(),
            self.tunnel.clone(),
        ))
    }
}

#[tokio::test]
async fn postgres_volume_is_dumped_then_backed_up_in_four_stages() {
    let data = TempDir::new().unwrap();
    std::fs::write(data.path().join("PG_VERSION"), "16\n").unwrap();
    let mountpoint = data.path().to_str().unwrap().to_string();

    let h = Harness::new();
    h.volume("1v1", "pgdata", Some(&mountpoint), "1h1");
    h.platform.add_container("1i10", "db", ContainerStatus::running(1));
    h.platform.add_container("1i11", "db-old", ContainerStatus::stopped(1));
    h.platform.set_volume_mounts(
        "1v1",
        vec![
            VolumeMount {
                container_id: "1i10".into(),
                path: "/var/lib/postgresql/data".into(),
            },
            VolumeMount {
                container_id: "1i11".into(),
                path: "/var/lib/postgresql/data".into(),
            },
        ],
    );
    h.tunnel
        .set_payload(SimulatedPlatform::exec_url("1i10"), "ZHVtcGVk");

    let summary = timeout(Duration::from_secs(10), h.orchestrator().run())
        .await
        .expect("run finishes")
        .unwrap();

    // only the running container is asked to dump
    let execs = h.platform.exec_calls();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].0, "1i10");
    assert!(execs[0].1[2].contains("pg_dumpall"));
    assert!(execs[0].1[2].contains("/var/lib/postgresql/data/backups"));

    let created = h.platform.created();
    assert_eq!(created.len(), 4);
    let destination = "s3://s3.amazonaws.com/bucket/node-a/pgdata".to_string();
    let first_args: Vec<&str> = created
        .iter()
        .map(|(_, spec)| spec.command[0].as_str())
        .collect();
    assert_eq!(
        first_args,
        vec!["--full-if-older-than", "remove-older-than", "cleanup", "verify"]
    );
    for (_, spec) in &created {
        assert_eq!(spec.host_id.as_deref(), Some("1h1"));
        assert!(spec.command.contains(&destination));
        assert_eq!(spec.environment["SWIFT_USERNAME"], "backup");
    }
    let source = format!("{mountpoint}/backups");
    assert!(created[0].1.command.contains(&source));

    // stages never overlap: each worker is gone before the next one exists
    let created_ids: Vec<String> = created.iter().map(|(id, _)| id.clone()).collect();
    assert_eq!(h.platform.deleted(), created_ids);

    assert!(summary.failures.is_empty());
    assert_eq!(summary.reports.len(), 1);
    let report = &summary.reports[0];
    assert_eq!(report.provider, "PostgreSQL");
    assert_eq!(report.prepared_containers, 1);
    assert_eq!(report.stages.len(), 4);
    assert_eq!(
        report.stages[3].1.output,
        "Verify complete: 12 files compared, 0 differences found."
    );

    assert_eq!(
        metrics::render(&summary.metrics()),
        "voltback{volume=\"pgdata\",what=\"verifyExitCode\"} 0"
    );
}

#[tokio::test]
async fn failed_verify_is_reported_as_nonzero_metric() {
    let h = Harness::new();
    h.volume("1v1", "files", None, "1h1");
    for _ in 0..3 {
        h.platform.script_worker(vec![ContainerStatus::stopped(1)]);
    }
    h.platform.script_worker(vec![ContainerStatus::stopped(2)]);

    let summary = h.orchestrator().run().await.unwrap();

    assert_eq!(h.platform.created().len(), 4);
    assert_eq!(h.platform.deleted().len(), 4);
    assert_eq!(summary.reports[0].provider, "Default");
    assert!(h.platform.exec_calls().is_empty());
    assert_eq!(
        metrics::render(&summary.metrics()),
        "voltback{volume=\"files\",what=\"verifyExitCode\"} 1"
    );
}

#[tokio::test]
async fn filtered_volumes_never_reach_the_platform() {
    let mut h = Harness::new();
    h.config.volumes.blacklist = vec!["scratch".into()];
    h.volume("1v1", "keep", None, "1h1");
    h.volume("1v2", "scratch", None, "1h1");
    h.volume("1v3", "/var/run/docker.sock", None, "1h1");
    h.volume("1v4", &"a".repeat(64), None, "1h1");
    h.platform.add_volume(
        PlatformVolume {
            id: "1v5".into(),
            name: "labelled".into(),
            mountpoint: None,
            labels: BTreeMap::from([("io.voltback.ignore".to_string(), "true".to_string())]),
        },
        vec![StoragePool {
            host_ids: vec!["1h1".into()],
        }],
    );

    let summary = h.orchestrator().run().await.unwrap();

    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].volume, "keep");
    assert_eq!(h.platform.created().len(), 4);
}

#[tokio::test]
async fn whitelist_restricts_run() {
    let mut h = Harness::new();
    h.config.volumes.whitelist = vec!["b".into()];
    h.volume("1v1", "a", None, "1h1");
    h.volume("1v2", "b", None, "1h2");

    let entries = h.orchestrator().inventory().await.unwrap();
    assert_eq!(entries.len(), 2);

    let summary = h.orchestrator().run().await.unwrap();
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.reports[0].volume, "b");
    for (_, spec) in h.platform.created() {
        assert_eq!(spec.host_id.as_deref(), Some("1h2"));
    }
}

#[tokio::test]
async fn concurrent_volumes_clean_up_every_worker() {
    let mut h = Harness::new();
    h.config.backup.concurrency = 2;
    h.volume("1v1", "one", None, "1h1");
    h.volume("1v2", "two", None, "1h2");
    h.volume("1v3", "three", None, "1h1");

    let summary = timeout(Duration::from_secs(10), h.orchestrator().run())
        .await
        .expect("run finishes")
        .unwrap();

    assert_eq!(summary.reports.len(), 3);
    let mut created: Vec<String> = h.platform.created().into_iter().map(|(id, _)| id).collect();
    let mut deleted = h.platform.deleted();
    created.sort();
    deleted.sort();
    assert_eq!(created.len(), 12);
    assert_eq!(created, deleted);
}

#[tokio::test]
async fn unreachable_metadata_aborts_run() {
    let h = Harness::new();
    h.volume("1v1", "one", None, "1h1");
    h.volume("1v2", "two", None, "1h1");
    h.platform.fail_metadata();

    let err = h.orchestrator().run().await.unwrap_err();

    assert!(err.to_string().contains("one") || err.to_string().contains("two"));
    assert!(h.platform.created().is_empty());
}

#[tokio::test]
async fn unresolvable_host_falls_back_to_configured_hostname() {
    let h = Harness::new();
    h.volume("1v1", "orphan", None, "1h9");

    h.orchestrator().run().await.unwrap();

    let (_, spec) = &h.platform.created()[0];
    assert!(
        spec.command
            .contains(&"s3://s3.amazonaws.com/bucket/fallback/orphan".to_string())
    );
}
