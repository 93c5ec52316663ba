use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use futures_util::{StreamExt, stream};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::context::AppContext;
use crate::core::classifier::detect_provider;
use crate::core::directory::VolumeDirectory;
use crate::core::exec::RemoteExec;
use crate::core::filter::{FilterDecision, VolumeFilter};
use crate::core::job_runner::RemoteJobRunner;
use crate::core::metrics::MetricLine;
use crate::core::models::Volume;
use crate::core::pipeline::{BackupPipeline, VolumeReport};
use crate::error::PipelineError;

/// A discovered volume with the filter verdict and detected workload.
#[derive(Debug, Clone)]
pub struct VolumeEntry {
    pub volume: Volume,
    pub decision: FilterDecision,
    pub provider: &'static str,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub reports: Vec<VolumeReport>,
    /// Volume name and error of pipelines that did not complete.
    pub failures: Vec<(String, String)>,
}

impl RunSummary {
    pub fn metrics(&self) -> Vec<MetricLine> {
        self.reports
            .iter()
            .filter_map(|r| {
                r.verify_exit_code()
                    .map(|code| MetricLine::verify_exit_code(&r.volume, code))
            })
            .collect()
    }
}

enum VolumeResult {
    Done(VolumeReport),
    Failed(String, PipelineError),
    Skipped,
}

/// Drives discovery, filtering, classification and the backup pipelines.
pub struct Orchestrator {
    ctx: AppContext,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Every volume on the platform with its filter decision.
    pub async fn inventory(&self) -> Result<Vec<VolumeEntry>> {
        let config = &self.ctx.config;
        let directory =
            VolumeDirectory::new(self.ctx.platform.as_ref(), &config.backup.label_prefix);
        let filter = VolumeFilter::new(&config.volumes.whitelist, &config.volumes.blacklist);

        let volumes = directory.volumes().await?;
        Ok(volumes
            .into_iter()
            .map(|volume| {
                let decision = filter.check(&volume);
                let provider = detect_provider(Path::new(&volume.mountpoint)).name();
                VolumeEntry {
                    volume,
                    decision,
                    provider,
                }
            })
            .collect())
    }

    /// Volumes passing the filter. Rejections are logged with reason and source.
    pub async fn eligible_volumes(&self) -> Result<Vec<Volume>> {
        let config = &self.ctx.config;
        let directory =
            VolumeDirectory::new(self.ctx.platform.as_ref(), &config.backup.label_prefix);
        let filter = VolumeFilter::new(&config.volumes.whitelist, &config.volumes.blacklist);

        let mut eligible = Vec::new();
        for volume in directory.volumes().await? {
            match filter.check(&volume) {
                FilterDecision::Include => eligible.push(volume),
                FilterDecision::Reject(rejection) => info!(
                    volume = %volume.name,
                    reason = rejection.reason.as_str(),
                    source = rejection.source_str(),
                    "Ignoring volume"
                ),
            }
        }
        Ok(eligible)
    }

    /// Back up every eligible volume.
    ///
    /// Per-volume failures are collected in the summary. Setup failures that
    /// make every later job impossible abort the run once in-flight pipelines
    /// have finished their teardown.
    pub async fn run(&self) -> Result<RunSummary> {
        let platform = self.ctx.platform.clone();
        let tunnel = self.ctx.tunnel.clone();
        let config = &self.ctx.config;

        let runner = RemoteJobRunner::new(
            platform.clone(),
            tunnel.clone(),
            config.jobs.policy(),
            self.ctx.cancel.clone(),
        );
        let exec = RemoteExec::new(platform.clone(), tunnel);
        let pipeline = BackupPipeline::new(platform, exec, runner, config.backup.clone());

        let run_id = Uuid::now_v7();
        let volumes = self.eligible_volumes().await?;
        info!(
            run = %run_id,
            count = volumes.len(),
            concurrency = config.backup.concurrency.max(1),
            "Starting backups"
        );

        let fatal = AtomicBool::new(false);
        let results: Vec<VolumeResult> = stream::iter(volumes)
            .map(|volume| {
                let pipeline = &pipeline;
                let fatal = &fatal;
                let span = info_span!("volume", run = %run_id, name = %volume.name);
                async move {
                    if fatal.load(Ordering::SeqCst) || self.ctx.cancel.is_cancelled() {
                        return VolumeResult::Skipped;
                    }

                    let provider = detect_provider(Path::new(&volume.mountpoint));
                    match pipeline.run(&volume, provider.as_ref()).await {
                        Ok(report) => VolumeResult::Done(report),
                        Err(e) => {
                            if e.is_fatal() {
                                fatal.store(true, Ordering::SeqCst);
                            }
                            error!(error = %e, "Volume backup failed");
                            VolumeResult::Failed(volume.name.clone(), e)
                        }
                    }
                }
                .instrument(span)
            })
            .buffered(config.backup.concurrency.max(1))
            .collect()
            .await;

        let mut summary = RunSummary {
            run_id,
            ..Default::default()
        };
        let mut fatal_error = None;
        for result in results {
            match result {
                VolumeResult::Done(report) => summary.reports.push(report),
                VolumeResult::Failed(volume, e) => {
                    let message = e.to_string();
                    if e.is_fatal() && fatal_error.is_none() {
                        fatal_error = Some(e);
                    }
                    summary.failures.push((volume, message));
                }
                VolumeResult::Skipped => {}
            }
        }

        if let Some(e) = fatal_error {
            return Err(e.into());
        }

        info!(
            run = %run_id,
            backed_up = summary.reports.len(),
            failed = summary.failures.len(),
            "Backups finished"
        );
        Ok(summary)
    }
}
