use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

pub const TOOL_NAME: &str = "voltback";

/// One sample in Prometheus text exposition format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricLine {
    pub volume: String,
    pub what: &'static str,
    pub value: i64,
}

impl MetricLine {
    pub fn verify_exit_code(volume: &str, code: i32) -> Self {
        Self {
            volume: volume.to_string(),
            what: "verifyExitCode",
            value: i64::from(code),
        }
    }
}

impl fmt::Display for MetricLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let volume = self.volume.replace('\\', "\\\\").replace('"', "\\\"");
        write!(
            f,
            "{TOOL_NAME}{{volume=\"{volume}\",what=\"{}\"}} {}",
            self.what, self.value
        )
    }
}

pub fn render(lines: &[MetricLine]) -> String {
    lines
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sends rendered metrics to a Prometheus push gateway.
pub struct MetricsPusher {
    endpoint: String,
    client: reqwest::Client,
}

impl MetricsPusher {
    pub fn new(gateway_url: &str) -> Self {
        Self {
            endpoint: format!("{}/metrics/job/{TOOL_NAME}", gateway_url.trim_end_matches('/')),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn push(&self, lines: &[MetricLine]) -> Result<()> {
        let mut body = render(lines);
        body.push('\n');

        self.client
            .put(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await
            .context("Failed to reach push gateway")?
            .error_for_status()
            .context("Push gateway rejected metrics")?;

        info!(endpoint = %self.endpoint, count = lines.len(), "Metrics pushed");
        Ok(())
    }
}
