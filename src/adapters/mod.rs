use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use crate::config::{PlatformKind, PlatformSettings};
use crate::core::platform::Platform;

pub mod cattle;
mod simulated;

pub use cattle::CattlePlatform;
pub use simulated::SimulatedPlatform;

/// Build the platform client, probing the environment when the kind is `auto`.
pub async fn get_platform(settings: &PlatformSettings) -> Result<Arc<dyn Platform>> {
    let kind = match settings.kind {
        PlatformKind::Auto => detect_platform().await,
        kind => Some(kind),
    };

    match kind {
        Some(PlatformKind::Cattle) => {
            let platform = CattlePlatform::new(settings)?;
            info!(platform = platform.name(), url = %settings.url, "Using orchestrator");
            Ok(Arc::new(platform))
        }
        _ => bail!("no supported orchestrator detected"),
    }
}

/// Probe which platform this process runs on.
pub async fn detect_platform() -> Option<PlatformKind> {
    if cattle::detect().await {
        return Some(PlatformKind::Cattle);
    }
    None
}
