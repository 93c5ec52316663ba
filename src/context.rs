use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::platform::Platform;
use crate::core::tunnel::TunnelConnector;

/// Shared handles for one run.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub platform: Arc<dyn Platform>,
    pub tunnel: Arc<dyn TunnelConnector>,
    /// Cancelled on interrupt; running jobs tear their worker down and stop.
    pub cancel: CancellationToken,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        platform: Arc<dyn Platform>,
        tunnel: Arc<dyn TunnelConnector>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            platform,
            tunnel,
            cancel: CancellationToken::new(),
        }
    }
}
