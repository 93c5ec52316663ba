//! One-shot streaming channels to a container's console output.
//!
//! A tunnel is opened from an [`AccessDescriptor`], drained until the remote
//! side closes it, and dropped. Tunnels are never reused between jobs.

mod simulated;
mod websocket;

pub use simulated::SimulatedTunnel;
pub use websocket::WebSocketTunnel;

use async_trait::async_trait;

use crate::core::models::AccessDescriptor;
use crate::error::TunnelError;

#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Open the tunnel and read every byte until the remote end closes it.
    async fn drain(&self, access: &AccessDescriptor) -> Result<Vec<u8>, TunnelError>;
}
