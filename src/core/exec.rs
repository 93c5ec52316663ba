use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tracing::debug;

use crate::core::platform::Platform;
use crate::core::tunnel::TunnelConnector;
use crate::error::ExecError;

/// Runs one-shot commands inside containers that are already running.
///
/// The platform runs the command synchronously and streams its output,
/// base64-encoded, through a log tunnel.
#[derive(Clone)]
pub struct RemoteExec {
    platform: Arc<dyn Platform>,
    tunnel: Arc<dyn TunnelConnector>,
}

impl RemoteExec {
    pub fn new(platform: Arc<dyn Platform>, tunnel: Arc<dyn TunnelConnector>) -> Self {
        Self { platform, tunnel }
    }

    pub async fn run(&self, container: &str, command: &[String]) -> Result<String, ExecError> {
        let access = self
            .platform
            .exec(container, command)
            .await
            .map_err(|source| ExecError::Request {
                container: container.to_string(),
                source,
            })?;

        let raw = self
            .tunnel
            .drain(&access)
            .await
            .map_err(|source| ExecError::Tunnel {
                container: container.to_string(),
                source,
            })?;

        let stdout = decode_output(&raw).map_err(|source| ExecError::Decode {
            container: container.to_string(),
            source,
        })?;

        debug!(container = %container, cmd = %command.join(" "), "{stdout}");
        Ok(stdout)
    }
}

/// Decode the base64 payload of an exec stream, ignoring whitespace between frames.
pub fn decode_output(raw: &[u8]) -> Result<String, base64::DecodeError> {
    let compact: Vec<u8> = raw
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let decoded = STANDARD.decode(compact)?;
    Ok(String::from_utf8_lossy(&decoded).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedPlatform;
    use crate::core::tunnel::SimulatedTunnel;

    #[test]
    fn decodes_payload_split_over_lines() {
        // "hello world\n"
        assert_eq!(decode_output(b"aGVsbG8g\nd29ybGQK\n").unwrap(), "hello world\n");
        assert_eq!(decode_output(b"").unwrap(), "");
        assert!(decode_output(b"@@@").is_err());
    }

    #[tokio::test]
    async fn exec_opens_tunnel_and_decodes() {
        let platform = Arc::new(SimulatedPlatform::new());
        let tunnel = Arc::new(SimulatedTunnel::new());
        tunnel.set_payload(SimulatedPlatform::exec_url("1i7"), "ZHVtcGVk");

        let exec = RemoteExec::new(platform.clone(), tunnel.clone());
        let out = exec
            .run("1i7", &["pg_dumpall".to_string()])
            .await
            .unwrap();

        assert_eq!(out, "dumped");
        assert_eq!(
            platform.exec_calls(),
            vec![("1i7".to_string(), vec!["pg_dumpall".to_string()])]
        );
        assert_eq!(tunnel.opened().len(), 1);
    }

    #[tokio::test]
    async fn tunnel_failure_surfaces_as_exec_error() {
        let platform = Arc::new(SimulatedPlatform::new());
        let tunnel = Arc::new(SimulatedTunnel::new());
        tunnel.refuse_connections();

        let err = RemoteExec::new(platform, tunnel)
            .run("1i7", &["true".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Tunnel { .. }));
    }
}
