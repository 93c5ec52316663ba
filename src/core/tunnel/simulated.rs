use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::TunnelConnector;
use crate::core::models::AccessDescriptor;
use crate::error::TunnelError;

/// In-memory tunnel serving canned payloads keyed by descriptor url.
#[derive(Default)]
pub struct SimulatedTunnel {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    payloads: HashMap<String, Vec<u8>>,
    default_payload: Vec<u8>,
    refuse: bool,
    opened: Vec<AccessDescriptor>,
}

impl SimulatedTunnel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload returned for descriptors without a dedicated one.
    pub fn with_default_payload(self, payload: impl Into<Vec<u8>>) -> Self {
        self.lock().default_payload = payload.into();
        self
    }

    pub fn set_payload(&self, url: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.lock().payloads.insert(url.into(), payload.into());
    }

    /// Make every subsequent drain fail.
    pub fn refuse_connections(&self) {
        self.lock().refuse = true;
    }

    pub fn opened(&self) -> Vec<AccessDescriptor> {
        self.lock().opened.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl TunnelConnector for SimulatedTunnel {
    async fn drain(&self, access: &AccessDescriptor) -> Result<Vec<u8>, TunnelError> {
        let mut inner = self.lock();
        inner.opened.push(access.clone());

        if inner.refuse {
            return Err(TunnelError::Refused(access.url.clone()));
        }

        Ok(inner
            .payloads
            .get(&access.url)
            .cloned()
            .unwrap_or_else(|| inner.default_payload.clone()))
    }
}
