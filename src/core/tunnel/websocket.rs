use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Url;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{
    self, Message,
    client::IntoClientRequest,
    error::ProtocolError,
    http::header::{HeaderValue, ORIGIN},
};
use tracing::debug;

use super::TunnelConnector;
use crate::core::models::AccessDescriptor;
use crate::error::TunnelError;

/// Log tunnel over a websocket, authenticated by a `token` query parameter.
pub struct WebSocketTunnel {
    origin: String,
    timeout: Duration,
}

impl WebSocketTunnel {
    /// `origin` is sent as the `Origin` header, usually the platform API url.
    pub fn new(origin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            origin: origin.into(),
            timeout,
        }
    }

    async fn read_all(&self, access: &AccessDescriptor) -> Result<Vec<u8>, TunnelError> {
        let url = tunnel_url(access)?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| TunnelError::Connect(Box::new(e)))?;
        if let Ok(origin) = HeaderValue::from_str(&self.origin) {
            request.headers_mut().insert(ORIGIN, origin);
        }

        let (mut ws, _response) = connect_async(request)
            .await
            .map_err(|e| TunnelError::Connect(Box::new(e)))?;

        let mut data = Vec::new();
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => data.extend_from_slice(text.as_str().as_bytes()),
                Ok(Message::Binary(bytes)) => data.extend_from_slice(&bytes),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) if is_end_of_stream(&e) => break,
                Err(e) => return Err(TunnelError::Stream(Box::new(e))),
            }
        }

        debug!(bytes = data.len(), "Tunnel drained");
        Ok(data)
    }
}

#[async_trait]
impl TunnelConnector for WebSocketTunnel {
    async fn drain(&self, access: &AccessDescriptor) -> Result<Vec<u8>, TunnelError> {
        tokio::time::timeout(self.timeout, self.read_all(access))
            .await
            .map_err(|_| TunnelError::Timeout(self.timeout))?
    }
}

/// The descriptor url with its `token` query parameter set to the descriptor token.
pub(crate) fn tunnel_url(access: &AccessDescriptor) -> Result<Url, TunnelError> {
    let mut url = Url::parse(&access.url).map_err(|e| TunnelError::InvalidUrl {
        url: access.url.clone(),
        reason: e.to_string(),
    })?;

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "token")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("token", &access.token);

    Ok(url)
}

/// Servers often drop the socket without a closing handshake once the stream ends.
fn is_end_of_stream(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(url: &str) -> AccessDescriptor {
        AccessDescriptor {
            url: url.to_string(),
            token: "s3cret".to_string(),
        }
    }

    #[test]
    fn token_is_added_as_query_parameter() {
        let url = tunnel_url(&access("wss://rancher.example/v1/logs/")).unwrap();
        assert_eq!(url.as_str(), "wss://rancher.example/v1/logs/?token=s3cret");
    }

    #[test]
    fn existing_token_is_replaced_and_other_params_kept() {
        let url = tunnel_url(&access("ws://host:8080/exec?token=old&lines=100")).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("lines".to_string(), "100".to_string()),
                ("token".to_string(), "s3cret".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = tunnel_url(&access("not a url")).unwrap_err();
        assert!(matches!(err, TunnelError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_fails_to_connect() {
        let tunnel = WebSocketTunnel::new("http://127.0.0.1", Duration::from_secs(5));
        let err = tunnel
            .drain(&access("ws://127.0.0.1:1/logs"))
            .await
            .unwrap_err();
        assert!(matches!(err, TunnelError::Connect(_)));
    }
}
