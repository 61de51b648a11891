//! WebSocket live channel (tokio-tungstenite).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{LiveConnection, LiveTransport};
use crate::api::SERVE_PATH;
use crate::error::TransportError;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the live channel URL for a task.
///
/// The scheme follows the API origin: `https` → `wss`, `http` → `ws`.
pub fn live_url(base_url: &str, live_path: &str, task_id: &str) -> Result<String, TransportError> {
    let mut url =
        Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(format!("{base_url}: {e}")))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(TransportError::InvalidUrl(format!(
                "unsupported scheme: {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::InvalidUrl(format!("cannot switch {base_url} to {scheme}")))?;

    let prefix = url.path().trim_end_matches('/').to_string();
    let live_path = live_path.trim_matches('/');
    url.set_path(&format!("{prefix}{SERVE_PATH}/{live_path}/{task_id}"));
    Ok(url.to_string())
}

/// Opens one WebSocket per task.
#[derive(Debug, Clone)]
pub struct WsTransport {
    base_url: String,
    live_path: String,
}

impl WsTransport {
    pub fn new(base_url: impl Into<String>, live_path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            live_path: live_path.into(),
        }
    }
}

#[async_trait]
impl LiveTransport for WsTransport {
    async fn connect(&self, task_id: &str) -> Result<Box<dyn LiveConnection>, TransportError> {
        let url = live_url(&self.base_url, &self.live_path, task_id)?;
        tracing::debug!(task_id = %task_id, url = %url, "Connecting live channel");

        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Box::new(WsConnection { ws }))
    }
}

struct WsConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl LiveConnection for WsConnection {
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Dropping non-UTF-8 binary frame");
                    }
                },
                Ok(Message::Close(_)) => return None,
                // ping/pong are answered by tungstenite
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Protocol(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            tracing::debug!(error = %e, "Live channel close handshake failed");
        }
        // wait briefly for the peer's close frame
        let drain = async { while let Some(Ok(_)) = self.ws.next().await {} };
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, drain).await;
    }
}
