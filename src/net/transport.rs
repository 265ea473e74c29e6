//! Upstream transport seam.
//!
//! # Responsibilities
//! - Abstract "open a stream of raw frames" behind `Connector`
//! - Provide the websocket implementation used in production
//!
//! Tests substitute scripted connectors; the connection manager only sees
//! trait objects.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid upstream url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("reconnect attempts exhausted after {0} attempts")]
    Exhausted(u32),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("stream error: {0}")]
    Stream(String),
}

/// An open upstream session yielding raw frames.
#[async_trait]
pub trait FrameStream: Send {
    /// Next raw frame. `None` means the peer closed the stream.
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Release the transport. Safe to call more than once.
    async fn close(&mut self);
}

/// Opens upstream sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>, ConnectError>;
}

/// Websocket connector over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn FrameStream>, ConnectError> {
        let parsed = Url::parse(url).map_err(|e| ConnectError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConnectError::InvalidUrl {
                url: url.to_string(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| ConnectError::Timeout(self.connect_timeout))?
            .map_err(|e| ConnectError::Transport(e.to_string()))?;

        tracing::debug!(url, status = %response.status(), "Websocket handshake complete");
        Ok(Box::new(WsFrameStream {
            inner: stream,
            closed: false,
        }))
    }
}

struct WsFrameStream {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_frame(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.inner.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text.as_bytes().to_vec())),
                Ok(WsMessage::Binary(bytes)) => return Some(Ok(bytes.to_vec())),
                Ok(WsMessage::Close(frame)) => {
                    tracing::debug!(?frame, "Upstream sent close frame");
                    self.closed = true;
                    return None;
                }
                // Ping replies are queued by tungstenite and flushed on the next read.
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::Stream(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.inner.close(None).await {
            tracing::debug!(error = %e, "Websocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_websocket_scheme() {
        let connector = WsConnector::new(Duration::from_secs(1));
        let err = connector.connect("http://127.0.0.1:1/stream").await.err().unwrap();
        assert!(matches!(err, ConnectError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = WsConnector::new(Duration::from_secs(2));
        let err = connector.connect(&format!("ws://{addr}/stream")).await.err().unwrap();
        assert!(matches!(err, ConnectError::Transport(_)));
    }
}
