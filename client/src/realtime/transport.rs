//! Transport seam between the connection runtime and the wire.

use super::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

/// One open bidirectional text-frame connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: String) -> RealtimeResult<()>;

    /// Next inbound text frame, or `None` once the peer has closed.
    ///
    /// Must be cancel-safe: the runtime polls it inside `select!`.
    async fn recv(&mut self) -> Option<RealtimeResult<String>>;

    async fn close(&mut self);
}

/// Opens transports; called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> RealtimeResult<Box<dyn Transport>>;
}

/// Connects to the push endpoint over a WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> RealtimeResult<Box<dyn Transport>> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| RealtimeError::Transport(format!("websocket connect failed: {e}")))?;
        debug!(url = %self.url, status = %response.status(), "websocket established");
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, frame: String) -> RealtimeResult<()> {
        self.stream
            .send(WsMessage::Text(frame))
            .await
            .map_err(|e| RealtimeError::Transport(format!("websocket send failed: {e}")))
    }

    async fn recv(&mut self) -> Option<RealtimeResult<String>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => {
                    return Some(Err(RealtimeError::Transport(format!(
                        "websocket receive failed: {err}"
                    ))))
                }
            };

            match message {
                WsMessage::Text(text) => return Some(Ok(text)),
                WsMessage::Binary(bytes) => {
                    return Some(String::from_utf8(bytes).map_err(|_| {
                        RealtimeError::Transport("binary frame is not valid utf-8".into())
                    }))
                }
                // tungstenite queues the pong itself; either way the peer is alive.
                WsMessage::Ping(_) | WsMessage::Pong(_) => return Some(Ok(String::new())),
                WsMessage::Close(frame) => {
                    debug!(?frame, "websocket closed by peer");
                    return None;
                }
                WsMessage::Frame(_) => trace!("skipping raw websocket frame"),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(err) = self.stream.close(None).await {
            debug!(%err, "websocket close failed");
        }
    }
}
