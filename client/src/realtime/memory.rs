//! In-process transport.
//!
//! [`memory_pair`] returns a [`Connector`] for the client side and a
//! [`MemoryServer`] that plays the push server: every successful connect
//! hands it a [`ServerSession`] to script frames with.

use super::transport::{Connector, Transport};
use super::{RealtimeError, RealtimeResult};
use async_trait::async_trait;
use chatsync_messaging::codec::{
    AUTH_ACCEPTED, AUTH_DESTINATION, AUTH_REJECTED, CHANNEL_JOINED, JOIN_DESTINATION,
};
use chatsync_messaging::{ChannelKey, OutboundFrame};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Shared {
    sessions: mpsc::UnboundedSender<ServerSession>,
    refuse: AtomicU32,
    hold: AtomicBool,
    attempts: AtomicU32,
}

pub fn memory_pair() -> (MemoryConnector, MemoryServer) {
    let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        sessions: sessions_tx,
        refuse: AtomicU32::new(0),
        hold: AtomicBool::new(false),
        attempts: AtomicU32::new(0),
    });
    (
        MemoryConnector {
            shared: Arc::clone(&shared),
        },
        MemoryServer {
            sessions: sessions_rx,
            shared,
        },
    )
}

#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> RealtimeResult<Box<dyn Transport>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.hold.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        let refused = self
            .shared
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(RealtimeError::Transport("connection refused".into()));
        }

        let (to_server, inbound) = mpsc::unbounded_channel();
        let (outbound, to_client) = mpsc::unbounded_channel();
        self.shared
            .sessions
            .send(ServerSession { inbound, outbound })
            .map_err(|_| RealtimeError::Transport("memory server is gone".into()))?;

        Ok(Box::new(MemoryTransport {
            tx: Some(to_server),
            rx: to_client,
        }))
    }
}

struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: String) -> RealtimeResult<()> {
        let tx = self.tx.as_ref().ok_or(RealtimeError::TransportClosed)?;
        tx.send(frame).map_err(|_| RealtimeError::TransportClosed)
    }

    async fn recv(&mut self) -> Option<RealtimeResult<String>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.tx = None;
        self.rx.close();
    }
}

/// Server side of [`memory_pair`].
pub struct MemoryServer {
    sessions: mpsc::UnboundedReceiver<ServerSession>,
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Waits for the next client connection.
    pub async fn accept(&mut self) -> Option<ServerSession> {
        self.sessions.recv().await
    }

    /// Fails the next `count` connect attempts.
    pub fn refuse_next(&self, count: u32) {
        self.shared.refuse.store(count, Ordering::SeqCst);
    }

    /// While set, connect attempts never complete.
    pub fn hold_connects(&self, hold: bool) {
        self.shared.hold.store(hold, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted connection. Dropping it closes the connection.
pub struct ServerSession {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

impl ServerSession {
    /// Sends a raw frame; false once the client has gone.
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.outbound.send(frame.into()).is_ok()
    }

    pub fn send_event(&self, tag: &str, payload: Value) -> bool {
        self.send_raw(json!({ "type": tag, "payload": payload }).to_string())
    }

    pub fn send_event_on(&self, channel: &ChannelKey, tag: &str, payload: Value) -> bool {
        self.send_raw(
            json!({ "type": tag, "channel": channel.to_string(), "payload": payload }).to_string(),
        )
    }

    pub fn heartbeat(&self) -> bool {
        self.send_raw("")
    }

    pub fn accept_auth(&self) -> bool {
        self.send_raw(json!({ "type": AUTH_ACCEPTED }).to_string())
    }

    pub fn reject_auth(&self, reason: &str) -> bool {
        self.send_raw(json!({ "type": AUTH_REJECTED, "payload": { "reason": reason } }).to_string())
    }

    pub fn ack_join(&self, channel: &ChannelKey) -> bool {
        self.send_raw(
            json!({ "type": CHANNEL_JOINED, "payload": { "channel": channel.to_string() } })
                .to_string(),
        )
    }

    /// Next raw frame from the client, heartbeats included.
    pub async fn next_raw(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next non-heartbeat frame from the client.
    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        loop {
            let raw = self.inbound.recv().await?;
            if raw.trim().is_empty() {
                continue;
            }
            if let Some(frame) = OutboundFrame::parse(&raw) {
                return Some(frame);
            }
        }
    }

    /// Frames already buffered from the client, heartbeats skipped.
    pub fn drain_frames(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(raw) = self.inbound.try_recv() {
            if let Some(frame) = OutboundFrame::parse(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Accepts the auth frame and acknowledges `joins` join requests.
    ///
    /// Returns the channels joined, or `None` if the client deviates.
    pub async fn handshake(&mut self, joins: usize) -> Option<Vec<ChannelKey>> {
        let auth = self.next_frame().await?;
        if auth.destination_channel != AUTH_DESTINATION {
            return None;
        }
        self.accept_auth();

        let mut joined = Vec::with_capacity(joins);
        while joined.len() < joins {
            let frame = self.next_frame().await?;
            if frame.destination_channel != JOIN_DESTINATION {
                return None;
            }
            let channel: ChannelKey = frame.body.get("channel")?.as_str()?.parse().ok()?;
            self.ack_join(&channel);
            joined.push(channel);
        }
        Some(joined)
    }
}
