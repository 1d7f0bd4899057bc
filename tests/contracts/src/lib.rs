//! Fixtures driving a [`SyncClient`] against the in-process push server.

use chatsync_client::collaborators::StaticCredential;
use chatsync_client::realtime::memory::{memory_pair, MemoryServer, ServerSession};
use chatsync_client::realtime::{ConnectionPhase, ConnectionStatus, RealtimeConfig};
use chatsync_client::{ClientConfig, SyncClient};
use chatsync_messaging::Message;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const LOCAL_USER: &str = "me";

pub struct Harness {
    pub client: SyncClient,
    pub server: MemoryServer,
}

/// Realtime defaults without presence heartbeats, so frame assertions stay exact.
pub fn quiet_realtime() -> RealtimeConfig {
    RealtimeConfig::default().with_presence_interval(None)
}

pub async fn harness(realtime: RealtimeConfig) -> Harness {
    let (connector, server) = memory_pair();
    let client = SyncClient::start(
        ClientConfig::new(LOCAL_USER).with_realtime(realtime),
        Arc::new(connector),
        Arc::new(StaticCredential::new(Some("token".into()))),
    )
    .await
    .expect("client starts");
    Harness { client, server }
}

impl Harness {
    /// Connects and completes the handshake, acknowledging `joins` channels.
    pub async fn go_live(&mut self, joins: usize) -> ServerSession {
        self.client.connect().await.expect("connect");
        self.accept_live(joins).await
    }

    /// Accepts the next connection attempt and completes its handshake.
    pub async fn accept_live(&mut self, joins: usize) -> ServerSession {
        let mut session = self.server.accept().await.expect("client connects");
        session.handshake(joins).await.expect("handshake");
        wait_for(&self.client, |s| s.phase == ConnectionPhase::Live).await;
        session
    }
}

pub async fn wait_for(
    client: &SyncClient,
    reached: impl Fn(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut status = client.watch_status();
    let current = tokio::time::timeout(Duration::from_secs(300), status.wait_for(reached))
        .await
        .expect("status reached in time")
        .expect("runtime alive");
    current.clone()
}

/// Lets the runtime task drain what the server just sent.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

pub fn message_json(id: &str, conversation: &str, ts: i64) -> Value {
    json!({
        "id": id,
        "conversationId": conversation,
        "senderId": "u2",
        "content": format!("body of {id}"),
        "timestamp": ts,
    })
}

pub fn message(id: &str, conversation: &str, ts: i64) -> Message {
    serde_json::from_value(message_json(id, conversation, ts)).expect("valid message")
}
