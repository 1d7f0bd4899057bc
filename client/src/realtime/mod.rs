//! Push connection: lifecycle, channel subscriptions and event delivery.

mod config;
pub mod memory;
mod runtime;
mod subscriptions;
mod transport;

pub use config::RealtimeConfig;
pub use runtime::{ConnectionPhase, ConnectionStatus};
pub use subscriptions::{EventHandler, Release, SubscriptionHandle, SubscriptionRegistry};
pub use transport::{Connector, Transport, WebSocketConnector};

use crate::collaborators::CredentialSource;
use crate::messaging::OutboundIntentQueue;
use chatsync_messaging::ChannelKey;
use runtime::{ConnectionCommand, ConnectionRuntime};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

pub type RealtimeResult<T> = Result<T, RealtimeError>;

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("transport closed")]
    TransportClosed,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection runtime has stopped")]
    RuntimeStopped,
}

/// Owner-side handle to the connection runtime task.
pub struct RealtimeHandle {
    command_tx: mpsc::Sender<ConnectionCommand>,
    status_rx: watch::Receiver<ConnectionStatus>,
    runtime_task: JoinHandle<()>,
}

impl RealtimeHandle {
    /// Spawns the runtime in `Disconnected`; nothing is opened until [`connect`].
    ///
    /// [`connect`]: RealtimeHandle::connect
    pub fn start(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        intents: OutboundIntentQueue,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());

        let runtime =
            ConnectionRuntime::new(config, connector, credentials, intents, command_rx, status_tx);
        let runtime_task = tokio::spawn(async move { runtime.run().await });

        Self {
            command_tx,
            status_rx,
            runtime_task,
        }
    }

    pub async fn connect(&self) -> RealtimeResult<()> {
        self.send(ConnectionCommand::Connect).await
    }

    /// Tears the connection down from any phase; resolves once it is closed.
    pub async fn disconnect(&self) -> RealtimeResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(ConnectionCommand::Disconnect(done_tx)).await?;
        done_rx.await.map_err(|_| RealtimeError::RuntimeStopped)
    }

    /// The credential owner revoked the token: drop the connection and wait
    /// for an explicit connect.
    pub async fn credential_invalidated(&self) -> RealtimeResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(ConnectionCommand::CredentialInvalidated(done_tx))
            .await?;
        done_rx.await.map_err(|_| RealtimeError::RuntimeStopped)
    }

    pub async fn subscribe(
        &self,
        key: ChannelKey,
        handler: Arc<dyn EventHandler>,
    ) -> RealtimeResult<SubscriptionHandle> {
        let (responder, response) = oneshot::channel();
        self.send(ConnectionCommand::Subscribe {
            key,
            handler,
            responder,
        })
        .await?;
        response.await.map_err(|_| RealtimeError::RuntimeStopped)
    }

    pub async fn unsubscribe(&self, handle: SubscriptionHandle) -> RealtimeResult<Release> {
        let (responder, response) = oneshot::channel();
        self.send(ConnectionCommand::Unsubscribe { handle, responder })
            .await?;
        response.await.map_err(|_| RealtimeError::RuntimeStopped)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    pub async fn shutdown(&self) -> RealtimeResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(ConnectionCommand::Shutdown(done_tx)).await?;
        done_rx.await.map_err(|_| RealtimeError::RuntimeStopped)
    }

    async fn send(&self, command: ConnectionCommand) -> RealtimeResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| RealtimeError::RuntimeStopped)
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.runtime_task.abort();
    }
}
