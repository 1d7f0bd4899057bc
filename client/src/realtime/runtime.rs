use super::config::RealtimeConfig;
use super::subscriptions::{EventHandler, Release, SubscriptionHandle, SubscriptionRegistry};
use super::transport::{Connector, Transport};
use super::RealtimeResult;
use crate::collaborators::CredentialSource;
use crate::messaging::{Intent, OutboundIntentQueue};
use chatsync_messaging::{
    decode, ChannelKey, ControlFrame, DomainEvent, InboundFrame, OutboundFrame, HEARTBEAT_FRAME,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

/// Lifecycle phase of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    #[default]
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Live,
    Reconnecting,
}

impl ConnectionPhase {
    fn has_session(self) -> bool {
        matches!(
            self,
            ConnectionPhase::Authenticating | ConnectionPhase::Subscribing | ConnectionPhase::Live
        )
    }
}

/// Snapshot published on every phase or handshake change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub phase: ConnectionPhase,
    /// Reconnect attempts since the connection was last live.
    pub attempt: u32,
    /// Channels asked for on this connection and not yet acknowledged.
    pub pending_channels: BTreeSet<ChannelKey>,
    /// The server refused the credential; cleared by the next connect.
    pub auth_required: bool,
    /// Reconnecting stopped after the attempt limit.
    pub gave_up: bool,
}

pub(crate) enum ConnectionCommand {
    Connect,
    Disconnect(oneshot::Sender<()>),
    Subscribe {
        key: ChannelKey,
        handler: Arc<dyn EventHandler>,
        responder: oneshot::Sender<SubscriptionHandle>,
    },
    Unsubscribe {
        handle: SubscriptionHandle,
        responder: oneshot::Sender<Release>,
    },
    CredentialInvalidated(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

enum Flow {
    Continue,
    Stop,
}

type ConnectTask = JoinHandle<RealtimeResult<Box<dyn Transport>>>;

/// Single task owning the transport, the subscription registry and every
/// connection timer. Commands and transport frames are handled one at a time,
/// so events are dispatched in the order the transport delivered them.
pub(crate) struct ConnectionRuntime {
    config: RealtimeConfig,
    connector: Arc<dyn Connector>,
    credentials: Arc<dyn CredentialSource>,
    intents: OutboundIntentQueue,
    registry: SubscriptionRegistry,
    command_rx: mpsc::Receiver<ConnectionCommand>,
    status_tx: watch::Sender<ConnectionStatus>,
    phase: ConnectionPhase,
    attempt: u32,
    auth_required: bool,
    gave_up: bool,
    pending: BTreeSet<ChannelKey>,
    connect_task: Option<ConnectTask>,
    transport: Option<Box<dyn Transport>>,
    retry_at: Option<Instant>,
    handshake_deadline: Option<Instant>,
    next_heartbeat: Instant,
    last_heard: Instant,
    next_presence: Option<Instant>,
}

impl ConnectionRuntime {
    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Arc<dyn Connector>,
        credentials: Arc<dyn CredentialSource>,
        intents: OutboundIntentQueue,
        command_rx: mpsc::Receiver<ConnectionCommand>,
        status_tx: watch::Sender<ConnectionStatus>,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            connector,
            credentials,
            intents,
            registry: SubscriptionRegistry::new(),
            command_rx,
            status_tx,
            phase: ConnectionPhase::Disconnected,
            attempt: 0,
            auth_required: false,
            gave_up: false,
            pending: BTreeSet::new(),
            connect_task: None,
            transport: None,
            retry_at: None,
            handshake_deadline: None,
            next_heartbeat: now,
            last_heard: now,
            next_presence: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let flow = match self.phase {
                ConnectionPhase::Disconnected => {
                    let command = self.command_rx.recv().await;
                    self.on_command(command).await
                }
                ConnectionPhase::Connecting => self.connecting().await,
                ConnectionPhase::Reconnecting => self.backing_off().await,
                ConnectionPhase::Authenticating
                | ConnectionPhase::Subscribing
                | ConnectionPhase::Live => self.session().await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.teardown().await;
        self.set_phase(ConnectionPhase::Disconnected);
        debug!("connection runtime stopped");
    }

    async fn on_command(&mut self, command: Option<ConnectionCommand>) -> Flow {
        let Some(command) = command else {
            return Flow::Stop;
        };

        match command {
            ConnectionCommand::Connect => {
                if self.phase == ConnectionPhase::Disconnected {
                    self.attempt = 0;
                    self.auth_required = false;
                    self.gave_up = false;
                    info!("connecting to push endpoint");
                    self.set_phase(ConnectionPhase::Connecting);
                } else {
                    debug!(phase = ?self.phase, "connect ignored, connection already active");
                }
            }
            ConnectionCommand::Disconnect(done_tx) => {
                self.teardown().await;
                self.attempt = 0;
                self.set_phase(ConnectionPhase::Disconnected);
                info!("disconnected on request");
                let _ = done_tx.send(());
            }
            ConnectionCommand::Subscribe {
                key,
                handler,
                responder,
            } => {
                let (handle, first) = self.registry.subscribe(key.clone(), handler);
                let _ = responder.send(handle);
                if first
                    && matches!(
                        self.phase,
                        ConnectionPhase::Subscribing | ConnectionPhase::Live
                    )
                {
                    self.pending.insert(key.clone());
                    self.publish_status();
                    self.send_frame(&OutboundFrame::join(&key)).await;
                }
            }
            ConnectionCommand::Unsubscribe { handle, responder } => {
                let release = self.registry.unsubscribe(&handle);
                let _ = responder.send(release);
                if let Release::Released { .. } = release {
                    let key = handle.key();
                    self.pending.remove(key);
                    if matches!(
                        self.phase,
                        ConnectionPhase::Subscribing | ConnectionPhase::Live
                    ) && self.send_frame(&OutboundFrame::leave(key)).await
                    {
                        debug!(channel = %key, "channel left");
                    }
                    if self.phase == ConnectionPhase::Subscribing && self.pending.is_empty() {
                        self.enter_live().await;
                    } else {
                        self.publish_status();
                    }
                }
            }
            ConnectionCommand::CredentialInvalidated(done_tx) => {
                info!("credential invalidated, dropping connection");
                self.teardown().await;
                self.attempt = 0;
                self.auth_required = true;
                self.set_phase(ConnectionPhase::Disconnected);
                let _ = done_tx.send(());
            }
            ConnectionCommand::Shutdown(done_tx) => {
                self.teardown().await;
                self.set_phase(ConnectionPhase::Disconnected);
                let _ = done_tx.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn connecting(&mut self) -> Flow {
        if self.connect_task.is_none() {
            let connector = Arc::clone(&self.connector);
            debug!(attempt = self.attempt, "opening transport");
            self.connect_task = Some(tokio::spawn(async move { connector.connect().await }));
        }
        let Some(task) = self.connect_task.as_mut() else {
            return Flow::Continue;
        };

        tokio::select! {
            command = self.command_rx.recv() => self.on_command(command).await,
            joined = task => {
                self.connect_task = None;
                match joined {
                    Ok(Ok(transport)) => self.on_connected(transport).await,
                    Ok(Err(err)) => {
                        warn!(%err, attempt = self.attempt, "connect failed");
                        self.schedule_retry();
                    }
                    Err(err) => {
                        warn!(%err, "connect task ended abnormally");
                        self.schedule_retry();
                    }
                }
                Flow::Continue
            }
        }
    }

    async fn backing_off(&mut self) -> Flow {
        let retry_at = self.retry_at.unwrap_or_else(Instant::now);
        tokio::select! {
            command = self.command_rx.recv() => self.on_command(command).await,
            _ = sleep_until(retry_at) => {
                self.retry_at = None;
                self.set_phase(ConnectionPhase::Connecting);
                Flow::Continue
            }
        }
    }

    async fn session(&mut self) -> Flow {
        let Some(transport) = self.transport.as_mut() else {
            self.transport_fault("transport missing").await;
            return Flow::Continue;
        };

        let live = self.phase == ConnectionPhase::Live;
        let idle_deadline = Instant::now() + Duration::from_secs(3600);
        let handshake = self.handshake_deadline;
        let presence = self.next_presence.filter(|_| live);

        tokio::select! {
            command = self.command_rx.recv() => self.on_command(command).await,
            frame = transport.recv() => {
                self.on_frame(frame).await;
                Flow::Continue
            }
            _ = sleep_until(self.next_heartbeat) => {
                self.on_heartbeat_tick().await;
                Flow::Continue
            }
            _ = sleep_until(handshake.unwrap_or(idle_deadline)), if handshake.is_some() => {
                self.transport_fault("handshake timed out").await;
                Flow::Continue
            }
            _ = sleep_until(presence.unwrap_or(idle_deadline)), if presence.is_some() => {
                self.next_presence =
                    self.config.presence_interval.map(|every| Instant::now() + every);
                self.intents.enqueue(Intent::PresenceHeartbeat).await;
                Flow::Continue
            }
            _ = self.intents.ready(), if live => {
                self.drain_intents().await;
                Flow::Continue
            }
        }
    }

    async fn on_connected(&mut self, transport: Box<dyn Transport>) {
        let now = Instant::now();
        self.transport = Some(transport);
        self.last_heard = now;
        self.next_heartbeat = now + self.config.heartbeat_interval;
        self.set_phase(ConnectionPhase::Authenticating);

        let Some(credential) = self.credentials.current_credential() else {
            self.auth_failed("no credential available").await;
            return;
        };
        self.handshake_deadline = Some(now + self.config.handshake_timeout);
        self.send_frame(&OutboundFrame::auth(credential.token())).await;
    }

    async fn on_frame(&mut self, frame: Option<RealtimeResult<String>>) {
        let raw = match frame {
            Some(Ok(raw)) => raw,
            Some(Err(err)) => {
                self.transport_fault(&err.to_string()).await;
                return;
            }
            None => {
                self.transport_fault("transport closed by peer").await;
                return;
            }
        };

        self.last_heard = Instant::now();
        match decode(&raw) {
            Ok(InboundFrame::Heartbeat) => trace!("heartbeat received"),
            Ok(InboundFrame::Control(control)) => self.on_control(control).await,
            Ok(InboundFrame::Event { channel, event }) => {
                if let DomainEvent::Unrecognized { tag } = &event {
                    debug!(%tag, "ignoring unrecognized event");
                    return;
                }
                self.registry.dispatch(channel.as_ref(), &event);
            }
            Err(err) => warn!(%err, "dropping undecodable frame"),
        }
    }

    async fn on_control(&mut self, control: ControlFrame) {
        match control {
            ControlFrame::AuthAccepted if self.phase == ConnectionPhase::Authenticating => {
                debug!("authenticated");
                self.pending = self.registry.declared();
                self.handshake_deadline = Some(Instant::now() + self.config.handshake_timeout);
                self.set_phase(ConnectionPhase::Subscribing);
                for key in self.pending.clone() {
                    if !self.send_frame(&OutboundFrame::join(&key)).await {
                        return;
                    }
                }
                if self.pending.is_empty() {
                    self.enter_live().await;
                }
            }
            ControlFrame::AuthAccepted => debug!(phase = ?self.phase, "ignoring stray auth ack"),
            ControlFrame::AuthRejected { reason } => self.auth_failed(&reason).await,
            ControlFrame::ChannelJoined { channel } => {
                self.pending.remove(&channel);
                if self.registry.mark_joined(&channel) {
                    debug!(%channel, "channel joined");
                }
                if self.phase == ConnectionPhase::Subscribing && self.pending.is_empty() {
                    self.enter_live().await;
                } else {
                    self.publish_status();
                }
            }
        }
    }

    async fn enter_live(&mut self) {
        self.handshake_deadline = None;
        self.attempt = 0;
        self.gave_up = false;
        self.next_presence = self
            .config
            .presence_interval
            .map(|every| Instant::now() + every);
        info!(channels = self.registry.declared().len(), "connection live");
        self.set_phase(ConnectionPhase::Live);
        self.drain_intents().await;
    }

    async fn on_heartbeat_tick(&mut self) {
        let interval = self.config.heartbeat_interval;
        let silent_for = self.last_heard.elapsed();
        if silent_for >= interval.saturating_mul(self.config.max_missed_heartbeats) {
            warn!(silent_ms = silent_for.as_millis() as u64, "heartbeat timeout");
            self.transport_fault("heartbeat timeout").await;
            return;
        }
        self.next_heartbeat = Instant::now() + interval;
        self.send_raw(HEARTBEAT_FRAME.to_owned()).await;
    }

    /// Sends queued intents in order until the queue empties or the send fails.
    async fn drain_intents(&mut self) {
        while self.phase == ConnectionPhase::Live {
            for stale in self
                .intents
                .prune_stale(self.config.typing_intent_ttl)
                .await
            {
                debug!(
                    intent_id = %stale.id,
                    kind = stale.intent.kind(),
                    age_ms = stale.age().as_millis() as u64,
                    "dropping stale intent"
                );
            }

            let Some(next) = self.intents.peek().await else {
                break;
            };
            let frame = match next.intent.to_frame().encode() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(%err, intent_id = %next.id, "dropping unencodable intent");
                    self.intents.remove(&next.id).await;
                    continue;
                }
            };

            if self.send_raw(frame).await {
                self.intents.remove(&next.id).await;
                debug!(intent_id = %next.id, kind = next.intent.kind(), "intent sent");
            } else {
                self.intents.mark_attempted(&next.id).await;
                break;
            }
        }
    }

    async fn send_frame(&mut self, frame: &OutboundFrame) -> bool {
        match frame.encode() {
            Ok(raw) => self.send_raw(raw).await,
            Err(err) => {
                warn!(%err, destination = %frame.destination_channel, "failed to encode frame");
                false
            }
        }
    }

    /// False when nothing was sent; a transport error has already scheduled a reconnect.
    async fn send_raw(&mut self, raw: String) -> bool {
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match transport.send(raw).await {
            Ok(()) => true,
            Err(err) => {
                self.transport_fault(&err.to_string()).await;
                false
            }
        }
    }

    async fn auth_failed(&mut self, reason: &str) {
        warn!(%reason, "authentication failed, staying disconnected");
        self.credentials.credential_rejected(reason);
        self.teardown().await;
        self.attempt = 0;
        self.auth_required = true;
        self.set_phase(ConnectionPhase::Disconnected);
    }

    async fn transport_fault(&mut self, reason: &str) {
        warn!(%reason, phase = ?self.phase, "connection lost");
        self.teardown().await;
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        self.attempt += 1;
        if self.attempt > self.config.max_reconnect_attempts {
            warn!(
                attempts = self.config.max_reconnect_attempts,
                "giving up on reconnecting"
            );
            self.gave_up = true;
            self.set_phase(ConnectionPhase::Disconnected);
            return;
        }

        let delay = self.config.backoff_delay(self.attempt);
        self.retry_at = Some(Instant::now() + delay);
        info!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        self.set_phase(ConnectionPhase::Reconnecting);
    }

    /// Drops the transport and any in-flight connect. Declarations survive.
    async fn teardown(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.registry.clear_joined();
        self.pending.clear();
        self.retry_at = None;
        self.handshake_deadline = None;
        self.next_presence = None;
    }

    fn set_phase(&mut self, phase: ConnectionPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "connection phase changed");
            self.phase = phase;
        }
        debug_assert!(!self.phase.has_session() || self.transport.is_some());
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ConnectionStatus {
            phase: self.phase,
            attempt: self.attempt,
            pending_channels: self.pending.clone(),
            auth_required: self.auth_required,
            gave_up: self.gave_up,
        });
    }
}
