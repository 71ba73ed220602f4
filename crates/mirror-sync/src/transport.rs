//! # Transport
//!
//! Connection manager with automatic reconnection, exponential backoff and
//! a heartbeat. The physical link sits behind [`Connector`] / [`Channel`]
//! so the state machine does not care whether frames travel over a
//! WebSocket ([`crate::websocket::WsConnector`]) or an in-memory pipe.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Transport Connection States                        │
//! │                                                                         │
//! │  ┌────────────┐   open() / online   ┌────────────┐                     │
//! │  │Disconnected│ ──────────────────► │ Connecting │                     │
//! │  └────────────┘                     └─────┬──────┘                     │
//! │     ▲      ▲                    success   │   failure                   │
//! │     │      │                      ┌───────┴───────┐                    │
//! │     │      │                      ▼               ▼                    │
//! │     │      │              ┌────────────┐   attempts < max?             │
//! │     │      │              │ Connected  │     yes: wait backoff,        │
//! │     │      │              └─────┬──────┘          connect again        │
//! │     │      │   drop / offline   │                no: stay Disconnected │
//! │     │      └────────────────────┘                                      │
//! │     │                                                                   │
//! │     └──── close() from any state ────► Closed (terminal)               │
//! │                                                                         │
//! │  BACKOFF STRATEGY (exponential, no jitter)                             │
//! │  ─────────────────────────────────────────                             │
//! │  delay = min(initial · 2^attempt, max)  →  1s, 2s, 4s, 8s, 16s, 30s    │
//! │  The attempt counter resets on every successful connect.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Message Flow
//! Outbound writes go through the actor and resolve once the frame is on
//! the wire. Inbound frames are parsed and fanned out to every handler
//! registered with [`TransportHandle::on_message`]; frames that do not
//! parse are logged and dropped.

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};
use crate::protocol::{InboundMessage, OutboundMessage};

// =============================================================================
// Transport State
// =============================================================================

/// Connection state for the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected. Either idle or waiting out a backoff delay.
    Disconnected,
    /// Attempting to connect.
    Connecting,
    /// Connected and ready.
    Connected,
    /// Closed by its owner. Terminal.
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Configuration for the transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Server endpoint (e.g., "ws://127.0.0.1:8765/ws").
    pub url: String,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Delay before the first reconnect.
    pub initial_backoff: Duration,

    /// Upper bound on the reconnect delay.
    pub max_backoff: Duration,

    /// Consecutive failed cycles before giving up (0 = never give up).
    pub max_attempts: u32,

    /// Interval between heartbeat pings while connected.
    pub heartbeat_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: "ws://127.0.0.1:8765/ws".into(),
            connect_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            max_attempts: 5,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Physical Link
// =============================================================================

/// Opens physical connections.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> SyncResult<Box<dyn Channel>>;
}

/// One open, full-duplex text connection.
#[async_trait]
pub trait Channel: Send {
    /// Writes one text frame.
    async fn send(&mut self, text: String) -> SyncResult<()>;

    /// Next text frame. `None` when the peer closed the connection.
    async fn recv(&mut self) -> Option<SyncResult<String>>;

    /// Best-effort graceful close.
    async fn close(&mut self);
}

// =============================================================================
// Reconnect Schedule
// =============================================================================

/// Exponential reconnect delays plus the consecutive-failure counter.
pub struct ReconnectSchedule {
    backoff: ExponentialBackoff,
    attempts: u32,
    max_attempts: u32,
}

impl ReconnectSchedule {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        let backoff = ExponentialBackoff {
            initial_interval: initial,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..Default::default()
        };

        ReconnectSchedule {
            backoff,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(
            config.initial_backoff,
            config.max_backoff,
            config.max_attempts,
        )
    }

    /// Failed cycles since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_attempts > 0 && self.attempts >= self.max_attempts
    }

    /// Counts one failed cycle and returns the delay before the next try,
    /// or `None` once `max_attempts` is reached.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.attempts = self.attempts.saturating_add(1);
        if self.is_exhausted() {
            return None;
        }
        self.backoff.next_backoff()
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }
}

// =============================================================================
// Transport Handle
// =============================================================================

type MessageHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;
type StatusHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

enum Command {
    Open,
    Send {
        message: OutboundMessage,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    Close,
    Online,
    Offline,
}

struct Shared {
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    message_handlers: RwLock<Vec<MessageHandler>>,
    status_handlers: RwLock<Vec<StatusHandler>>,
}

fn registered<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    match lock.read() {
        Ok(handlers) => handlers.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn register<T>(lock: &RwLock<Vec<T>>, handler: T) {
    match lock.write() {
        Ok(mut handlers) => handlers.push(handler),
        Err(poisoned) => poisoned.into_inner().push(handler),
    }
}

/// Handle for interacting with the transport from other components.
#[derive(Clone)]
pub struct TransportHandle {
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl TransportHandle {
    /// Starts connecting. No-op while connecting or connected; from
    /// `Disconnected` it also clears the attempt counter.
    pub fn open(&self) {
        self.command(Command::Open);
    }

    /// Writes one message. Fails with [`SyncError::NotConnected`] unless the
    /// transport is connected; resolves once the frame has been written.
    pub async fn send(&self, message: OutboundMessage) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { message, reply })
            .map_err(|_| SyncError::Closed)?;

        rx.await.map_err(|_| SyncError::Closed)?
    }

    /// Registers a handler for every parsed inbound message.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        register(&self.shared.message_handlers, Arc::new(handler) as MessageHandler);
    }

    /// Registers a handler for every state transition.
    pub fn on_status_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        register(&self.shared.status_handlers, Arc::new(handler) as StatusHandler);
    }

    /// Closes the connection for good. No further reconnects.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Network came back: clear the attempt counter and connect now.
    pub fn notify_online(&self) {
        self.command(Command::Online);
    }

    /// Network went away: drop the connection and enter backoff.
    pub fn notify_offline(&self) {
        self.command(Command::Offline);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Consecutive failed connection cycles.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Transport task has stopped");
        }
    }
}

// =============================================================================
// Transport Actor
// =============================================================================

enum Phase {
    Idle,
    Waiting(Duration),
    Connecting,
    Connected(Box<dyn Channel>),
    Closed,
}

/// Transport with automatic reconnection.
///
/// ## Usage
/// ```rust,ignore
/// let config = TransportConfig {
///     url: "ws://localhost:8765/ws".into(),
///     ..Default::default()
/// };
///
/// let transport = Transport::spawn(config, WsConnector::new());
/// transport.on_message(|msg| println!("received {}", msg.type_name()));
/// transport.open();
/// ```
pub struct Transport {
    config: TransportConfig,
    connector: Arc<dyn Connector>,
    schedule: ReconnectSchedule,
    commands: mpsc::UnboundedReceiver<Command>,
    shared: Arc<Shared>,
}

impl Transport {
    /// Spawns the transport task. The transport starts `Disconnected` and
    /// stays there until [`TransportHandle::open`].
    pub fn spawn(config: TransportConfig, connector: impl Connector) -> TransportHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            state,
            attempts: AtomicU32::new(0),
            message_handlers: RwLock::new(Vec::new()),
            status_handlers: RwLock::new(Vec::new()),
        });

        let transport = Transport {
            schedule: ReconnectSchedule::from_config(&config),
            config,
            connector: Arc::new(connector),
            commands: commands_rx,
            shared: Arc::clone(&shared),
        };

        tokio::spawn(transport.run());

        TransportHandle {
            commands: commands_tx,
            shared,
        }
    }

    /// Main transport loop.
    async fn run(mut self) {
        info!(url = %self.config.url, "Transport starting");

        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Waiting(delay) => self.wait(delay).await,
                Phase::Connecting => self.connect().await,
                Phase::Connected(channel) => self.serve(channel).await,
                Phase::Closed => break,
            };
        }

        self.set_state(ConnectionState::Closed);
        info!("Transport stopped");
    }

    /// Disconnected with no reconnect scheduled.
    async fn idle(&mut self) -> Phase {
        loop {
            match self.commands.recv().await {
                Some(Command::Open) | Some(Command::Online) => {
                    self.reset_attempts();
                    return Phase::Connecting;
                }
                Some(Command::Send { reply, .. }) => {
                    let _ = reply.send(Err(SyncError::NotConnected));
                }
                Some(Command::Offline) => {}
                Some(Command::Close) | None => return Phase::Closed,
            }
        }
    }

    /// Disconnected, waiting out a backoff delay.
    async fn wait(&mut self, delay: Duration) -> Phase {
        debug!(?delay, attempt = self.schedule.attempts(), "Waiting before reconnect");

        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return Phase::Connecting,
                command = self.commands.recv() => match command {
                    Some(Command::Open) | Some(Command::Online) => {
                        self.reset_attempts();
                        return Phase::Connecting;
                    }
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(SyncError::NotConnected));
                    }
                    Some(Command::Offline) => {}
                    Some(Command::Close) | None => {
                        info!("Closed during backoff");
                        return Phase::Closed;
                    }
                }
            }
        }
    }

    async fn connect(&mut self) -> Phase {
        self.set_state(ConnectionState::Connecting);

        let connector = Arc::clone(&self.connector);
        let url = self.config.url.clone();
        let limit = self.config.connect_timeout;
        let attempt = async move {
            match timeout(limit, connector.connect(&url)).await {
                Ok(result) => result,
                Err(_) => Err(SyncError::Timeout(limit.as_secs())),
            }
        };
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                result = &mut attempt => {
                    return match result {
                        Ok(channel) => Phase::Connected(channel),
                        Err(e) => self.fail(&e),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(Command::Open) | Some(Command::Online) => {
                        debug!("Connect already in progress");
                    }
                    Some(Command::Send { reply, .. }) => {
                        let _ = reply.send(Err(SyncError::NotConnected));
                    }
                    Some(Command::Offline) => {
                        return self.fail(&SyncError::ConnectionFailed("network offline".into()));
                    }
                    Some(Command::Close) | None => return Phase::Closed,
                }
            }
        }
    }

    /// Connection loop: writes, reads and heartbeats.
    async fn serve(&mut self, mut channel: Box<dyn Channel>) -> Phase {
        self.reset_attempts();
        self.set_state(ConnectionState::Connected);
        info!(url = %self.config.url, "Connected to sync server");

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = channel.recv() => match frame {
                    Some(Ok(text)) => self.dispatch(&text),
                    Some(Err(e)) => return self.fail(&e),
                    None => return self.fail(&SyncError::Disconnected),
                },

                command = self.commands.recv() => match command {
                    Some(Command::Send { message, reply }) => {
                        match write_message(&mut channel, &message).await {
                            Ok(()) => {
                                let _ = reply.send(Ok(()));
                            }
                            Err(e) if e.is_protocol_error() => {
                                let _ = reply.send(Err(e));
                            }
                            Err(e) => {
                                let next = self.fail(&e);
                                let _ = reply.send(Err(e));
                                return next;
                            }
                        }
                    }
                    Some(Command::Open) | Some(Command::Online) => {}
                    Some(Command::Offline) => {
                        channel.close().await;
                        return self.fail(&SyncError::ConnectionFailed("network offline".into()));
                    }
                    Some(Command::Close) | None => {
                        info!("Closing connection");
                        channel.close().await;
                        return Phase::Closed;
                    }
                },

                _ = heartbeat.tick() => {
                    if let Err(e) = write_message(&mut channel, &OutboundMessage::Ping).await {
                        return self.fail(&e);
                    }
                }
            }
        }
    }

    /// Counts a failed cycle and picks the next phase.
    fn fail(&mut self, reason: &SyncError) -> Phase {
        let delay = self.schedule.record_failure();
        self.shared
            .attempts
            .store(self.schedule.attempts(), Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);

        match delay {
            Some(delay) => {
                warn!(
                    error = %reason,
                    attempt = self.schedule.attempts(),
                    ?delay,
                    "Connection failed"
                );
                Phase::Waiting(delay)
            }
            None => {
                warn!(
                    error = %reason,
                    attempts = self.schedule.attempts(),
                    "Max reconnection attempts reached"
                );
                Phase::Idle
            }
        }
    }

    fn reset_attempts(&mut self) {
        self.schedule.reset();
        self.shared.attempts.store(0, Ordering::SeqCst);
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.shared.state.send_replace(next);
        if previous == next {
            return;
        }

        debug!(from = %previous, to = %next, "Connection state changed");
        for handler in registered(&self.shared.status_handlers) {
            handler(next);
        }
    }

    fn dispatch(&self, text: &str) {
        match InboundMessage::from_json(text) {
            Ok(message) => {
                debug!(msg_type = %message.type_name(), "Received message");
                for handler in registered(&self.shared.message_handlers) {
                    handler(message.clone());
                }
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed frame");
            }
        }
    }
}

async fn write_message(channel: &mut Box<dyn Channel>, message: &OutboundMessage) -> SyncResult<()> {
    let json = message.to_json()?;
    debug!(msg_type = %message.type_name(), "Sending message");
    channel.send(json).await
}
