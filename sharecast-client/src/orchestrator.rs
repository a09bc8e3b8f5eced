//! Client subscription orchestrator
//!
//! A single task owns every peer connection session. Public requests, the
//! results of spawned negotiation work, transport callbacks and timers all
//! arrive on queues drained by that task, so session state is only ever
//! touched from one place.
//!
//! ```text
//! Idle ──► Negotiating ──► Connected ◄──► Recovering
//!               │               │              │
//!               └───────────────┴──────────────┴──► Closed
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use sharecast_core::models::{MediaCapabilities, RoomId, StreamDescriptor};
use sharecast_core::SdpOptimizer;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, NegotiationError, Result};
use crate::session::{
    CloseReason, ConnectionState, IceState, PeerConnectionSession, SessionKey, SessionRole,
    SessionState, StreamTarget,
};
use crate::signaling::SignalingClient;
use crate::transport::{
    Direction, MediaKind, PeerFactory, PeerTransport, TransportEvent, TransportEvents,
    TransportGuard,
};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a disconnected session may stay disconnected
    pub disconnect_grace: Duration,
    /// How long a session has to reconnect after an ICE restart
    pub restart_window: Duration,
    /// Overall deadline for a session to first connect
    pub connect_timeout: Duration,
    /// Signaling attempts for a publish offer, first try included
    pub publish_attempts: usize,
    /// Delay before the second attempt; doubles afterwards
    pub retry_base_delay: Duration,
    pub optimize_sdp: bool,
    pub high_frame_rate: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            disconnect_grace: Duration::from_secs(2),
            restart_window: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(15),
            publish_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            optimize_sdp: true,
            high_frame_rate: false,
        }
    }
}

/// Notifications for UI layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    StateChanged {
        key: SessionKey,
        state: SessionState,
    },
    TrackReceived {
        key: SessionKey,
        kind: MediaKind,
        track_id: String,
    },
    SessionClosed {
        key: SessionKey,
        reason: CloseReason,
    },
    PublishFailed {
        key: SessionKey,
        error: ClientError,
        attempts: usize,
    },
}

enum Command {
    Open {
        key: SessionKey,
        capabilities: MediaCapabilities,
        reply: oneshot::Sender<Result<PeerConnectionSession>>,
    },
    Stop {
        key: SessionKey,
        reply: oneshot::Sender<bool>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<PeerConnectionSession>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    Attached {
        id: u64,
        transport: Arc<dyn PeerTransport>,
    },
    Negotiated {
        id: u64,
        restart: bool,
        attempts: usize,
        outcome: Result<()>,
    },
    Transport {
        id: u64,
        event: TransportEvent,
    },
    Timer {
        id: u64,
        kind: TimerKind,
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    DisconnectGrace,
    RestartWindow,
    ConnectTimeout,
}

/// What a transport state report means for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Pending,
    Up,
    Down,
    Failed,
    Gone,
}

impl From<ConnectionState> for Health {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::New | ConnectionState::Connecting => Self::Pending,
            ConnectionState::Connected => Self::Up,
            ConnectionState::Disconnected => Self::Down,
            ConnectionState::Failed => Self::Failed,
            ConnectionState::Closed => Self::Gone,
        }
    }
}

impl From<IceState> for Health {
    fn from(state: IceState) -> Self {
        match state {
            // A closed ICE transport is always accompanied by a closed connection
            IceState::New | IceState::Checking | IceState::Closed => Self::Pending,
            IceState::Connected | IceState::Completed => Self::Up,
            IceState::Disconnected => Self::Down,
            IceState::Failed => Self::Failed,
        }
    }
}

struct SessionEntry {
    id: u64,
    key: SessionKey,
    state: SessionState,
    connection_state: ConnectionState,
    ice_state: IceState,
    retry_count: u32,
    guard: Option<TransportGuard>,
    cancel: CancellationToken,
    waiters: Vec<oneshot::Sender<Result<PeerConnectionSession>>>,
    answered: bool,
    ever_connected: bool,
    /// Set once an ICE restart was spent in the current recovery episode
    restarted: bool,
    /// Bumped on every state change; timers armed under an older value are stale
    generation: u64,
}

impl SessionEntry {
    fn snapshot(&self) -> PeerConnectionSession {
        PeerConnectionSession {
            key: self.key.clone(),
            state: self.state,
            connection_state: self.connection_state,
            ice_state: self.ice_state,
            retry_count: self.retry_count,
        }
    }
}

/// Cheap, cloneable front door to a running orchestrator
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<OrchestratorEvent>,
}

impl OrchestratorHandle {
    /// Subscribe to a remote stream. Watching a stream that already has a
    /// live session returns that session.
    pub async fn watch(
        &self,
        target: StreamTarget,
        capabilities: MediaCapabilities,
    ) -> Result<PeerConnectionSession> {
        self.open(SessionKey::new(target, SessionRole::Subscribe), capabilities)
            .await
    }

    pub async fn watch_stream(
        &self,
        room: &RoomId,
        stream: &StreamDescriptor,
    ) -> Result<PeerConnectionSession> {
        self.watch(
            StreamTarget::new(room.clone(), stream.name.as_str()),
            stream.capabilities(),
        )
        .await
    }

    /// Start sharing local media. Only one publish session exists at a time;
    /// while one is live it is returned as is.
    pub async fn start_publish(
        &self,
        target: StreamTarget,
        media: MediaCapabilities,
    ) -> Result<PeerConnectionSession> {
        self.open(SessionKey::new(target, SessionRole::Publish), media)
            .await
    }

    async fn open(
        &self,
        key: SessionKey,
        capabilities: MediaCapabilities,
    ) -> Result<PeerConnectionSession> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Open {
            key,
            capabilities,
            reply,
        })?;
        rx.await.map_err(|_| ClientError::Shutdown)?
    }

    /// Returns whether a live session was stopped. Resolves once its tracks are
    /// stopped and the connection is closed.
    pub async fn stop(&self, key: &SessionKey) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stop {
            key: key.clone(),
            reply,
        })?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    pub async fn sessions(&self) -> Result<Vec<PeerConnectionSession>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Sessions { reply })?;
        rx.await.map_err(|_| ClientError::Shutdown)
    }

    /// Close every session and stop the orchestrator task. Resolves once every
    /// transport has been released.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Shutdown)
    }
}

/// Negotiation work that runs outside the orchestrator task
#[derive(Clone)]
struct Negotiator {
    factory: Arc<dyn PeerFactory>,
    signaling: Arc<dyn SignalingClient>,
    config: OrchestratorConfig,
    tx: mpsc::UnboundedSender<Internal>,
}

impl Negotiator {
    fn optimize(&self, role: SessionRole, sdp: String) -> String {
        if !self.config.optimize_sdp {
            return sdp;
        }
        let optimizer = match role {
            SessionRole::Publish => {
                SdpOptimizer::publish().with_high_frame_rate(self.config.high_frame_rate)
            }
            SessionRole::Subscribe => SdpOptimizer::playback(),
        };
        optimizer.optimize(&sdp)
    }

    async fn establish(
        &self,
        id: u64,
        key: &SessionKey,
        capabilities: MediaCapabilities,
        cancel: &CancellationToken,
        attempts: &mut usize,
    ) -> Result<()> {
        let tx = self.tx.clone();
        let events = TransportEvents::new(move |event| {
            let _ = tx.send(Internal::Transport { id, event });
        });
        let transport = self.factory.create(key.role, events).await?;
        if self
            .tx
            .send(Internal::Attached {
                id,
                transport: transport.clone(),
            })
            .is_err()
        {
            // Orchestrator already gone; nobody else will release it
            TransportGuard::new(transport).release().await;
            return Err(ClientError::Shutdown);
        }

        tokio::select! {
            () = cancel.cancelled() => Err(ClientError::Closed(CloseReason::Stopped.to_string())),
            result = self.offer_answer(key, capabilities, transport.as_ref(), attempts) => result,
        }
    }

    async fn offer_answer(
        &self,
        key: &SessionKey,
        capabilities: MediaCapabilities,
        transport: &dyn PeerTransport,
        attempts: &mut usize,
    ) -> Result<()> {
        let direction = Direction::from(key.role);
        if capabilities.has_audio {
            transport.add_transceiver(MediaKind::Audio, direction).await?;
        }
        if capabilities.has_video {
            transport.add_transceiver(MediaKind::Video, direction).await?;
        }

        let offer = self.optimize(key.role, transport.create_offer(false).await?);
        let max_attempts = match key.role {
            SessionRole::Publish => self.config.publish_attempts.max(1),
            SessionRole::Subscribe => 1,
        };
        let answer = self.exchange(key, offer, max_attempts, attempts).await?;
        transport.apply_answer(answer).await
    }

    async fn exchange(
        &self,
        key: &SessionKey,
        offer: String,
        max_attempts: usize,
        attempts: &mut usize,
    ) -> std::result::Result<String, NegotiationError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.retry_base_delay)
            .with_factor(2.0)
            .with_max_times(max_attempts - 1)
            .build();

        let mut last_err = None;
        for delay in std::iter::once(Duration::ZERO).chain(backoff) {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }

            *attempts += 1;
            match self
                .signaling
                .exchange(key.role, &key.target, offer.clone())
                .await
            {
                Ok(answer) => return Ok(answer),
                Err(e) => {
                    warn!(session = %key, attempt = *attempts, error = %e, "Signaling exchange failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| NegotiationError::Network("no attempt made".to_string())))
    }

    async fn restart(&self, key: &SessionKey, transport: Arc<dyn PeerTransport>) -> Result<()> {
        let offer = self.optimize(key.role, transport.create_offer(true).await?);
        let mut attempts = 0;
        let answer = self.exchange(key, offer, 1, &mut attempts).await?;
        transport.apply_answer(answer).await
    }
}

pub struct Orchestrator {
    negotiator: Negotiator,
    sessions: HashMap<u64, SessionEntry>,
    by_key: HashMap<SessionKey, u64>,
    next_id: u64,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    events: broadcast::Sender<OrchestratorEvent>,
    /// Transport teardowns in flight
    releases: JoinSet<()>,
}

impl Orchestrator {
    /// Start the orchestrator task. It runs until [`OrchestratorHandle::shutdown`]
    /// is called or every handle is dropped.
    pub fn spawn(
        factory: Arc<dyn PeerFactory>,
        signaling: Arc<dyn SignalingClient>,
        config: OrchestratorConfig,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(64);

        let orchestrator = Self {
            negotiator: Negotiator {
                factory,
                signaling,
                config,
                tx: internal_tx,
            },
            sessions: HashMap::new(),
            by_key: HashMap::new(),
            next_id: 1,
            internal_rx,
            events: events.clone(),
            releases: JoinSet::new(),
        };
        let task = tokio::spawn(orchestrator.run(commands_rx));

        (
            OrchestratorHandle {
                commands: commands_tx,
                events,
            },
            task,
        )
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let done = loop {
            tokio::select! {
                biased;
                Some(event) = self.internal_rx.recv() => self.handle_internal(event),
                Some(result) = self.releases.join_next(), if !self.releases.is_empty() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Transport release task failed");
                    }
                }
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => break Some(reply),
                    None => break None,
                    Some(command) => self.handle_command(command),
                },
            }
        };

        let ids: Vec<u64> = self.sessions.keys().copied().collect();
        for id in ids {
            self.close(id, CloseReason::Shutdown);
        }
        self.internal_rx.close();
        while let Ok(event) = self.internal_rx.try_recv() {
            if let Internal::Attached { transport, .. } = event {
                self.releases.spawn(TransportGuard::new(transport).release());
            }
        }
        while let Some(result) = self.releases.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Transport release task failed");
            }
        }
        info!("Orchestrator stopped");
        if let Some(reply) = done {
            let _ = reply.send(());
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open {
                key,
                capabilities,
                reply,
            } => self.open(key, capabilities, reply),
            Command::Stop { key, reply } => match self.by_key.get(&key).copied() {
                Some(id) => {
                    let reason = CloseReason::Stopped;
                    let error = ClientError::Closed(reason.to_string());
                    self.teardown(id, reason, error, Some(reply));
                }
                None => {
                    let _ = reply.send(false);
                }
            },
            Command::Sessions { reply } => {
                let mut entries: Vec<&SessionEntry> = self.sessions.values().collect();
                entries.sort_by_key(|e| e.id);
                let _ = reply.send(entries.into_iter().map(SessionEntry::snapshot).collect());
            }
            Command::Shutdown { .. } => {}
        }
    }

    fn existing(&self, key: &SessionKey) -> Option<u64> {
        if let Some(id) = self.by_key.get(key) {
            return Some(*id);
        }
        if key.role == SessionRole::Publish {
            return self
                .by_key
                .iter()
                .find(|(k, _)| k.role == SessionRole::Publish)
                .map(|(_, id)| *id);
        }
        None
    }

    fn open(
        &mut self,
        key: SessionKey,
        capabilities: MediaCapabilities,
        reply: oneshot::Sender<Result<PeerConnectionSession>>,
    ) {
        if let Some(entry) = self
            .existing(&key)
            .and_then(|id| self.sessions.get_mut(&id))
        {
            debug!(session = %entry.key, "Session already active");
            if entry.answered {
                let _ = reply.send(Ok(entry.snapshot()));
            } else {
                entry.waiters.push(reply);
            }
            return;
        }

        if capabilities.is_empty() {
            let _ = reply.send(Err(ClientError::NoMedia));
            return;
        }

        let id = self.next_id;
        self.next_id += 1;
        let cancel = CancellationToken::new();
        self.sessions.insert(
            id,
            SessionEntry {
                id,
                key: key.clone(),
                state: SessionState::Idle,
                connection_state: ConnectionState::New,
                ice_state: IceState::New,
                retry_count: 0,
                guard: None,
                cancel: cancel.clone(),
                waiters: vec![reply],
                answered: false,
                ever_connected: false,
                restarted: false,
                generation: 0,
            },
        );
        self.by_key.insert(key.clone(), id);
        info!(session = %key, "Opening session");
        self.set_state(id, SessionState::Negotiating);

        self.arm(id, TimerKind::ConnectTimeout, 0);

        let negotiator = self.negotiator.clone();
        tokio::spawn(async move {
            let mut attempts = 0;
            let outcome = negotiator
                .establish(id, &key, capabilities, &cancel, &mut attempts)
                .await;
            let _ = negotiator.tx.send(Internal::Negotiated {
                id,
                restart: false,
                attempts,
                outcome,
            });
        });
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Attached { id, transport } => {
                let guard = TransportGuard::new(transport);
                match self.sessions.get_mut(&id) {
                    Some(entry) => entry.guard = Some(guard),
                    // Session ended while the transport was being created
                    None => {
                        self.releases.spawn(guard.release());
                    }
                }
            }
            Internal::Negotiated {
                id,
                restart,
                attempts,
                outcome,
            } => self.on_negotiated(id, restart, attempts, outcome),
            Internal::Transport { id, event } => self.on_transport(id, event),
            Internal::Timer {
                id,
                kind,
                generation,
            } => self.on_timer(id, kind, generation),
        }
    }

    fn on_negotiated(&mut self, id: u64, restart: bool, attempts: usize, outcome: Result<()>) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };

        match (restart, outcome) {
            (false, Ok(())) => {
                entry.answered = true;
                debug!(session = %entry.key, attempts, "Answer applied");
                let snapshot = entry.snapshot();
                for waiter in entry.waiters.drain(..) {
                    let _ = waiter.send(Ok(snapshot.clone()));
                }
            }
            (false, Err(error)) => {
                let key = entry.key.clone();
                warn!(session = %key, attempts, error = %error, "Negotiation failed");
                if key.role == SessionRole::Publish {
                    self.emit(OrchestratorEvent::PublishFailed {
                        key,
                        error: error.clone(),
                        attempts,
                    });
                }
                let reason = CloseReason::NegotiationFailed(error.to_string());
                self.teardown(id, reason, error, None);
            }
            (true, Ok(())) => debug!(session = %entry.key, "ICE restart answer applied"),
            (true, Err(error)) => {
                warn!(session = %entry.key, error = %error, "ICE restart failed");
                self.close(id, CloseReason::RestartFailed);
            }
        }
    }

    fn on_transport(&mut self, id: u64, event: TransportEvent) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };

        let health = match event {
            TransportEvent::ConnectionState(state) => {
                entry.connection_state = state;
                Health::from(state)
            }
            TransportEvent::IceState(state) => {
                entry.ice_state = state;
                Health::from(state)
            }
            TransportEvent::Track { kind, track_id } => {
                let key = entry.key.clone();
                info!(session = %key, %kind, %track_id, "Remote track received");
                self.emit(OrchestratorEvent::TrackReceived {
                    key,
                    kind,
                    track_id,
                });
                return;
            }
        };

        match health {
            Health::Pending => {}
            Health::Up => self.on_connected(id),
            Health::Down => self.on_disconnected(id),
            Health::Failed => self.on_failed(id),
            Health::Gone => self.close(id, CloseReason::TransportClosed),
        }
    }

    fn on_connected(&mut self, id: u64) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        entry.ever_connected = true;
        entry.restarted = false;
        if entry.state != SessionState::Connected {
            self.set_state(id, SessionState::Connected);
        }
    }

    fn on_disconnected(&mut self, id: u64) {
        let Some(entry) = self.sessions.get(&id) else {
            return;
        };
        if entry.state != SessionState::Connected {
            return;
        }
        debug!(session = %entry.key, "Disconnected, waiting for the grace period");
        let generation = self.set_state(id, SessionState::Recovering);
        self.arm(id, TimerKind::DisconnectGrace, generation);
    }

    fn on_failed(&mut self, id: u64) {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return;
        };
        if !entry.answered || entry.restarted {
            return;
        }
        let Some(transport) = entry.guard.as_ref().map(|g| g.transport().clone()) else {
            self.close(id, CloseReason::TransportClosed);
            return;
        };

        entry.restarted = true;
        entry.retry_count += 1;
        let key = entry.key.clone();
        let cancel = entry.cancel.clone();
        info!(session = %key, retry = entry.retry_count, "Connection failed, restarting ICE");

        let generation = self.set_state(id, SessionState::Recovering);
        self.arm(id, TimerKind::RestartWindow, generation);

        let negotiator = self.negotiator.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = cancel.cancelled() => return,
                outcome = negotiator.restart(&key, transport) => outcome,
            };
            let _ = negotiator.tx.send(Internal::Negotiated {
                id,
                restart: true,
                attempts: 1,
                outcome,
            });
        });
    }

    fn on_timer(&mut self, id: u64, kind: TimerKind, generation: u64) {
        let Some(entry) = self.sessions.get(&id) else {
            return;
        };

        match kind {
            TimerKind::ConnectTimeout => {
                if entry.ever_connected {
                    return;
                }
                let key = entry.key.clone();
                let timeout = self.negotiator.config.connect_timeout;
                warn!(session = %key, ?timeout, "Connection was not established in time");
                if key.role == SessionRole::Publish {
                    self.emit(OrchestratorEvent::PublishFailed {
                        key,
                        error: ClientError::ConnectTimeout(timeout),
                        attempts: 0,
                    });
                }
                self.close(id, CloseReason::ConnectTimeout);
            }
            TimerKind::DisconnectGrace | TimerKind::RestartWindow => {
                if entry.generation != generation || entry.state != SessionState::Recovering {
                    return;
                }
                let reason = if kind == TimerKind::DisconnectGrace {
                    CloseReason::DisconnectTimeout
                } else {
                    CloseReason::RestartFailed
                };
                self.close(id, reason);
            }
        }
    }

    /// Returns the session's new generation
    fn set_state(&mut self, id: u64, state: SessionState) -> u64 {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return 0;
        };
        entry.state = state;
        entry.generation += 1;
        let generation = entry.generation;
        let key = entry.key.clone();
        debug!(session = %key, ?state, "Session state changed");
        self.emit(OrchestratorEvent::StateChanged { key, state });
        generation
    }

    fn arm(&self, id: u64, kind: TimerKind, generation: u64) {
        let config = &self.negotiator.config;
        let delay = match kind {
            TimerKind::DisconnectGrace => config.disconnect_grace,
            TimerKind::RestartWindow => config.restart_window,
            TimerKind::ConnectTimeout => config.connect_timeout,
        };
        let tx = self.negotiator.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Internal::Timer {
                id,
                kind,
                generation,
            });
        });
    }

    fn close(&mut self, id: u64, reason: CloseReason) {
        let error = ClientError::Closed(reason.to_string());
        self.teardown(id, reason, error, None);
    }

    /// Remove the session and release its transport. Pending openers get
    /// `error` and `stopped` gets `true`, both only after the release is done.
    fn teardown(
        &mut self,
        id: u64,
        reason: CloseReason,
        error: ClientError,
        stopped: Option<oneshot::Sender<bool>>,
    ) {
        let Some(mut entry) = self.sessions.remove(&id) else {
            if let Some(reply) = stopped {
                let _ = reply.send(false);
            }
            return;
        };
        self.by_key.remove(&entry.key);
        entry.cancel.cancel();
        entry.state = SessionState::Closed;

        let guard = entry.guard.take();
        let waiters = std::mem::take(&mut entry.waiters);
        self.releases.spawn(async move {
            if let Some(guard) = guard {
                guard.release().await;
            }
            for waiter in waiters {
                let _ = waiter.send(Err(error.clone()));
            }
            if let Some(reply) = stopped {
                let _ = reply.send(true);
            }
        });

        info!(session = %entry.key, %reason, "Session closed");
        self.emit(OrchestratorEvent::StateChanged {
            key: entry.key.clone(),
            state: SessionState::Closed,
        });
        self.emit(OrchestratorEvent::SessionClosed {
            key: entry.key,
            reason,
        });
    }

    fn emit(&self, event: OrchestratorEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
