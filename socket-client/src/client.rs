//! Realtime client
//!
//! Connection lifecycle manager: owns the single transport connection,
//! the credential, the outbound queue, the tracked rooms, the keep-alive
//! timer and the reconnection schedule. All state lives behind one session
//! lock; listener callbacks always run after it is released.

use crate::backoff::ReconnectionController;
use crate::config::{RoomPolicy, SocketConfig};
use crate::credential::Credential;
use crate::error::{SocketError, TransportErrorKind};
use crate::events::{
    self, QueueStatsUpdate, SegmentationUpdate, ServerNotification, SystemMessage,
};
use crate::keepalive::KeepAlive;
use crate::listeners::{Listener, ListenerRegistry, Subscription};
use crate::outbox::{OutboundQueue, RoomTracker};
use crate::socketio::SocketIoTransport;
use crate::transport::{
    Connection, OpenRequest, Transport, TransportEvent, TransportEventReceiver,
};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Externally visible connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

type SharedConnect = Shared<BoxFuture<'static, Result<(), SocketError>>>;
type Notes = Vec<(&'static str, Value)>;

/// One opened connection plus the tasks bound to it. Dropping a link
/// releases everything it owns.
struct Link {
    generation: u64,
    connection: Arc<dyn Connection>,
    keepalive: Option<KeepAlive>,
    pump: JoinHandle<()>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.keepalive = None;
        self.connection.close();
        self.pump.abort();
    }
}

struct RetryTask(JoinHandle<()>);

impl Drop for RetryTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Phase {
    Disconnected,
    Connecting,
    Connected(Link),
    Reconnecting {
        episode: u64,
        /// Link that dropped; kept so a native transport reconnect on it
        /// can short-circuit the schedule.
        dormant: Option<Link>,
        _retry: RetryTask,
    },
    Failed,
}

impl Phase {
    fn state(&self) -> ConnectionState {
        match self {
            Phase::Disconnected => ConnectionState::Disconnected,
            Phase::Connecting => ConnectionState::Connecting,
            Phase::Connected(_) => ConnectionState::Connected,
            Phase::Reconnecting { .. } => ConnectionState::Reconnecting,
            Phase::Failed => ConnectionState::Failed,
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        matches!(self, Phase::Connected(link) if link.generation == generation)
    }

    fn is_episode(&self, current: u64) -> bool {
        matches!(self, Phase::Reconnecting { episode, .. } if *episode == current)
    }
}

struct PendingConnect {
    id: u64,
    credential: Credential,
    abort: AbortHandle,
    future: SharedConnect,
}

struct Session {
    phase: Phase,
    credential: Option<Credential>,
    pending: Option<PendingConnect>,
    outbox: OutboundQueue,
    rooms: RoomTracker,
    backoff: ReconnectionController,
}

struct Inner {
    config: SocketConfig,
    transport: Arc<dyn Transport>,
    session: Mutex<Session>,
    listeners: ListenerRegistry,
    disposed: AtomicBool,
    ids: AtomicU64,
}

enum ConnectStep {
    Done,
    Join(SharedConnect),
    Wait(SharedConnect),
}

/// Realtime job-status client. Cheap to clone; all clones share one
/// session. After `cleanup()` every clone is unusable.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    /// Create a client over the Socket.IO transport
    pub fn new(config: SocketConfig) -> Result<Self, SocketError> {
        let transport = Arc::new(SocketIoTransport::new(&config.tls)?);
        Self::with_transport(config, transport)
    }

    pub fn with_transport(
        config: SocketConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, SocketError> {
        config.validate()?;
        let backoff = ReconnectionController::new(
            config.backoff_base,
            config.backoff_cap,
            config.max_reconnect_attempts,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                transport,
                session: Mutex::new(Session {
                    phase: Phase::Disconnected,
                    credential: None,
                    pending: None,
                    outbox: OutboundQueue::new(),
                    rooms: RoomTracker::new(),
                    backoff,
                }),
                listeners: ListenerRegistry::new(),
                disposed: AtomicBool::new(false),
                ids: AtomicU64::new(0),
            }),
        })
    }

    // ==================== Lifecycle ====================

    /// Connect as `credential`.
    ///
    /// Resolves immediately when already connected as the same user.
    /// Concurrent calls for the same credential share one attempt; a call
    /// for another user waits (bounded) for the pending one, then switches.
    pub async fn connect(&self, credential: Credential) -> Result<(), SocketError> {
        self.inner.ensure_live()?;
        credential.validate()?;

        let wait_deadline = Instant::now() + self.inner.config.wait_timeout;
        loop {
            match self.inner.plan_connect(&credential) {
                ConnectStep::Done => return Ok(()),
                ConnectStep::Join(attempt) => return attempt.await,
                ConnectStep::Wait(other) => {
                    info!(
                        "[RealtimeClient] Waiting for a pending connect before switching to {}",
                        credential.user_id
                    );
                    if tokio::time::timeout_at(wait_deadline, other).await.is_err() {
                        return Err(SocketError::WaitTimeout(self.inner.config.wait_timeout));
                    }
                }
            }
        }
    }

    /// Drop the connection and any reconnection schedule. Idempotent.
    pub fn disconnect(&self) {
        let mut notes = Notes::new();
        {
            let mut s = self.inner.lock();
            self.inner.teardown(&mut s, "client disconnect", &mut notes);
        }
        if !notes.is_empty() {
            info!("[RealtimeClient] Disconnected");
        }
        self.inner.notify(notes);
    }

    /// Tear everything down. The instance cannot be used afterwards.
    pub fn cleanup(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut notes = Notes::new();
        {
            let mut s = self.inner.lock();
            self.inner.teardown(&mut s, "cleanup", &mut notes);
            s.outbox.clear();
            s.rooms.clear();
            s.credential = None;
        }
        self.inner.notify(notes);
        self.inner.listeners.clear();
        info!("[RealtimeClient] Cleaned up");
    }

    // ==================== Commands ====================

    /// Send now when connected, otherwise queue. Never blocks.
    pub fn emit(&self, event: &str, payload: Value) -> Result<(), SocketError> {
        self.inner.ensure_live()?;
        let mut s = self.inner.lock();
        self.inner.send_or_queue(&mut s, event, payload);
        Ok(())
    }

    /// Track a project room. While disconnected nothing is queued: the room
    /// is joined by the replay after the next successful connection.
    pub fn join_project(&self, project_id: &str) -> Result<(), SocketError> {
        self.inner.ensure_live()?;
        let mut s = self.inner.lock();
        if !s.rooms.join(project_id) {
            debug!("[RealtimeClient] Project {} already joined", project_id);
            return Ok(());
        }
        // A failed join is not queued; the replay after the next connection
        // covers every tracked room.
        if let Phase::Connected(link) = &s.phase {
            if let Err(e) = link.connection.send(events::JOIN_PROJECT, &json!(project_id)) {
                warn!(
                    "[RealtimeClient] Join of {} failed, rejoining on next connect: {}",
                    project_id, e
                );
            }
        }
        Ok(())
    }

    pub fn leave_project(&self, project_id: &str) -> Result<(), SocketError> {
        self.inner.ensure_live()?;
        let mut s = self.inner.lock();
        s.rooms.leave(project_id);
        self.inner
            .send_or_queue(&mut s, events::LEAVE_PROJECT, json!(project_id));
        Ok(())
    }

    pub fn request_queue_stats(&self, project_id: &str) -> Result<(), SocketError> {
        self.emit(events::REQUEST_QUEUE_STATS, json!(project_id))
    }

    // ==================== Listeners ====================

    pub fn on(&self, event: &str, listener: Listener) -> Subscription {
        if self.inner.disposed.load(Ordering::SeqCst) {
            warn!("[RealtimeClient] on('{}') after cleanup ignored", event);
            return Subscription::detached(event);
        }
        self.inner.listeners.add(event, listener)
    }

    /// Remove every registration of exactly this listener.
    pub fn off(&self, event: &str, listener: &Listener) -> bool {
        self.inner.listeners.remove(event, listener)
    }

    pub fn on_segmentation_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SegmentationUpdate) + Send + Sync + 'static,
    {
        self.on_typed::<SegmentationUpdate, _>(events::SEGMENTATION_UPDATE, callback)
    }

    pub fn on_queue_stats<F>(&self, callback: F) -> Subscription
    where
        F: Fn(QueueStatsUpdate) + Send + Sync + 'static,
    {
        self.on_typed::<QueueStatsUpdate, _>(events::QUEUE_STATS_UPDATE, callback)
    }

    pub fn on_notification<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ServerNotification) + Send + Sync + 'static,
    {
        self.on_typed::<ServerNotification, _>(events::NOTIFICATION, callback)
    }

    pub fn on_system_message<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SystemMessage) + Send + Sync + 'static,
    {
        self.on_typed::<SystemMessage, _>(events::SYSTEM_MESSAGE, callback)
    }

    fn on_typed<T, F>(&self, event: &'static str, callback: F) -> Subscription
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(move |payload: &Value| {
            match T::deserialize(payload) {
                Ok(value) => callback(value),
                Err(e) => warn!("[RealtimeClient] Malformed '{}' payload: {}", event, e),
            }
        });
        self.on(event, listener)
    }

    // ==================== Introspection ====================

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().phase.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn current_user(&self) -> Option<String> {
        self.inner
            .lock()
            .credential
            .as_ref()
            .map(|c| c.user_id.clone())
    }

    pub fn queued_len(&self) -> usize {
        self.inner.lock().outbox.len()
    }

    /// Tracked project rooms in join order
    pub fn joined_projects(&self) -> Vec<String> {
        self.inner.lock().rooms.rooms().to_vec()
    }

    /// Failed attempts in the current (or last) disconnect episode
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.lock().backoff.failures()
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.count(event)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_live(&self) -> Result<(), SocketError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(SocketError::Disposed);
        }
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, notes: Notes) {
        for (event, payload) in notes {
            self.listeners.dispatch(event, &payload);
        }
    }

    fn send_or_queue(&self, s: &mut Session, event: &str, payload: Value) {
        if let Phase::Connected(link) = &s.phase {
            match link.connection.send(event, &payload) {
                Ok(()) => {
                    debug!("[RealtimeClient] Sent {}", event);
                    return;
                }
                Err(e) => warn!("[RealtimeClient] Send {} failed, queueing: {}", event, e),
            }
        }
        debug!("[RealtimeClient] Queued {} ({} pending)", event, s.outbox.len() + 1);
        s.outbox.push(event, payload);
    }

    // ==================== Connect ====================

    fn plan_connect(self: &Arc<Self>, credential: &Credential) -> ConnectStep {
        let mut notes = Notes::new();
        let step = {
            let mut s = self.lock();
            if let Some(pending) = &s.pending {
                return if &pending.credential == credential {
                    ConnectStep::Join(pending.future.clone())
                } else {
                    ConnectStep::Wait(pending.future.clone())
                };
            }

            let same_user = s.credential.as_ref() == Some(credential);
            if same_user && matches!(s.phase, Phase::Connected(_)) {
                debug!("[RealtimeClient] Already connected as {}", credential.user_id);
                return ConnectStep::Done;
            }
            if !same_user && !matches!(s.phase, Phase::Disconnected) {
                info!(
                    "[RealtimeClient] Switching user to {}, disconnecting first",
                    credential.user_id
                );
                // Queue and rooms carry over to the new user.
                self.release(&mut s, "user switch", &mut notes);
            }

            // Replacing the phase drops any retry schedule or dormant link.
            s.phase = Phase::Connecting;
            s.credential = Some(credential.clone());

            let id = self.next_id();
            let handle = tokio::spawn(self.clone().establish(id, credential.clone()));
            let abort = handle.abort_handle();
            let future = async move { handle.await.unwrap_or(Err(SocketError::Cancelled)) }
                .boxed()
                .shared();
            s.pending = Some(PendingConnect {
                id,
                credential: credential.clone(),
                abort,
                future: future.clone(),
            });
            ConnectStep::Join(future)
        };
        self.notify(notes);
        step
    }

    async fn establish(self: Arc<Self>, id: u64, credential: Credential) -> Result<(), SocketError> {
        let opened = self.open_link(&credential).await;

        let mut notes = Notes::new();
        let result = {
            let mut s = self.lock();
            if s.pending.as_ref().map(|p| p.id) != Some(id) {
                debug!("[RealtimeClient] Connect attempt {} superseded", id);
                if let Ok((connection, _)) = &opened {
                    connection.close();
                }
                return Err(SocketError::Cancelled);
            }
            s.pending = None;

            match opened {
                Ok((connection, events)) => {
                    info!("[RealtimeClient] Connected as {}", credential.user_id);
                    self.install(&mut s, connection, events, false, &mut notes);
                    Ok(())
                }
                Err(e) => {
                    warn!("[RealtimeClient] Connect failed: {}", e);
                    s.phase = if matches!(e, SocketError::Authentication(_)) {
                        Phase::Failed
                    } else {
                        Phase::Disconnected
                    };
                    notes.push((
                        events::CONNECT_ERROR,
                        json!({ "kind": e.kind(), "message": e.to_string() }),
                    ));
                    Err(e)
                }
            }
        };
        self.notify(notes);
        result
    }

    /// Open one transport connection, bounded by the end-to-end timeout.
    async fn open_link(
        &self,
        credential: &Credential,
    ) -> Result<(Arc<dyn Connection>, TransportEventReceiver), SocketError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let request = OpenRequest {
            url: self.config.url.clone(),
            namespace: self.config.namespace.clone(),
            credential: credential.clone(),
            timeout: self.config.transport_timeout,
        };

        match tokio::time::timeout(self.config.connect_timeout, self.transport.open(request, tx)).await
        {
            Ok(Ok(connection)) => Ok((connection, rx)),
            Ok(Err(e)) if e.kind == TransportErrorKind::Timeout => {
                Err(SocketError::Timeout(self.config.transport_timeout))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SocketError::Timeout(self.config.connect_timeout)),
        }
    }

    /// Bind a freshly opened connection and go live.
    fn install(
        self: &Arc<Self>,
        s: &mut Session,
        connection: Arc<dyn Connection>,
        events: TransportEventReceiver,
        reconnected: bool,
        notes: &mut Notes,
    ) {
        let generation = self.next_id();
        let pump = tokio::spawn(pump(Arc::downgrade(self), generation, events));
        let link = Link {
            generation,
            connection,
            keepalive: None,
            pump,
        };
        self.go_live(s, link, reconnected, notes);
    }

    /// Enter `Connected`: restart keep-alive, reset the backoff, flush the
    /// queue and replay rooms before the lock is released, so no caller
    /// command can overtake the replay.
    fn go_live(&self, s: &mut Session, mut link: Link, reconnected: bool, notes: &mut Notes) {
        link.keepalive = Some(KeepAlive::start(
            link.connection.clone(),
            self.config.keep_alive_interval,
        ));
        let attempts = s.backoff.failures() + 1;
        s.backoff.reset();

        let connection = link.connection.clone();
        if !s.outbox.is_empty() {
            match s.outbox.flush(|m| connection.send(&m.event, &m.payload)) {
                Ok(n) => info!("[RealtimeClient] Flushed {} queued message(s)", n),
                Err((n, e)) => warn!(
                    "[RealtimeClient] Flush stopped after {} message(s), {} still queued: {}",
                    n,
                    s.outbox.len(),
                    e
                ),
            }
        }
        for room in s.rooms.rooms() {
            if let Err(e) = connection.send(events::JOIN_PROJECT, &json!(room)) {
                warn!("[RealtimeClient] Rejoin of {} failed: {}", room, e);
                break;
            }
        }
        if !s.rooms.is_empty() {
            info!("[RealtimeClient] Rejoined {} project room(s)", s.rooms.len());
        }

        s.phase = Phase::Connected(link);
        let user = s.credential.as_ref().map(|c| c.user_id.clone());
        notes.push((events::CONNECT, json!({ "userId": user })));
        if reconnected {
            notes.push((events::RECONNECTED, json!({ "attempts": attempts })));
        }
    }

    /// Explicit disconnect: release everything, then apply the room policy.
    fn teardown(&self, s: &mut Session, reason: &str, notes: &mut Notes) {
        self.release(s, reason, notes);
        if self.config.room_policy == RoomPolicy::ClearOnDisconnect {
            s.rooms.clear();
        }
    }

    /// Drop the connection, the pending connect and the retry schedule.
    fn release(&self, s: &mut Session, reason: &str, notes: &mut Notes) {
        if let Some(pending) = s.pending.take() {
            pending.abort.abort();
        }
        let was_active = !matches!(s.phase, Phase::Disconnected);
        s.phase = Phase::Disconnected;
        s.credential = None;
        s.backoff.reset();
        if was_active {
            notes.push((events::DISCONNECT, json!({ "reason": reason })));
        }
    }

    // ==================== Transport events ====================

    fn on_transport_event(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        match event {
            TransportEvent::Event { name, payload } => {
                if !self.lock().phase.is_live(generation) {
                    debug!("[RealtimeClient] Ignoring '{}' from a stale connection", name);
                    return;
                }
                let name = events::canonical_name(&name, &self.config.queue_stats_aliases);
                self.listeners.dispatch(name, &payload);
            }
            TransportEvent::Connected => {
                debug!("[RealtimeClient] Transport confirmed connection {}", generation);
            }
            TransportEvent::Disconnected { reason } => {
                self.handle_drop(generation, reason, false);
            }
            TransportEvent::ConnectError(err) => {
                let auth = err.is_authentication();
                self.handle_drop(generation, err.message, auth);
            }
            TransportEvent::Reconnected => self.handle_native_reconnect(generation),
            TransportEvent::ReconnectAttempt(n) => {
                debug!("[Reconnect] Transport native attempt {}", n);
            }
            TransportEvent::ReconnectError(message) => {
                debug!("[Reconnect] Transport native attempt failed: {}", message);
            }
            TransportEvent::ReconnectFailed => self.handle_native_give_up(generation),
        }
    }

    fn handle_drop(self: &Arc<Self>, generation: u64, reason: String, auth_rejected: bool) {
        let mut notes = Notes::new();
        {
            let mut s = self.lock();
            if !s.phase.is_live(generation) {
                debug!("[RealtimeClient] Ignoring drop of stale connection: {}", reason);
                return;
            }
            let mut link = match std::mem::replace(&mut s.phase, Phase::Disconnected) {
                Phase::Connected(link) => link,
                other => {
                    s.phase = other;
                    return;
                }
            };
            link.keepalive = None;
            notes.push((events::DISCONNECT, json!({ "reason": reason })));

            if auth_rejected {
                drop(link);
                self.enter_failed(&mut s, format!("authentication rejected: {}", reason), &mut notes);
            } else {
                warn!("[RealtimeClient] Connection lost ({}), reconnecting", reason);
                self.begin_reconnect(&mut s, Some(link), &mut notes);
            }
        }
        self.notify(notes);
    }

    fn handle_native_reconnect(self: &Arc<Self>, generation: u64) {
        let mut notes = Notes::new();
        {
            let mut s = self.lock();
            match std::mem::replace(&mut s.phase, Phase::Disconnected) {
                Phase::Reconnecting {
                    dormant: Some(link), ..
                } if link.generation == generation => {
                    info!("[Reconnect] Transport reconnected natively");
                    self.go_live(&mut s, link, true, &mut notes);
                }
                Phase::Connected(link) if link.generation == generation => {
                    info!("[Reconnect] Transport recovered without a reported drop, resyncing");
                    self.go_live(&mut s, link, true, &mut notes);
                }
                other => {
                    s.phase = other;
                    debug!("[Reconnect] Ignoring native reconnect of stale connection");
                }
            }
        }
        self.notify(notes);
    }

    fn handle_native_give_up(&self, generation: u64) {
        let mut s = self.lock();
        if let Phase::Reconnecting { dormant, .. } = &mut s.phase {
            if dormant.as_ref().is_some_and(|l| l.generation == generation) {
                info!("[Reconnect] Transport gave up natively, releasing it");
                *dormant = None;
            }
        }
    }

    // ==================== Reconnection ====================

    fn begin_reconnect(self: &Arc<Self>, s: &mut Session, dormant: Option<Link>, notes: &mut Notes) {
        let episode = self.next_id();
        let delay = s.backoff.next_delay();
        let attempt = s.backoff.next_attempt();
        let retry = tokio::spawn(reconnect_loop(Arc::downgrade(self), episode));
        s.phase = Phase::Reconnecting {
            episode,
            dormant,
            _retry: RetryTask(retry),
        };
        notes.push((
            events::RECONNECTING,
            json!({ "attempt": attempt, "delayMs": millis(delay) }),
        ));
    }

    /// Apply the outcome of one reconnection attempt. Returns whether the
    /// schedule continues.
    fn finish_attempt(
        self: &Arc<Self>,
        episode: u64,
        opened: Result<(Arc<dyn Connection>, TransportEventReceiver), SocketError>,
    ) -> bool {
        let mut notes = Notes::new();
        let keep_going = {
            let mut s = self.lock();
            if !s.phase.is_episode(episode) {
                if let Ok((connection, _)) = &opened {
                    connection.close();
                }
                return false;
            }

            match opened {
                Ok((connection, events)) => {
                    info!(
                        "[Reconnect] Reconnected after {} attempt(s)",
                        s.backoff.failures() + 1
                    );
                    self.install(&mut s, connection, events, true, &mut notes);
                    false
                }
                Err(SocketError::Authentication(message)) => {
                    self.enter_failed(
                        &mut s,
                        format!("authentication rejected: {}", message),
                        &mut notes,
                    );
                    false
                }
                Err(e) => {
                    let failures = s.backoff.record_failure();
                    warn!("[Reconnect] Attempt {} failed: {}", failures, e);
                    if s.backoff.is_exhausted() {
                        notes.push((events::RECONNECT_FAILED, json!({ "attempts": failures })));
                        self.enter_failed(
                            &mut s,
                            format!("gave up after {} attempts", failures),
                            &mut notes,
                        );
                        false
                    } else {
                        let delay = s.backoff.next_delay();
                        notes.push((
                            events::RECONNECTING,
                            json!({
                                "attempt": s.backoff.next_attempt(),
                                "delayMs": millis(delay),
                            }),
                        ));
                        true
                    }
                }
            }
        };
        self.notify(notes);
        keep_going
    }

    /// Terminal transition: queued messages are discarded and reported.
    fn enter_failed(&self, s: &mut Session, reason: String, notes: &mut Notes) {
        s.phase = Phase::Failed;
        let discarded = s.outbox.drain();
        warn!(
            "[RealtimeClient] Connection lost for good: {} ({} queued message(s) discarded)",
            reason,
            discarded.len()
        );
        let names: Vec<String> = discarded.into_iter().map(|m| m.event).collect();
        notes.push((
            events::CONNECTION_LOST,
            json!({
                "reason": reason,
                "attempts": s.backoff.failures(),
                "discarded": names.len(),
                "events": names,
            }),
        ));
    }
}

fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Forward one connection's transport events to the client.
async fn pump(inner: Weak<Inner>, generation: u64, mut events: TransportEventReceiver) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.on_transport_event(generation, event);
    }
    if let Some(inner) = inner.upgrade() {
        inner.on_transport_event(
            generation,
            TransportEvent::Disconnected {
                reason: "transport dropped".into(),
            },
        );
    }
}

async fn reconnect_loop(inner: Weak<Inner>, episode: u64) {
    loop {
        let (delay, attempt, max, credential) = {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let s = inner.lock();
            if !s.phase.is_episode(episode) {
                return;
            }
            let Some(credential) = s.credential.clone() else {
                return;
            };
            (
                s.backoff.next_delay(),
                s.backoff.next_attempt(),
                s.backoff.max_attempts(),
                credential,
            )
        };

        tokio::time::sleep(delay).await;

        let Some(inner) = inner.upgrade() else {
            return;
        };
        info!(
            "[Reconnect] Attempt {}/{} as {}",
            attempt, max, credential.user_id
        );
        let opened = inner.open_link(&credential).await;
        if !inner.finish_attempt(episode, opened) {
            return;
        }
    }
}
