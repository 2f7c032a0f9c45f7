//! ConnectionManager - connect/accept orchestration for one link at a time
//!
//! Each `connect` or `accept` reserves the single role slot, emits its
//! initial state on the caller's thread, then drives the transport from a
//! background task. Every later callback goes through the callback executor
//! and is dropped if the session was cancelled in the meantime.
//!
//! Session tasks take turns on the transport: a new task waits until the
//! previous one, including an aborted one, has dropped its endpoint or
//! listener.
//!
//! Lock order: role slot, then channel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::options::{ConnectTimeout, LinkOptions};
use super::watchdog::{self, Watchdog};
use crate::channel::{ChannelClosed, DuplexChannel};
use crate::common::{LinkInfo, PeerAddress, RendezvousId, Role, SecurityMode, Stream};
use crate::error::{Error, Result};
use crate::executor::{CallbackExecutor, SerialExecutor};
use crate::listener::{
    ConnectionListener, ConnectionState, FailureCode, ListenerSlot, ReceiveListener,
};
use crate::metrics::{FAILURES_TOTAL, SESSIONS_ACTIVE, SESSIONS_TOTAL, SESSION_DURATION_SECONDS};
use crate::radio::{RadioEvent, RadioEvents, RadioState, StaticRadio};
use crate::transport::Transport;

/// Lifecycle phase of the manager's role slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Nothing in flight, a new connect or accept is allowed
    Idle,
    Connecting,
    Listening,
    Connected,
    /// The peer went away; the slot is free again
    Disconnected,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Idle => write!(f, "idle"),
            ConnectionRole::Connecting => write!(f, "connecting"),
            ConnectionRole::Listening => write!(f, "listening"),
            ConnectionRole::Connected => write!(f, "connected"),
            ConnectionRole::Disconnected => write!(f, "disconnected"),
        }
    }
}

// ============================================================================
// Session bookkeeping
// ============================================================================

/// State shared between the manager and one session's tasks
struct SessionState {
    id: u64,
    role: Role,
    cancelled: AtomicBool,
    connected: AtomicBool,
    listener: ListenerSlot<dyn ConnectionListener>,
    receiver: ListenerSlot<dyn ReceiveListener>,
    link: Mutex<Option<LinkInfo>>,
}

impl SessionState {
    fn new(
        id: u64,
        role: Role,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> Self {
        let receivers = ListenerSlot::new();
        if let Some(receiver) = receiver {
            receivers.set(receiver);
        }

        Self {
            id,
            role,
            cancelled: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            listener: ListenerSlot::with(listener),
            receiver: receivers,
            link: Mutex::new(None),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Detach listeners and mark the session dead. Returns whether the
    /// session was connected.
    fn cancel(&self) -> bool {
        self.cancelled.store(true, Ordering::SeqCst);
        self.listener.clear();
        self.receiver.clear();
        self.connected.swap(false, Ordering::SeqCst)
    }

    fn link(&self) -> Option<LinkInfo> {
        self.link.lock().clone()
    }
}

/// The session occupying the role slot, with its tasks
struct Session {
    state: Arc<SessionState>,
    task: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Session {
    fn abort(self) {
        if let Some(task) = self.task {
            task.abort();
        }
        if let Some(monitor) = self.monitor {
            monitor.abort();
        }
    }
}

struct RoleSlot {
    current: Option<Session>,
    phase: ConnectionRole,
    /// Sessions that left the slot on their own and may still have
    /// callbacks queued
    ended: Vec<Arc<SessionState>>,
}

impl RoleSlot {
    fn is_current(&self, id: u64) -> bool {
        self.current.as_ref().map_or(false, |s| s.state.id == id)
    }

    /// Free the slot, remembering `session` until its queued callbacks ran
    fn end(&mut self, session: &Arc<SessionState>, phase: ConnectionRole) -> Option<Session> {
        self.phase = phase;
        // The only other holders of an ended session are its queued jobs
        self.ended.retain(|s| Arc::strong_count(s) > 1);
        self.ended.push(Arc::clone(session));
        self.current.take()
    }
}

struct Settings {
    rendezvous_id: RendezvousId,
    connect_timeout: ConnectTimeout,
}

// ============================================================================
// Manager internals
// ============================================================================

struct ManagerInner {
    transport: Arc<dyn Transport>,
    radio: Arc<dyn RadioState>,
    events: RadioEvents,
    executor: Arc<dyn CallbackExecutor>,
    channel: DuplexChannel,
    settings: Mutex<Settings>,
    slot: Mutex<RoleSlot>,
    next_session: AtomicU64,
    /// One permit: held by the session task using the transport
    transport_gate: Arc<Semaphore>,
}

impl ManagerInner {
    fn settings(&self) -> (RendezvousId, ConnectTimeout) {
        let settings = self.settings.lock();
        (settings.rendezvous_id, settings.connect_timeout)
    }

    fn radio_available(&self) -> bool {
        self.radio.is_supported() && self.radio.is_enabled()
    }

    /// Wait for the previous session task to let go of the transport.
    /// `None` if this session was cancelled meanwhile.
    async fn transport_turn(&self, session: &SessionState) -> Option<OwnedSemaphorePermit> {
        let permit = Arc::clone(&self.transport_gate).acquire_owned().await.ok()?;
        if session.is_cancelled() {
            trace!("[{}] session {} cancelled before start", session.role, session.id);
            return None;
        }
        Some(permit)
    }

    /// Claim the role slot for a new session
    fn reserve(
        &self,
        role: Role,
        phase: ConnectionRole,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> Option<Arc<SessionState>> {
        let mut slot = self.slot.lock();
        if let Some(current) = slot.current.as_ref() {
            debug!(
                "[{}] refused: session {} ({}) is {}",
                role, current.state.id, current.state.role, slot.phase
            );
            return None;
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(SessionState::new(id, role, listener, receiver));
        slot.current = Some(Session {
            state: Arc::clone(&state),
            task: None,
            monitor: None,
        });
        slot.phase = phase;
        Some(state)
    }

    fn attach_task(&self, session: &SessionState, task: JoinHandle<()>) {
        let mut slot = self.slot.lock();
        match slot.current.as_mut() {
            Some(current) if current.state.id == session.id => current.task = Some(task),
            // Already finished, or cancelled before it got going
            _ => task.abort(),
        }
    }

    /// Commit an established stream to the session, unless it was cancelled
    /// while the transport call was in flight.
    fn establish(self: &Arc<Self>, session: &Arc<SessionState>, stream: Stream, link: LinkInfo) {
        let mut slot = self.slot.lock();
        if !slot.is_current(session.id) || session.is_cancelled() {
            debug!(
                "[{}] session {} cancelled, dropping link to {}",
                session.role, session.id, link.peer
            );
            return;
        }

        let closed = match self.channel.start(stream, session.receiver.get()) {
            Some(closed) => closed,
            None => {
                drop(slot);
                warn!("[{}] channel busy, dropping link to {}", session.role, link.peer);
                let code = match session.role {
                    Role::Connector => FailureCode::ConnectFailed,
                    Role::Acceptor => FailureCode::AcceptFailed,
                };
                return self.fail(session, code);
            }
        };

        session.connected.store(true, Ordering::SeqCst);
        *session.link.lock() = Some(link.clone());
        slot.phase = ConnectionRole::Connected;

        // Subscribe under the lock so no link loss is missed
        let events = self.events.subscribe();
        drop(slot);

        SESSIONS_TOTAL.with_label_values(&[session.role.as_str()]).inc();
        SESSIONS_ACTIVE.inc();
        info!(
            "[{}] Connected to {} (service {}, {})",
            session.role, link.peer, link.service, link.mode
        );
        self.emit_state(session, ConnectionState::Connected);

        // Spawned after Connected is queued so Disconnected always follows it
        let monitor = tokio::spawn(monitor_session(
            Arc::clone(self),
            Arc::clone(session),
            events,
            closed,
            link.peer,
        ));

        let mut slot = self.slot.lock();
        match slot.current.as_mut() {
            Some(current) if current.state.id == session.id && current.monitor.is_none() => {
                current.monitor = Some(monitor);
            }
            _ => monitor.abort(),
        }
    }

    /// Release the slot and report `code`
    fn fail(&self, session: &Arc<SessionState>, code: FailureCode) {
        session.connected.store(false, Ordering::SeqCst);
        {
            let mut slot = self.slot.lock();
            if slot.is_current(session.id) {
                slot.end(session, ConnectionRole::Idle);
            }
        }

        FAILURES_TOTAL.with_label_values(&[code.as_str()]).inc();
        warn!("[{}] session {} failed: {}", session.role, session.id, code);

        let session = Arc::clone(session);
        self.executor.execute(Box::new(move || {
            if session.is_cancelled() {
                trace!("Dropping {} for cancelled session {}", code, session.id);
                return;
            }
            if let Some(listener) = session.listener.get() {
                listener.on_failed(code);
            }
        }));
    }

    /// The peer went away on its own. At most once per session.
    fn peer_disconnected(&self, session: &Arc<SessionState>, cause: &str) {
        let taken = {
            let mut slot = self.slot.lock();
            if !slot.is_current(session.id) || session.is_cancelled() {
                return;
            }
            // Reads that arrived before the close still reach the listener
            self.channel.release();
            slot.end(session, ConnectionRole::Disconnected)
        };

        if session.connected.swap(false, Ordering::SeqCst) {
            record_session_end(session);
        }
        // Runs on the monitor task itself, so only the handles are dropped
        drop(taken);

        info!(
            "[{}] Peer disconnected: session {} ({})",
            session.role, session.id, cause
        );
        self.emit_state(session, ConnectionState::Disconnected);
    }

    fn emit_state(&self, session: &Arc<SessionState>, state: ConnectionState) {
        let session = Arc::clone(session);
        self.executor.execute(Box::new(move || {
            if session.is_cancelled() {
                trace!("Dropping {} for cancelled session {}", state, session.id);
                return;
            }
            if let Some(listener) = session.listener.get() {
                let link = session.link();
                listener.on_state_changed(link.as_ref(), state);
            }
        }));
    }
}

fn record_session_end(session: &SessionState) {
    SESSIONS_ACTIVE.dec();
    if let Some(link) = session.link() {
        SESSION_DURATION_SECONDS
            .with_label_values(&[session.role.as_str()])
            .observe(link.established_at.elapsed().as_secs_f64());
    }
}

// ============================================================================
// Session tasks
// ============================================================================

async fn run_connect(
    inner: Arc<ManagerInner>,
    session: Arc<SessionState>,
    peer: Option<PeerAddress>,
    mode: SecurityMode,
) {
    // Declared first so it is released after the endpoint is dropped
    let _turn = match inner.transport_turn(&session).await {
        Some(permit) => permit,
        None => return,
    };

    if inner.radio.is_discovering() {
        debug!("[connect] Cancelling discovery before connecting");
        inner.radio.cancel_discovery();
    }

    let (service, timeout) = inner.settings();

    let peer = match peer {
        Some(peer) => peer,
        None => return inner.fail(&session, FailureCode::SocketNotFound),
    };

    if !inner.radio_available() {
        warn!("[connect] {}", Error::RadioUnavailable);
        return inner.fail(&session, FailureCode::SocketNotFound);
    }

    let mut endpoint = match inner.transport.resolve(&peer, &service, mode).await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!("[connect] No endpoint for {} on {}: {}", peer, service, e);
            return inner.fail(&session, FailureCode::SocketNotFound);
        }
    };

    let mut timer = timeout
        .enabled
        .then(|| Watchdog::arm(timeout.duration));
    if let Some(timer) = &timer {
        debug!("[connect] Watchdog armed for {:?}", timer.timeout());
    }

    debug!("[connect] Connecting to {} ({}, {})", peer, service, mode);
    let result = tokio::select! {
        result = endpoint.connect() => result,
        _ = watchdog::expired(timer.as_mut()) => Err(Error::Timeout),
    };
    drop(timer);

    match result {
        Ok(stream) => {
            let link = LinkInfo::new(peer, Role::Connector, mode, service);
            inner.establish(&session, stream, link);
        }
        Err(e) => {
            warn!("[connect] Connect to {} failed: {}", peer, e);
            if let Err(e) = endpoint.close().await {
                debug!("[connect] Endpoint close failed: {}", e);
            }
            inner.fail(&session, FailureCode::ConnectFailed);
        }
    }
}

async fn run_accept(inner: Arc<ManagerInner>, session: Arc<SessionState>, mode: SecurityMode) {
    // Released after the listener is dropped, so the next accept can bind
    let _turn = match inner.transport_turn(&session).await {
        Some(permit) => permit,
        None => return,
    };

    let (service, _) = inner.settings();

    if !inner.radio_available() {
        warn!("[accept] {}", Error::RadioUnavailable);
        return inner.fail(&session, FailureCode::ServerSocketNotFound);
    }

    let listener = match inner.transport.listen(&service, mode).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!("[accept] Cannot listen on {}: {}", service, e);
            return inner.fail(&session, FailureCode::ServerSocketNotFound);
        }
    };

    info!("[accept] Listening on {} ({})", service, mode);
    let accepted = listener.accept().await;

    // One inbound link per session
    if let Err(e) = listener.close().await {
        debug!("[accept] Listener close failed: {}", e);
    }

    match accepted {
        Ok((stream, peer)) => {
            let link = LinkInfo::new(peer, Role::Acceptor, mode, service);
            inner.establish(&session, stream, link);
        }
        Err(e) => {
            warn!("[accept] Accept on {} failed: {}", service, e);
            inner.fail(&session, FailureCode::AcceptFailed);
        }
    }
}

/// Watch an established session for the first of: the radio reporting the
/// link lost, or the read loop hitting end of stream.
async fn monitor_session(
    inner: Arc<ManagerInner>,
    session: Arc<SessionState>,
    mut events: broadcast::Receiver<RadioEvent>,
    closed: ChannelClosed,
    peer: PeerAddress,
) {
    let cause = tokio::select! {
        cause = link_lost(&mut events, peer) => cause,
        peer_closed = closed.wait() => {
            if !peer_closed {
                // Stopped locally, whoever stopped it owns the teardown
                return;
            }
            "stream closed"
        }
    };

    inner.peer_disconnected(&session, cause);
}

async fn link_lost(events: &mut broadcast::Receiver<RadioEvent>, peer: PeerAddress) -> &'static str {
    loop {
        match events.recv().await {
            Ok(RadioEvent::LinkLost(lost)) if lost == peer => return "link lost",
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Monitor: missed {} radio events", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                return std::future::pending().await;
            }
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    transport: Arc<dyn Transport>,
    radio: Option<Arc<dyn RadioState>>,
    events: Option<RadioEvents>,
    executor: Option<Arc<dyn CallbackExecutor>>,
    options: LinkOptions,
}

impl ConnectionManagerBuilder {
    /// Radio state queries. Defaults to an always-on [`StaticRadio`].
    pub fn radio(mut self, radio: Arc<dyn RadioState>) -> Self {
        self.radio = Some(radio);
        self
    }

    /// Radio event bus watched for link loss. Defaults to a private bus.
    pub fn events(mut self, events: RadioEvents) -> Self {
        self.events = Some(events);
        self
    }

    /// Context all callbacks run on. Defaults to a [`SerialExecutor`].
    pub fn executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn options(mut self, options: LinkOptions) -> Self {
        self.options = options;
        self
    }

    /// Build the manager. Spawns the default executor if none was given,
    /// so this must run inside a tokio runtime.
    pub fn build(self) -> ConnectionManager {
        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(SerialExecutor::spawn()));
        let channel =
            DuplexChannel::with_read_buffer_size(Arc::clone(&executor), self.options.read_buffer_size);

        ConnectionManager {
            inner: Arc::new(ManagerInner {
                transport: self.transport,
                radio: self.radio.unwrap_or_else(|| Arc::new(StaticRadio::new())),
                events: self.events.unwrap_or_default(),
                executor,
                channel,
                settings: Mutex::new(Settings {
                    rendezvous_id: self.options.rendezvous_id,
                    connect_timeout: self.options.connect_timeout,
                }),
                slot: Mutex::new(RoleSlot {
                    current: None,
                    phase: ConnectionRole::Idle,
                    ended: Vec::new(),
                }),
                next_session: AtomicU64::new(1),
                transport_gate: Arc::new(Semaphore::new(1)),
            }),
        }
    }
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Owns the single link of this process: connect or accept, then send and
/// receive over it until either side disconnects.
///
/// At most one session (connecting, listening or connected) exists at a
/// time. Dropping the manager disconnects.
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// A manager over `transport` with default collaborators and options
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).build()
    }

    pub fn builder(transport: Arc<dyn Transport>) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            transport,
            radio: None,
            events: None,
            executor: None,
            options: LinkOptions::default(),
        }
    }

    // === Connect / accept ===

    /// Connect to the peer at `address` (six hex octets, `:` or `-`
    /// separated).
    ///
    /// Returns `false` if another session is active. Otherwise `Connecting`
    /// is delivered before this returns and the outcome follows
    /// asynchronously. An unparsable address fails with `SocketNotFound`.
    pub fn connect(
        &self,
        address: &str,
        mode: SecurityMode,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> bool {
        let peer = match PeerAddress::parse(address) {
            Ok(peer) => Some(peer),
            Err(e) => {
                warn!("[connect] {}", e);
                None
            }
        };
        self.start_connect(peer, mode, listener, receiver)
    }

    /// Connect to an already parsed peer address
    pub fn connect_peer(
        &self,
        peer: &PeerAddress,
        mode: SecurityMode,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> bool {
        self.start_connect(Some(*peer), mode, listener, receiver)
    }

    fn start_connect(
        &self,
        peer: Option<PeerAddress>,
        mode: SecurityMode,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> bool {
        let session = match self.inner.reserve(
            Role::Connector,
            ConnectionRole::Connecting,
            Arc::clone(&listener),
            receiver,
        ) {
            Some(session) => session,
            None => return false,
        };

        listener.on_state_changed(None, ConnectionState::Connecting);
        if session.is_cancelled() {
            return true;
        }

        let task = tokio::spawn(run_connect(
            Arc::clone(&self.inner),
            Arc::clone(&session),
            peer,
            mode,
        ));
        self.inner.attach_task(&session, task);
        true
    }

    /// Listen for one inbound link on the current rendezvous id.
    ///
    /// Returns `false` if another session is active. Otherwise `Listening`
    /// is delivered before this returns.
    pub fn accept(
        &self,
        mode: SecurityMode,
        listener: Arc<dyn ConnectionListener>,
        receiver: Option<Arc<dyn ReceiveListener>>,
    ) -> bool {
        let session = match self.inner.reserve(
            Role::Acceptor,
            ConnectionRole::Listening,
            Arc::clone(&listener),
            receiver,
        ) {
            Some(session) => session,
            None => return false,
        };

        listener.on_state_changed(None, ConnectionState::Listening);
        if session.is_cancelled() {
            return true;
        }

        let task = tokio::spawn(run_accept(
            Arc::clone(&self.inner),
            Arc::clone(&session),
            mode,
        ));
        self.inner.attach_task(&session, task);
        true
    }

    /// Tear down whatever session exists and return to idle.
    ///
    /// No callback for the torn-down session, or for one that ended on its
    /// own before this call, starts after this returns; one already running
    /// on the executor may still finish. The session task lets go of its
    /// endpoint or listener before any later session touches the transport.
    /// Idempotent.
    pub fn disconnect(&self) {
        let taken = {
            let mut slot = self.inner.slot.lock();
            slot.phase = ConnectionRole::Idle;
            for ended in slot.ended.drain(..) {
                ended.cancel();
            }
            let taken = slot
                .current
                .take()
                .map(|session| (session.state.cancel(), session));
            self.inner.channel.stop();
            taken
        };

        match taken {
            Some((was_connected, session)) => {
                let state = Arc::clone(&session.state);
                if was_connected {
                    record_session_end(&state);
                }
                session.abort();
                info!("[{}] Disconnected session {}", state.role, state.id);
            }
            None => trace!("Disconnect with no session"),
        }
    }

    // === Queries ===

    /// Whether a link is currently established
    pub fn is_connected(&self) -> bool {
        self.inner
            .slot
            .lock()
            .current
            .as_ref()
            .map_or(false, |s| s.state.is_connected())
    }

    pub fn role(&self) -> ConnectionRole {
        self.inner.slot.lock().phase
    }

    /// The established link, if any
    pub fn link_info(&self) -> Option<LinkInfo> {
        let slot = self.inner.slot.lock();
        slot.current.as_ref().and_then(|s| s.state.link())
    }

    // === Settings ===

    pub fn connect_timeout(&self) -> Duration {
        self.inner.settings.lock().connect_timeout.duration
    }

    /// Takes effect from the next connect
    pub fn set_connect_timeout(&self, timeout: Duration) {
        self.inner.settings.lock().connect_timeout.duration = timeout;
    }

    pub fn enable_connect_timeout(&self) {
        self.inner.settings.lock().connect_timeout.enabled = true;
    }

    pub fn disable_connect_timeout(&self) {
        self.inner.settings.lock().connect_timeout.enabled = false;
    }

    pub fn is_connect_timeout_enabled(&self) -> bool {
        self.inner.settings.lock().connect_timeout.enabled
    }

    pub fn rendezvous_id(&self) -> RendezvousId {
        self.inner.settings.lock().rendezvous_id
    }

    /// Parse and store the rendezvous id used from the next connect or
    /// accept. An invalid id leaves the current one unchanged.
    pub fn set_rendezvous_id(&self, id: &str) -> Result<()> {
        let id = RendezvousId::parse(id)?;
        self.set_rendezvous(id);
        Ok(())
    }

    pub fn set_rendezvous(&self, id: RendezvousId) {
        debug!("Rendezvous id set to {}", id);
        self.inner.settings.lock().rendezvous_id = id;
    }

    // === Data ===

    /// Write `data` to the established link. `false` if not connected or
    /// the write failed.
    pub async fn send(&self, data: &[u8]) -> bool {
        self.inner.channel.send(data).await
    }

    pub async fn send_text(&self, text: &str) -> bool {
        self.inner.channel.send_text(text).await
    }

    /// Write `len` bytes of `data` from `offset`. Out-of-range requests
    /// write nothing.
    pub async fn send_range(&self, data: &[u8], offset: usize, len: usize) -> bool {
        self.inner.channel.send_range(data, offset, len).await
    }

    /// Replace the receive listener of the running link. Last writer wins.
    pub fn set_receive_listener(&self, listener: Arc<dyn ReceiveListener>) {
        self.inner.channel.set_receive_listener(listener);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryRadio, RejectTransport, StallTransport};
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const ALICE: PeerAddress = PeerAddress::from_bytes([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    const BOB: PeerAddress = PeerAddress::from_bytes([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]);
    const CAROL: PeerAddress = PeerAddress::from_bytes([0x02, 0x00, 0x00, 0x00, 0x00, 0x03]);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        State(ConnectionState, Option<PeerAddress>),
        Failed(FailureCode),
    }

    struct Recorder {
        tx: mpsc::UnboundedSender<Event>,
    }

    impl ConnectionListener for Recorder {
        fn on_state_changed(&self, link: Option<&LinkInfo>, state: ConnectionState) {
            let _ = self.tx.send(Event::State(state, link.map(|l| l.peer)));
        }

        fn on_failed(&self, code: FailureCode) {
            let _ = self.tx.send(Event::Failed(code));
        }
    }

    fn recorder() -> (Arc<dyn ConnectionListener>, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Recorder { tx }), rx)
    }

    type Received = mpsc::UnboundedReceiver<(String, Vec<u8>)>;

    fn receiver() -> (Arc<dyn ReceiveListener>, Received) {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener: Arc<dyn ReceiveListener> = Arc::new(move |text: &str, raw: &[u8]| {
            let _ = tx.send((text.to_string(), raw.to_vec()));
        });
        (listener, rx)
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("listener dropped")
    }

    /// Let queued callbacks drain
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    async fn wait_until_bound(radio: &MemoryRadio, address: &PeerAddress) {
        for _ in 0..500 {
            if radio.is_bound(address, &RendezvousId::default()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("{} never started listening", address);
    }

    fn stalled() -> ConnectionManager {
        ConnectionManager::new(Arc::new(StallTransport::new()))
    }

    struct Linked {
        radio: MemoryRadio,
        alice: ConnectionManager,
        alice_events: mpsc::UnboundedReceiver<Event>,
        alice_data: Received,
        alice_bus: RadioEvents,
        bob: ConnectionManager,
        bob_events: mpsc::UnboundedReceiver<Event>,
        bob_data: Received,
        bob_bus: RadioEvents,
    }

    /// Alice accepts, Bob connects to her, both reach Connected
    async fn linked_pair() -> Linked {
        let radio = MemoryRadio::new();
        let alice_bus = RadioEvents::new();
        let bob_bus = RadioEvents::new();
        let alice = ConnectionManager::builder(Arc::new(radio.attach(ALICE)))
            .events(alice_bus.clone())
            .build();
        let bob = ConnectionManager::builder(Arc::new(radio.attach(BOB)))
            .events(bob_bus.clone())
            .build();

        let (listener, mut alice_events) = recorder();
        let (data, alice_data) = receiver();
        assert!(alice.accept(SecurityMode::Secure, listener, Some(data)));
        assert_eq!(
            alice_events.try_recv().unwrap(),
            Event::State(ConnectionState::Listening, None)
        );
        wait_until_bound(&radio, &ALICE).await;

        let (listener, mut bob_events) = recorder();
        let (data, bob_data) = receiver();
        assert!(bob.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, Some(data)));
        assert_eq!(
            bob_events.try_recv().unwrap(),
            Event::State(ConnectionState::Connecting, None)
        );

        assert_eq!(
            next_event(&mut bob_events).await,
            Event::State(ConnectionState::Connected, Some(ALICE))
        );
        assert_eq!(
            next_event(&mut alice_events).await,
            Event::State(ConnectionState::Connected, Some(BOB))
        );

        Linked {
            radio,
            alice,
            alice_events,
            alice_data,
            alice_bus,
            bob,
            bob_events,
            bob_data,
            bob_bus,
        }
    }

    // === Role slot ===

    #[tokio::test]
    async fn test_connect_reports_connecting_before_returning() {
        let manager = stalled();
        let (listener, mut events) = recorder();

        assert!(manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, None));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Connecting, None)
        );
        assert_eq!(manager.role(), ConnectionRole::Connecting);
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn test_accept_reports_listening_before_returning() {
        let manager = stalled();
        let (listener, mut events) = recorder();

        assert!(manager.accept(SecurityMode::Insecure, listener, None));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Listening, None)
        );
        assert_eq!(manager.role(), ConnectionRole::Listening);
    }

    #[tokio::test]
    async fn test_one_session_at_a_time() {
        let manager = stalled();
        let (listener, mut events) = recorder();

        assert!(manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener.clone(), None));
        assert!(!manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener.clone(), None));
        assert!(!manager.accept(SecurityMode::Secure, listener.clone(), None));

        // Refused calls emit nothing
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Connecting, None)
        );
        assert!(events.try_recv().is_err());

        manager.disconnect();
        assert_eq!(manager.role(), ConnectionRole::Idle);

        assert!(manager.accept(SecurityMode::Secure, listener.clone(), None));
        assert!(!manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let manager = stalled();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.role(), ConnectionRole::Idle);
        assert!(!manager.is_connected());

        let (listener, _events) = recorder();
        assert!(manager.accept(SecurityMode::Secure, listener, None));
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.role(), ConnectionRole::Idle);
        assert!(manager.link_info().is_none());
    }

    // === Settings ===

    #[tokio::test]
    async fn test_connect_timeout_settings() {
        let manager = stalled();
        assert_eq!(manager.connect_timeout(), Duration::from_millis(35_000));
        assert!(!manager.is_connect_timeout_enabled());

        manager.set_connect_timeout(Duration::from_secs(3));
        manager.enable_connect_timeout();
        assert_eq!(manager.connect_timeout(), Duration::from_secs(3));
        assert!(manager.is_connect_timeout_enabled());

        manager.disable_connect_timeout();
        assert!(!manager.is_connect_timeout_enabled());
    }

    #[tokio::test]
    async fn test_invalid_rendezvous_id_keeps_current() {
        let manager = stalled();
        assert_eq!(manager.rendezvous_id(), RendezvousId::serial_port());

        manager
            .set_rendezvous_id("8ce255c0-200a-11e0-ac64-0800200c9a66")
            .unwrap();
        let custom = manager.rendezvous_id();
        assert_eq!(custom.to_string(), "8ce255c0-200a-11e0-ac64-0800200c9a66");

        let result = manager.set_rendezvous_id("not-a-uuid");
        assert!(matches!(result, Err(Error::InvalidRendezvousId(_))));
        assert_eq!(manager.rendezvous_id(), custom);
    }

    // === Connect timeout ===

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_fires_connect_failed() {
        let manager = stalled();
        manager.set_connect_timeout(Duration::from_secs(2));
        manager.enable_connect_timeout();

        let (listener, mut events) = recorder();
        let start = Instant::now();
        assert!(manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, None));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Connecting, None)
        );

        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::ConnectFailed)
        );
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(2) + Duration::from_millis(100));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(events.try_recv().is_err());
        assert!(!manager.is_connected());
        assert_eq!(manager.role(), ConnectionRole::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_timeout_never_fires() {
        let manager = stalled();
        manager.set_connect_timeout(Duration::from_secs(1));

        let (listener, mut events) = recorder();
        assert!(manager.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, None));
        let _ = events.try_recv();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(manager.role(), ConnectionRole::Connecting);
    }

    #[tokio::test]
    async fn test_timeout_does_not_disturb_established_link() {
        let radio = MemoryRadio::new();
        let alice = ConnectionManager::new(Arc::new(radio.attach(ALICE)));
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));
        bob.set_connect_timeout(Duration::from_millis(50));
        bob.enable_connect_timeout();

        let (listener, mut alice_events) = recorder();
        assert!(alice.accept(SecurityMode::Secure, listener, None));
        wait_until_bound(&radio, &ALICE).await;

        let (listener, mut bob_events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = bob_events.try_recv();
        assert_eq!(
            next_event(&mut bob_events).await,
            Event::State(ConnectionState::Connected, Some(ALICE))
        );
        let _ = next_event(&mut alice_events).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(bob.is_connected());
        assert!(bob_events.try_recv().is_err());
        assert!(bob.send_text("still here").await);
    }

    // === Failures ===

    #[tokio::test]
    async fn test_unknown_peer_fails_socket_not_found_then_retries() {
        let radio = MemoryRadio::new();
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));

        let (listener, mut events) = recorder();
        assert!(bob.connect("00:11:22:33:44:55", SecurityMode::Secure, listener.clone(), None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::SocketNotFound)
        );
        assert!(!bob.is_connected());
        assert_eq!(bob.role(), ConnectionRole::Idle);

        assert!(bob.connect("00:11:22:33:44:55", SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_unparsable_address_fails_socket_not_found() {
        let manager = stalled();
        let (listener, mut events) = recorder();

        assert!(manager.connect("not-an-address", SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::SocketNotFound)
        );
    }

    #[tokio::test]
    async fn test_peer_not_listening_fails_connect_failed_then_retries() {
        let radio = MemoryRadio::new();
        let _alice = radio.attach(ALICE);
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));

        let (listener, mut events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener.clone(), None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::ConnectFailed)
        );

        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_listen_rejected_fails_server_socket_not_found() {
        let manager = ConnectionManager::new(Arc::new(RejectTransport::new()));
        let (listener, mut events) = recorder();

        assert!(manager.accept(SecurityMode::Secure, listener.clone(), None));
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Listening, None)
        );
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::ServerSocketNotFound)
        );
        assert_eq!(manager.role(), ConnectionRole::Idle);

        assert!(manager.accept(SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_listener_torn_down_fails_accept_failed() {
        let radio = MemoryRadio::new();
        let alice = ConnectionManager::new(Arc::new(radio.attach(ALICE)));

        let (listener, mut events) = recorder();
        assert!(alice.accept(SecurityMode::Secure, listener.clone(), None));
        let _ = events.try_recv();
        wait_until_bound(&radio, &ALICE).await;

        radio.detach(&ALICE);
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::AcceptFailed)
        );

        assert!(alice.accept(SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_radio_off_fails_both_roles() {
        let radio = Arc::new(StaticRadio::new());
        radio.set_enabled(false);
        let manager = ConnectionManager::builder(Arc::new(StallTransport::new()))
            .radio(radio.clone())
            .build();

        let (listener, mut events) = recorder();
        assert!(manager.connect_peer(&ALICE, SecurityMode::Secure, listener.clone(), None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::SocketNotFound)
        );

        assert!(manager.accept(SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::ServerSocketNotFound)
        );
    }

    #[tokio::test]
    async fn test_connect_cancels_discovery() {
        let radio = Arc::new(StaticRadio::new());
        radio.set_discovering(true);
        let manager = ConnectionManager::builder(Arc::new(RejectTransport::new()))
            .radio(radio.clone())
            .build();

        let (listener, mut events) = recorder();
        assert!(manager.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        let _ = next_event(&mut events).await;
        assert!(!radio.is_discovering());
    }

    // === Established link ===

    #[tokio::test]
    async fn test_round_trip_text_and_raw() {
        let mut link = linked_pair().await;
        assert!(link.alice.is_connected());
        assert!(link.bob.is_connected());
        assert_eq!(link.bob.role(), ConnectionRole::Connected);

        let info = link.bob.link_info().unwrap();
        assert_eq!(info.peer, ALICE);
        assert_eq!(info.role, Role::Connector);
        assert_eq!(info.service, RendezvousId::serial_port());
        assert_eq!(link.alice.link_info().unwrap().role, Role::Acceptor);

        assert!(link.bob.send_text("hello").await);
        let (text, raw) = tokio::time::timeout(Duration::from_secs(5), link.alice_data.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "hello");
        assert_eq!(raw, b"hello");

        assert!(link.alice.send(&[0x00, 0xFF, 0x10]).await);
        let (_, raw) = tokio::time::timeout(Duration::from_secs(5), link.bob_data.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raw, vec![0x00, 0xFF, 0x10]);
    }

    #[tokio::test]
    async fn test_send_range_over_link() {
        let mut link = linked_pair().await;

        assert!(link.bob.send_range(b"xxhelloxx", 2, 5).await);
        assert!(!link.bob.send_range(b"short", 3, 10).await);

        let (text, _) = tokio::time::timeout(Duration::from_secs(5), link.alice_data.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_send_when_idle_returns_false() {
        let manager = stalled();
        assert!(!manager.send(b"data").await);
        assert!(!manager.send_text("data").await);
    }

    #[tokio::test]
    async fn test_replace_receive_listener() {
        let mut link = linked_pair().await;
        let (replacement, mut replaced) = receiver();
        link.alice.set_receive_listener(replacement);

        assert!(link.bob.send_text("rerouted").await);
        let (text, _) = tokio::time::timeout(Duration::from_secs(5), replaced.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "rerouted");

        settle().await;
        assert!(link.alice_data.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_peer_close_reports_disconnected_once() {
        let mut link = linked_pair().await;

        link.bob.disconnect();
        assert_eq!(
            next_event(&mut link.alice_events).await,
            Event::State(ConnectionState::Disconnected, Some(BOB))
        );
        assert!(!link.alice.is_connected());
        assert_eq!(link.alice.role(), ConnectionRole::Disconnected);

        // A late link-loss report for the same peer changes nothing
        link.alice_bus.publish(RadioEvent::LinkLost(BOB));
        settle().await;
        assert!(link.alice_events.try_recv().is_err());

        // The local side disconnected itself, so it hears nothing
        assert!(link.bob_events.try_recv().is_err());

        let (listener, _events) = recorder();
        assert!(link.alice.accept(SecurityMode::Secure, listener, None));
    }

    #[tokio::test]
    async fn test_link_lost_reports_disconnected() {
        let mut link = linked_pair().await;

        // Unrelated peers are ignored
        link.bob_bus.publish(RadioEvent::LinkLost(BOB));
        link.bob_bus.publish(RadioEvent::DiscoveryFinished);
        settle().await;
        assert!(link.bob.is_connected());

        link.bob_bus.publish(RadioEvent::LinkLost(ALICE));
        assert_eq!(
            next_event(&mut link.bob_events).await,
            Event::State(ConnectionState::Disconnected, Some(ALICE))
        );
        assert!(!link.bob.is_connected());
        assert!(!link.bob.send_text("gone").await);

        // Bob's channel stopped, so Alice sees the stream close
        assert_eq!(
            next_event(&mut link.alice_events).await,
            Event::State(ConnectionState::Disconnected, Some(BOB))
        );

        settle().await;
        assert!(link.bob_events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_no_callbacks_after_disconnect() {
        let radio = MemoryRadio::new();
        let alice = ConnectionManager::new(Arc::new(radio.attach(ALICE)));
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));

        let (listener, _alice_events) = recorder();
        assert!(alice.accept(SecurityMode::Secure, listener, None));
        wait_until_bound(&radio, &ALICE).await;

        let (listener, mut events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        bob.disconnect();

        settle().await;
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Connecting, None)
        );
        assert!(events.try_recv().is_err());
        assert!(!bob.is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_mid_timeout_suppresses_failure() {
        let manager = stalled();
        manager.set_connect_timeout(Duration::from_millis(10));
        manager.enable_connect_timeout();

        let (listener, mut events) = recorder();
        assert!(manager.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        manager.disconnect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reconnect_after_disconnect() {
        let link = linked_pair().await;
        let Linked {
            radio,
            alice,
            mut alice_events,
            bob,
            ..
        } = link;

        bob.disconnect();
        let _ = next_event(&mut alice_events).await;

        let (listener, mut alice_events) = recorder();
        assert!(alice.accept(SecurityMode::Secure, listener, None));
        wait_until_bound(&radio, &ALICE).await;

        let (listener, mut bob_events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = bob_events.try_recv();
        assert_eq!(
            next_event(&mut bob_events).await,
            Event::State(ConnectionState::Connected, Some(ALICE))
        );
        let _ = alice_events.try_recv();
        assert_eq!(
            next_event(&mut alice_events).await,
            Event::State(ConnectionState::Connected, Some(BOB))
        );
        assert!(bob.send_text("again").await);
    }

    #[tokio::test]
    async fn test_accept_takes_one_inbound_link() {
        let link = linked_pair().await;
        assert!(!link.radio.is_bound(&ALICE, &RendezvousId::default()));

        let carol = ConnectionManager::new(Arc::new(link.radio.attach(CAROL)));
        let (listener, mut events) = recorder();
        assert!(carol.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        assert_eq!(
            next_event(&mut events).await,
            Event::Failed(FailureCode::ConnectFailed)
        );

        // The established link is untouched
        assert!(link.bob.send_text("still here").await);
        assert!(link.alice.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accept_right_after_disconnect_rebinds() {
        let radio = MemoryRadio::new();
        let alice = ConnectionManager::new(Arc::new(radio.attach(ALICE)));
        let (listener, mut events) = recorder();

        for _ in 0..100 {
            assert!(alice.accept(SecurityMode::Secure, listener.clone(), None));
            wait_until_bound(&radio, &ALICE).await;
            alice.disconnect();
        }

        assert!(alice.accept(SecurityMode::Secure, listener, None));
        wait_until_bound(&radio, &ALICE).await;
        settle().await;
        while let Ok(event) = events.try_recv() {
            assert_eq!(event, Event::State(ConnectionState::Listening, None));
        }

        // The last binding still takes a connection
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));
        let (listener, mut bob_events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = bob_events.try_recv();
        assert_eq!(
            next_event(&mut bob_events).await,
            Event::State(ConnectionState::Connected, Some(ALICE))
        );
    }

    /// Holds callbacks until the test runs them
    #[derive(Default)]
    struct HeldExecutor {
        jobs: parking_lot::Mutex<Vec<crate::executor::Job>>,
    }

    impl HeldExecutor {
        fn run_all(&self) {
            let jobs = std::mem::take(&mut *self.jobs.lock());
            for job in jobs {
                job();
            }
        }
    }

    impl CallbackExecutor for HeldExecutor {
        fn execute(&self, job: crate::executor::Job) {
            self.jobs.lock().push(job);
        }
    }

    async fn wait_for_role(manager: &ConnectionManager, role: ConnectionRole) {
        for _ in 0..500 {
            if manager.role() == role {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("manager never reached {}", role);
    }

    #[tokio::test]
    async fn test_disconnect_drops_queued_failure() {
        let radio = MemoryRadio::new();
        let executor = Arc::new(HeldExecutor::default());
        let bob = ConnectionManager::builder(Arc::new(radio.attach(BOB)))
            .executor(executor.clone())
            .build();

        let (listener, mut events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        let _ = events.try_recv();

        // Nobody listens on Alice: the slot is freed, the failure is queued
        for _ in 0..500 {
            if bob.role() == ConnectionRole::Idle && !executor.jobs.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(executor.jobs.lock().len(), 1);

        bob.disconnect();
        executor.run_all();
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_drops_queued_peer_disconnect() {
        let radio = MemoryRadio::new();
        let executor = Arc::new(HeldExecutor::default());
        let alice = ConnectionManager::builder(Arc::new(radio.attach(ALICE)))
            .executor(executor.clone())
            .build();
        let bob = ConnectionManager::new(Arc::new(radio.attach(BOB)));

        let (listener, mut events) = recorder();
        assert!(alice.accept(SecurityMode::Secure, listener, None));
        let _ = events.try_recv();
        wait_until_bound(&radio, &ALICE).await;

        let (listener, _bob_events) = recorder();
        assert!(bob.connect_peer(&ALICE, SecurityMode::Secure, listener, None));
        wait_for_role(&alice, ConnectionRole::Connected).await;
        executor.run_all();
        assert_eq!(
            events.try_recv().unwrap(),
            Event::State(ConnectionState::Connected, Some(BOB))
        );

        bob.disconnect();
        wait_for_role(&alice, ConnectionRole::Disconnected).await;

        alice.disconnect();
        executor.run_all();
        assert!(events.try_recv().is_err());
        assert_eq!(alice.role(), ConnectionRole::Idle);
    }
}
