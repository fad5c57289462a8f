//! The connection to brickd.
//!
//! An [`IpConnection`] owns one TCP session at a time. While connected it runs
//! two threads: a reader that decodes packets and resolves pending requests,
//! and a callback worker that delivers unsolicited packets and connection
//! events to listeners.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tfwire_frame::{
    decode_uid, FrameConfig, FrameError, Packet, PacketReader, PacketWriter, MAX_PAYLOAD_SIZE,
};
use tfwire_transport::{Endpoint, IpStream, TcpTransport};
use tracing::{debug, info, trace, warn};

use crate::callback::{CallbackItem, CallbackWorker, ConnectionListeners};
use crate::config::ConnectionConfig;
use crate::device::Device;
use crate::dispatcher::{RequestDispatcher, Routed};
use crate::error::{IpconError, Result};
use crate::registry::{DeviceRegistry, ListenerId};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    Requested,
    /// The daemon closed the socket.
    Shutdown,
    /// A socket error on the read path.
    Error(String),
    /// The byte stream could not be framed.
    Malformed(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("requested"),
            DisconnectReason::Shutdown => f.write_str("closed by peer"),
            DisconnectReason::Error(msg) => write!(f, "error: {msg}"),
            DisconnectReason::Malformed(msg) => write!(f, "malformed stream: {msg}"),
        }
    }
}

/// Delivered to connection listeners on the callback thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected(DisconnectReason),
}

struct Session {
    generation: u64,
    control: IpStream,
    reader: Option<JoinHandle<()>>,
    callbacks: CallbackWorker,
}

struct Lifecycle {
    state: ConnectionState,
    endpoint: Endpoint,
    session: Option<Session>,
    cancel_connect: bool,
}

/// Write half of the current session.
struct SessionWriter {
    generation: u64,
    writer: PacketWriter<IpStream>,
}

pub(crate) struct Shared {
    config: ConnectionConfig,
    lifecycle: Mutex<Lifecycle>,
    writer: Mutex<Option<SessionWriter>>,
    dispatcher: RequestDispatcher,
    registry: Arc<DeviceRegistry>,
    connection_listeners: Arc<ConnectionListeners>,
    generation: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn state(&self) -> ConnectionState {
        lock(&self.lifecycle).state
    }

    /// Write one packet. A socket error ends the session it happened on.
    fn send(&self, packet: &Packet) -> Result<()> {
        let (generation, written) = {
            let mut guard = lock(&self.writer);
            let Some(session) = guard.as_mut() else {
                return Err(IpconError::NotConnected);
            };
            (session.generation, session.writer.write_packet(packet))
        };

        if let Err(err) = written {
            if matches!(err, FrameError::Io(_) | FrameError::ConnectionClosed) {
                // A partial frame may be on the wire; the stream is unusable.
                self.connection_lost(
                    generation,
                    DisconnectReason::Error(format!("write failed: {err}")),
                );
            }
            return Err(err.into());
        }
        trace!(
            uid = packet.uid,
            function_id = packet.function_id,
            seq = packet.sequence_number,
            len = packet.payload.len(),
            "packet sent"
        );
        Ok(())
    }

    pub(crate) fn call(
        &self,
        uid: u32,
        function_id: u8,
        payload: &[u8],
        response_expected: bool,
        timeout: Duration,
    ) -> Result<Bytes> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(IpconError::Frame(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            }));
        }
        if function_id == 0 {
            return Err(IpconError::InvalidArgument(
                "function id 0 is never assigned".to_string(),
            ));
        }
        if self.state() != ConnectionState::Connected {
            return Err(IpconError::NotConnected);
        }

        let payload = Bytes::copy_from_slice(payload);
        if !response_expected {
            let seq = self.dispatcher.fire_and_forget_sequence();
            self.send(&Packet::request(uid, function_id, seq, false, payload))?;
            return Ok(Bytes::new());
        }

        let deadline = Instant::now() + timeout;
        let request = self
            .dispatcher
            .register(uid, function_id, deadline, timeout)?;
        let packet = Packet::request(uid, function_id, request.sequence_number(), true, payload);
        if let Err(err) = self.send(&packet) {
            self.dispatcher.cancel(&request);
            return Err(err);
        }

        let response = self.dispatcher.wait(request, deadline, timeout)?;
        Ok(response.payload)
    }

    fn start_session(self: &Arc<Self>, stream: IpStream) -> Result<()> {
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "could not disable nagle");
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let control = stream.try_clone()?;
        let read_half = stream.try_clone()?;

        let writer = PacketWriter::with_config_ip(
            stream,
            FrameConfig {
                write_timeout: self.config.write_timeout,
                ..FrameConfig::default()
            },
        )?;
        let reader = PacketReader::with_config_ip(read_half, FrameConfig::default())?;
        let callbacks = CallbackWorker::spawn(
            Arc::clone(&self.registry),
            Arc::clone(&self.connection_listeners),
        )?;
        let queue = callbacks.sender();

        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.cancel_connect {
                lifecycle.cancel_connect = false;
                lifecycle.state = ConnectionState::Disconnected;
                drop(lifecycle);
                debug!("connect cancelled by disconnect");
                let _ = control.shutdown();
                callbacks.stop();
                return Err(IpconError::Disconnected);
            }

            // Queued before the session is visible, so it precedes any Disconnected.
            callbacks.enqueue(CallbackItem::Connection(ConnectionEvent::Connected));
            *lock(&self.writer) = Some(SessionWriter { generation, writer });
            lifecycle.session = Some(Session {
                generation,
                control,
                reader: None,
                callbacks,
            });
            lifecycle.state = ConnectionState::Connected;
        }

        let shared = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("tfwire-reader".to_string())
            .spawn(move || shared.read_loop(reader, queue, generation));

        match spawned {
            Ok(handle) => {
                let mut lifecycle = lock(&self.lifecycle);
                match lifecycle.session.as_mut() {
                    Some(session) if session.generation == generation => {
                        session.reader = Some(handle);
                    }
                    // Already torn down; the reader exits by itself.
                    _ => {}
                }
                Ok(())
            }
            Err(source) => {
                let session = {
                    let mut lifecycle = lock(&self.lifecycle);
                    lifecycle.state = ConnectionState::Disconnected;
                    lifecycle.session.take()
                };
                if let Some(session) = session {
                    self.teardown(session, DisconnectReason::Error(source.to_string()));
                }
                Err(IpconError::Spawn {
                    name: "reader",
                    source,
                })
            }
        }
    }

    fn read_loop(
        &self,
        mut reader: PacketReader<IpStream>,
        queue: Sender<CallbackItem>,
        generation: u64,
    ) {
        debug!(generation, "reader thread started");
        loop {
            match reader.read_packet() {
                Ok(packet) => {
                    trace!(
                        uid = packet.uid,
                        function_id = packet.function_id,
                        seq = packet.sequence_number,
                        len = packet.payload.len(),
                        "packet received"
                    );
                    if let Routed::Callback(packet) = self.dispatcher.route(packet) {
                        if queue.send(CallbackItem::Packet(packet)).is_err() {
                            break;
                        }
                    }
                }
                Err(err) => {
                    let reason = match err {
                        FrameError::ConnectionClosed => DisconnectReason::Shutdown,
                        err if err.is_malformed() => DisconnectReason::Malformed(err.to_string()),
                        err => DisconnectReason::Error(err.to_string()),
                    };
                    self.connection_lost(generation, reason);
                    break;
                }
            }
        }
        debug!(generation, "reader thread stopped");
    }

    /// End session `generation` unless it is already gone.
    fn connection_lost(&self, generation: u64, reason: DisconnectReason) {
        let session = {
            let mut lifecycle = lock(&self.lifecycle);
            let current = lifecycle
                .session
                .as_ref()
                .is_some_and(|session| session.generation == generation);
            if !current {
                // disconnect() got there first.
                return;
            }
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.session.take()
        };

        warn!(%reason, "connection lost");

        if let Some(session) = session {
            self.teardown(session, reason);
        }
    }

    fn teardown(&self, session: Session, reason: DisconnectReason) {
        // Shut down before taking the writer: a send blocked in `write`
        // holds the writer lock until the socket fails it.
        if let Err(err) = session.control.shutdown() {
            debug!(error = %err, "socket shutdown failed");
        }
        {
            let mut writer = lock(&self.writer);
            if writer
                .as_ref()
                .is_some_and(|current| current.generation == session.generation)
            {
                writer.take();
            }
        }

        let failed = self.dispatcher.fail_all(|| IpconError::Disconnected);
        if failed > 0 {
            debug!(failed, "pending requests failed");
        }

        session
            .callbacks
            .enqueue(CallbackItem::Connection(ConnectionEvent::Disconnected(
                reason,
            )));
        session.callbacks.stop();

        if let Some(reader) = session.reader {
            if reader.thread().id() != thread::current().id() && reader.join().is_err() {
                warn!("reader thread exited with a panic");
            }
        }
    }
}

/// A connection to brickd.
///
/// Cheap to share by reference across threads; `call` may run concurrently
/// from any number of threads. Dropping the connection disconnects it.
pub struct IpConnection {
    shared: Arc<Shared>,
}

impl IpConnection {
    pub fn new(config: ConnectionConfig) -> Self {
        let endpoint = config.endpoint.clone();
        Self {
            shared: Arc::new(Shared {
                config,
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Disconnected,
                    endpoint,
                    session: None,
                    cancel_connect: false,
                }),
                writer: Mutex::new(None),
                dispatcher: RequestDispatcher::new(),
                registry: Arc::new(DeviceRegistry::new()),
                connection_listeners: Arc::new(ConnectionListeners::default()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Connect to the configured endpoint.
    pub fn connect(&self) -> Result<()> {
        let endpoint = lock(&self.shared.lifecycle).endpoint.clone();
        self.connect_endpoint(endpoint)
    }

    /// Connect to `host:port`; later calls to [`connect`](Self::connect) reuse it.
    pub fn connect_to(&self, host: impl Into<String>, port: u16) -> Result<()> {
        self.connect_endpoint(Endpoint::new(host, port))
    }

    fn connect_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if lifecycle.state != ConnectionState::Disconnected {
                return Err(IpconError::AlreadyConnected);
            }
            lifecycle.state = ConnectionState::Connecting;
            lifecycle.endpoint = endpoint.clone();
            lifecycle.cancel_connect = false;
        }

        debug!(%endpoint, "connecting");
        let stream = match TcpTransport::connect(&endpoint, self.shared.config.connect_timeout) {
            Ok(stream) => stream,
            Err(err) => {
                let mut lifecycle = lock(&self.shared.lifecycle);
                lifecycle.state = ConnectionState::Disconnected;
                lifecycle.cancel_connect = false;
                warn!(%endpoint, error = %err, "connect failed");
                return Err(err.into());
            }
        };

        if let Err(err) = self.shared.start_session(stream) {
            let mut lifecycle = lock(&self.shared.lifecycle);
            if lifecycle.state == ConnectionState::Connecting {
                lifecycle.state = ConnectionState::Disconnected;
            }
            return Err(err);
        }

        info!(%endpoint, "connected");
        Ok(())
    }

    /// Close the session. Safe to call repeatedly and from listeners.
    pub fn disconnect(&self) {
        let session = {
            let mut lifecycle = lock(&self.shared.lifecycle);
            match lifecycle.state {
                ConnectionState::Disconnected => return,
                ConnectionState::Connecting => {
                    lifecycle.cancel_connect = true;
                    return;
                }
                ConnectionState::Connected => {}
            }
            lifecycle.state = ConnectionState::Disconnected;
            lifecycle.session.take()
        };

        if let Some(session) = session {
            info!(endpoint = %self.endpoint(), "disconnecting");
            self.shared.teardown(session, DisconnectReason::Requested);
        }
    }

    /// Write one packet as-is.
    pub fn send(&self, packet: &Packet) -> Result<()> {
        self.shared.send(packet)
    }

    /// Send a request and, if `response_expected`, wait up to `timeout` for its response.
    ///
    /// Returns the response payload, or an empty payload for fire-and-forget requests.
    pub fn call(
        &self,
        uid: u32,
        function_id: u8,
        payload: &[u8],
        response_expected: bool,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.shared
            .call(uid, function_id, payload, response_expected, timeout)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Endpoint of the current or most recent session.
    pub fn endpoint(&self) -> Endpoint {
        lock(&self.shared.lifecycle).endpoint.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Requests currently waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.shared.dispatcher.pending()
    }

    /// Listen for connect/disconnect events.
    ///
    /// Events are delivered on the callback thread, ordered with device callbacks.
    pub fn add_connection_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.shared.connection_listeners.add(id, Arc::new(listener));
        id
    }

    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.shared.connection_listeners.remove(id)
    }

    /// Device handle for a base58 uid. Registering twice shares one entry.
    pub fn register(&self, uid: &str) -> Result<Device> {
        let uid = decode_uid(uid)?;
        let entry = self.shared.registry.register(uid);
        Ok(Device::from_parts(entry, Arc::downgrade(&self.shared)))
    }

    /// Device handle for a uid registered earlier.
    pub fn lookup(&self, uid: &str) -> Result<Device> {
        let numeric = decode_uid(uid)?;
        let entry = self
            .shared
            .registry
            .lookup(numeric)
            .ok_or_else(|| IpconError::NotFound(uid.to_string()))?;
        Ok(Device::from_parts(entry, Arc::downgrade(&self.shared)))
    }

    /// Uids of every registered device, ascending.
    pub fn devices(&self) -> Vec<u32> {
        self.shared.registry.uids()
    }
}

impl Default for IpConnection {
    fn default() -> Self {
        Self::new(ConnectionConfig::default())
    }
}

impl Drop for IpConnection {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for IpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpConnection")
            .field("endpoint", &self.endpoint())
            .field("state", &self.state())
            .finish()
    }
}
