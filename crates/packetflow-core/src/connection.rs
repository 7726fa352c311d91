//! Per-socket connection state machine.
//!
//! This module is Sans-IO: it never touches a socket directly. It consumes
//! bytes handed to it by a driver (the listener/read loop in
//! `packetflow-server`) and produces [`ConnectionAction`]s describing what
//! the driver should do next (transmit bytes, dispatch a parsed packet,
//! close the socket). This keeps the state machine deterministically
//! testable without a live network.

use std::time::Duration;

use bytes::Bytes;
use packetflow_crypto::{CompressionMode, CompressionPipeline, CryptoPipeline, EncMode};
use packetflow_proto::Packet;

use crate::env::Environment;
use crate::error::ConnectionError;
use crate::id::ConnectionId;
use crate::metadata::{Metadata, MetadataValue, DISCONNECT_REASON_KEY};
use crate::permission::PermissionLevel;
use crate::transport_cache::{IncomingFifo, OutgoingCache};

/// Connection lifecycle state. Transitions only move forward; `Closed` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted but not yet reading.
    Connecting,
    /// Reading, but no encryption key has been installed yet.
    Authenticating,
    /// Key installed (or not required); normal traffic flows.
    Connected,
    /// Closing: draining or cancelling in-flight work.
    Disposing,
    /// Terminal. The socket has been released exactly once.
    Closed,
}

/// Something the driver (the I/O loop) must do in response to a state
/// machine transition.
#[derive(Debug, Clone)]
pub enum ConnectionAction {
    /// A fully decoded, decrypted, decompressed packet ready for the
    /// dispatcher.
    Dispatch(Packet),
    /// Bytes ready to be written to the socket.
    Transmit(Bytes),
    /// The socket should be closed.
    Close {
        /// If true, skip any drain/linger and close immediately.
        force: bool,
    },
    /// The driver may release/drop the underlying socket resource; emitted
    /// once, after `Closed` is reached.
    ReleaseSocket,
}

/// Observable lifecycle events, delivered synchronously to registered
/// observers in the order listed in the type's variants.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Fired after a packet has been parsed and the pipeline applied, but
    /// before the dispatcher invokes a handler.
    Process {
        /// The packet's command id.
        command: u16,
        /// The packet's wire id.
        packet_id: u16,
    },
    /// Fired after a handler has run for a dispatched packet.
    PostProcess {
        /// The packet's command id.
        command: u16,
        /// The packet's wire id.
        packet_id: u16,
        /// Whether the handler completed without error.
        success: bool,
    },
    /// Fired when an inbound packet is appended to the incoming replay
    /// FIFO.
    PacketCached {
        /// The packet's command id.
        command: u16,
        /// The packet's wire id.
        packet_id: u16,
        /// Whether an older entry was evicted to make room.
        evicted: bool,
    },
    /// Fired exactly once, when the connection reaches `Closed`.
    Close {
        /// Human-readable close reason, if one was given.
        reason: Option<String>,
    },
}

type Observer = Box<dyn FnMut(&ConnectionEvent) + Send>;

/// Immutable-after-construction connection tuning parameters.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Size hint for the driver's read buffer. Does not bound payload size
    /// (that is capped by the wire format at `u16::MAX`).
    pub receive_buffer_size: usize,
    /// How long a connection may sit idle before [`Connection::check_timeout`]
    /// reports [`ConnectionError::IdleTimeout`].
    pub idle_timeout: Duration,
    /// Bound on the per-connection outgoing dedup cache and incoming
    /// replay-detection FIFO (Component H).
    pub transport_cache_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: 64 * 1024,
            idle_timeout: Duration::from_secs(300),
            transport_cache_capacity: crate::transport_cache::DEFAULT_CAPACITY,
        }
    }
}

/// Per-socket state, owned by exactly one listener for its lifetime.
pub struct Connection<E: Environment> {
    id: ConnectionId,
    remote_endpoint: String,
    established_at: E::Instant,
    last_ping_at: E::Instant,
    encryption_key: Option<[u8; 32]>,
    enc_mode: EncMode,
    com_mode: CompressionMode,
    permission_level: PermissionLevel,
    state: ConnectionState,
    metadata: Metadata,
    incoming_packet: Option<Packet>,
    observers: Vec<Observer>,
    closed: bool,
    config: ConnectionConfig,
    env: E,
    compression: CompressionPipeline,
    outbox: Vec<Bytes>,
    outgoing_cache: OutgoingCache,
    incoming_fifo: IncomingFifo,
}

impl<E: Environment> Connection<E> {
    /// Construct a new connection in the `Connecting` state.
    pub fn new(remote_endpoint: String, enc_mode: EncMode, com_mode: CompressionMode, env: E, config: ConnectionConfig) -> Self {
        let now = env.now();
        let cache_capacity = config.transport_cache_capacity;
        Self {
            id: ConnectionId::next(),
            remote_endpoint,
            established_at: now,
            last_ping_at: now,
            encryption_key: None,
            enc_mode,
            com_mode,
            permission_level: PermissionLevel::default(),
            state: ConnectionState::Connecting,
            metadata: Metadata::new(),
            incoming_packet: None,
            observers: Vec::new(),
            closed: false,
            config,
            env,
            compression: CompressionPipeline::new(com_mode),
            outbox: Vec::new(),
            outgoing_cache: OutgoingCache::new(cache_capacity),
            incoming_fifo: IncomingFifo::new(cache_capacity),
        }
    }

    /// This connection's process-unique id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The peer's address, as recorded at construction.
    #[must_use]
    pub fn remote_endpoint(&self) -> &str {
        &self.remote_endpoint
    }

    /// Wall-clock time this connection has existed.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.env.now() - self.established_at
    }

    /// Current permission level.
    #[must_use]
    pub fn permission_level(&self) -> PermissionLevel {
        self.permission_level
    }

    /// Raise this connection's permission level, e.g. after a successful
    /// login handler runs.
    pub fn set_permission_level(&mut self, level: PermissionLevel) {
        self.permission_level = level;
    }

    /// Handler-attached metadata.
    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mutable access to handler-attached metadata.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// The most recently parsed packet, retained for zero-copy handler
    /// access until the next packet is parsed.
    #[must_use]
    pub fn incoming_packet(&self) -> Option<&Packet> {
        self.incoming_packet.as_ref()
    }

    /// The per-connection outgoing dedup cache (Component H).
    #[must_use]
    pub fn outgoing_cache(&self) -> &OutgoingCache {
        &self.outgoing_cache
    }

    /// The per-connection incoming replay-detection FIFO (Component H).
    #[must_use]
    pub fn incoming_fifo(&self) -> &IncomingFifo {
        &self.incoming_fifo
    }

    /// Register an observer invoked synchronously for every
    /// [`ConnectionEvent`]. Observers must not block indefinitely.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&ConnectionEvent) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    fn emit(&mut self, event: ConnectionEvent) {
        for observer in &mut self.observers {
            observer(&event);
        }
    }

    /// Notify observers that a handler has finished running for a
    /// dispatched packet. Called by the driver once the dispatcher returns,
    /// after `ConnectionEvent::Process` and before any resulting
    /// `ConnectionEvent::Close`.
    pub fn notify_post_process(&mut self, command: u16, packet_id: u16, success: bool) {
        self.emit(ConnectionEvent::PostProcess { command, packet_id, success });
    }

    /// Idempotent: begin reading. Moves `Connecting` to `Authenticating`
    /// (the normal case, awaiting a handshake handler to install a key) or
    /// directly to `Connected` if no encryption key is required for this
    /// connection's `enc_mode`... concretely: callers that don't require a
    /// handshake should call [`Connection::install_key`] immediately after.
    pub fn begin_receive(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Authenticating;
        }
    }

    /// Install the 32-byte connection-wide encryption key, completing the
    /// handshake and transitioning `Authenticating` to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidState`] if not currently
    /// `Authenticating`.
    pub fn install_key(&mut self, key: [u8; 32]) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Authenticating {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "install_key" });
        }
        self.encryption_key = Some(key);
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// Record activity, resetting the idle timer.
    pub fn update_activity(&mut self) {
        self.last_ping_at = self.env.now();
    }

    /// Returns `Err(IdleTimeout)` if no activity has been observed within
    /// the configured idle timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::IdleTimeout`] if the connection has been
    /// idle longer than `config.idle_timeout`.
    pub fn check_timeout(&self) -> Result<(), ConnectionError> {
        let elapsed = self.env.now() - self.last_ping_at;
        if elapsed > self.config.idle_timeout {
            return Err(ConnectionError::IdleTimeout { elapsed });
        }
        Ok(())
    }

    /// Periodic housekeeping hook; currently equivalent to
    /// [`Connection::check_timeout`]. Callers invoke this from a driver's
    /// timer tick.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::IdleTimeout`] if idle too long.
    pub fn tick(&mut self) -> Result<(), ConnectionError> {
        self.check_timeout()
    }

    /// Feed newly received bytes into the connection. Runs
    /// `try_parse → decrypt → decompress` for as many complete packets as
    /// `buf` contains, returning the number of bytes consumed (the caller
    /// retains the remainder for the next call) and the actions the driver
    /// must take.
    ///
    /// A malformed frame or checksum mismatch is a protocol violation and
    /// closes the connection; a `NeedMore` result simply stops, awaiting
    /// more bytes.
    pub fn receive(&mut self, buf: &[u8]) -> (usize, Vec<ConnectionAction>) {
        let mut consumed = 0;
        let mut actions = Vec::new();

        if self.closed {
            return (0, actions);
        }

        loop {
            let remaining = &buf[consumed..];
            match Packet::try_parse(remaining) {
                Ok(packet) => {
                    let frame_len = packet.header().length() as usize;
                    consumed += frame_len;
                    self.update_activity();

                    match self.process_inbound(packet) {
                        Ok(packet) => {
                            let command = packet.header().command();
                            let packet_id = packet.header().id();
                            self.emit(ConnectionEvent::Process { command, packet_id });
                            let evicted = self.incoming_fifo.push(packet.payload().clone());
                            self.emit(ConnectionEvent::PacketCached { command, packet_id, evicted });
                            self.incoming_packet = Some(packet.clone());
                            actions.push(ConnectionAction::Dispatch(packet));
                        }
                        Err(err) => {
                            actions.push(ConnectionAction::Close { force: false });
                            self.finish_close(Some(err.to_string()), &mut actions);
                            return (consumed, actions);
                        }
                    }
                }
                Err(packetflow_proto::CodecError::NeedMore) => break,
                Err(err) => {
                    let reason = ConnectionError::ProtocolViolation(err.to_string());
                    actions.push(ConnectionAction::Close { force: false });
                    self.finish_close(Some(reason.to_string()), &mut actions);
                    return (consumed, actions);
                }
            }
        }

        (consumed, actions)
    }

    fn process_inbound(&mut self, packet: Packet) -> Result<Packet, ConnectionError> {
        let crypto = CryptoPipeline::new(self.enc_mode);
        let packet = match &self.encryption_key {
            Some(key) => crypto.decrypt(packet, key)?,
            None => packet,
        };
        let packet = self.compression.decompress(packet)?;
        Ok(packet)
    }

    /// Apply the send-side pipeline (compress then encrypt) to a
    /// handler-produced packet and return the framed bytes ready for the
    /// socket.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Crypto`] if compression or encryption
    /// fails, or [`ConnectionError::Codec`] if the final frame cannot be
    /// serialized (e.g. the encrypted payload exceeds the wire cap).
    pub fn prepare_send(&mut self, packet: Packet) -> Result<Bytes, ConnectionError> {
        let packet = self.compression.compress(packet);
        let packet = match &self.encryption_key {
            Some(key) => {
                let crypto = CryptoPipeline::new(self.enc_mode);
                let mut random = vec![0u8; crypto.random_len()];
                self.env.random_bytes(&mut random);
                crypto.encrypt(packet, key, &random)?
            }
            None => packet,
        };
        let framed = packet.serialize()?;
        self.outgoing_cache.push(framed.clone());
        Ok(framed)
    }

    /// Synchronous best-effort send: applies the pipeline and returns the
    /// framed bytes, or `None` if the connection is already closed.
    #[must_use]
    pub fn send(&mut self, packet: Packet) -> Option<Bytes> {
        if self.closed {
            return None;
        }
        self.prepare_send(packet).ok()
    }

    /// Apply the send pipeline to `packet` and hold the framed bytes for
    /// the driver to pick up via [`Connection::take_outbox`]. Used by
    /// handlers, which have no direct socket access. A no-op once the
    /// connection is closed.
    pub fn queue_send(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        if self.closed {
            return Ok(());
        }
        let framed = self.prepare_send(packet)?;
        self.outbox.push(framed);
        Ok(())
    }

    /// Drain bytes queued by [`Connection::queue_send`] since the last
    /// call, in FIFO order.
    pub fn take_outbox(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.outbox)
    }

    /// Begin a graceful close: transitions through `Disposing` to `Closed`,
    /// storing `reason` in metadata and firing `OnCloseEvent` exactly once.
    pub fn disconnect(&mut self, reason: Option<String>) -> Vec<ConnectionAction> {
        if let Some(reason) = &reason {
            self.metadata.insert(DISCONNECT_REASON_KEY.to_string(), MetadataValue::Text(reason.clone()));
        }
        let mut actions = Vec::new();
        self.finish_close(reason, &mut actions);
        actions
    }

    /// Transition to `Disposing` then `Closed`. `force = true` skips any
    /// drain semantics the driver would otherwise apply (the state machine
    /// itself has no I/O to drain; this flag is forwarded to the driver via
    /// [`ConnectionAction::Close`]).
    pub fn close(&mut self, force: bool) -> Vec<ConnectionAction> {
        let mut actions = vec![ConnectionAction::Close { force }];
        self.finish_close(None, &mut actions);
        actions
    }

    fn finish_close(&mut self, reason: Option<String>, actions: &mut Vec<ConnectionAction>) {
        if self.closed {
            return;
        }
        self.state = ConnectionState::Disposing;
        self.closed = true;
        self.state = ConnectionState::Closed;
        self.emit(ConnectionEvent::Close { reason });
        actions.push(ConnectionAction::ReleaseSocket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packetflow_proto::{PacketFlags, PacketType};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, Default)]
    struct TestEnvironment;

    impl Environment for TestEnvironment {
        type Instant = std::time::Instant;

        fn now(&self) -> Self::Instant {
            std::time::Instant::now()
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            for (i, b) in buffer.iter_mut().enumerate() {
                *b = i as u8;
            }
        }
    }

    fn test_connection() -> Connection<TestEnvironment> {
        Connection::new(
            "127.0.0.1:9999".to_string(),
            EncMode::ChaCha20Poly1305,
            CompressionMode::GZip,
            TestEnvironment,
            ConnectionConfig::default(),
        )
    }

    #[test]
    fn starts_connecting_and_moves_to_authenticating() {
        let mut conn = test_connection();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        conn.begin_receive();
        assert_eq!(conn.state(), ConnectionState::Authenticating);
    }

    #[test]
    fn install_key_requires_authenticating_state() {
        let mut conn = test_connection();
        assert!(conn.install_key([0u8; 32]).is_err());
        conn.begin_receive();
        assert!(conn.install_key([0u8; 32]).is_ok());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn send_without_key_round_trips_through_receive() {
        let mut sender = test_connection();
        sender.begin_receive();
        sender.install_key([7u8; 32]).unwrap();

        let packet = Packet::new(1, 42, PacketType::Binary, Bytes::from_static(b"hello")).unwrap();
        let framed = sender.send(packet).expect("send should succeed");

        let mut receiver = test_connection();
        receiver.begin_receive();
        receiver.install_key([7u8; 32]).unwrap();
        let (consumed, actions) = receiver.receive(&framed);
        assert_eq!(consumed, framed.len());
        assert!(matches!(actions.as_slice(), [ConnectionAction::Dispatch(p)] if p.payload().as_ref() == b"hello"));
    }

    #[test]
    fn encrypted_payload_round_trips() {
        let key = [9u8; 32];
        let mut sender = test_connection();
        sender.begin_receive();
        sender.install_key(key).unwrap();

        let mut header_flags = PacketFlags::NONE;
        header_flags = header_flags.union(PacketFlags::ENCRYPTED);
        let mut packet = Packet::new(1, 5, PacketType::Binary, Bytes::from_static(b"secret")).unwrap();
        packet.header_mut().set_flags(header_flags);

        let framed = sender.send(packet).expect("send should succeed");

        let mut receiver = test_connection();
        receiver.begin_receive();
        receiver.install_key(key).unwrap();
        let (_, actions) = receiver.receive(&framed);
        assert!(matches!(actions.as_slice(), [ConnectionAction::Dispatch(p)] if p.payload().as_ref() == b"secret"));
    }

    #[test]
    fn malformed_bytes_close_the_connection() {
        let mut conn = test_connection();
        conn.begin_receive();
        conn.install_key([1u8; 32]).unwrap();
        let garbage = [0xFFu8; 30];
        let (_, actions) = conn.receive(&garbage);
        assert!(actions.iter().any(|a| matches!(a, ConnectionAction::Close { .. })));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn partial_frame_reports_need_more_and_consumes_nothing() {
        let mut sender = test_connection();
        sender.begin_receive();
        sender.install_key([2u8; 32]).unwrap();
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::from_static(b"0123456789")).unwrap();
        let framed = sender.send(packet).unwrap();

        let mut receiver = test_connection();
        receiver.begin_receive();
        receiver.install_key([2u8; 32]).unwrap();
        let (consumed, actions) = receiver.receive(&framed[..framed.len() - 2]);
        assert_eq!(consumed, 0);
        assert!(actions.is_empty());
    }

    #[test]
    fn disconnect_fires_close_event_exactly_once() {
        let mut conn = test_connection();
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        conn.add_observer(move |event| {
            if matches!(event, ConnectionEvent::Close { .. }) {
                *count_clone.lock().unwrap() += 1;
            }
        });
        conn.disconnect(Some("client requested".to_string()));
        conn.disconnect(Some("double close".to_string()));
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(matches!(conn.metadata().get(DISCONNECT_REASON_KEY), Some(MetadataValue::Text(t)) if t == "client requested"));
    }

    #[test]
    fn send_after_close_returns_none() {
        let mut conn = test_connection();
        conn.close(false);
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::from_static(b"x")).unwrap();
        assert!(conn.send(packet).is_none());
    }

    #[test]
    fn queue_send_fills_outbox_until_drained() {
        let mut conn = test_connection();
        let packet = Packet::new(1, 1, PacketType::Binary, Bytes::from_static(b"hi")).unwrap();
        conn.queue_send(packet).unwrap();
        assert_eq!(conn.take_outbox().len(), 1);
        assert!(conn.take_outbox().is_empty());
    }

    #[test]
    fn check_timeout_reports_idle_connections() {
        let mut conn = test_connection();
        conn.config.idle_timeout = Duration::from_secs(0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(conn.check_timeout().is_err());
        assert!(!conn.check_timeout().unwrap_err().is_transient());
    }
}
