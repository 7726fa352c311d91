//! TCP accept loop and per-connection read/write tasks.
//!
//! Built over plain `tokio::net::TcpListener`/`TcpStream`: this framework
//! terminates TLS nowhere and layers its own crypto pipeline over raw TCP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use packetflow_core::{Connection, ConnectionAction, ConnectionConfig, SystemEnvironment};
use packetflow_crypto::{CompressionMode, EncMode};
use packetflow_proto::{Packet, PacketType};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::admission::{AdmissionDecision, ConnectionLimitGuard};
use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, DispatchOutcome};
use crate::error::ServerError;

/// Listens for inbound TCP connections and drives each through the
/// [`Connection`] state machine and [`Dispatcher`].
pub struct Listener {
    listener: TcpListener,
    config: ServerConfig,
    admission: Arc<ConnectionLimitGuard>,
    dispatcher: Dispatcher<SystemEnvironment>,
}

impl Listener {
    /// Bind the configured address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be parsed or
    /// bound.
    pub async fn bind(config: ServerConfig, dispatcher: Dispatcher<SystemEnvironment>) -> Result<Self, ServerError> {
        config.listener.validate().map_err(ServerError::Config)?;

        let addr: SocketAddr = config.listener.bind_address.parse().map_err(|e| ServerError::Bind {
            address: config.listener.bind_address.clone(),
            reason: format!("{e}"),
        })?;

        let listener = TcpListener::bind(addr).await.map_err(|e| ServerError::Bind {
            address: config.listener.bind_address.clone(),
            reason: e.to_string(),
        })?;

        let admission = Arc::new(ConnectionLimitGuard::new(&config.admission));
        let rate_limiter = Arc::new(crate::admission::RateLimitGuard::new(&config.admission));
        let dispatcher = dispatcher.with_rate_limiter(rate_limiter);

        Ok(Self { listener, config, admission, dispatcher })
    }

    /// The bound local address, e.g. to discover an OS-assigned port.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the underlying socket cannot report its
    /// address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the process is terminated. Each connection
    /// runs on its own spawned task; a per-IP admission check happens
    /// before any [`Connection`] is constructed.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(address = %self.config.listener.bind_address, "listening");

        let admission = Arc::clone(&self.admission);
        let admission_sweeper = Arc::clone(&admission);
        let sweep_interval = self.config.admission.cleanup_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                admission_sweeper.sweep(Instant::now());
            }
        });

        loop {
            let (socket, peer_addr) = match self.listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::warn!(%err, "accept failed");
                    continue;
                },
            };

            if self.admission.check(peer_addr.ip(), Instant::now()) == AdmissionDecision::Reject {
                tracing::debug!(%peer_addr, "rejected: per-ip connection cap reached");
                continue;
            }

            let config = self.config.clone();
            let admission = Arc::clone(&self.admission);
            let dispatcher = self.dispatcher.clone();

            tokio::spawn(async move {
                let ip = peer_addr.ip();
                if let Err(err) = handle_connection(socket, peer_addr, config, dispatcher).await {
                    tracing::debug!(%peer_addr, %err, "connection ended with an error");
                }
                admission.release(ip);
            });
        }
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    peer_addr: SocketAddr,
    config: ServerConfig,
    dispatcher: Dispatcher<SystemEnvironment>,
) -> Result<(), ServerError> {
    socket.set_nodelay(config.listener.no_delay)?;

    let connection_config = ConnectionConfig {
        receive_buffer_size: config.listener.receive_buffer_size,
        idle_timeout: config.listener.receive_timeout(),
        ..ConnectionConfig::default()
    };

    let mut connection = Connection::new(
        peer_addr.to_string(),
        EncMode::ChaCha20Poly1305,
        CompressionMode::GZip,
        SystemEnvironment,
        connection_config,
    );
    connection.begin_receive();

    let connection_id = connection.id().as_u64();
    tracing::debug!(%peer_addr, connection_id, "accepted");

    let mut read_buf = BytesMut::with_capacity(config.listener.receive_buffer_size);
    let mut chunk = vec![0u8; config.listener.receive_buffer_size];

    loop {
        let read_result =
            tokio::time::timeout(config.listener.receive_timeout(), socket.read(&mut chunk)).await;

        let bytes_read = match read_result {
            Ok(Ok(0)) => {
                connection.disconnect(Some("peer closed".to_string()));
                break;
            },
            Ok(Ok(n)) => n,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                connection.disconnect(Some("idle timeout".to_string()));
                break;
            },
        };

        read_buf.extend_from_slice(&chunk[..bytes_read]);

        let (consumed, actions) = connection.receive(&read_buf);
        read_buf.advance(consumed);

        if !process_actions(&mut socket, &mut connection, &dispatcher, connection_id, actions).await? {
            break;
        }
    }

    socket.shutdown().await.ok();
    Ok(())
}

/// Execute the actions produced by one `Connection::receive` call. Returns
/// `false` once the connection has released its socket.
async fn process_actions(
    socket: &mut TcpStream,
    connection: &mut Connection<SystemEnvironment>,
    dispatcher: &Dispatcher<SystemEnvironment>,
    connection_id: u64,
    actions: Vec<ConnectionAction>,
) -> Result<bool, ServerError> {
    for action in actions {
        match action {
            ConnectionAction::Transmit(bytes) => {
                if socket.write_all(&bytes).await.is_err() {
                    return Ok(false);
                }
            },
            ConnectionAction::Dispatch(packet) => {
                let header = packet.header().clone();
                let outcome = dispatcher.dispatch(packet, connection_id, connection, Instant::now()).await;

                connection.notify_post_process(
                    header.command(),
                    header.id(),
                    matches!(outcome, DispatchOutcome::Handled),
                );

                match outcome {
                    DispatchOutcome::Handled => {},
                    DispatchOutcome::RecommendDisconnect => {
                        let close_actions = connection.disconnect(Some("abuse".to_string()));
                        flush_outbox(socket, connection).await;
                        for close_action in close_actions {
                            if let ConnectionAction::Transmit(bytes) = close_action {
                                let _ = socket.write_all(&bytes).await;
                            }
                        }
                        return Ok(false);
                    },
                    DispatchOutcome::Rejected { reason } => {
                        if reason.reports_to_peer() {
                            if let Ok(packet) =
                                Packet::new(header.id(), header.command(), PacketType::String, reason.to_string())
                            {
                                if let Some(bytes) = connection.send(packet) {
                                    let _ = socket.write_all(&bytes).await;
                                }
                            }
                        }
                    },
                }

                flush_outbox(socket, connection).await;
            },
            ConnectionAction::Close { .. } => {},
            ConnectionAction::ReleaseSocket => return Ok(false),
        }
    }

    Ok(true)
}

async fn flush_outbox(socket: &mut TcpStream, connection: &mut Connection<SystemEnvironment>) {
    for bytes in connection.take_outbox() {
        if socket.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DispatcherConfig, RateClass};
    use crate::dispatcher::DispatcherBuilder;
    use packetflow_core::PermissionLevel;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt as _;

    fn build_dispatcher() -> Dispatcher<SystemEnvironment> {
        DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
            .register(1, "echo", PermissionLevel::Guest, false, RateClass::Unlimited, |packet, conn| {
                let reply = Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone());
                async move { Ok(reply.ok()) }
            })
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn accepts_and_echoes_a_packet() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "127.0.0.1:0".to_string();

        let listener = Listener::bind(config, build_dispatcher()).await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(listener.run());

        let mut client = TcpStream::connect(addr).await.unwrap();
        let packet = Packet::new(1, 1, PacketType::Binary, bytes::Bytes::from_static(b"ping")).unwrap();
        let framed = packet.serialize().unwrap();
        client.write_all(&framed).await.unwrap();

        let mut response = vec![0u8; framed.len()];
        tokio::time::timeout(Duration::from_secs(2), client.read_exact(&mut response)).await.unwrap().unwrap();

        let echoed = Packet::try_parse(&response).unwrap();
        assert_eq!(echoed.payload().as_ref(), b"ping");
    }
}
