//! Black-box end-to-end scenarios, each driving a raw `TcpStream` against a
//! real bound [`Listener`] the way an actual client would, bypassing any
//! client library (none is in scope for this framework).

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use packetflow_core::{PermissionLevel, SystemEnvironment};
use packetflow_crypto::{CryptoPipeline, EncMode};
use packetflow_proto::{Packet, PacketFlags, PacketHeader, PacketType};
use packetflow_server::{Dispatcher, DispatcherBuilder, DispatcherConfig, HandlerError, Listener, RateClass, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const HANDSHAKE: u16 = 0x00F0;
const LOGIN: u16 = 0x00F1;
const ECHO: u16 = 0x0001;
const TIGHTLY_LIMITED: u16 = 0x0002;
const LIMITED: u16 = 0x0003;
const ADMIN_ONLY: u16 = 0x0004;
const ENCRYPTED_ECHO: u16 = 0x0005;

/// Matches the literal 32-byte key from the encrypted-echo scenario: bytes
/// `0x00` through `0x1F`.
fn handshake_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    for (i, b) in key.iter_mut().enumerate() {
        *b = i as u8;
    }
    key
}

fn build_dispatcher() -> Dispatcher<SystemEnvironment> {
    DispatcherBuilder::<SystemEnvironment>::new(DispatcherConfig::default())
        .register(HANDSHAKE, "handshake", PermissionLevel::Guest, false, RateClass::Unlimited, |packet, conn| {
            let payload = packet.payload().clone();
            async move {
                if payload.len() != 32 {
                    return Err(HandlerError::Failed("handshake payload must be 32 bytes".to_string()));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&payload);
                conn.install_key(key).map_err(|err| HandlerError::Fatal(err.to_string()))?;
                Ok(None)
            }
        })
        .unwrap()
        .register(LOGIN, "login", PermissionLevel::Guest, false, RateClass::Unlimited, |_packet, conn| {
            conn.set_permission_level(PermissionLevel::User);
            async move { Ok(None) }
        })
        .unwrap()
        .register(ECHO, "echo", PermissionLevel::User, false, RateClass::Unlimited, |packet, _conn| {
            let reply = Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone());
            async move { Ok(reply.ok()) }
        })
        .unwrap()
        .register(ENCRYPTED_ECHO, "encrypted_echo", PermissionLevel::Guest, true, RateClass::Unlimited, |packet, _conn| {
            let reply = Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone())
                .map(|mut reply| {
                    reply.header_mut().set_flags(PacketFlags::ENCRYPTED);
                    reply
                });
            async move { Ok(reply.ok()) }
        })
        .unwrap()
        .register(LIMITED, "limited", PermissionLevel::Guest, false, RateClass::Low, |packet, _conn| {
            let reply = Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone());
            async move { Ok(reply.ok()) }
        })
        .unwrap()
        .register(
            TIGHTLY_LIMITED,
            "tightly_limited",
            PermissionLevel::Guest,
            false,
            RateClass::Custom { max_requests: 3, window_secs: 1 },
            |packet, _conn| {
                let reply = Packet::new(packet.header().id(), packet.header().command(), PacketType::Binary, packet.payload().clone());
                async move { Ok(reply.ok()) }
            },
        )
        .unwrap()
        .register(ADMIN_ONLY, "admin_only", PermissionLevel::Admin, false, RateClass::Unlimited, |_packet, _conn| async {
            Ok(None)
        })
        .unwrap()
        .build()
}

async fn start_server(mut config: ServerConfig) -> SocketAddr {
    config.listener.bind_address = "127.0.0.1:0".to_string();
    let listener = Listener::bind(config, build_dispatcher()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(listener.run());
    addr
}

async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

async fn write_packet(stream: &mut TcpStream, packet: &Packet) {
    stream.write_all(&packet.serialize().unwrap()).await.unwrap();
}

/// Reads one framed packet, or `None` if the peer closed the connection
/// before a full header arrived.
async fn read_packet(stream: &mut TcpStream) -> Option<Packet> {
    let mut header_buf = [0u8; PacketHeader::SIZE];
    if stream.read_exact(&mut header_buf).await.is_err() {
        return None;
    }
    let length = PacketHeader::ref_from_bytes(&header_buf).unwrap().length() as usize;
    let mut full = vec![0u8; length];
    full[..PacketHeader::SIZE].copy_from_slice(&header_buf);
    stream.read_exact(&mut full[PacketHeader::SIZE..]).await.unwrap();
    Some(Packet::try_parse(&full).unwrap())
}

/// Expects the peer to close the connection with no further bytes.
async fn expect_eof(stream: &mut TcpStream) {
    let mut probe = [0u8; 1];
    let n = timeout(Duration::from_secs(2), stream.read(&mut probe)).await.unwrap().unwrap();
    assert_eq!(n, 0, "expected connection to be closed");
}

async fn login(stream: &mut TcpStream) {
    let packet = Packet::new(0, LOGIN, PacketType::Binary, Bytes::new()).unwrap();
    write_packet(stream, &packet).await;
}

#[tokio::test]
async fn e1_echo() {
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;
    login(&mut stream).await;

    let request = Packet::new(1, ECHO, PacketType::Binary, Bytes::from_static(&[10, 20, 30, 40])).unwrap();
    write_packet(&mut stream, &request).await;

    let response = timeout(Duration::from_millis(100), read_packet(&mut stream)).await.unwrap().unwrap();
    assert_eq!(response.header().command(), ECHO);
    assert_eq!(response.payload().as_ref(), &[10, 20, 30, 40]);
}

#[tokio::test]
async fn e2_encrypted_echo() {
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;

    let key = handshake_key();
    let handshake = Packet::new(0, HANDSHAKE, PacketType::Binary, Bytes::copy_from_slice(&key)).unwrap();
    write_packet(&mut stream, &handshake).await;

    let pipeline = CryptoPipeline::new(EncMode::ChaCha20Poly1305);
    let mut plaintext = Packet::new(2, ENCRYPTED_ECHO, PacketType::Binary, Bytes::from_static(&[10, 20, 30, 40])).unwrap();
    plaintext.header_mut().set_flags(PacketFlags::ENCRYPTED);
    let random = vec![9u8; pipeline.random_len()];
    let request = pipeline.encrypt(plaintext, &key, &random).unwrap();
    write_packet(&mut stream, &request).await;

    let response = timeout(Duration::from_millis(200), read_packet(&mut stream)).await.unwrap().unwrap();
    assert!(response.header().flags().contains(PacketFlags::ENCRYPTED));

    let decrypted = pipeline.decrypt(response, &key).unwrap();
    assert_eq!(decrypted.payload().as_ref(), &[10, 20, 30, 40]);
}

#[tokio::test]
async fn e3_rate_limit() {
    // command 0x0002 at 3 requests per 1s window: 5 packets sent back to
    // back should see the first 3 succeed and the last 2 rejected.
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;

    for i in 0..3u16 {
        let request = Packet::new(i, TIGHTLY_LIMITED, PacketType::Binary, Bytes::new()).unwrap();
        write_packet(&mut stream, &request).await;
        let response = timeout(Duration::from_millis(200), read_packet(&mut stream)).await.unwrap().unwrap();
        assert_eq!(response.header().command(), TIGHTLY_LIMITED);
        assert_eq!(response.header().packet_type(), Some(PacketType::Binary));
    }

    for i in 3..5u16 {
        let request = Packet::new(i, TIGHTLY_LIMITED, PacketType::Binary, Bytes::new()).unwrap();
        write_packet(&mut stream, &request).await;
        let response = timeout(Duration::from_millis(200), read_packet(&mut stream)).await.unwrap().unwrap();
        assert_eq!(response.header().packet_type(), Some(PacketType::String));
    }
}

#[tokio::test]
async fn e3_abuse_disconnect_after_three_strikes() {
    // RateClass::Low allows 10 requests per 60s window; this exercises the
    // three-strikes-then-disconnect abuse policy separately from the
    // literal rate-limit counts above.
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;

    for i in 0..10u16 {
        let request = Packet::new(i, LIMITED, PacketType::Binary, Bytes::new()).unwrap();
        write_packet(&mut stream, &request).await;
        let response = read_packet(&mut stream).await.unwrap();
        assert_eq!(response.header().command(), LIMITED);
        assert_eq!(response.header().packet_type(), Some(PacketType::Binary));
    }

    for i in 10..12u16 {
        let request = Packet::new(i, LIMITED, PacketType::Binary, Bytes::new()).unwrap();
        write_packet(&mut stream, &request).await;
        let response = read_packet(&mut stream).await.unwrap();
        assert_eq!(response.header().packet_type(), Some(PacketType::String));
    }

    // Third strike recommends disconnect; no response packet is sent for
    // the request that trips it.
    let request = Packet::new(12, LIMITED, PacketType::Binary, Bytes::new()).unwrap();
    write_packet(&mut stream, &request).await;
    expect_eof(&mut stream).await;
}

#[tokio::test]
async fn e4_permission_denied_keeps_connection_open() {
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;
    login(&mut stream).await;

    let request = Packet::new(3, ADMIN_ONLY, PacketType::Binary, Bytes::new()).unwrap();
    write_packet(&mut stream, &request).await;
    let response = read_packet(&mut stream).await.unwrap();
    assert_eq!(response.header().packet_type(), Some(PacketType::String));
    assert!(String::from_utf8_lossy(response.payload()).contains("permission denied"));

    // The connection must still be alive and serving the connection's
    // existing User-level access.
    let echo = Packet::new(4, ECHO, PacketType::Binary, Bytes::from_static(b"still here")).unwrap();
    write_packet(&mut stream, &echo).await;
    let echoed = read_packet(&mut stream).await.unwrap();
    assert_eq!(echoed.payload().as_ref(), b"still here");
}

#[tokio::test]
async fn e5_bad_checksum_closes_with_protocol_violation() {
    let addr = start_server(ServerConfig::default()).await;
    let mut stream = connect(addr).await;

    let packet = Packet::new(5, ECHO, PacketType::Binary, Bytes::from_static(&[1, 2, 3, 4])).unwrap();
    let mut bytes = packet.serialize().unwrap().to_vec();
    // Byte 22 is the first payload byte (the 22-byte header ends there);
    // flipping it invalidates the checksum without touching framing
    // fields.
    bytes[PacketHeader::SIZE] ^= 0xFF;
    stream.write_all(&bytes).await.unwrap();

    expect_eof(&mut stream).await;
}

#[tokio::test]
async fn e6_ip_connection_cap() {
    use packetflow_server::AdmissionConfig;

    let config = ServerConfig { admission: AdmissionConfig { max_connections_per_ip: 2, ..AdmissionConfig::default() }, ..ServerConfig::default() };
    let addr = start_server(config).await;

    let _first = connect(addr).await;
    let mut second = connect(addr).await;

    // Give the accept loop a moment to run its admission check for each.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut third = connect(addr).await;
    expect_eof(&mut third).await;

    // Releasing one of the first two should free a slot for a new
    // connection.
    drop(second.shutdown().await);
    drop(second);

    let mut retried = None;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut candidate = connect(addr).await;
        login(&mut candidate).await;
        let probe = Packet::new(6, ECHO, PacketType::Binary, Bytes::from_static(b"x")).unwrap();
        write_packet(&mut candidate, &probe).await;
        match timeout(Duration::from_millis(100), read_packet(&mut candidate)).await {
            Ok(Some(response)) => {
                assert_eq!(response.payload().as_ref(), b"x");
                retried = Some(());
                break;
            },
            _ => continue,
        }
    }
    assert!(retried.is_some(), "expected a new connection to be admitted after a release");
}
