//! Integration tests for the DNS proxy over real UDP and TCP sockets.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hickory_proto::op::Message;
use hickory_proto::rr::RecordType;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use common::*;
use dataplane::backend::{DnsBackend, Protocol};
use dataplane::config::DnsProxyConfig;
use dataplane::metrics::{DNS_REQUEST_COUNT, DNS_REQUEST_FAILED_COUNT};
use dataplane::{wire, DnsProxy, Error};

/// First request byte asking [`SizedBackend`] for an oversized answer.
const WANT_OVERSIZED: u8 = 0xFF;

/// Answers 65536 bytes when the request starts with [`WANT_OVERSIZED`],
/// and 50 bytes otherwise.
struct SizedBackend;

#[async_trait]
impl DnsBackend for SizedBackend {
    async fn query(&self, msg: Bytes, _protocol: Protocol) -> Result<Bytes, Error> {
        let len = if msg.first() == Some(&WANT_OVERSIZED) {
            65536
        } else {
            50
        };
        Ok(Bytes::from(vec![0x42; len]))
    }
}

async fn start_proxy(backend: Arc<dyn DnsBackend>, sink: Arc<TestSink>) -> (DnsProxy, SocketAddr) {
    let mut proxy = DnsProxy::new(
        DnsProxyConfig {
            bind_addr: localhost(),
            port: 0,
        },
        backend,
        sink,
    );
    proxy.run().await.expect("DNS proxy failed to start");
    let port = u16::try_from(proxy.udp_port()).unwrap();
    (proxy, SocketAddr::new(localhost(), port))
}

async fn udp_client() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_with_timeout(socket: &UdpSocket, wait: Duration) -> Option<(Vec<u8>, SocketAddr)> {
    let mut buf = vec![0u8; 70000];
    match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
        Ok(Ok((len, from))) => Some((buf[..len].to_vec(), from)),
        _ => None,
    }
}

// ============================================================================
// UDP
// ============================================================================

#[tokio::test]
async fn test_udp_query_is_answered() {
    let backend = RecordingBackend::echo();
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(backend.clone(), sink.clone()).await;

    let query = build_query_bytes("api.service.internal.", RecordType::A, 0x1234);
    let client = udp_client().await;
    client.send_to(&query, addr).await.unwrap();

    let (response, from) = recv_with_timeout(&client, Duration::from_secs(2))
        .await
        .expect("no UDP response");
    assert_eq!(from, addr);
    assert_eq!(response, query);

    let parsed = Message::from_vec(&response).unwrap();
    assert_eq!(parsed.id(), 0x1234);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_ref(), query.as_slice());
    assert_eq!(requests[0].1, Protocol::Udp);

    assert!(eventually(|| sink.counter(DNS_REQUEST_COUNT) == 1).await);
    assert_eq!(sink.counter(DNS_REQUEST_FAILED_COUNT), 0);
    proxy.stop();
}

#[tokio::test]
async fn test_udp_full_buffer_request() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(Arc::new(SizedBackend), sink).await;

    let client = udp_client().await;
    client.send_to(&[0u8; 512], addr).await.unwrap();

    let (response, from) = recv_with_timeout(&client, Duration::from_secs(2))
        .await
        .expect("no UDP response");
    assert_eq!(from, addr);
    assert_eq!(response.len(), 50);
    proxy.stop();
}

#[tokio::test]
async fn test_udp_undeliverable_response_is_dropped() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(Arc::new(SizedBackend), sink.clone()).await;

    let client = udp_client().await;
    client.send_to(&[WANT_OVERSIZED; 16], addr).await.unwrap();
    assert!(
        recv_with_timeout(&client, Duration::from_millis(500))
            .await
            .is_none(),
        "a 65536-byte datagram cannot be delivered"
    );
    assert!(eventually(|| sink.counter(DNS_REQUEST_FAILED_COUNT) == 1).await);

    // The proxy keeps serving.
    client.send_to(&[0u8; 16], addr).await.unwrap();
    let (response, _) = recv_with_timeout(&client, Duration::from_secs(2))
        .await
        .expect("proxy stopped answering");
    assert_eq!(response.len(), 50);
    proxy.stop();
}

#[tokio::test]
async fn test_udp_backend_failure_sends_nothing() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(Arc::new(FailingBackend), sink.clone()).await;

    let client = udp_client().await;
    let query = build_query_bytes("missing.internal.", RecordType::AAAA, 7);
    client.send_to(&query, addr).await.unwrap();

    assert!(recv_with_timeout(&client, Duration::from_millis(300))
        .await
        .is_none());
    assert!(eventually(|| sink.counter(DNS_REQUEST_FAILED_COUNT) == 1).await);
    assert_eq!(sink.counter(DNS_REQUEST_COUNT), 1);
    proxy.stop();
}

// ============================================================================
// TCP
// ============================================================================

#[tokio::test]
async fn test_tcp_query_is_answered_with_length_prefix() {
    let backend = RecordingBackend::echo();
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(backend.clone(), sink.clone()).await;

    let query = build_query_bytes("db.service.internal.", RecordType::SRV, 42);
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&wire::encode_length_prefixed(&query).unwrap())
        .await
        .unwrap();

    let len = stream.read_u16().await.unwrap();
    assert_eq!(len as usize, query.len());
    let mut response = vec![0u8; len as usize];
    stream.read_exact(&mut response).await.unwrap();
    assert_eq!(response, query);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0.as_ref(), query.as_slice(), "prefix must be stripped");
    assert_eq!(requests[0].1, Protocol::Tcp);
    assert!(eventually(|| sink.counter(DNS_REQUEST_COUNT) == 1).await);
    proxy.stop();
}

#[tokio::test]
async fn test_tcp_requests_answered_in_order() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(RecordingBackend::echo(), sink).await;

    let first = build_query_bytes("one.internal.", RecordType::A, 1);
    let second = build_query_bytes("two.internal.", RecordType::A, 2);

    let mut pipelined = Vec::new();
    pipelined.extend_from_slice(&wire::encode_length_prefixed(&first).unwrap());
    pipelined.extend_from_slice(&wire::encode_length_prefixed(&second).unwrap());

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&pipelined).await.unwrap();

    let one = wire::read_message(&mut stream).await.unwrap();
    let two = wire::read_message(&mut stream).await.unwrap();
    assert_eq!(Message::from_vec(&one).unwrap().id(), 1);
    assert_eq!(Message::from_vec(&two).unwrap().id(), 2);
    proxy.stop();
}

#[tokio::test]
async fn test_tcp_oversized_response_closes_connection() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(Arc::new(SizedBackend), sink.clone()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&wire::encode_length_prefixed(&[WANT_OVERSIZED; 12]).unwrap())
        .await
        .unwrap();

    let mut rest = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("connection was not closed");
    match read {
        Ok(n) => assert_eq!(n, 0, "no length prefix may be written"),
        Err(e) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
    }
    assert!(eventually(|| sink.counter(DNS_REQUEST_FAILED_COUNT) == 1).await);
    proxy.stop();
}

#[tokio::test]
async fn test_tcp_backend_failure_closes_connection() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(Arc::new(FailingBackend), sink).await;

    let query = build_query_bytes("missing.internal.", RecordType::A, 9);
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&wire::encode_length_prefixed(&query).unwrap())
        .await
        .unwrap();

    // Closed by the proxy either cleanly or with a reset; no bytes either way.
    let mut rest = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("connection was not closed");
    assert!(rest.is_empty());
    proxy.stop();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_releases_tcp_listener() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(RecordingBackend::echo(), sink).await;
    assert!(TcpStream::connect(addr).await.is_ok());

    proxy.stop();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}

/// Wait for the proxy to close `stream`, returning whatever it sent first.
async fn closed_within(stream: &mut TcpStream, wait: Duration) -> Vec<u8> {
    let mut rest = Vec::new();
    match tokio::time::timeout(wait, stream.read_to_end(&mut rest)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => assert_eq!(e.kind(), std::io::ErrorKind::ConnectionReset),
        Err(_) => panic!("connection still open after {:?}", wait),
    }
    rest
}

#[tokio::test]
async fn test_stop_closes_idle_connection() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(RecordingBackend::echo(), sink).await;

    let query = build_query_bytes("idle.internal.", RecordType::A, 3);
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(&wire::encode_length_prefixed(&query).unwrap())
        .await
        .unwrap();
    wire::read_message(&mut stream).await.unwrap();

    proxy.stop();
    assert!(closed_within(&mut stream, Duration::from_secs(2)).await.is_empty());
}

#[tokio::test]
async fn test_stop_closes_connection_mid_message() {
    let backend = RecordingBackend::echo();
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(backend.clone(), sink).await;

    // Half of a length prefix, then nothing.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0x00]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    proxy.stop();
    assert!(closed_within(&mut stream, Duration::from_secs(2)).await.is_empty());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_stalled_message_hits_read_deadline() {
    let backend = RecordingBackend::echo();
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(backend.clone(), sink).await;

    // A complete prefix announcing 40 bytes, followed by only 3.
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&[0x00, 0x28, 0x01, 0x02, 0x03]).await.unwrap();

    let started = std::time::Instant::now();
    assert!(closed_within(&mut stream, Duration::from_secs(8)).await.is_empty());
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert!(backend.requests().is_empty());
    proxy.stop();
}

#[tokio::test]
async fn test_stop_on_shutdown_future() {
    let sink = TestSink::new();
    let (proxy, addr) = start_proxy(RecordingBackend::echo(), sink).await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    proxy.stop_on(async move {
        let _ = rx.await;
    });
    assert!(TcpStream::connect(addr).await.is_ok());

    tx.send(()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(TcpStream::connect(addr).await.is_err());
}
