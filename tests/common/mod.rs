//! Shared test infrastructure for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use parking_lot::Mutex;

use dataplane::backend::{DnsBackend, Protocol};
use dataplane::metrics::MetricsSink;
use dataplane::Error;

// --- Metrics ---

/// In-memory metrics sink.
#[derive(Debug, Default)]
pub struct TestSink {
    gauges: Mutex<HashMap<&'static str, Vec<f64>>>,
    counters: Mutex<HashMap<&'static str, u64>>,
}

impl TestSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gauge_history(&self, name: &str) -> Vec<f64> {
        self.gauges
            .lock()
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for TestSink {
    fn gauge(&self, name: &'static str, value: f64) {
        self.gauges
            .lock()
            .entry(name)
            .or_default()
            .push(value);
    }

    fn counter(&self, name: &'static str, increment: u64) {
        *self.counters.lock().entry(name).or_default() += increment;
    }
}

// --- DNS backends ---

/// Backend that records every request and answers with a fixed response,
/// or echoes the request when none is set.
#[derive(Default)]
pub struct RecordingBackend {
    response: Option<Bytes>,
    requests: Mutex<Vec<(Bytes, Protocol)>>,
}

impl RecordingBackend {
    pub fn echo() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answering(response: impl Into<Bytes>) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<(Bytes, Protocol)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DnsBackend for RecordingBackend {
    async fn query(&self, msg: Bytes, protocol: Protocol) -> Result<Bytes, Error> {
        self.requests.lock().push((msg.clone(), protocol));
        Ok(self.response.clone().unwrap_or(msg))
    }
}

/// Backend that fails every request.
pub struct FailingBackend;

#[async_trait]
impl DnsBackend for FailingBackend {
    async fn query(&self, _msg: Bytes, _protocol: Protocol) -> Result<Bytes, Error> {
        Err(Error::Status(tonic::Status::unavailable("backend down")))
    }
}

// --- DNS messages ---

/// Build wire-format bytes for a DNS query.
pub fn build_query_bytes(name: &str, record_type: RecordType, id: u16) -> Vec<u8> {
    let mut msg = Message::new();
    msg.set_id(id);
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Query);
    msg.set_recursion_desired(true);
    let mut query = Query::new();
    query.set_name(Name::from_ascii(name).unwrap());
    query.set_query_type(record_type);
    query.set_query_class(DNSClass::IN);
    msg.add_query(query);
    msg.to_vec().unwrap()
}

// --- HTTP fakes ---

pub fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Serve `app` on an ephemeral localhost port for the rest of the test.
pub async fn spawn_http(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test HTTP server");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
