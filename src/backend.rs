//! Backend for DNS exchanges: raw request bytes in, raw response bytes out.

use async_trait::async_trait;
use bytes::Bytes;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::Status;

use crate::error::Error;
use crate::upstream::Upstream;

/// Transport the client used to send a DNS request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Protocol {
    /// Not specified.
    Unset = 0,
    /// DNS over TCP.
    Tcp = 1,
    /// DNS over UDP.
    Udp = 2,
}

/// Resolves one DNS exchange.
///
/// The request is a complete wire-format DNS message without any TCP
/// length prefix; so is the response.
#[async_trait]
pub trait DnsBackend: Send + Sync + 'static {
    /// Answer a single DNS request.
    async fn query(&self, msg: Bytes, protocol: Protocol) -> Result<Bytes, Error>;
}

/// Request message of the control plane's DNS query RPC.
#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryRequest {
    /// Wire-format DNS request.
    #[prost(bytes = "bytes", tag = "1")]
    pub msg: Bytes,
    /// Transport the request arrived on.
    #[prost(enumeration = "Protocol", tag = "2")]
    pub protocol: i32,
}

/// Response message of the control plane's DNS query RPC.
#[derive(Clone, PartialEq, prost::Message)]
pub struct QueryResponse {
    /// Wire-format DNS response.
    #[prost(bytes = "bytes", tag = "1")]
    pub msg: Bytes,
}

/// Fully-qualified method of the control plane's DNS query RPC.
pub const QUERY_PATH: &str = "/dataplane.dns.v1.DNSService/Query";

/// DNS backend calling the control plane over the shared upstream channel.
#[derive(Debug, Clone)]
pub struct GrpcDnsBackend {
    upstream: Upstream,
}

impl GrpcDnsBackend {
    /// Create a backend on the given upstream connection.
    pub fn new(upstream: Upstream) -> Self {
        Self { upstream }
    }
}

#[async_trait]
impl DnsBackend for GrpcDnsBackend {
    async fn query(&self, msg: Bytes, protocol: Protocol) -> Result<Bytes, Error> {
        let mut grpc = tonic::client::Grpc::new(self.upstream.channel().clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("control plane not ready: {}", e)))?;

        let mut request = tonic::Request::new(QueryRequest {
            msg,
            protocol: protocol as i32,
        });
        self.upstream.token().inject(request.metadata_mut());

        let codec: ProstCodec<QueryRequest, QueryResponse> = ProstCodec::default();
        let response = grpc
            .unary(request, PathAndQuery::from_static(QUERY_PATH), codec)
            .await?;

        Ok(response.into_inner().msg)
    }
}
