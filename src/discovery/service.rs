//! tonic service plumbing for the discovery proxy.
//!
//! [`DiscoveryService`] accepts every call addressed to the discovery gRPC
//! service and hands it, undecoded, to a [`StreamHandler`]. [`Forwarder`] is
//! the handler that relays calls to the control plane.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use tonic::body::BoxBody;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::codegen::{http, Body, BoxFuture, Context, Poll, Service, StdError};
use tonic::server::{NamedService, StreamingService};
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, warn};

use super::codec::RawCodec;
use super::director::{Director, SERVICE_NAME};
use super::liveness;
use crate::metrics::{self, SharedSink};

/// Stream of raw response frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Bytes, Status>> + Send + 'static>>;

/// Handles one streaming call on the discovery service.
#[async_trait]
pub trait StreamHandler: Send + Sync + 'static {
    /// Handle a call to `path` (e.g. `/pkg.Service/Method`).
    async fn handle(
        &self,
        path: &str,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<FrameStream>, Status>;
}

/// Streaming gRPC service dispatching every method to a handler.
#[derive(Debug)]
pub struct DiscoveryService<H> {
    handler: Arc<H>,
}

impl<H> DiscoveryService<H> {
    /// Wrap a handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<H> Clone for DiscoveryService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H> NamedService for DiscoveryService<H> {
    const NAME: &'static str = SERVICE_NAME;
}

impl<H, B> Service<http::Request<B>> for DiscoveryService<H>
where
    H: StreamHandler,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let method = Method {
            handler: Arc::clone(&self.handler),
            path: req.uri().path().to_string(),
        };
        Box::pin(async move {
            let mut grpc = tonic::server::Grpc::new(RawCodec);
            Ok(grpc.streaming(method, req).await)
        })
    }
}

/// A single call bound to its path.
struct Method<H> {
    handler: Arc<H>,
    path: String,
}

impl<H: StreamHandler> StreamingService<Bytes> for Method<H> {
    type Response = Bytes;
    type ResponseStream = FrameStream;
    type Future = BoxFuture<Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<Bytes>>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let path = std::mem::take(&mut self.path);
        Box::pin(async move { handler.handle(&path, request).await })
    }
}

/// Relays permitted calls to the control plane.
#[derive(Clone)]
pub struct Forwarder {
    director: Director<Channel>,
    sink: SharedSink,
}

impl Forwarder {
    /// Create a forwarder routing through `director`.
    pub fn new(director: Director<Channel>, sink: SharedSink) -> Self {
        Self { director, sink }
    }
}

#[async_trait]
impl StreamHandler for Forwarder {
    async fn handle(
        &self,
        path: &str,
        request: Request<Streaming<Bytes>>,
    ) -> Result<Response<FrameStream>, Status> {
        let route = self.director.route(path, request.metadata()).inspect_err(|status| {
            warn!(path, message = %status.message(), "refusing discovery call");
        })?;
        debug!(method = ?route.method, "forwarding discovery stream");

        let (_, _, inbound) = request.into_parts();
        let mut outbound = Request::new(liveness::observe_requests(inbound, self.sink.clone()));
        *outbound.metadata_mut() = route.metadata;

        let mut grpc = tonic::client::Grpc::new(route.target);
        let response = async {
            grpc.ready()
                .await
                .map_err(|e| Status::unavailable(format!("control plane not ready: {}", e)))?;
            grpc.streaming(
                outbound,
                PathAndQuery::from_static(route.method.path()),
                RawCodec,
            )
            .await
        }
        .await
        .inspect_err(|status| {
            metrics::record_discovery_liveness(&*self.sink, false);
            warn!(code = ?status.code(), message = %status.message(), "failed to open upstream discovery stream");
        })?;

        let (metadata, upstream, extensions) = response.into_parts();
        let frames: FrameStream = Box::pin(liveness::observe_responses(upstream, self.sink.clone()));
        Ok(Response::from_parts(metadata, frames, extensions))
    }
}
