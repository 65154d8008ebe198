//! Routing decisions for incoming discovery calls.

use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::upstream::Token;

/// gRPC service hosting the permitted discovery methods.
pub const SERVICE_NAME: &str = "envoy.service.discovery.v3.AggregatedDiscoveryService";

/// Methods the proxy is willing to forward.
///
/// Paths are matched exactly; anything else is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryMethod {
    /// State-of-the-world aggregated discovery stream.
    StreamAggregatedResources,
}

impl DiscoveryMethod {
    /// Every permitted method.
    pub const ALL: &'static [DiscoveryMethod] = &[DiscoveryMethod::StreamAggregatedResources];

    /// Fully-qualified gRPC path.
    pub fn path(self) -> &'static str {
        match self {
            DiscoveryMethod::StreamAggregatedResources => {
                "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources"
            }
        }
    }

    /// Look up a permitted method by its exact path.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.path() == path)
    }
}

/// Where and how to forward one call.
#[derive(Debug, Clone)]
pub struct Route<C> {
    /// The permitted method being called.
    pub method: DiscoveryMethod,
    /// Outgoing metadata: the caller's, plus the token.
    pub metadata: MetadataMap,
    /// Connection to forward on.
    pub target: C,
}

/// Decides the destination and credentials of each proxied call.
///
/// Holds no mutable state and never blocks.
#[derive(Debug, Clone)]
pub struct Director<C> {
    target: C,
    token: Token,
}

impl<C: Clone> Director<C> {
    /// Create a director forwarding every permitted call to `target`.
    pub fn new(target: C, token: Token) -> Self {
        Self { target, token }
    }

    /// Route a call to `path` carrying `inbound` metadata.
    pub fn route(&self, path: &str, inbound: &MetadataMap) -> Result<Route<C>, Status> {
        let method = DiscoveryMethod::from_path(path)
            .ok_or_else(|| Status::unimplemented(format!("unknown method {}", path)))?;

        let mut metadata = inbound.clone();
        self.token.inject(&mut metadata);

        Ok(Route {
            method,
            metadata,
            target: self.target.clone(),
        })
    }
}
