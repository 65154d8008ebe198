//! The shared connection to the control plane.

use tonic::metadata::{Ascii, MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint};
use tracing::info;

use crate::config::ControlPlaneConfig;
use crate::error::Error;

/// Metadata key carrying the control-plane token on every forwarded call.
pub const TOKEN_METADATA_KEY: &str = "x-dataplane-token";

/// Bearer token in its wire form.
#[derive(Debug, Clone)]
pub struct Token(MetadataValue<Ascii>);

impl Token {
    /// Validate a token for use as gRPC metadata.
    pub fn new(token: &str) -> Result<Self, Error> {
        MetadataValue::try_from(token)
            .map(Self)
            .map_err(|_| Error::InvalidToken)
    }

    /// Set the token on `metadata`, replacing any value the caller sent.
    pub fn inject(&self, metadata: &mut MetadataMap) {
        metadata.insert(TOKEN_METADATA_KEY, self.0.clone());
    }
}

/// An established channel to the control plane plus the token to present.
///
/// Created once at startup and shared read-only by every component that
/// talks to the control plane.
#[derive(Debug, Clone)]
pub struct Upstream {
    channel: Channel,
    token: Token,
}

impl Upstream {
    /// Wrap an existing channel.
    pub fn new(channel: Channel, token: Token) -> Self {
        Self { channel, token }
    }

    /// Connect to the configured control plane.
    pub async fn connect(config: &ControlPlaneConfig) -> Result<Self, Error> {
        let token = Token::new(&config.token)?;
        let channel = Endpoint::from_shared(config.addr.clone())?
            .connect()
            .await?;
        info!(addr = %config.addr, "connected to control plane");
        Ok(Self::new(channel, token))
    }

    /// The underlying gRPC channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The token presented on every call.
    pub fn token(&self) -> &Token {
        &self.token
    }
}
