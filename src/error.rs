//! Error types for the dataplane sidecar.

use thiserror::Error;

/// Errors that can occur in any of the sidecar's servers.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener or socket could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address (or socket path) that was requested.
        addr: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The DNS proxy is administratively disabled (negative port).
    #[error("DNS server disabled")]
    DnsDisabled,

    /// A DNS message does not fit the 16-bit TCP length prefix.
    #[error("DNS message of {0} bytes exceeds the 65535 byte TCP limit")]
    MessageTooLarge(usize),

    /// gRPC call returned a non-OK status.
    #[error("gRPC status: {0}")]
    Status(#[from] tonic::Status),

    /// gRPC transport error.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// HTTP client error.
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// An upstream scrape or admin call failed.
    #[error("request to {url} failed: {reason}")]
    Upstream {
        /// URL that was requested.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The control-plane token cannot be carried in gRPC metadata.
    #[error("invalid token: not representable as ASCII metadata")]
    InvalidToken,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn bind(addr: impl ToString, source: std::io::Error) -> Self {
        Error::Bind {
            addr: addr.to_string(),
            source,
        }
    }
}
