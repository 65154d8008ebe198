//! Liveness observation for proxied streams.
//!
//! Every frame that crosses the proxy, in either direction, sets the
//! liveness gauge: 1 when it was received successfully, 0 on any error.
//! A stream that ends, cleanly or by being dropped, also sets it to 0.

use futures::{Stream, StreamExt};
use tonic::Status;
use tracing::debug;

use crate::metrics::{self, SharedSink};

/// Marks the stream dead when the observing stream finishes or is dropped.
struct EndOfStream {
    sink: SharedSink,
}

impl Drop for EndOfStream {
    fn drop(&mut self) {
        metrics::record_discovery_liveness(&*self.sink, false);
    }
}

/// Observe frames sent by the client, ending the stream at the first error.
///
/// The upstream request stream carries plain messages, so an inbound error
/// can only be reported by closing it.
pub fn observe_requests<S, T>(inbound: S, sink: SharedSink) -> impl Stream<Item = T> + Send + 'static
where
    S: Stream<Item = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    async_stream::stream! {
        let _end = EndOfStream { sink: sink.clone() };
        futures::pin_mut!(inbound);
        while let Some(frame) = inbound.next().await {
            match frame {
                Ok(msg) => {
                    metrics::record_discovery_liveness(&*sink, true);
                    yield msg;
                }
                // the end-of-stream guard records the failure
                Err(status) => {
                    debug!(code = ?status.code(), message = %status.message(), "discovery client stream failed");
                    break;
                }
            }
        }
        debug!("discovery client stream ended");
    }
}

/// Observe frames returned by the upstream, passing errors through.
pub fn observe_responses<S, T>(
    upstream: S,
    sink: SharedSink,
) -> impl Stream<Item = Result<T, Status>> + Send + 'static
where
    S: Stream<Item = Result<T, Status>> + Send + 'static,
    T: Send + 'static,
{
    async_stream::stream! {
        let _end = EndOfStream { sink: sink.clone() };
        futures::pin_mut!(upstream);
        while let Some(frame) = upstream.next().await {
            metrics::record_discovery_liveness(&*sink, frame.is_ok());
            if let Err(status) = &frame {
                debug!(code = ?status.code(), message = %status.message(), "discovery upstream stream failed");
            }
            yield frame;
        }
    }
}
