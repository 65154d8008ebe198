//! DNS proxy: terminates client queries over UDP and TCP and answers them
//! through a [`DnsBackend`].
//!
//! UDP datagrams are relayed unframed, one task per datagram. TCP
//! connections get one task each and are served strictly in order: a
//! request is answered before the next one is read.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::backend::{DnsBackend, Protocol};
use crate::config::DnsProxyConfig;
use crate::error::Error;
use crate::metrics::{self, RequestResult, SharedSink};
use crate::wire::{self, MAX_TCP_MESSAGE_SIZE, UDP_BUFFER_SIZE};

/// Port reported by the accessors when the proxy is disabled.
pub const DISABLED_PORT: i32 = -1;

/// How long the UDP loop waits for a datagram before re-checking for stop.
const UDP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a TCP connection may idle between messages before re-checking
/// for stop. A message that has started must also complete within it.
const TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// DNS proxy serving UDP and TCP on the same address and port.
pub struct DnsProxy {
    config: DnsProxyConfig,
    exchange: Arc<Exchange>,
    stop_tx: Arc<watch::Sender<bool>>,
    udp_addr: Option<SocketAddr>,
    tcp_addr: Option<SocketAddr>,
}

impl DnsProxy {
    /// Create a proxy. Nothing is bound until [`DnsProxy::run`].
    pub fn new(config: DnsProxyConfig, backend: Arc<dyn DnsBackend>, sink: SharedSink) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            exchange: Arc::new(Exchange { backend, sink }),
            stop_tx: Arc::new(stop_tx),
            udp_addr: None,
            tcp_addr: None,
        }
    }

    /// Whether the configuration disables the proxy.
    pub fn is_disabled(&self) -> bool {
        self.config.port < 0
    }

    /// Bind both sockets and start the UDP and TCP loops.
    ///
    /// Returns [`Error::DnsDisabled`] without binding anything if the port is
    /// negative. With port `0` the TCP listener reuses the port the OS
    /// assigned to the UDP socket.
    pub async fn run(&mut self) -> Result<(), Error> {
        if self.is_disabled() {
            return Err(Error::DnsDisabled);
        }
        if self.udp_addr.is_some() {
            return Err(Error::Config("DNS proxy is already running".to_string()));
        }
        let port = u16::try_from(self.config.port)
            .map_err(|_| Error::Config(format!("invalid DNS port {}", self.config.port)))?;

        let addr = SocketAddr::new(self.config.bind_addr, port);
        let udp = UdpSocket::bind(addr)
            .await
            .map_err(|e| Error::bind(addr, e))?;
        let udp_addr = udp.local_addr()?;

        let addr = SocketAddr::new(self.config.bind_addr, udp_addr.port());
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::bind(addr, e))?;
        let tcp_addr = tcp.local_addr()?;

        self.udp_addr = Some(udp_addr);
        self.tcp_addr = Some(tcp_addr);

        info!(addr = %udp_addr, "DNS UDP listening");
        info!(addr = %tcp_addr, "DNS TCP listening");

        tokio::spawn(proxy_udp(
            Arc::new(udp),
            Arc::clone(&self.exchange),
            self.stop_tx.subscribe(),
        ));
        tokio::spawn(proxy_tcp(
            tcp,
            Arc::clone(&self.exchange),
            self.stop_tx.subscribe(),
        ));

        Ok(())
    }

    /// Signal both loops to stop. Sockets are released as the loops exit.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("stopping DNS proxy");
        }
    }

    /// Stop the proxy once `shutdown` resolves.
    pub fn stop_on<F>(&self, shutdown: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let stop_tx = Arc::clone(&self.stop_tx);
        tokio::spawn(async move {
            shutdown.await;
            if !stop_tx.send_replace(true) {
                info!("stopping DNS proxy");
            }
        });
    }

    /// UDP port: bound port once running, [`DISABLED_PORT`] when disabled.
    pub fn udp_port(&self) -> i32 {
        self.port_of(self.udp_addr)
    }

    /// TCP port: bound port once running, [`DISABLED_PORT`] when disabled.
    pub fn tcp_port(&self) -> i32 {
        self.port_of(self.tcp_addr)
    }

    fn port_of(&self, bound: Option<SocketAddr>) -> i32 {
        if self.is_disabled() {
            return DISABLED_PORT;
        }
        bound.map_or(self.config.port, |addr| i32::from(addr.port()))
    }
}

/// Everything a single exchange needs.
struct Exchange {
    backend: Arc<dyn DnsBackend>,
    sink: SharedSink,
}

impl Exchange {
    /// Answer one datagram. Errors are logged and the exchange dropped.
    async fn answer_udp(&self, socket: &UdpSocket, msg: Bytes, src: SocketAddr) {
        let result = match self.backend.query(msg, Protocol::Udp).await {
            Ok(response) => {
                if !wire::fits_udp_buffer(response.len()) {
                    debug!(src = %src, len = response.len(), "sending oversized UDP response as-is");
                }
                socket.send_to(&response, src).await.map(|_| ()).map_err(Error::from)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => metrics::record_dns_request(&*self.sink, RequestResult::Success),
            Err(e) => {
                warn!(src = %src, error = %e, "DNS UDP exchange failed");
                metrics::record_dns_request(&*self.sink, RequestResult::Failed);
            }
        }
    }

    /// Answer one TCP message. Returns false if the connection must close.
    async fn answer_tcp<W>(&self, writer: &mut W, msg: Bytes, peer: SocketAddr) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        let response = match self.backend.query(msg, Protocol::Tcp).await {
            Ok(response) => response,
            Err(e) => {
                warn!(peer = %peer, error = %e, "DNS TCP backend query failed");
                metrics::record_dns_request(&*self.sink, RequestResult::Failed);
                return false;
            }
        };

        if response.len() > MAX_TCP_MESSAGE_SIZE {
            warn!(peer = %peer, len = response.len(), "DNS response too large for TCP, closing connection");
            metrics::record_dns_request(&*self.sink, RequestResult::Failed);
            return false;
        }

        match wire::write_message(writer, &response).await {
            Ok(()) => {
                metrics::record_dns_request(&*self.sink, RequestResult::Success);
                true
            }
            Err(e) => {
                warn!(peer = %peer, error = %e, "failed to write DNS TCP response");
                metrics::record_dns_request(&*self.sink, RequestResult::Failed);
                false
            }
        }
    }
}

/// Receive datagrams until stopped, answering each on its own task.
async fn proxy_udp(socket: Arc<UdpSocket>, exchange: Arc<Exchange>, mut stop: watch::Receiver<bool>) {
    let mut buf = [0u8; UDP_BUFFER_SIZE];

    while !*stop.borrow() {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            received = timeout(UDP_IDLE_TIMEOUT, socket.recv_from(&mut buf)) => match received {
                // idle: loop around and re-check for stop
                Err(_) => {}
                Ok(Ok((len, src))) => {
                    debug!(src = %src, len, "DNS UDP request");
                    let msg = Bytes::copy_from_slice(&buf[..len]);
                    let socket = Arc::clone(&socket);
                    let exchange = Arc::clone(&exchange);
                    tokio::spawn(async move {
                        exchange.answer_udp(&socket, msg, src).await;
                    });
                }
                Ok(Err(e)) if is_transient(&e) => {
                    debug!(error = %e, "transient DNS UDP receive error");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "DNS UDP receive failed, stopping UDP loop");
                    break;
                }
            }
        }
    }

    info!("DNS UDP proxy stopped");
}

/// Accept connections until stopped, serving each on its own task.
async fn proxy_tcp(listener: TcpListener, exchange: Arc<Exchange>, mut stop: watch::Receiver<bool>) {
    while !*stop.borrow() {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "DNS TCP connection accepted");
                    tokio::spawn(handle_tcp(stream, peer, Arc::clone(&exchange), stop.clone()));
                }
                Err(e) => {
                    warn!(error = %e, "DNS TCP accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    info!("DNS TCP proxy stopped");
}

/// Serve length-prefixed requests on one connection until it closes,
/// fails, or the proxy stops.
async fn handle_tcp(
    stream: TcpStream,
    peer: SocketAddr,
    exchange: Arc<Exchange>,
    mut stop: watch::Receiver<bool>,
) {
    let mut stream = BufReader::new(stream);

    while !*stop.borrow() {
        // Wait for the next message to start arriving without consuming it.
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            ready = timeout(TCP_IDLE_TIMEOUT, stream.fill_buf()) => match ready {
                Err(_) => continue,
                Ok(Ok(buf)) if buf.is_empty() => {
                    debug!(peer = %peer, "DNS TCP connection closed by client");
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "DNS TCP read failed");
                    break;
                }
            }
        }

        // Once a message has started, the rest must arrive within the
        // deadline; a stop closes the connection mid-message.
        let msg = tokio::select! {
            _ = stop.changed() => {
                debug!(peer = %peer, "DNS proxy stopping, closing connection mid-message");
                break;
            }
            read = timeout(TCP_IDLE_TIMEOUT, wire::read_message(&mut stream)) => match read {
                Err(_) => {
                    debug!(peer = %peer, "DNS TCP message not completed in time, closing connection");
                    break;
                }
                Ok(Ok(msg)) => msg,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    debug!(peer = %peer, "DNS TCP connection closed mid-message");
                    break;
                }
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "DNS TCP read failed");
                    break;
                }
            }
        };

        debug!(peer = %peer, len = msg.len(), "DNS TCP request");
        if !exchange.answer_tcp(&mut stream, msg, peer).await {
            break;
        }
    }
}

fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionRefused
    )
}
