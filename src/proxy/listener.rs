//! TCP listener and the per-connection pipeline.
//!
//! The supervisor accepts connections and spawns one task per connection.
//! Each task peeks the ClientHello, selects a route, dials the backend,
//! writes the PROXY preamble if configured, replays the peeked bytes, and
//! splices. Everything before the splice runs under a single wall-clock
//! deadline; the splice itself is unbounded.
//!
//! A failing connection never disturbs the accept loop or any other
//! connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use super::proxy_protocol;
use super::router::{self, ConnectionKind, RouteError};
use super::sni::{self, ClientHello, PeekError};
use super::splice::{self, SpliceError};
use crate::config::Config;

/// Default maximum concurrent connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4096;

/// Default deadline over peek + route + dial + preamble.
pub const DEFAULT_SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for a proxy listener.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Deadline for reading the ClientHello.
    pub peek_timeout: Duration,
    /// Deadline covering everything before the splice.
    pub setup_timeout: Duration,
}

impl ProxyConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            peek_timeout: sni::DEFAULT_PEEK_TIMEOUT,
            setup_timeout: DEFAULT_SETUP_TIMEOUT,
        }
    }
}

/// Why a single connection was dropped.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Peek(#[from] PeekError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("dial {addr} failed: {source}")]
    Dial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("preamble write failed: {0}")]
    PreambleWrite(io::Error),

    #[error("replay write failed: {0}")]
    ReplayWrite(io::Error),

    #[error("splice failed: {0}")]
    Splice(io::Error),

    #[error("setup deadline exceeded")]
    SetupTimeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The proxy supervisor: a bound listener plus the shared route table.
pub struct Proxy {
    config: ProxyConfig,
    listener: TcpListener,
    routes: Arc<Config>,
    conn_semaphore: Arc<Semaphore>,
}

impl Proxy {
    /// Bind the listening socket.
    pub async fn bind(config: ProxyConfig, routes: Arc<Config>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!(
            bind_addr = %listener.local_addr()?,
            routes = routes.routes.len(),
            max_connections = config.max_connections,
            "listener bound"
        );
        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
            routes,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until a fatal listener error.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(peer_addr = %peer_addr, "connection rejected: at capacity");
                            continue;
                        }
                    };

                    let proxy = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            if let Err(e) = proxy.handle(stream, peer_addr).await {
                                log_conn_error(&e);
                            }
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) if is_transient(&e) => {
                    warn!(error = %e, "transient accept error");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                    return Err(e);
                }
            }
        }
    }

    /// Run one connection to completion.
    async fn handle(&self, mut client: TcpStream, peer_addr: SocketAddr) -> Result<(), ConnError> {
        let peer_addr = canonical(peer_addr);
        let local_addr = canonical(client.local_addr()?);

        let (mut backend, hello) = timeout(
            self.config.setup_timeout,
            self.connect_backend(&mut client, peer_addr, local_addr),
        )
        .await
        .map_err(|_| ConnError::SetupTimeout)??;

        // No time bound from here on; the peers decide when to stop.
        let (to_backend, to_client) = splice::splice(&mut client, &mut backend, &hello.raw)
            .await
            .map_err(|e| match e {
                SpliceError::Prelude(e) => ConnError::ReplayWrite(e),
                SpliceError::Io(e) => ConnError::Splice(e),
            })?;

        debug!(to_backend, to_client, "connection closed");
        Ok(())
    }

    /// Peek, route, dial, and write the preamble.
    async fn connect_backend(
        &self,
        client: &mut TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> Result<(TcpStream, ClientHello), ConnError> {
        let hello = sni::peek_client_hello(client, self.config.peek_timeout).await?;

        let matched = router::select(
            &self.routes,
            &hello.host,
            peer_addr.ip(),
            ConnectionKind::Tls,
        )?;

        let mut backend = TcpStream::connect(matched.backend.addr.as_str())
            .await
            .map_err(|source| ConnError::Dial {
                addr: matched.backend.addr.clone(),
                source,
            })?;

        let preamble = proxy_protocol::preamble(matched.backend.send_proxy, peer_addr, local_addr);
        if !preamble.is_empty() {
            backend
                .write_all(&preamble)
                .await
                .map_err(ConnError::PreambleWrite)?;
        }

        debug!(host = %hello.host, backend = %matched.backend.addr, "backend connected");
        Ok((backend, hello))
    }
}

/// Unmap IPv4-mapped IPv6 addresses so ACLs and PROXY preambles see the
/// real address family on a dual-stack listener.
fn canonical(addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(addr.ip().to_canonical(), addr.port())
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::Interrupted
    )
}

fn log_conn_error(e: &ConnError) {
    match e {
        ConnError::Peek(_) | ConnError::SetupTimeout => debug!(error = %e, "connection dropped"),
        ConnError::Route(RouteError::NoRoute { .. }) => info!(error = %e, "connection refused"),
        ConnError::Route(RouteError::Forbidden { .. }) => warn!(error = %e, "connection refused"),
        _ => warn!(error = %e, "connection failed"),
    }
}
