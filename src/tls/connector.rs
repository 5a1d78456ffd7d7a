//! Connection establishment
//!
//! Opens the TCP connection for a request and layers a `TlsSocket` over it.
//! With a deadline, each attempt uses socket2's native `connect_timeout`, so
//! no watcher thread is needed: the attempt either connects, fails, or times
//! out, and a socket that did not connect is closed before returning.

use super::config::ConnectionParams;
use super::context::TlsContext;
use super::socket::TlsSocket;
use super::{Error, Result};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    host: String,
    port: u16,
    local: Option<SocketAddr>,
    params: ConnectionParams,
}

impl ConnectionRequest {
    /// Request a connection to `host:port`
    ///
    /// Rejects an empty host or a zero port before anything touches the network.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::Argument("Host may not be empty".to_string()));
        }
        if port == 0 {
            return Err(Error::Argument("Port may not be zero".to_string()));
        }
        Ok(ConnectionRequest {
            host,
            port,
            local: None,
            params: ConnectionParams::default(),
        })
    }

    /// Bind to this local address before connecting
    pub fn local_addr(mut self, local: Option<SocketAddr>) -> Self {
        self.local = local;
        self
    }

    /// Replace the connection parameters
    pub fn params(mut self, params: ConnectionParams) -> Self {
        self.params = params;
        self
    }

    /// Connect deadline; zero clears it
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.params.connect_timeout = deadline;
        self
    }

    /// Host name or address literal to connect to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// Produces TLS sockets from a shared context
#[derive(Debug, Clone)]
pub struct Connector {
    context: Arc<TlsContext>,
}

impl Connector {
    /// Connector sharing `context`
    pub fn new(context: Arc<TlsContext>) -> Self {
        Connector { context }
    }

    /// The shared TLS context
    pub fn context(&self) -> &TlsContext {
        &self.context
    }

    /// Connect and wrap in TLS; the handshake runs on first I/O
    pub fn connect(&self, request: &ConnectionRequest) -> Result<TlsSocket> {
        let tcp_stream = self.connect_tcp(request)?;
        apply_params(&tcp_stream, &request.params)?;
        TlsSocket::new(&self.context, tcp_stream, &request.host, true)
    }

    /// Layer TLS over an already connected plain socket
    ///
    /// `socket` is consumed even on failure. A caller that must keep the
    /// connection when the upgrade fails should pass a `try_clone` of it.
    pub fn upgrade(
        &self,
        socket: TcpStream,
        host: &str,
        port: u16,
        auto_close: bool,
    ) -> Result<TlsSocket> {
        if host.trim().is_empty() {
            return Err(Error::Argument("Host may not be empty".to_string()));
        }
        log::debug!("Upgrading connection to {}:{} (auto close {})", host, port, auto_close);
        TlsSocket::new(&self.context, socket, host, auto_close)
    }

    fn connect_tcp(&self, request: &ConnectionRequest) -> Result<TcpStream> {
        let addrs = resolve(&request.host, request.port)?;
        let deadline = request.params.deadline();
        let started = Instant::now();
        let mut last_error = None;

        for addr in addrs {
            if let Some(local) = request.local {
                if local.is_ipv4() != addr.is_ipv4() {
                    continue;
                }
            }

            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            if let Some(local) = request.local {
                socket.bind(&SockAddr::from(local))?;
            }

            let result = match deadline {
                None => {
                    log::debug!("Connecting to {}", addr);
                    socket.connect(&SockAddr::from(addr))
                }
                Some(limit) => {
                    let remaining = limit
                        .checked_sub(started.elapsed())
                        .filter(|d| !d.is_zero())
                        .ok_or(Error::Timeout(limit))?;
                    log::debug!("Connecting to {} within {:?}", addr, remaining);
                    socket.connect_timeout(&SockAddr::from(addr), remaining)
                }
            };

            match result {
                Ok(()) => return Ok(socket.into()),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    if let Some(limit) = deadline {
                        log::debug!("Connect to {} timed out after {:?}", addr, limit);
                        return Err(Error::Timeout(limit));
                    }
                    last_error = Some(e);
                }
                Err(e) => {
                    log::debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::Io(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                "no remote address matches the local bind address family",
            )
        })))
    }
}

fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>> {
    let unresolved = |source| Error::UnresolvedHost {
        host: host.to_string(),
        source,
    };
    let addrs: Vec<SocketAddr> = (host, port).to_socket_addrs().map_err(unresolved)?.collect();
    if addrs.is_empty() {
        return Err(unresolved(io::Error::new(
            io::ErrorKind::NotFound,
            "host resolved to no addresses",
        )));
    }
    Ok(addrs)
}

fn apply_params(stream: &TcpStream, params: &ConnectionParams) -> Result<()> {
    if params.tcp_nodelay {
        stream.set_nodelay(true)?;
    }
    stream.set_read_timeout(params.read_timeout)?;
    stream.set_write_timeout(params.write_timeout)?;
    Ok(())
}
