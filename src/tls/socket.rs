//! Connected TLS sockets
//!
//! A `TlsSocket` is handed out before the handshake has run. The handshake
//! happens on the first read or write, or when `handshake()` is called.

use super::cert::{peer_chain, CertInfo};
use super::config::TlsVersion;
use super::context::TlsContext;
use super::{Error, Result};
use openssl::ssl::{ErrorCode, SslStream};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Client TLS socket over TCP
pub struct TlsSocket {
    stream: SslStream<TcpStream>,
    protocol: TlsVersion,
    // Kept open after `close()` when the TLS layer does not own the connection
    plain: Option<TcpStream>,
    handshaken: bool,
}

impl TlsSocket {
    /// Layer TLS over a connected TCP stream
    ///
    /// With `auto_close` unset, closing the TLS layer hands the plain
    /// connection back instead of shutting it down. The SSL state is set up
    /// before the stream is touched; if anything fails the stream is dropped.
    pub(crate) fn new(
        context: &TlsContext,
        tcp_stream: TcpStream,
        host: &str,
        auto_close: bool,
    ) -> Result<Self> {
        let ssl = context.new_ssl(host)?;
        let plain = if auto_close {
            None
        } else {
            Some(tcp_stream.try_clone()?)
        };
        let stream = SslStream::new(ssl, tcp_stream)?;

        Ok(TlsSocket {
            stream,
            protocol: context.protocol(),
            plain,
            handshaken: false,
        })
    }

    /// Run the handshake now instead of on first I/O
    pub fn handshake(&mut self) -> Result<()> {
        if self.handshaken {
            return Ok(());
        }
        match self.stream.do_handshake() {
            Ok(()) => {
                self.handshaken = true;
                Ok(())
            }
            Err(e) => {
                let verify = self.stream.ssl().verify_result();
                Err(Error::Handshake {
                    reason: e.to_string(),
                    verify: verify.error_string().to_string(),
                })
            }
        }
    }

    /// Protocol versions this socket will offer
    ///
    /// Always the single version the context pins; it is set on the engine
    /// as both minimum and maximum, so a server that cannot speak it fails
    /// the handshake.
    pub fn enabled_protocols(&self) -> &[TlsVersion] {
        std::slice::from_ref(&self.protocol)
    }

    /// The pinned protocol version
    pub fn protocol(&self) -> TlsVersion {
        self.protocol
    }

    /// Negotiated version string, `None` before the handshake
    pub fn negotiated_version(&self) -> Option<&'static str> {
        self.handshaken.then(|| self.stream.ssl().version_str())
    }

    /// Certificates the server presented (leaf first)
    pub fn peer_certificates(&self) -> Vec<CertInfo> {
        peer_chain(self.stream.ssl())
    }

    /// Whether closing this socket also closes the TCP connection
    pub fn auto_close(&self) -> bool {
        self.plain.is_none()
    }

    /// Remote address of the TCP connection
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().peer_addr()
    }

    /// Local address of the TCP connection
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.get_ref().local_addr()
    }

    /// Read timeout of the TCP connection
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_read_timeout(timeout)
    }

    /// Write timeout of the TCP connection
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.get_ref().set_write_timeout(timeout)
    }

    /// Get reference to underlying TCP stream
    pub fn get_ref(&self) -> &TcpStream {
        self.stream.get_ref()
    }

    /// Close the TLS layer
    ///
    /// Sends close_notify when a session is up. Returns the still-open plain
    /// connection when the socket was created without `auto_close`, otherwise
    /// shuts the TCP connection down and returns `None`.
    pub fn close(mut self) -> Result<Option<TcpStream>> {
        if self.handshaken {
            match self.stream.shutdown() {
                Ok(_) => {}
                Err(e) if e.code() == ErrorCode::ZERO_RETURN => {}
                Err(e) => log::debug!("TLS shutdown failed: {}", e),
            }
        }

        if let Some(plain) = self.plain.take() {
            return Ok(Some(plain));
        }

        match self.stream.get_mut().shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::Io(e)),
            _ => Ok(None),
        }
    }
}

impl Read for TlsSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.stream.read(buf)?;
        self.handshaken = true;
        Ok(n)
    }
}

impl Write for TlsSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.stream.write(buf)?;
        self.handshaken = true;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl std::fmt::Debug for TlsSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSocket")
            .field("peer", &self.peer_addr().ok())
            .field("protocol", &self.protocol)
            .field("handshaken", &self.handshaken)
            .field("auto_close", &self.auto_close())
            .finish()
    }
}
