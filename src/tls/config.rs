//! Protocol and connection configuration
//!
//! This module provides the protocol pinning policy applied to every context
//! and socket, and the per-connection parameters accepted by the factory.

use super::Error;
use openssl::ssl::SslVersion;
use std::str::FromStr;
use std::time::Duration;

/// TLS version
///
/// A context is pinned to exactly one version: it is used as both the minimum
/// and the maximum protocol version, on the context and again on each socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// SSL 3.0 (deprecated, usually compiled out of OpenSSL)
    Ssl3,
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// All versions, oldest first
    pub const ALL: [TlsVersion; 5] = [
        TlsVersion::Ssl3,
        TlsVersion::Tls10,
        TlsVersion::Tls11,
        TlsVersion::Tls12,
        TlsVersion::Tls13,
    ];

    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Ssl3 => SslVersion::SSL3,
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Map an OpenSSL protocol version back, if it is one we know
    pub fn from_openssl_version(version: SslVersion) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|v| v.to_openssl_version() == version)
    }

    /// Get version as string
    pub fn as_str(self) -> &'static str {
        match self {
            TlsVersion::Ssl3 => "SSLv3",
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl Default for TlsVersion {
    fn default() -> Self {
        TlsVersion::Tls12
    }
}

impl FromStr for TlsVersion {
    type Err = Error;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SSLV3" | "SSL3" => Ok(TlsVersion::Ssl3),
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(Error::Configuration(format!("invalid TLS version: {}", s))),
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection parameters
///
/// `connect_timeout` of zero means "no deadline": the connect blocks until the
/// operating system gives up on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionParams {
    /// Deadline for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Read timeout applied to the socket once connected
    pub read_timeout: Option<Duration>,
    /// Write timeout applied to the socket once connected
    pub write_timeout: Option<Duration>,
    /// Disable Nagle's algorithm
    pub tcp_nodelay: bool,
}

impl ConnectionParams {
    /// Parameters with the given connect deadline and nothing else set
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        ConnectionParams {
            connect_timeout,
            ..Default::default()
        }
    }

    /// Set the read timeout
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Enable/disable TCP_NODELAY
    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    /// The connect deadline, `None` when zero
    pub fn deadline(&self) -> Option<Duration> {
        Some(self.connect_timeout).filter(|d| !d.is_zero())
    }
}
