//! TLS client socket factory
//!
//! This module produces encrypted client sockets whose server-certificate
//! trust is decided by caller-supplied trust material, optionally presenting
//! a client certificate when the server asks for one.
//!
//! # Architecture
//!
//! 1. `TrustMaterial` / `IdentityMaterial` carry the trust anchors and the
//!    client identity; `TrustManager` says how trust material takes part
//! 2. `TrustDelegate` wraps each chain validator with an observer hook
//! 3. `ContextBuilder` turns identities and trust managers into an immutable
//!    `TlsContext`, pinned to a single protocol version
//! 4. `Connector` opens the TCP connection (optionally bound locally, with an
//!    optional deadline) and layers a `TlsSocket` on top
//! 5. `TlsSocketFactory` is the public facade implementing `SecureSocketFactory`
//!
//! # Examples
//!
//! ```no_run
//! use authssl::tls::{TlsSocketFactory, TrustMaterial, ConnectionParams, SecureSocketFactory};
//! use std::io::Write;
//! use std::time::Duration;
//!
//! let trust = TrustMaterial::from_pem_file("ca.pem").unwrap();
//! let factory = TlsSocketFactory::from_trust_material(trust).unwrap();
//!
//! let params = ConnectionParams::with_connect_timeout(Duration::from_secs(5));
//! let mut socket = factory
//!     .create_socket_with_params("example.com", 443, None, &params)
//!     .unwrap();
//! socket.handshake().unwrap();
//! socket.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
//! ```

pub mod cert;
pub mod config;
pub mod connector;
pub mod context;
pub mod factory;
pub mod material;
pub mod socket;
pub mod trust;

pub use cert::CertInfo;
pub use config::{ConnectionParams, TlsVersion};
pub use connector::{ConnectionRequest, Connector};
pub use context::{ContextBuilder, InitStage, TlsContext};
pub use factory::{FactoryBuilder, SecureSocketFactory, TlsSocketFactory};
pub use material::{IdentityMaterial, TrustManager, TrustMaterial};
pub use socket::TlsSocket;
pub use trust::{
    ChainValidator, LogObserver, StoreValidator, TrustDelegate, TrustObserver, TrustRejection,
};

use std::time::Duration;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, Error>;

/// TLS factory errors
///
/// Construction-time failures (`Configuration`, `Initialization`) abort
/// factory creation. Everything else belongs to the single connection attempt
/// that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("TLS context initialization failed ({stage}): {source}")]
    Initialization {
        stage: InitStage,
        #[source]
        source: openssl::error::ErrorStack,
    },

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Unresolved host {host}: {source}")]
    UnresolvedHost {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handshake failed: {reason} (verify result: {verify})")]
    Handshake { reason: String, verify: String },

    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),
}

/// Default HTTPS port
pub const DEFAULT_HTTPS_PORT: u16 = 443;
