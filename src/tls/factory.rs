//! Secure socket factory
//!
//! The facade an HTTP transport talks to. Every entry point builds a
//! `ConnectionRequest` and hands it to the `Connector`; trust and identity
//! were settled when the factory was built.

use super::config::{ConnectionParams, TlsVersion};
use super::connector::{ConnectionRequest, Connector};
use super::context::{ContextBuilder, TlsContext};
use super::material::{IdentityMaterial, TrustManager, TrustMaterial};
use super::socket::TlsSocket;
use super::trust::TrustObserver;
use super::Result;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

/// Capability expected from a secure socket factory by a transport layer
pub trait SecureSocketFactory {
    /// The socket type produced
    type Socket;

    /// Connect to `host:port`
    fn create_socket(&self, host: &str, port: u16) -> Result<Self::Socket>;

    /// Connect to `host:port` from a given local address
    fn create_socket_from(
        &self,
        host: &str,
        port: u16,
        local: Option<SocketAddr>,
    ) -> Result<Self::Socket>;

    /// Connect to `host:port` honouring the connect deadline in `params`
    fn create_socket_with_params(
        &self,
        host: &str,
        port: u16,
        local: Option<SocketAddr>,
        params: &ConnectionParams,
    ) -> Result<Self::Socket>;

    /// Layer TLS over an existing plain connection
    fn upgrade_socket(
        &self,
        socket: TcpStream,
        host: &str,
        port: u16,
        auto_close: bool,
    ) -> Result<Self::Socket>;
}

/// TLS socket factory with caller-supplied trust and identity
///
/// Cloning is cheap; clones share the same context.
#[derive(Debug, Clone)]
pub struct TlsSocketFactory {
    connector: Connector,
}

impl TlsSocketFactory {
    /// Build a factory from client identities and trust managers
    ///
    /// At least one of the two must be non-empty.
    pub fn new(identities: Vec<IdentityMaterial>, trust: Vec<TrustManager>) -> Result<Self> {
        Self::builder()
            .identities(identities)
            .trust_managers(trust)
            .build()
    }

    /// Build a factory trusting exactly the certificates in `material`
    pub fn from_trust_material(material: TrustMaterial) -> Result<Self> {
        Self::builder().trust(TrustManager::store(material)).build()
    }

    /// Build a factory from an already built context
    pub fn from_context(context: TlsContext) -> Self {
        TlsSocketFactory {
            connector: Connector::new(Arc::new(context)),
        }
    }

    /// Create a factory builder
    pub fn builder() -> FactoryBuilder {
        FactoryBuilder {
            context: TlsContext::builder(),
        }
    }

    /// The context every socket from this factory uses
    pub fn context(&self) -> &TlsContext {
        self.connector.context()
    }

    /// Dispatch a prepared request
    pub fn connect(&self, request: &ConnectionRequest) -> Result<TlsSocket> {
        self.connector.connect(request)
    }
}

impl SecureSocketFactory for TlsSocketFactory {
    type Socket = TlsSocket;

    fn create_socket(&self, host: &str, port: u16) -> Result<TlsSocket> {
        self.connect(&ConnectionRequest::new(host, port)?)
    }

    fn create_socket_from(
        &self,
        host: &str,
        port: u16,
        local: Option<SocketAddr>,
    ) -> Result<TlsSocket> {
        self.connect(&ConnectionRequest::new(host, port)?.local_addr(local))
    }

    fn create_socket_with_params(
        &self,
        host: &str,
        port: u16,
        local: Option<SocketAddr>,
        params: &ConnectionParams,
    ) -> Result<TlsSocket> {
        let request = ConnectionRequest::new(host, port)?
            .local_addr(local)
            .params(params.clone());
        self.connect(&request)
    }

    fn upgrade_socket(
        &self,
        socket: TcpStream,
        host: &str,
        port: u16,
        auto_close: bool,
    ) -> Result<TlsSocket> {
        self.connector.upgrade(socket, host, port, auto_close)
    }
}

/// Factory builder, forwarding to `ContextBuilder`
pub struct FactoryBuilder {
    context: ContextBuilder,
}

impl FactoryBuilder {
    /// Add a client identity
    pub fn identity(mut self, identity: IdentityMaterial) -> Self {
        self.context = self.context.identity(identity);
        self
    }

    /// Add several client identities
    pub fn identities<I: IntoIterator<Item = IdentityMaterial>>(mut self, identities: I) -> Self {
        self.context = self.context.identities(identities);
        self
    }

    /// Add a trust manager
    pub fn trust(mut self, manager: TrustManager) -> Self {
        self.context = self.context.trust(manager);
        self
    }

    /// Add several trust managers, in order
    pub fn trust_managers<I: IntoIterator<Item = TrustManager>>(mut self, managers: I) -> Self {
        self.context = self.context.trust_managers(managers);
        self
    }

    /// Set the pinned protocol version
    pub fn protocol(mut self, version: TlsVersion) -> Self {
        self.context = self.context.protocol(version);
        self
    }

    /// Set the trust observer
    pub fn observer(mut self, observer: Arc<dyn TrustObserver>) -> Self {
        self.context = self.context.observer(observer);
        self
    }

    /// Check the server certificate against the host name
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.context = self.context.verify_hostname(verify);
        self
    }

    /// Build the context and the factory around it
    pub fn build(self) -> Result<TlsSocketFactory> {
        Ok(TlsSocketFactory::from_context(self.context.build()?))
    }
}
