//! TLS context construction
//!
//! A `TlsContext` is built once from identity material and trust managers
//! and then shared, read-only, by every connection the factory makes.

use super::config::TlsVersion;
use super::material::{IdentityMaterial, TrustManager, TrustMaterial};
use super::trust::{LogObserver, TrustDelegate, TrustObserver, VerdictSlot};
use super::{Error, Result};
use openssl::error::ErrorStack;
use openssl::ex_data::Index;
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslContextRef, SslMethod, SslVerifyMode};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

/// Which part of context construction failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Protocol method or version not available in this OpenSSL
    Algorithm,
    /// Trust anchors could not be installed
    TrustStore,
    /// Client certificate or private key could not be installed
    KeyManagement,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitStage::Algorithm => "unsupported algorithm",
            InitStage::TrustStore => "trust store",
            InitStage::KeyManagement => "key management",
        })
    }
}

fn init_error(stage: InitStage) -> impl Fn(ErrorStack) -> Error {
    move |source| Error::Initialization { stage, source }
}

/// Immutable client TLS context pinned to one protocol version
#[derive(Clone)]
pub struct TlsContext {
    ctx: SslContext,
    protocol: TlsVersion,
    verify_hostname: bool,
    delegates: Vec<TrustDelegate>,
    verdict_index: Option<Index<Ssl, VerdictSlot>>,
}

impl TlsContext {
    /// Create a new context builder
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// The single protocol version this context negotiates
    pub fn protocol(&self) -> TlsVersion {
        self.protocol
    }

    /// Whether the server certificate is checked against the host name
    pub fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    /// Delegates wrapping the chain validators, in the order supplied
    pub fn delegates(&self) -> &[TrustDelegate] {
        &self.delegates
    }

    /// The underlying OpenSSL context
    pub fn ssl_context(&self) -> &SslContextRef {
        &self.ctx
    }

    /// Per-connection SSL state for a client talking to `host`
    ///
    /// The protocol is pinned again on the `Ssl` so the socket offers exactly
    /// one version whatever the context defaults are.
    pub(crate) fn new_ssl(&self, host: &str) -> Result<Ssl> {
        let mut ssl = Ssl::new(&self.ctx)?;
        let version = Some(self.protocol.to_openssl_version());
        ssl.set_min_proto_version(version)?;
        ssl.set_max_proto_version(version)?;

        match host.parse::<IpAddr>() {
            Ok(ip) => {
                if self.verify_hostname {
                    ssl.param_mut().set_ip(ip)?;
                }
            }
            Err(_) => {
                ssl.set_hostname(host)?;
                if self.verify_hostname {
                    ssl.param_mut().set_host(host)?;
                }
            }
        }

        if let Some(index) = self.verdict_index {
            ssl.set_ex_data(index, VerdictSlot::default());
        }
        ssl.set_connect_state();
        Ok(ssl)
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("protocol", &self.protocol)
            .field("verify_hostname", &self.verify_hostname)
            .field("delegates", &self.delegates)
            .finish_non_exhaustive()
    }
}

/// Context builder
pub struct ContextBuilder {
    identities: Vec<IdentityMaterial>,
    trust: Vec<TrustManager>,
    protocol: TlsVersion,
    observer: Arc<dyn TrustObserver>,
    verify_hostname: bool,
}

impl ContextBuilder {
    fn new() -> Self {
        ContextBuilder {
            identities: Vec::new(),
            trust: Vec::new(),
            protocol: TlsVersion::default(),
            observer: Arc::new(LogObserver),
            verify_hostname: false,
        }
    }

    /// Add a client identity, presented when the server requests one
    pub fn identity(mut self, identity: IdentityMaterial) -> Self {
        self.identities.push(identity);
        self
    }

    /// Add several client identities; only the first is installed
    pub fn identities<I: IntoIterator<Item = IdentityMaterial>>(mut self, identities: I) -> Self {
        self.identities.extend(identities);
        self
    }

    /// Add a trust manager
    pub fn trust(mut self, manager: TrustManager) -> Self {
        self.trust.push(manager);
        self
    }

    /// Add several trust managers, in order
    pub fn trust_managers<I: IntoIterator<Item = TrustManager>>(mut self, managers: I) -> Self {
        self.trust.extend(managers);
        self
    }

    /// Set the pinned protocol version
    pub fn protocol(mut self, version: TlsVersion) -> Self {
        self.protocol = version;
        self
    }

    /// Set the observer reported to by every trust delegate
    pub fn observer(mut self, observer: Arc<dyn TrustObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Check the server certificate against the host name being connected to
    pub fn verify_hostname(mut self, verify: bool) -> Self {
        self.verify_hostname = verify;
        self
    }

    /// Build the context
    ///
    /// Needs at least one identity or one trust manager. Without trust
    /// managers the platform's default trust roots are used.
    pub fn build(self) -> Result<TlsContext> {
        if self.identities.is_empty() && self.trust.is_empty() {
            return Err(Error::Configuration(
                "Either identity or trust material must be given".to_string(),
            ));
        }

        log::debug!("Initializing trust manager");
        let mut delegates = Vec::new();
        let mut anchors = Vec::new();
        for manager in &self.trust {
            match manager {
                TrustManager::Chain(validator) => delegates.push(TrustDelegate::new(
                    Arc::clone(validator),
                    Arc::clone(&self.observer),
                )?),
                TrustManager::Anchors(material) if material.is_empty() => {
                    return Err(Error::Configuration(
                        "Trust material has no certificates".to_string(),
                    ));
                }
                TrustManager::Anchors(material) => anchors.push(material),
            }
        }

        let verdict_index = if delegates.is_empty() {
            None
        } else {
            Some(Ssl::new_ex_index().map_err(init_error(InitStage::TrustStore))?)
        };

        let ctx = self
            .engine_context(&delegates, &anchors, verdict_index)
            .map_err(|e| {
                log::error!("{}", e);
                e
            })?;

        Ok(TlsContext {
            ctx,
            protocol: self.protocol,
            verify_hostname: self.verify_hostname,
            delegates,
            verdict_index,
        })
    }

    fn engine_context(
        &self,
        delegates: &[TrustDelegate],
        anchors: &[&TrustMaterial],
        verdict_index: Option<Index<Ssl, VerdictSlot>>,
    ) -> Result<SslContext> {
        let mut builder = SslContextBuilder::new(SslMethod::tls_client())
            .map_err(init_error(InitStage::Algorithm))?;

        let version = Some(self.protocol.to_openssl_version());
        builder
            .set_min_proto_version(version)
            .map_err(init_error(InitStage::Algorithm))?;
        builder
            .set_max_proto_version(version)
            .map_err(init_error(InitStage::Algorithm))?;

        if self.trust.is_empty() {
            builder
                .set_default_verify_paths()
                .map_err(init_error(InitStage::TrustStore))?;
        } else {
            // Anchors of validators that are never consulted stay out of the
            // store, so they cannot widen what the consulted one accepts
            let consulted = delegates.first().and_then(TrustDelegate::trust_anchors);
            for material in anchors.iter().copied().chain(consulted) {
                for cert in material.certificates() {
                    builder
                        .cert_store_mut()
                        .add_cert(cert.clone())
                        .map_err(init_error(InitStage::TrustStore))?;
                }
            }
        }

        match (delegates.split_first(), verdict_index) {
            (Some((delegate, rest)), Some(index)) => {
                if !rest.is_empty() {
                    log::warn!(
                        "{} additional chain validator(s) will not be consulted during the handshake",
                        rest.len()
                    );
                }
                builder.set_verify_callback(
                    SslVerifyMode::PEER,
                    delegate.clone().verify_callback(index),
                );
            }
            _ => builder.set_verify(SslVerifyMode::PEER),
        }

        if let Some((identity, rest)) = self.identities.split_first() {
            if !rest.is_empty() {
                log::warn!("{} additional client identity(ies) ignored", rest.len());
            }
            let key_error = init_error(InitStage::KeyManagement);
            builder.set_certificate(identity.certificate()).map_err(&key_error)?;
            builder.set_private_key(identity.key()).map_err(&key_error)?;
            for cert in identity.intermediates() {
                builder.add_extra_chain_cert(cert.clone()).map_err(&key_error)?;
            }
            builder.check_private_key().map_err(&key_error)?;
        }

        Ok(builder.build())
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::trust::{ChainValidator, TrustRejection};
    use openssl::x509::X509StoreContextRef;

    struct AcceptAll;

    impl ChainValidator for AcceptAll {
        fn validate(
            &self,
            _ctx: &mut X509StoreContextRef,
            _auth_type: &str,
        ) -> std::result::Result<(), TrustRejection> {
            Ok(())
        }
    }

    #[test]
    fn test_build_without_material_fails() {
        let result = TlsContext::builder().build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build_with_empty_anchor_set_fails() {
        let result = TlsContext::builder()
            .trust(TrustManager::anchors(TrustMaterial::default()))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));

        let result = TlsContext::builder()
            .trust(TrustManager::store(TrustMaterial::default()))
            .build();
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_build_with_validator_only() {
        let context = TlsContext::builder()
            .trust(TrustManager::validator(AcceptAll))
            .protocol(TlsVersion::Tls13)
            .build()
            .unwrap();

        assert_eq!(context.protocol(), TlsVersion::Tls13);
        assert_eq!(context.delegates().len(), 1);
        assert!(!context.verify_hostname());
    }

    #[test]
    fn test_every_validator_is_wrapped() {
        let context = TlsContext::builder()
            .trust_managers([TrustManager::validator(AcceptAll), TrustManager::validator(AcceptAll)])
            .build()
            .unwrap();

        assert_eq!(context.delegates().len(), 2);
    }

    #[test]
    fn test_new_ssl_for_names_and_addresses() {
        let context = TlsContext::builder()
            .trust(TrustManager::validator(AcceptAll))
            .verify_hostname(true)
            .build()
            .unwrap();

        assert!(context.new_ssl("example.com").is_ok());
        assert!(context.new_ssl("127.0.0.1").is_ok());
        assert!(context.new_ssl("::1").is_ok());
    }

    #[test]
    fn test_init_stage_display() {
        assert_eq!(InitStage::KeyManagement.to_string(), "key management");
        assert_eq!(InitStage::TrustStore.to_string(), "trust store");
    }
}
