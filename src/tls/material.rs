//! Trust and identity material
//!
//! Material is loaded elsewhere and handed to the factory ready-made. The PEM
//! helpers here only wrap OpenSSL's decoders so callers holding PEM bundles
//! don't have to.

use super::cert::CertInfo;
use super::trust::{ChainValidator, StoreValidator};
use super::{Error, Result};
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::x509::X509;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// A set of trusted certificates (trust anchors)
#[derive(Clone, Default)]
pub struct TrustMaterial {
    certs: Vec<X509>,
}

impl TrustMaterial {
    /// Trust exactly the given certificates
    pub fn new(certs: Vec<X509>) -> Self {
        TrustMaterial { certs }
    }

    /// Load every certificate from a PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certs = X509::stack_from_pem(pem)
            .map_err(|e| Error::Configuration(format!("Failed to load trust anchors: {}", e)))?;
        if certs.is_empty() {
            return Err(Error::Configuration(
                "No certificates found in trust material".to_string(),
            ));
        }
        Ok(TrustMaterial { certs })
    }

    /// Load every certificate from a PEM file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = read_material(path.as_ref())?;
        Self::from_pem(&pem)
    }

    /// Add one more trusted certificate
    pub fn with_certificate(mut self, cert: X509) -> Self {
        self.certs.push(cert);
        self
    }

    /// The trusted certificates
    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    /// Number of trusted certificates
    pub fn len(&self) -> usize {
        self.certs.len()
    }

    /// Whether there are no trusted certificates
    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

impl fmt::Debug for TrustMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subjects: Vec<String> = self
            .certs
            .iter()
            .map(|c| CertInfo::from_x509_ref(c).subject)
            .collect();
        f.debug_struct("TrustMaterial")
            .field("anchors", &subjects)
            .finish()
    }
}

/// Private key plus certificate chain (leaf first)
#[derive(Clone)]
pub struct IdentityMaterial {
    key: PKey<Private>,
    chain: Vec<X509>,
}

impl IdentityMaterial {
    /// Pair a private key with its certificate chain
    ///
    /// The first certificate must carry the public half of `key`.
    pub fn new(key: PKey<Private>, chain: Vec<X509>) -> Result<Self> {
        let leaf = chain.first().ok_or_else(|| {
            Error::Configuration("Identity material has no certificate".to_string())
        })?;
        let public = leaf
            .public_key()
            .map_err(|e| Error::Configuration(format!("Unreadable certificate key: {}", e)))?;
        if !public.public_eq(&key) {
            return Err(Error::Configuration(
                "Private key does not match certificate".to_string(),
            ));
        }
        Ok(IdentityMaterial { key, chain })
    }

    /// Load the private key and certificate chain from one PEM bundle
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = PKey::private_key_from_pem(pem)
            .map_err(|e| Error::Configuration(format!("Failed to load private key: {}", e)))?;
        let chain = X509::stack_from_pem(pem)
            .map_err(|e| Error::Configuration(format!("Failed to load certificate: {}", e)))?;
        Self::new(key, chain)
    }

    /// Load the private key and certificate chain from a PEM file
    pub fn from_pem_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let pem = read_material(path.as_ref())?;
        Self::from_pem(&pem)
    }

    /// The certificate presented to the server
    pub fn certificate(&self) -> &X509 {
        &self.chain[0]
    }

    /// Intermediate certificates sent after the leaf
    pub fn intermediates(&self) -> &[X509] {
        &self.chain[1..]
    }

    /// The private key matching `certificate()`
    pub fn key(&self) -> &PKeyRef<Private> {
        &self.key
    }
}

impl fmt::Debug for IdentityMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityMaterial")
            .field("subject", &CertInfo::from_x509_ref(self.certificate()).subject)
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

/// One participant in server-certificate trust decisions
#[derive(Clone)]
pub enum TrustManager {
    /// A chain validator, consulted during the handshake through a `TrustDelegate`
    Chain(Arc<dyn ChainValidator>),
    /// Anchors installed into the engine's store and verified by OpenSSL itself
    Anchors(TrustMaterial),
}

impl TrustManager {
    /// Standard chain validation against `material`
    pub fn store(material: TrustMaterial) -> Self {
        TrustManager::Chain(Arc::new(StoreValidator::new(material)))
    }

    /// A caller-supplied chain validator
    pub fn validator<V: ChainValidator + 'static>(validator: V) -> Self {
        TrustManager::Chain(Arc::new(validator))
    }

    /// Anchors only, without a validation hook
    pub fn anchors(material: TrustMaterial) -> Self {
        TrustManager::Anchors(material)
    }
}

impl fmt::Debug for TrustManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustManager::Chain(v) => f
                .debug_tuple("Chain")
                .field(&v.trust_anchors().map(TrustMaterial::len))
                .finish(),
            TrustManager::Anchors(m) => f.debug_tuple("Anchors").field(m).finish(),
        }
    }
}

fn read_material(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| Error::Configuration(format!("Cannot read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::asn1::Asn1Time;
    use openssl::ec::{EcGroup, EcKey};
    use openssl::hash::MessageDigest;
    use openssl::nid::Nid;
    use openssl::x509::{X509Builder, X509NameBuilder};
    use std::io::Write;

    fn key() -> PKey<Private> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
        PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
    }

    fn self_signed(cn: &str, key: &PKey<Private>) -> X509 {
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
        let name = name.build();

        let mut builder = X509Builder::new().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(30).unwrap())
            .unwrap();
        builder.sign(key, MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_trust_material_from_pem_bundle() {
        let k = key();
        let mut pem = self_signed("one", &k).to_pem().unwrap();
        pem.extend(self_signed("two", &k).to_pem().unwrap());

        let material = TrustMaterial::from_pem(&pem).unwrap();
        assert_eq!(material.len(), 2);
        assert_eq!(
            CertInfo::from_x509_ref(&material.certificates()[1]).subject,
            "two"
        );
    }

    #[test]
    fn test_trust_material_rejects_empty_pem() {
        assert!(matches!(
            TrustMaterial::from_pem(b""),
            Err(Error::Configuration(_))
        ));
        assert!(TrustMaterial::default().is_empty());
    }

    #[test]
    fn test_trust_material_from_missing_file() {
        let result = TrustMaterial::from_pem_file("/nonexistent/ca.pem");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_identity_from_pem_file() {
        let k = key();
        let cert = self_signed("client", &k);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&cert.to_pem().unwrap()).unwrap();
        file.write_all(&k.private_key_to_pem_pkcs8().unwrap()).unwrap();

        let identity = IdentityMaterial::from_pem_file(file.path()).unwrap();
        assert_eq!(
            CertInfo::from_x509_ref(identity.certificate()).subject,
            "client"
        );
        assert!(identity.intermediates().is_empty());
    }

    #[test]
    fn test_identity_rejects_mismatched_key() {
        let cert = self_signed("client", &key());
        let result = IdentityMaterial::new(key(), vec![cert]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_identity_requires_certificate() {
        let result = IdentityMaterial::new(key(), Vec::new());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
