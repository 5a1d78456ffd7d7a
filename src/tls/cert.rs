//! Certificate summaries
//!
//! Readable views of X.509 certificates for diagnostics and for callers
//! inspecting what a server presented.

use openssl::nid::Nid;
use openssl::ssl::SslRef;
use openssl::stack::StackRef;
use openssl::x509::{X509NameRef, X509Ref, X509};
use std::net::IpAddr;

/// Certificate information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertInfo {
    /// Certificate subject (Common Name)
    pub subject: String,
    /// Certificate issuer (Common Name)
    pub issuer: String,
    /// Subject Alternative Names (DNS names and IP addresses)
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    /// Extract certificate information from an X.509 certificate reference
    pub fn from_x509_ref(cert: &X509Ref) -> Self {
        CertInfo {
            subject: common_name(cert.subject_name()),
            issuer: common_name(cert.issuer_name()),
            subject_alt_names: subject_alt_names(cert),
        }
    }

    /// Whether subject and issuer name the same entity
    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Summarise every certificate of a chain, in order
pub fn chain_info(chain: &StackRef<X509>) -> Vec<CertInfo> {
    chain.iter().map(CertInfo::from_x509_ref).collect()
}

/// The chain the peer presented on an SSL connection (leaf first)
pub fn peer_chain(ssl: &SslRef) -> Vec<CertInfo> {
    match ssl.peer_cert_chain() {
        Some(chain) => chain_info(chain),
        None => ssl
            .peer_certificate()
            .map(|cert| vec![CertInfo::from_x509_ref(&cert)])
            .unwrap_or_default(),
    }
}

fn common_name(name: &X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

fn subject_alt_names(cert: &X509Ref) -> Vec<String> {
    let mut names = Vec::new();

    if let Some(san_ext) = cert.subject_alt_names() {
        for name in san_ext.iter() {
            if let Some(dns) = name.dnsname() {
                names.push(format!("DNS:{}", dns));
            } else if let Some(ip) = name.ipaddress().and_then(ip_from_bytes) {
                names.push(format!("IP:{}", ip));
            }
        }
    }

    names
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(raw).ok().map(IpAddr::from),
        _ => None,
    }
}
