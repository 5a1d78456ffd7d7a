//! Shared test fixtures: a throwaway PKI and one-shot TLS servers

#![allow(dead_code)]

use authssl::tls::{IdentityMaterial, TrustMaterial};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{SslAcceptor, SslMethod, SslStream, SslVerifyMode, SslVersion};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509NameBuilder, X509NameRef, X509};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

/// A certificate and its private key
pub struct Issued {
    pub cert: X509,
    pub key: PKey<Private>,
}

impl Issued {
    pub fn identity(&self) -> IdentityMaterial {
        IdentityMaterial::new(self.key.clone(), vec![self.cert.clone()]).unwrap()
    }
}

/// Private certificate authority
pub struct Pki {
    pub ca: Issued,
}

pub fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn name(cn: &str) -> X509Name {
    let mut name = X509NameBuilder::new().unwrap();
    name.append_entry_by_nid(Nid::COMMONNAME, cn).unwrap();
    name.build()
}

fn base_builder(subject: &X509NameRef, issuer: &X509NameRef, key: &PKey<Private>) -> X509Builder {
    let mut serial = BigNum::new().unwrap();
    serial.rand(64, MsbOption::MAYBE_ZERO, false).unwrap();

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(subject).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(30).unwrap())
        .unwrap();
    builder
}

impl Pki {
    pub fn new(cn: &str) -> Self {
        let key = ec_key();
        let subject = name(cn);
        let mut builder = base_builder(&subject, &subject, &key);
        builder
            .append_extension(BasicConstraints::new().critical().ca().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .key_cert_sign()
                    .crl_sign()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let ski = SubjectKeyIdentifier::new()
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(ski).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();

        Pki {
            ca: Issued {
                cert: builder.build(),
                key,
            },
        }
    }

    /// Issue a server certificate for `sans` (DNS names or IP addresses)
    pub fn server(&self, cn: &str, sans: &[&str]) -> Issued {
        self.issue(cn, sans, false)
    }

    /// Issue a client authentication certificate
    pub fn client(&self, cn: &str) -> Issued {
        self.issue(cn, &[], true)
    }

    pub fn trust(&self) -> TrustMaterial {
        TrustMaterial::new(vec![self.ca.cert.clone()])
    }

    fn issue(&self, cn: &str, sans: &[&str], client: bool) -> Issued {
        let key = ec_key();
        let mut builder = base_builder(&name(cn), self.ca.cert.subject_name(), &key);
        builder
            .append_extension(BasicConstraints::new().build().unwrap())
            .unwrap();
        builder
            .append_extension(
                KeyUsage::new()
                    .critical()
                    .digital_signature()
                    .key_agreement()
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let eku = if client {
            ExtendedKeyUsage::new().client_auth().build().unwrap()
        } else {
            ExtendedKeyUsage::new().server_auth().build().unwrap()
        };
        builder.append_extension(eku).unwrap();

        if !sans.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for entry in sans {
                if entry.parse::<std::net::IpAddr>().is_ok() {
                    san.ip(entry);
                } else {
                    san.dns(entry);
                }
            }
            let san = san
                .build(&builder.x509v3_context(Some(&self.ca.cert), None))
                .unwrap();
            builder.append_extension(san).unwrap();
        }

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&self.ca.cert), None))
            .unwrap();
        builder.append_extension(aki).unwrap();
        builder.sign(&self.ca.key, MessageDigest::sha256()).unwrap();

        Issued {
            cert: builder.build(),
            key,
        }
    }
}

/// Self-signed certificate unrelated to any `Pki`
pub fn self_signed(cn: &str) -> Issued {
    let key = ec_key();
    let subject = name(cn);
    let mut builder = base_builder(&subject, &subject, &key);
    builder.sign(&key, MessageDigest::sha256()).unwrap();
    Issued {
        cert: builder.build(),
        key,
    }
}

/// Server-side acceptor presenting `identity`, optionally requiring a client
/// certificate issued by `client_ca`
pub fn acceptor(identity: &Issued, client_ca: Option<&X509>) -> SslAcceptor {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&identity.key).unwrap();
    builder.set_certificate(&identity.cert).unwrap();
    if let Some(ca) = client_ca {
        builder.cert_store_mut().add_cert(ca.clone()).unwrap();
        builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
    }
    builder.build()
}

/// Server-side acceptor presenting `identity` that speaks at most `max`
pub fn capped_acceptor(identity: &Issued, max: SslVersion) -> SslAcceptor {
    let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
    builder.set_private_key(&identity.key).unwrap();
    builder.set_certificate(&identity.cert).unwrap();
    builder.set_max_proto_version(Some(max)).unwrap();
    builder.build()
}

pub type Accepted = Result<SslStream<TcpStream>, String>;

/// Accept one connection on a loopback port and hand the TLS outcome to `handler`
pub fn spawn_server<F>(acceptor: SslAcceptor, handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(Accepted) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (tcp_stream, _) = listener.accept().unwrap();
        handler(acceptor.accept(tcp_stream).map_err(|e| e.to_string()));
    });

    (addr, handle)
}

/// Read "Hello", answer "World"
pub fn echo_world(accepted: Accepted) {
    use std::io::{Read, Write};

    let mut stream = accepted.unwrap();
    let mut buf = [0u8; 5];
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"Hello");
    stream.write_all(b"World").unwrap();
    let _ = stream.shutdown();
}
