//! Server certificate trust decisions
//!
//! OpenSSL builds and checks the presented chain; a `ChainValidator` decides
//! what to make of it. Every validator handed to the context builder is
//! wrapped in a `TrustDelegate`, which reports each decision to a
//! `TrustObserver` and otherwise passes the verdict through untouched.
//!
//! During a handshake OpenSSL calls back once for every problem it finds and
//! once for every certificate that checks out, finishing with the leaf. The
//! delegate asks its validator exactly once per handshake: at the first
//! problem, or at the leaf when there was none. Later calls repeat that
//! verdict.

use super::cert::{chain_info, CertInfo};
use super::material::TrustMaterial;
use super::{Error, Result};
use openssl::ex_data::Index;
use openssl::ssl::Ssl;
use openssl::x509::{X509StoreContext, X509StoreContextRef, X509VerifyResult};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Label used when the negotiated cipher is not known yet
pub const UNKNOWN_AUTH_TYPE: &str = "UNKNOWN";

/// Why a certificate chain was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("certificate chain rejected: {reason}")]
pub struct TrustRejection {
    reason: String,
    code: Option<i32>,
}

impl TrustRejection {
    /// A rejection with a free-form reason
    pub fn new(reason: impl Into<String>) -> Self {
        TrustRejection {
            reason: reason.into(),
            code: None,
        }
    }

    /// A rejection carrying OpenSSL's verification result
    pub fn from_verify_result(result: X509VerifyResult) -> Self {
        TrustRejection {
            reason: result.error_string().to_string(),
            code: Some(result.as_raw()),
        }
    }

    /// Human readable reason
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Raw `X509_V_ERR_*` code, when the rejection came from OpenSSL
    pub fn code(&self) -> Option<i32> {
        self.code
    }
}

/// Decides whether a presented certificate chain is acceptable
///
/// `ctx` is the engine's store context after OpenSSL has checked the chain
/// against the context's trust store. `ctx.error()` holds the problem that
/// triggered the decision, or `X509VerifyResult::OK` when the whole chain
/// checked out, and `ctx.chain()` is the chain as far as it was built.
/// Verification is already running on `ctx`, so implementations must not
/// call `verify_cert` on it. `auth_type` names the negotiated cipher suite.
pub trait ChainValidator: Send + Sync {
    /// Anchors this validator trusts; installed into the context's store
    fn trust_anchors(&self) -> Option<&TrustMaterial> {
        None
    }

    /// Accept or reject the chain in `ctx`
    fn validate(
        &self,
        ctx: &mut X509StoreContextRef,
        auth_type: &str,
    ) -> std::result::Result<(), TrustRejection>;
}

/// Standard chain validation by OpenSSL against a set of trust anchors
///
/// The anchors go into the context's store and the verdict is OpenSSL's own.
#[derive(Debug, Clone)]
pub struct StoreValidator {
    material: TrustMaterial,
}

impl StoreValidator {
    /// Trust chains ending in one of `material`'s certificates
    pub fn new(material: TrustMaterial) -> Self {
        StoreValidator { material }
    }
}

impl ChainValidator for StoreValidator {
    fn trust_anchors(&self) -> Option<&TrustMaterial> {
        Some(&self.material)
    }

    fn validate(
        &self,
        ctx: &mut X509StoreContextRef,
        _auth_type: &str,
    ) -> std::result::Result<(), TrustRejection> {
        match ctx.error() {
            X509VerifyResult::OK => Ok(()),
            result => Err(TrustRejection::from_verify_result(result)),
        }
    }
}

/// Observability hook around each validation
pub trait TrustObserver: Send + Sync {
    /// Called before the wrapped validator runs
    fn before_validate(&self, auth_type: &str);

    /// Called with the validator's verdict and the chain OpenSSL built
    fn after_validate(
        &self,
        _auth_type: &str,
        _outcome: &std::result::Result<(), TrustRejection>,
        _chain: &[CertInfo],
    ) {
    }
}

/// Observer forwarding to the `log` facade at debug level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl TrustObserver for LogObserver {
    fn before_validate(&self, auth_type: &str) {
        log::debug!("Validating server certificate chain (auth type {})", auth_type);
    }

    fn after_validate(
        &self,
        auth_type: &str,
        outcome: &std::result::Result<(), TrustRejection>,
        chain: &[CertInfo],
    ) {
        let subject = chain.first().map(|c| c.subject.as_str()).unwrap_or("<undef>");
        match outcome {
            Ok(()) => log::debug!("Server certificate {} trusted ({})", subject, auth_type),
            Err(rejection) => {
                log::debug!("Server certificate {} not trusted: {}", subject, rejection)
            }
        }
    }
}

/// Observer wrapper around one chain validator
///
/// The delegate never changes the outcome: accept stays accept and reject
/// stays reject.
#[derive(Clone)]
pub struct TrustDelegate {
    inner: Arc<dyn ChainValidator>,
    observer: Arc<dyn TrustObserver>,
}

impl TrustDelegate {
    /// Wrap `inner`, reporting to `observer`
    ///
    /// Fails with `Error::Configuration` when the validator carries an empty
    /// anchor set, since it could never accept anything.
    pub fn new(inner: Arc<dyn ChainValidator>, observer: Arc<dyn TrustObserver>) -> Result<Self> {
        if inner.trust_anchors().is_some_and(TrustMaterial::is_empty) {
            return Err(Error::Configuration(
                "Chain validator has no trust anchors".to_string(),
            ));
        }
        Ok(TrustDelegate { inner, observer })
    }

    /// Validate through the wrapped validator
    pub fn validate(
        &self,
        ctx: &mut X509StoreContextRef,
        auth_type: &str,
    ) -> std::result::Result<(), TrustRejection> {
        self.observer.before_validate(auth_type);
        let outcome = self.inner.validate(ctx, auth_type);
        let chain = ctx.chain().map(chain_info).unwrap_or_default();
        self.observer.after_validate(auth_type, &outcome, &chain);
        outcome
    }

    /// The engine's verify callback, consulting this delegate once per handshake
    ///
    /// `index` locates the handshake's `VerdictSlot` on the `Ssl`. Without a
    /// slot every call that would decide asks the validator again.
    pub(crate) fn verify_callback(
        self,
        index: Index<Ssl, VerdictSlot>,
    ) -> impl Fn(bool, &mut X509StoreContextRef) -> bool + Send + Sync + 'static {
        move |preverify_ok: bool, ctx: &mut X509StoreContextRef| {
            let slot = verdict_slot(ctx, index).unwrap_or_default();
            let mut verdict = slot.lock().unwrap_or_else(PoisonError::into_inner);
            let decided = *verdict;
            let accepted = match decided {
                Some(accepted) => accepted,
                None if preverify_ok && ctx.error_depth() > 0 => return true,
                None => {
                    let accepted = self.decide(ctx);
                    *verdict = Some(accepted);
                    accepted
                }
            };
            if accepted && !preverify_ok {
                ctx.set_error(X509VerifyResult::OK);
            }
            accepted
        }
    }

    fn decide(&self, ctx: &mut X509StoreContextRef) -> bool {
        let auth_type = auth_type(ctx);
        let accepted = self.validate(ctx, &auth_type).is_ok();
        if !accepted && ctx.error() == X509VerifyResult::OK {
            ctx.set_error(X509VerifyResult::APPLICATION_VERIFICATION);
        }
        accepted
    }

    /// Anchors of the wrapped validator, if it has any
    pub fn trust_anchors(&self) -> Option<&TrustMaterial> {
        self.inner.trust_anchors()
    }
}

/// Per-handshake record of a delegate's verdict, kept on the `Ssl`
pub(crate) type VerdictSlot = Arc<Mutex<Option<bool>>>;

fn verdict_slot(ctx: &X509StoreContextRef, index: Index<Ssl, VerdictSlot>) -> Option<VerdictSlot> {
    let ssl = ctx.ex_data(X509StoreContext::ssl_idx().ok()?)?;
    ssl.ex_data(index).cloned()
}

impl fmt::Debug for TrustDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustDelegate")
            .field("anchors", &self.trust_anchors().map(TrustMaterial::len))
            .finish_non_exhaustive()
    }
}

/// Cipher suite of the handshake that owns `ctx`
fn auth_type(ctx: &X509StoreContextRef) -> String {
    X509StoreContext::ssl_idx()
        .ok()
        .and_then(|idx| ctx.ex_data(idx))
        .and_then(|ssl| ssl.current_cipher())
        .map(|cipher| cipher.name().to_string())
        .unwrap_or_else(|| UNKNOWN_AUTH_TYPE.to_string())
}
