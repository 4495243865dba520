//! Shared, immutable-after-construction certificate store and server
//! configuration. Clones of the same `Client`/`Server` filter share
//! one `TLSContext` — only `TLSSession` state is per-connection.

use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{NameType, SniError, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use std::sync::Arc;

/// A certificate chain (leaf first) plus its private key.
#[derive(Clone)]
pub struct CertificateAndKey {
    pub chain: Vec<X509>,
    pub key: PKey<Private>,
}

impl CertificateAndKey {
    pub fn new(leaf: X509, key: PKey<Private>) -> Self {
        CertificateAndKey { chain: vec![leaf], key }
    }

    pub fn with_chain(chain: Vec<X509>, key: PKey<Private>) -> Self {
        CertificateAndKey { chain, key }
    }
}

/// Selects a certificate for a connection, optionally keyed by the SNI
/// host name the peer requested. The static case (`certificate: object`
/// in the source's options table) and the dynamic case (`certificate:
/// function`) are both just implementations of this trait — there is no
/// embedded scripting runtime here, so "function" becomes an ordinary
/// Rust closure (see `FnCertificateSource`).
pub trait CertificateSource: Send + Sync {
    fn select(&self, sni: Option<&str>) -> Option<CertificateAndKey>;
}

impl CertificateSource for CertificateAndKey {
    fn select(&self, _sni: Option<&str>) -> Option<CertificateAndKey> {
        Some(self.clone())
    }
}

/// Adapts a plain closure into a `CertificateSource`, selecting a
/// different certificate per host name.
pub struct FnCertificateSource<F>(pub F);

impl<F> CertificateSource for FnCertificateSource<F>
where
    F: Fn(Option<&str>) -> Option<CertificateAndKey> + Send + Sync,
{
    fn select(&self, sni: Option<&str>) -> Option<CertificateAndKey> {
        (self.0)(sni)
    }
}

/// Shared SSL configuration: the verify store (trust anchors) and, for
/// servers, the SNI-driven certificate callback.
pub struct TLSContext {
    pub(crate) ssl_context: SslContext,
}

impl TLSContext {
    pub fn builder(method: SslMethod) -> Result<TLSContextBuilder, ErrorStack> {
        Ok(TLSContextBuilder {
            builder: SslContextBuilder::new(method)?,
            has_trust_anchor: false,
        })
    }
}

pub struct TLSContextBuilder {
    builder: SslContextBuilder,
    has_trust_anchor: bool,
}

impl TLSContextBuilder {
    /// Adds a trust anchor to the verify store.
    ///
    /// Sets `VERIFY_PEER | FAIL_IF_NO_PEER_CERT` on the shared `SSL_CTX` the
    /// moment any trust anchor is added, which makes mutual TLS mandatory
    /// even for a server that only wants *optional* client verification.
    /// This implementation keeps that coupling rather than silently
    /// splitting trust-anchor installation from verify-mode configuration —
    /// see DESIGN.md for the reasoning. Callers who need verify-but-don't-
    /// require semantics must not call `add_certificate` and should install
    /// their trust store by some other path (not provided here, matching
    /// the source).
    pub fn add_certificate(&mut self, cert: &X509) -> Result<(), ErrorStack> {
        self.builder.cert_store_mut().add_cert(cert.clone())?;
        if !self.has_trust_anchor {
            self.has_trust_anchor = true;
            self.builder
                .set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }
        Ok(())
    }

    /// Installs the server's default (eagerly bound) certificate, used
    /// when no SNI callback overrides it.
    pub fn set_certificate(&mut self, cert_and_key: &CertificateAndKey) -> Result<(), ErrorStack> {
        install_into_builder(&mut self.builder, cert_and_key)
    }

    /// Registers the per-connection certificate-selection callback. Called
    /// from inside the SSL engine during the handshake, on the reactor
    /// thread — it must not block or re-enter the same session.
    pub fn set_certificate_source(&mut self, source: Arc<dyn CertificateSource>) {
        self.builder.set_servername_callback(move |ssl, _alert| {
            let sni = ssl
                .servername(NameType::HOST_NAME)
                .map(|s| s.to_string());
            match source.select(sni.as_deref()) {
                Some(cert_and_key) => match build_context_for(&cert_and_key) {
                    Ok(ctx) => {
                        ssl.set_ssl_context(&ctx).map_err(|_| SniError::ALERT_FATAL)?;
                        Ok(())
                    }
                    Err(_) => Err(SniError::ALERT_FATAL),
                },
                None => Ok(()),
            }
        });
    }

    pub fn build(self) -> TLSContext {
        TLSContext {
            ssl_context: self.builder.build(),
        }
    }
}

fn install_into_builder(
    builder: &mut SslContextBuilder,
    cert_and_key: &CertificateAndKey,
) -> Result<(), ErrorStack> {
    let mut iter = cert_and_key.chain.iter();
    if let Some(leaf) = iter.next() {
        builder.set_certificate(leaf)?;
    }
    builder.set_private_key(&cert_and_key.key)?;
    for extra in iter {
        builder.add_extra_chain_cert(extra.clone())?;
    }
    Ok(())
}

fn build_context_for(cert_and_key: &CertificateAndKey) -> Result<SslContext, ErrorStack> {
    let mut builder = SslContextBuilder::new(SslMethod::tls())?;
    install_into_builder(&mut builder, cert_and_key)?;
    Ok(builder.build())
}
