//! CLI surface and on-disk TLS material loading. The engine itself is
//! configured through `pipeline::config::SystemConfig`; this is the
//! proxy binary's own ambient configuration layer (listen/upstream
//! addresses, optional TLS termination).

use anyhow::{Context as _, Result};
use clap::Parser;
use openssl::pkey::{PKey, Private};
use openssl::x509::X509;
use std::net::SocketAddr;
use std::path::PathBuf;
use tls_filter::CertificateAndKey;

#[derive(Parser, Debug)]
#[command(name = "proxy", about = "Streaming event-pipeline TCP/TLS proxy")]
pub struct Cli {
    /// Address to accept inbound connections on.
    #[arg(long, default_value = "127.0.0.1:8443")]
    pub listen: SocketAddr,

    /// Address of the plaintext backend each connection is forwarded to.
    #[arg(long)]
    pub upstream: SocketAddr,

    /// PEM certificate chain (leaf first) for TLS termination. Requires
    /// `--tls-key`; omit both to run as a plain TCP proxy.
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key matching `--tls-cert`.
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl Cli {
    pub fn tls_material(&self) -> Result<Option<CertificateAndKey>> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert_path), Some(key_path)) => {
                Ok(Some(load_certificate_and_key(cert_path, key_path)?))
            }
            _ => Ok(None),
        }
    }
}

fn load_certificate_and_key(
    cert_path: &std::path::Path,
    key_path: &std::path::Path,
) -> Result<CertificateAndKey> {
    let cert_pem = std::fs::read(cert_path)
        .with_context(|| format!("reading TLS certificate at {}", cert_path.display()))?;
    let key_pem = std::fs::read(key_path)
        .with_context(|| format!("reading TLS private key at {}", key_path.display()))?;

    let mut chain = X509::stack_from_pem(&cert_pem)
        .with_context(|| format!("parsing certificate chain at {}", cert_path.display()))?;
    if chain.is_empty() {
        anyhow::bail!("{} contains no certificates", cert_path.display());
    }
    let key: PKey<Private> = PKey::private_key_from_pem(&key_pem)
        .with_context(|| format!("parsing private key at {}", key_path.display()))?;

    let leaf = chain.remove(0);
    let mut full_chain = vec![leaf];
    full_chain.extend(chain);
    Ok(CertificateAndKey::with_chain(full_chain, key))
}
