//! TLS acceptor loading

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig as RustlsConfig;
use tokio_rustls::TlsAcceptor;

use super::config::TlsConfig;
use crate::error::{Error, Result};

/// Build a TLS acceptor from PEM files
///
/// Fails if either file is unreadable, the certificate chain is empty or no
/// private key is found.
pub fn load_acceptor(tls: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(tls)?;
    let key = load_key(tls)?;

    let config = RustlsConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("invalid certificate/key pair: {}", e)))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(tls: &TlsConfig) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(&tls.cert_path).map_err(|e| {
        Error::Tls(format!("cannot open certificate {}: {}", tls.cert_path.display(), e))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            Error::Tls(format!("invalid certificate {}: {}", tls.cert_path.display(), e))
        })?;

    if certs.is_empty() {
        return Err(Error::Tls(format!(
            "no certificate found in {}",
            tls.cert_path.display()
        )));
    }
    Ok(certs)
}

fn load_key(tls: &TlsConfig) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(&tls.key_path).map_err(|e| {
        Error::Tls(format!("cannot open private key {}: {}", tls.key_path.display(), e))
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| Error::Tls(format!("invalid private key {}: {}", tls.key_path.display(), e)))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", tls.key_path.display())))
}
