use crate::config::TlsConfig;
use crate::error::{ServerError, ServerResult};
use rustls::{Certificate, PrivateKey, ServerConfig as RustlsConfig};
use rustls_pemfile::{certs, pkcs8_private_keys, rsa_private_keys};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

/// Materializes the TLS 1.3 server acceptor from configuration.
///
/// The certificate chain and private key come from the configured PEM files.
/// Older protocol versions are not offered at all.
pub fn build_acceptor(config: &TlsConfig) -> ServerResult<TlsAcceptor> {
    if !config.password.is_empty() {
        // rustls only loads unencrypted keys; an encrypted key will fail below.
        warn!("ssl.password is set but key passphrases are unsupported; provide a decrypted key");
    }

    let cert_file = File::open(&config.certificate_file)?;
    let mut cert_reader = BufReader::new(cert_file);
    let cert_chain: Vec<Certificate> = certs(&mut cert_reader)?
        .into_iter()
        .map(Certificate)
        .collect();
    if cert_chain.is_empty() {
        return Err(ServerError::NullTlsContext);
    }

    let key_file = File::open(&config.key_file)?;
    let mut key_reader = BufReader::new(key_file);
    let mut keys = pkcs8_private_keys(&mut key_reader)?;
    if keys.is_empty() {
        let key_file = File::open(&config.key_file)?;
        let mut key_reader = BufReader::new(key_file);
        keys = rsa_private_keys(&mut key_reader)?;
    }
    if keys.is_empty() {
        return Err(ServerError::NullTlsContext);
    }
    let private_key = PrivateKey(keys.remove(0));

    let rustls_config = RustlsConfig::builder()
        .with_safe_default_cipher_suites()
        .with_safe_default_kx_groups()
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|_| ServerError::NullTlsContext)?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .map_err(|_| ServerError::NullTlsContext)?;

    info!(
        certificate = %config.certificate_file,
        key = %config.key_file,
        "tls context ready (tls 1.3 only)"
    );
    Ok(TlsAcceptor::from(Arc::new(rustls_config)))
}
