//! Builds a `rustls::ServerConfig` from the certificate/key/CA file paths
//! the registry resolved, wrapped in an `axum_server` config the listener
//! factory can bind against. Certificate *sanity* (PEM markers, validity
//! window) is mockit-core's job (`mockit_core::tls_material`); this module
//! only turns already-validated material into a working TLS acceptor.

use axum_server::tls_rustls::RustlsConfig;
use mockit_core::registry::ResolvedTls;
use mockit_core::{Error, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::sync::Arc;

fn ensure_crypto_provider() {
    // rustls 0.23 requires an explicit provider; installing twice is a no-op.
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn read_cert_chain(path: &std::path::Path) -> Result<Vec<CertificateDer<'static>>> {
    let bytes = tokio::fs::read(path).await?;
    let certs: std::result::Result<Vec<_>, _> = rustls_pemfile::certs(&mut bytes.as_slice()).collect();
    let certs = certs.map_err(|e| Error::invalid_certificate(format!("failed to parse {path:?}: {e}")))?;
    if certs.is_empty() {
        return Err(Error::invalid_certificate(format!("no certificates found in {path:?}")));
    }
    Ok(certs)
}

async fn read_private_key(path: &std::path::Path) -> Result<PrivateKeyDer<'static>> {
    let bytes = tokio::fs::read(path).await?;
    rustls_pemfile::private_key(&mut bytes.as_slice())
        .map_err(|e| Error::invalid_certificate(format!("failed to parse private key {path:?}: {e}")))?
        .ok_or_else(|| Error::invalid_certificate(format!("no private key found in {path:?}")))
}

/// Build an `axum_server` TLS config for one instance, honoring mTLS
/// (client-certificate requirement) when a CA path is present.
pub async fn build_rustls_config(tls: &ResolvedTls) -> Result<RustlsConfig> {
    ensure_crypto_provider();

    let chain = read_cert_chain(&tls.certificate_path).await?;
    let key = read_private_key(&tls.private_key_path).await?;

    let server_config = match (&tls.ca_certificate_path, tls.require_client_auth) {
        (Some(ca_path), true) => {
            let ca_chain = read_cert_chain(ca_path).await?;
            let mut roots = RootCertStore::empty();
            for cert in ca_chain {
                roots.add(cert).map_err(|e| Error::invalid_certificate(format!("bad CA certificate: {e}")))?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .map_err(|e| Error::invalid_certificate(format!("failed to build client verifier: {e}")))?;
            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(chain, key)
                .map_err(|e| Error::invalid_certificate(format!("invalid server certificate/key pair: {e}")))?
        }
        _ => ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| Error::invalid_certificate(format!("invalid server certificate/key pair: {e}")))?,
    };

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}
