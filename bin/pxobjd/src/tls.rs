//! TLS material loading.
//!
//! Both listeners share the node certificate. The admin listener requests
//! client certificates without requiring them; the replication routes then
//! insist that one was presented and verified (see `serve::PeerIdentity`).

use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use pxobj_common::config::TlsConfig;

/// Acceptors for the two listeners.
pub struct TlsMaterial {
    pub s3: TlsAcceptor,
    pub admin: TlsAcceptor,
}

/// Load certificates once at startup; failures are fatal.
pub fn load(cfg: &TlsConfig) -> io::Result<TlsMaterial> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let certs = load_certs(&cfg.cert_file)?;
    let key = load_private_key(&cfg.key_file)?;

    // Public S3 listener never asks for client certificates.
    let s3_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs.clone(), key.clone_key())
        .map_err(io::Error::other)?;

    // Admin listener: verify a client certificate when one is offered.
    let admin_config = match &cfg.ca_file {
        Some(ca_file) => {
            let mut roots = RootCertStore::empty();
            for cert in load_certs(ca_file)? {
                roots.add(cert).map_err(io::Error::other)?;
            }
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .allow_unauthenticated()
                .build()
                .map_err(io::Error::other)?;
            ServerConfig::builder()
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs, key)
                .map_err(io::Error::other)?
        }
        None => {
            warn!("no CA configured; peer client certificates cannot be verified");
            ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(io::Error::other)?
        }
    };

    Ok(TlsMaterial {
        s3: acceptor(s3_config),
        admin: acceptor(admin_config),
    })
}

fn acceptor(mut config: ServerConfig) -> TlsAcceptor {
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    TlsAcceptor::from(Arc::new(config))
}

fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| io::Error::other(format!("failed to open {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file)).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(io::Error::other(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .map_err(|e| io::Error::other(format!("failed to open {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))?
        .ok_or_else(|| io::Error::other(format!("no private key found in {}", path.display())))
}
