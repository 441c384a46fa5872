//! Connection serving.
//!
//! Accepts TCP connections, optionally completes the TLS handshake, and
//! hands each connection to hyper with the router wrapped in a
//! per-connection `PeerIdentity` extension so handlers can see whether a
//! verified client certificate arrived on this connection.

use std::io;
use std::sync::Arc;

use axum::{Extension, Router};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// Connection-scoped identity derived from the TLS handshake.
///
/// `client_cert_verified` is true only when the peer presented a client
/// certificate and rustls validated its chain against the configured CA.
#[derive(Clone, Copy, Debug, Default)]
pub struct PeerIdentity {
    pub client_cert_verified: bool,
}

/// Accept connections until shutdown flips.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    tls: Option<TlsAcceptor>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let http = Arc::new(ConnBuilder::new(TokioExecutor::new()));
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = accepted?;
                debug!(%peer_addr, "accepted connection");
                let router = router.clone();
                let tls = tls.clone();
                let http = http.clone();
                tokio::spawn(async move {
                    handle_connection(socket, router, tls, http).await;
                });
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    router: Router,
    tls: Option<TlsAcceptor>,
    http: Arc<ConnBuilder<TokioExecutor>>,
) {
    match tls {
        Some(acceptor) => {
            let stream = match acceptor.accept(socket).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(%err, "TLS handshake failed");
                    return;
                }
            };
            let identity = PeerIdentity {
                client_cert_verified: stream
                    .get_ref()
                    .1
                    .peer_certificates()
                    .is_some_and(|certs| !certs.is_empty()),
            };
            let service = TowerToHyperService::new(router.layer(Extension(identity)));
            if let Err(err) = http
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .await
            {
                debug!(%err, "connection closed with error");
            }
        }
        None => {
            let service =
                TowerToHyperService::new(router.layer(Extension(PeerIdentity::default())));
            if let Err(err) = http
                .serve_connection_with_upgrades(TokioIo::new(socket), service)
                .await
            {
                debug!(%err, "connection closed with error");
            }
        }
    }
}
