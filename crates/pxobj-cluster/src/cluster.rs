//! Peer enumeration, leader probing, proxying, and quorum fan-out.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, warn};

use pxobj_common::config::Config;
use pxobj_common::error::{Error, Result};

/// Marker header carried by peer-originated writes. Requests bearing it
/// are applied locally and never proxied or re-replicated.
pub const INTERNAL_REPLICATION_HEADER: &str = "X-PXOBJ-Internal-Replication";

/// Maximum concurrent peer calls during a replication fan-out.
const MAX_CONCURRENT_PEER_CALLS: usize = 8;

/// Per-request timeout for peer RPCs.
const PEER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Which listener a proxied request targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Service {
    S3,
    Admin,
}

/// A response relayed from the leader, verbatim.
pub struct ProxiedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Peer-aware routing and replication component.
///
/// Owns the HTTP client shared by health probes, proxying, and
/// replication; safe for concurrent use.
pub struct Cluster {
    ordinal: usize,
    replicas: usize,
    service_name: String,
    headless_service_name: String,
    namespace: String,
    s3_port: u16,
    admin_port: u16,
    token: String,
    tls_enabled: bool,
    client: reqwest::Client,
}

impl Cluster {
    /// Build the cluster component from the process configuration.
    ///
    /// When TLS is enabled the client trusts the configured CA and
    /// presents the node certificate, so peers can verify it as a client.
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(PEER_CALL_TIMEOUT);
        if let Some(tls) = &cfg.tls {
            if let Some(ca_file) = &tls.ca_file {
                match std::fs::read(ca_file) {
                    Ok(pem) => match reqwest::Certificate::from_pem(&pem) {
                        Ok(ca) => builder = builder.add_root_certificate(ca),
                        Err(err) => warn!(%err, "ignoring unparseable CA certificate"),
                    },
                    Err(err) => warn!(%err, "ignoring unreadable CA certificate"),
                }
            }
            match read_identity(&tls.cert_file, &tls.key_file) {
                Ok(identity) => builder = builder.identity(identity),
                Err(err) => warn!(%err, "peer client certificate unavailable"),
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::internal(format!("http client: {e}")))?;

        Ok(Self {
            ordinal: parse_ordinal(&cfg.cluster.pod_name),
            replicas: cfg.cluster.replicas.max(1),
            service_name: cfg.cluster.service_name.clone(),
            headless_service_name: cfg.cluster.headless_service_name.clone(),
            namespace: cfg.cluster.namespace.clone(),
            s3_port: cfg.s3_port,
            admin_port: cfg.admin_port,
            token: cfg.admin_token.clone(),
            tls_enabled: cfg.tls.is_some(),
            client,
        })
    }

    /// Replication is only meaningful past one replica.
    pub fn enabled(&self) -> bool {
        self.replicas > 1
    }

    pub fn self_ordinal(&self) -> usize {
        self.ordinal
    }

    /// Whether `headers` carry the peer-originated write marker.
    pub fn is_internal_replication(headers: &HeaderMap) -> bool {
        headers
            .get(INTERNAL_REPLICATION_HEADER)
            .and_then(|v| v.to_str().ok())
            == Some("true")
    }

    /// Probe ordinals in order; the first healthy peer is the leader for
    /// this call. With nobody reachable, ordinal 0 is presumed leader.
    pub async fn leader(&self) -> (usize, String) {
        if !self.enabled() {
            return (0, self.admin_url(0));
        }
        for ordinal in 0..self.replicas {
            if self.health(ordinal).await {
                return (ordinal, self.admin_url(ordinal));
            }
        }
        (0, self.admin_url(0))
    }

    pub async fn is_leader(&self) -> bool {
        let (leader, _) = self.leader().await;
        leader == self.ordinal
    }

    /// Replay a mutation on the current leader and relay its response.
    pub async fn proxy_to_leader(
        &self,
        service: Service,
        method: Method,
        path_and_query: &str,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse> {
        let (_, admin_base) = self.leader().await;
        let base = match service {
            Service::Admin => admin_base,
            Service::S3 => admin_base.replacen(
                &format!(":{}", self.admin_port),
                &format!(":{}", self.s3_port),
                1,
            ),
        };
        let url = format!("{base}{path_and_query}");
        debug!(%url, %method, "proxying to leader");

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::ProxyFailed(e.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::ProxyFailed(e.to_string()))?;
        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }

    /// Fan `method path` out to every peer and demand a majority.
    ///
    /// The local commit counts as one ack; a 2xx from a peer is another.
    /// Peer failures are skipped, not retried; a tally below
    /// `replicas/2 + 1` is a quorum failure.
    pub async fn replicate(
        &self,
        method: Method,
        path: &str,
        content_type: Option<&str>,
        body: Bytes,
    ) -> Result<()> {
        if !self.enabled() {
            return Ok(());
        }
        let required = required_acks(self.replicas);

        let calls = (0..self.replicas)
            .filter(|ordinal| *ordinal != self.ordinal)
            .map(|ordinal| {
                let url = format!("{}{}", self.admin_url(ordinal), path);
                let mut request = self
                    .client
                    .request(method.clone(), url)
                    .bearer_auth(&self.token)
                    .header(INTERNAL_REPLICATION_HEADER, "true")
                    .body(body.clone());
                if let Some(ct) = content_type {
                    request = request.header(http::header::CONTENT_TYPE, ct);
                }
                async move {
                    match request.send().await {
                        Ok(response) if response.status().is_success() => true,
                        Ok(response) => {
                            warn!(ordinal, status = %response.status(), "peer rejected replication call");
                            false
                        }
                        Err(err) => {
                            warn!(ordinal, %err, "peer replication call failed");
                            false
                        }
                    }
                }
            });

        let acks = 1 + stream::iter(calls)
            .buffer_unordered(MAX_CONCURRENT_PEER_CALLS)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        if acks < required {
            return Err(Error::QuorumNotReached { acks, required });
        }
        Ok(())
    }

    async fn health(&self, ordinal: usize) -> bool {
        let url = format!("{}/_cluster/health", self.admin_url(ordinal));
        match self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
        {
            Ok(response) => response.status() == StatusCode::OK,
            Err(_) => false,
        }
    }

    /// Admin base URL of a peer:
    /// `scheme://<svc>-<i>.<headless>.<ns>.svc.cluster.local:<adminPort>`.
    pub fn admin_url(&self, ordinal: usize) -> String {
        let scheme = if self.tls_enabled { "https" } else { "http" };
        format!(
            "{scheme}://{}-{ordinal}.{}.{}.svc.cluster.local:{}",
            self.service_name, self.headless_service_name, self.namespace, self.admin_port
        )
    }
}

/// Majority: `replicas/2 + 1`, counting self.
fn required_acks(replicas: usize) -> usize {
    replicas / 2 + 1
}

/// Trailing integer suffix of the pod name (after the last `-`); 0 when
/// absent or malformed.
fn parse_ordinal(pod_name: &str) -> usize {
    pod_name
        .rsplit('-')
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Concatenate cert and key PEM for the client identity.
fn read_identity(cert_file: &std::path::Path, key_file: &std::path::Path) -> Result<reqwest::Identity> {
    let mut pem = std::fs::read(cert_file)?;
    pem.extend_from_slice(&std::fs::read(key_file)?);
    reqwest::Identity::from_pem(&pem).map_err(|e| Error::internal(format!("client identity: {e}")))
}
