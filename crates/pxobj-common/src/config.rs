//! Daemon configuration.
//!
//! Everything comes from the environment; the Kubernetes operator owns the
//! manifests that set these variables. Only the admin token is mandatory.

use std::env;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Process-wide configuration, immutable after startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Data directory owned exclusively by this node's store.
    pub data_dir: PathBuf,
    /// Port for the public S3 API.
    pub s3_port: u16,
    /// Port for the admin + replication API.
    pub admin_port: u16,
    /// Shared bearer token for admin and peer traffic.
    pub admin_token: String,
    /// TLS material; `None` disables TLS on both listeners.
    pub tls: Option<TlsConfig>,
    /// Cluster topology for peer discovery.
    pub cluster: ClusterTopology,
}

/// Paths to the PEM material mounted by the operator.
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Trust anchors for peer verification; empty string means none.
    pub ca_file: Option<PathBuf>,
}

/// StatefulSet topology used to derive peer DNS names.
#[derive(Clone, Debug)]
pub struct ClusterTopology {
    /// This pod's name; the trailing `-<n>` suffix is the ordinal.
    pub pod_name: String,
    pub namespace: String,
    pub service_name: String,
    pub headless_service_name: String,
    pub replicas: usize,
}

impl Config {
    /// Build the configuration from `PXOBJ_*` environment variables.
    ///
    /// Fails only on a missing admin token; everything else has a default.
    pub fn from_env() -> Result<Self> {
        let admin_token = env::var("PXOBJ_ADMIN_TOKEN").unwrap_or_default();
        if admin_token.is_empty() {
            return Err(Error::invalid_request("PXOBJ_ADMIN_TOKEN must be set"));
        }

        let tls_enabled = env_or("PXOBJ_TLS_ENABLED", "false").eq_ignore_ascii_case("true");
        let tls = if tls_enabled {
            let ca = env::var("PXOBJ_TLS_CA_FILE").unwrap_or_default();
            Some(TlsConfig {
                cert_file: PathBuf::from(env::var("PXOBJ_TLS_CERT_FILE").unwrap_or_default()),
                key_file: PathBuf::from(env::var("PXOBJ_TLS_KEY_FILE").unwrap_or_default()),
                ca_file: if ca.is_empty() { None } else { Some(PathBuf::from(ca)) },
            })
        } else {
            None
        };

        let service_name = env_or("PXOBJ_SERVICE_NAME", "pxobj");
        let pod_name = {
            let v = env::var("POD_NAME").unwrap_or_default();
            if v.is_empty() {
                format!("{service_name}-0")
            } else {
                v
            }
        };

        Ok(Self {
            data_dir: PathBuf::from(env_or("PXOBJ_DATA_DIR", "/data")),
            s3_port: parse_or(&env::var("PXOBJ_S3_PORT").unwrap_or_default(), 9000),
            admin_port: parse_or(&env::var("PXOBJ_ADMIN_PORT").unwrap_or_default(), 19000),
            admin_token,
            tls,
            cluster: ClusterTopology {
                pod_name,
                namespace: env_or("POD_NAMESPACE", "default"),
                service_name,
                headless_service_name: env_or("PXOBJ_HEADLESS_SERVICE_NAME", "pxobj-headless"),
                replicas: parse_or(&env::var("PXOBJ_REPLICAS").unwrap_or_default(), 1),
            },
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(v: &str, default: T) -> T {
    v.trim().parse().unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_defaults() {
        assert_eq!(parse_or::<u16>("", 9000), 9000);
        assert_eq!(parse_or::<u16>("abc", 9000), 9000);
        assert_eq!(parse_or::<u16>("9100", 9000), 9100);
        assert_eq!(parse_or::<usize>(" 3 ", 1), 3);
    }
}
