//! Domain types shared between the store, the cluster, and the HTTP
//! surfaces.

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A bucket as reported by listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Metadata for a stored object.
///
/// `path` is the content file on the owning node's data directory; it never
/// leaves the process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectMeta {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
    pub mod_time: DateTime<Utc>,
    pub path: std::path::PathBuf,
}

/// A credential bound to exactly one bucket.
///
/// This document is both the admin API response body and the replication
/// wire format, so the field names are part of the protocol.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKey {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub read_only: bool,
}

impl AccessKey {
    /// Generate a fresh credential for `bucket`.
    ///
    /// Access keys are `PX` + 20 uppercase hex chars (10 random bytes);
    /// secrets are 64 lowercase hex chars (32 random bytes).
    pub fn generate(bucket: impl Into<String>, read_only: bool) -> Self {
        Self {
            access_key: format!("PX{}", random_hex(10).to_uppercase()),
            secret_key: random_hex(32),
            bucket: bucket.into(),
            read_only,
        }
    }
}

/// Generate `n` random bytes as lowercase hex.
pub fn random_hex(n: usize) -> String {
    let mut buf = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Validate a bucket name: 3-63 chars of `[a-z0-9.-]`, no leading or
/// trailing `-`.
pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name.len() < 3 || name.len() > 63 {
        return Err(Error::InvalidBucketName(name.to_string()));
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err(Error::InvalidBucketName(name.to_string()));
    }
    for c in name.chars() {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
            return Err(Error::InvalidBucketName(name.to_string()));
        }
    }
    Ok(())
}
