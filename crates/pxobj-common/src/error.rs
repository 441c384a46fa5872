//! Error types shared across the pxobj daemon.

use thiserror::Error;

/// Common result type for pxobj operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for pxobj
#[derive(Debug, Error)]
pub enum Error {
    // Store errors
    #[error("disk I/O error: {0}")]
    DiskIo(#[from] std::io::Error),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("empty object key")]
    EmptyObjectKey,

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("access key not found")]
    AccessKeyNotFound,

    #[error("metadata serialization error: {0}")]
    Serialization(String),

    // Auth errors
    #[error("access denied")]
    AccessDenied,

    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("operation not implemented")]
    NotImplemented,

    // Cluster errors
    #[error("replication quorum not reached: got={acks} required={required}")]
    QuorumNotReached { acks: usize, required: usize },

    #[error("leader proxy failed: {0}")]
    ProxyFailed(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } | Self::AccessKeyNotFound
        )
    }

    /// Get HTTP status code for S3 API compatibility
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::InvalidBucketName(_) | Self::EmptyObjectKey | Self::InvalidRequest(_) => 400,

            Self::Unauthorized => 401,

            Self::AccessDenied => 403,

            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } | Self::AccessKeyNotFound => 404,

            Self::BucketNotEmpty(_) => 409,

            Self::DiskIo(_) | Self::Serialization(_) | Self::Internal(_) => 500,

            Self::NotImplemented => 501,

            Self::QuorumNotReached { .. } | Self::ProxyFailed(_) => 503,
        }
    }

    /// Get S3 error code for API compatibility
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::AccessDenied | Self::Unauthorized => "AccessDenied",
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::EmptyObjectKey | Self::InvalidRequest(_) => "InvalidRequest",
            Self::NotImplemented => "NotImplemented",
            Self::QuorumNotReached { .. } | Self::ProxyFailed(_) => "ServiceUnavailable",
            _ => "InternalError",
        }
    }
}
