//! AWS Signature V4 verification
//!
//! Authenticates S3 API requests against credentials resolved from the
//! local store. Every failure collapses to one opaque error; callers
//! surface `AccessDenied`.
//! Reference: https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html

mod sigv4;

pub use sigv4::{verify, AuthContext, AuthError, Credential, CredentialsResolver};
