//! S3 API handlers.

use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, put},
    Extension, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use quick_xml::se::to_string as to_xml;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::trace::TraceLayer;
use tracing::error;

use pxobj_auth::{AuthContext, Credential, CredentialsResolver};
use pxobj_cluster::{Cluster, ProxiedResponse, Service};
use pxobj_common::error::Error;
use pxobj_store::Store;

use crate::state::AppState;

const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// Maximum single-part upload size. Bodies are buffered in memory so the
/// leader can retransmit them to peers; larger objects are out of scope.
const MAX_PAYLOAD: usize = 100 * 1024 * 1024;

/// Build the public S3 router.
///
/// Any method or path outside the route matrix answers 501, after the
/// same authentication as everything else.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_buckets).fallback(not_implemented))
        .route(
            "/{bucket}",
            put(create_bucket)
                .delete(delete_bucket)
                .get(get_bucket)
                .fallback(not_implemented),
        )
        .route(
            "/{bucket}/{*key}",
            put(put_object)
                .get(get_object)
                .head(head_object)
                .delete(delete_object)
                .fallback(not_implemented),
        )
        .fallback(not_implemented)
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_implemented() -> Response {
    error_response(&Error::NotImplemented)
}

struct StoreResolver<'a>(&'a Store);

impl CredentialsResolver for StoreResolver<'_> {
    fn lookup(&self, access_key: &str) -> Option<Credential> {
        let access = self.0.lookup_access_key(access_key).ok()?;
        Some(Credential {
            secret_key: access.secret_key,
            bucket: access.bucket,
            read_only: access.read_only,
        })
    }
}

/// Authentication and routing discipline applied to every S3 request:
/// SigV4, bucket scope, read-only enforcement, then leader proxying for
/// mutations arriving at a follower.
async fn auth_layer(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = match pxobj_auth::verify(&request, &StoreResolver(&state.store)) {
        Ok(auth) => auth,
        Err(err) => return s3_error(StatusCode::FORBIDDEN, "AccessDenied", &err.to_string()),
    };

    let (bucket, _key) = split_path(request.uri().path());
    if !bucket.is_empty() && auth.bucket != bucket {
        return s3_error(StatusCode::FORBIDDEN, "AccessDenied", "bucket not allowed");
    }
    if auth.read_only
        && matches!(
            *request.method(),
            Method::PUT | Method::POST | Method::DELETE
        )
    {
        return s3_error(StatusCode::FORBIDDEN, "AccessDenied", "read-only credentials");
    }

    let mutating = !Cluster::is_internal_replication(request.headers())
        && matches!(*request.method(), Method::PUT | Method::DELETE)
        && !bucket.is_empty();
    if should_proxy_to_leader(&state, mutating).await {
        return proxy(&state, request, Service::S3).await;
    }

    request.extensions_mut().insert(auth);
    next.run(request).await
}

async fn should_proxy_to_leader(state: &AppState, mutating: bool) -> bool {
    if !state.cluster.enabled() || !mutating {
        return false;
    }
    !state.cluster.is_leader().await
}

/// Replay the request on the leader and relay its response verbatim.
pub(crate) async fn proxy(state: &AppState, request: Request, service: Service) -> Response {
    let (parts, body) = request.into_parts();
    let payload = match axum::body::to_bytes(body, MAX_PAYLOAD).await {
        Ok(payload) => payload,
        Err(err) => {
            return s3_error(StatusCode::BAD_REQUEST, "InvalidRequest", &err.to_string())
        }
    };
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();

    match state
        .cluster
        .proxy_to_leader(service, parts.method, &path_and_query, parts.headers, payload)
        .await
    {
        Ok(proxied) => relay(proxied),
        Err(err) => {
            error!(%err, "failed to proxy to leader");
            s3_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "InternalError",
                &err.to_string(),
            )
        }
    }
}

fn relay(proxied: ProxiedResponse) -> Response {
    let mut builder = Response::builder().status(proxied.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = proxied.headers;
    }
    builder.body(Body::from(proxied.body)).unwrap()
}

// XML response types

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
struct ListAllMyBucketsResult {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Buckets")]
    buckets: Buckets,
}

#[derive(Serialize)]
struct Buckets {
    #[serde(rename = "Bucket")]
    bucket: Vec<BucketEntry>,
}

#[derive(Serialize)]
struct BucketEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "CreationDate")]
    creation_date: String,
}

#[derive(Serialize)]
#[serde(rename = "ListBucketResult")]
struct ListBucketResult {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Prefix")]
    prefix: String,
    #[serde(rename = "MaxKeys")]
    max_keys: i64,
    #[serde(rename = "IsTruncated")]
    is_truncated: bool,
    #[serde(rename = "NextContinuationToken")]
    #[serde(skip_serializing_if = "Option::is_none")]
    next_continuation_token: Option<String>,
    #[serde(rename = "Contents")]
    contents: Vec<ObjectContent>,
}

#[derive(Serialize)]
struct ObjectContent {
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "LastModified")]
    last_modified: String,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size")]
    size: u64,
    #[serde(rename = "StorageClass")]
    storage_class: &'static str,
}

#[derive(Serialize)]
#[serde(rename = "Error")]
struct ErrorBody {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message")]
    message: String,
}

fn xml_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
        to_xml(value).unwrap_or_default()
    );
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(xml))
        .unwrap()
}

fn s3_error(status: StatusCode, code: &str, message: &str) -> Response {
    xml_response(
        status,
        &ErrorBody {
            code: code.to_string(),
            message: message.to_string(),
        },
    )
}

fn error_response(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    s3_error(status, err.s3_error_code(), &err.to_string())
}

fn rfc3339(t: DateTime<Utc>) -> String {
    t.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn quoted_etag(etag: &str) -> String {
    format!("\"{etag}\"")
}

/// `/b/k...` -> (bucket, key); either may be empty.
fn split_path(path: &str) -> (String, String) {
    let path = path.trim_start_matches('/');
    match path.split_once('/') {
        Some((bucket, key)) => (bucket.to_string(), key.to_string()),
        None => (path.to_string(), String::new()),
    }
}

// Handlers

async fn list_buckets(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthContext>,
) -> Response {
    let buckets = state
        .store
        .list_buckets()
        .into_iter()
        .filter(|b| b.name == auth.bucket)
        .map(|b| BucketEntry {
            name: b.name,
            creation_date: rfc3339(b.created_at),
        })
        .collect();
    xml_response(
        StatusCode::OK,
        &ListAllMyBucketsResult {
            xmlns: S3_XMLNS,
            buckets: Buckets { bucket: buckets },
        },
    )
}

async fn create_bucket(State(state): State<Arc<AppState>>, Path(bucket): Path<String>) -> Response {
    if let Err(err) = state.store.create_bucket(&bucket) {
        return error_response(&err);
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::POST,
            &format!("/_cluster/replicate/buckets/{bucket}"),
            None,
            Bytes::new(),
        )
        .await
    {
        return error_response(&err);
    }
    StatusCode::OK.into_response()
}

async fn delete_bucket(State(state): State<Arc<AppState>>, Path(bucket): Path<String>) -> Response {
    if let Err(err) = state.store.delete_bucket(&bucket) {
        return error_response(&err);
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::DELETE,
            &format!("/_cluster/replicate/buckets/{bucket}"),
            None,
            Bytes::new(),
        )
        .await
    {
        return error_response(&err);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Default, Deserialize)]
struct ListObjectsParams {
    #[serde(rename = "list-type")]
    list_type: Option<String>,
    prefix: Option<String>,
    #[serde(rename = "continuation-token")]
    continuation_token: Option<String>,
    #[serde(rename = "max-keys")]
    max_keys: Option<String>,
}

async fn get_bucket(
    State(state): State<Arc<AppState>>,
    Path(bucket): Path<String>,
    Query(params): Query<ListObjectsParams>,
) -> Response {
    if params.list_type.as_deref() != Some("2") {
        return error_response(&Error::NotImplemented);
    }
    let prefix = params.prefix.unwrap_or_default();
    let token = params.continuation_token.unwrap_or_default();
    let max_keys = params
        .max_keys
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);

    let page = match state.store.list_objects_v2(&bucket, &prefix, &token, max_keys) {
        Ok(page) => page,
        Err(err) => return error_response(&err),
    };
    let contents = page
        .objects
        .into_iter()
        .map(|o| ObjectContent {
            key: o.key,
            last_modified: rfc3339(o.mod_time),
            etag: quoted_etag(&o.etag),
            size: o.size,
            storage_class: "STANDARD",
        })
        .collect();
    xml_response(
        StatusCode::OK,
        &ListBucketResult {
            xmlns: S3_XMLNS,
            name: bucket,
            prefix,
            max_keys,
            is_truncated: page.truncated,
            next_continuation_token: page.next_token,
            contents,
        },
    )
}

async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    payload: Bytes,
) -> Response {
    let meta = match state.store.put_object(&bucket, &key, Cursor::new(&payload)) {
        Ok(meta) => meta,
        Err(err) => return error_response(&err),
    };
    if let Err(err) = state
        .cluster
        .replicate(
            Method::PUT,
            &format!("/_cluster/replicate/objects/{bucket}/{key}"),
            Some("application/octet-stream"),
            payload,
        )
        .await
    {
        return error_response(&err);
    }
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quoted_etag(&meta.etag))
        .body(Body::empty())
        .unwrap()
}

async fn get_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let (meta, file) = match state.store.open_object(&bucket, &key) {
        Ok(found) => found,
        Err(err) => return error_response(&err),
    };
    let stream = ReaderStream::new(tokio::fs::File::from_std(file));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quoted_etag(&meta.etag))
        .header(header::CONTENT_LENGTH, meta.size)
        .header(header::LAST_MODIFIED, http_date(meta.mod_time))
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn head_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    let meta = match state.store.get_object_meta(&bucket, &key) {
        Ok(meta) => meta,
        Err(err) => return error_response(&err),
    };
    Response::builder()
        .status(StatusCode::OK)
        .header(header::ETAG, quoted_etag(&meta.etag))
        .header(header::CONTENT_LENGTH, meta.size)
        .header(header::LAST_MODIFIED, http_date(meta.mod_time))
        .body(Body::empty())
        .unwrap()
}

async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    if let Err(err) = state.store.delete_object(&bucket, &key) {
        if !err.is_not_found() {
            return error_response(&err);
        }
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::DELETE,
            &format!("/_cluster/replicate/objects/{bucket}/{key}"),
            None,
            Bytes::new(),
        )
        .await
    {
        return error_response(&err);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use pxobj_cluster::Cluster;
    use pxobj_common::config::{ClusterTopology, Config};
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const HOST: &str = "h:9000";
    const AMZ_DATE: &str = "20240101T000000Z";
    const DATE: &str = "20240101";

    fn test_config(dir: &TempDir) -> Config {
        Config {
            data_dir: dir.path().to_path_buf(),
            s3_port: 9000,
            admin_port: 19000,
            admin_token: "test-token".into(),
            tls: None,
            cluster: ClusterTopology {
                pod_name: "pxobj-0".into(),
                namespace: "default".into(),
                service_name: "pxobj".into(),
                headless_service_name: "pxobj-headless".into(),
                replicas: 1,
            },
        }
    }

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let config = test_config(dir);
        Arc::new(AppState {
            store: Store::open(&config.data_dir).unwrap(),
            cluster: Cluster::new(&config).unwrap(),
            token: config.admin_token.clone(),
        })
    }

    fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Client-side SigV4 signer mirroring what the AWS SDKs send.
    fn signed_request(
        method: &str,
        path_and_query: &str,
        access_key: &str,
        secret_key: &str,
        body: Vec<u8>,
    ) -> Request {
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, q),
            None => (path_and_query, ""),
        };
        let mut pairs: Vec<String> = query
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| {
                let (k, v) = p.split_once('=').unwrap_or((p, ""));
                format!("{k}={v}")
            })
            .collect();
        pairs.sort();
        let canonical_query = pairs.join("&");

        let canonical_request = format!(
            "{method}\n{path}\n{canonical_query}\nhost:{HOST}\nx-amz-content-sha256:UNSIGNED-PAYLOAD\nx-amz-date:{AMZ_DATE}\n\nhost;x-amz-content-sha256;x-amz-date\nUNSIGNED-PAYLOAD"
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{AMZ_DATE}\n{DATE}/us-east-1/s3/aws4_request\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );
        let mut key = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), DATE.as_bytes());
        for part in ["us-east-1", "s3", "aws4_request"] {
            key = hmac_sha256(&key, part.as_bytes());
        }
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes()));

        Request::builder()
            .method(method)
            .uri(path_and_query)
            .header("Host", HOST)
            .header("X-Amz-Date", AMZ_DATE)
            .header("X-Amz-Content-Sha256", "UNSIGNED-PAYLOAD")
            .header(
                "Authorization",
                format!(
                    "AWS4-HMAC-SHA256 Credential={access_key}/{DATE}/us-east-1/s3/aws4_request, \
                     SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature={signature}"
                ),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    #[tokio::test]
    async fn test_unauthenticated_request_is_denied() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_string(response).await.contains("AccessDenied"));
    }

    #[tokio::test]
    async fn test_put_then_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(signed_request(
                "PUT",
                "/demo/hello.txt",
                &access.access_key,
                &access.secret_key,
                b"hi".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ETAG).unwrap(),
            "\"8f434346648f6b96df89dda901c5176b10a6d83961dd3c1ac88b59b2dc327aa4\""
        );

        let response = app
            .oneshot(signed_request(
                "GET",
                "/demo/hello.txt",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "2");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_string(response).await, "hi");
    }

    #[tokio::test]
    async fn test_bucket_scope_is_enforced_even_for_missing_buckets() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state);

        let response = app
            .oneshot(signed_request(
                "GET",
                "/other/whatever",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_string(response).await.contains("bucket not allowed"));
    }

    #[tokio::test]
    async fn test_read_only_credentials_cannot_mutate() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", true).unwrap();
        let app = router(state);

        let response = app
            .clone()
            .oneshot(signed_request(
                "PUT",
                "/demo/k",
                &access.access_key,
                &access.secret_key,
                b"v".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(body_string(response).await.contains("read-only credentials"));

        // Reads still work.
        let response = app
            .oneshot(signed_request(
                "GET",
                "/demo?list-type=2",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_objects_pagination_through_api() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        for key in ["a", "b", "c"] {
            state
                .store
                .put_object("demo", key, Cursor::new(b"v".to_vec()))
                .unwrap();
        }
        let app = router(state);

        let response = app
            .clone()
            .oneshot(signed_request(
                "GET",
                "/demo?list-type=2&max-keys=2",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<Key>a</Key>"));
        assert!(body.contains("<Key>b</Key>"));
        assert!(!body.contains("<Key>c</Key>"));
        assert!(body.contains("<IsTruncated>true</IsTruncated>"));
        assert!(body.contains("<NextContinuationToken>b</NextContinuationToken>"));

        let response = app
            .oneshot(signed_request(
                "GET",
                "/demo?continuation-token=b&list-type=2&max-keys=2",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        let body = body_string(response).await;
        assert!(body.contains("<Key>c</Key>"));
        assert!(body.contains("<IsTruncated>false</IsTruncated>"));
    }

    #[tokio::test]
    async fn test_delete_bucket_conflict_when_not_empty() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        state
            .store
            .put_object("demo", "k", Cursor::new(b"v".to_vec()))
            .unwrap();
        let app = router(state);

        let response = app
            .oneshot(signed_request(
                "DELETE",
                "/demo",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(body_string(response).await.contains("BucketNotEmpty"));
    }

    #[tokio::test]
    async fn test_delete_object_is_idempotent_through_api() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        state
            .store
            .put_object("demo", "k", Cursor::new(b"v".to_vec()))
            .unwrap();
        let app = router(state);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(signed_request(
                    "DELETE",
                    "/demo/k",
                    &access.access_key,
                    &access.secret_key,
                    Vec::new(),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn test_head_object_reports_metadata() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        state
            .store
            .put_object("demo", "k", Cursor::new(b"body".to_vec()))
            .unwrap();
        let app = router(state);

        let response = app
            .oneshot(signed_request(
                "HEAD",
                "/demo/k",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "4");
    }

    #[tokio::test]
    async fn test_missing_object_is_no_such_key() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state);

        let response = app
            .oneshot(signed_request(
                "GET",
                "/demo/missing",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_string(response).await.contains("NoSuchKey"));
    }

    #[tokio::test]
    async fn test_list_buckets_is_scoped_to_credential() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        state.store.create_bucket("hidden").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state);

        let response = app
            .oneshot(signed_request(
                "GET",
                "/",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("<Name>demo</Name>"));
        assert!(!body.contains("hidden"));
        assert!(body.contains(S3_XMLNS));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_not_implemented() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state);

        // Wrong method on a matched path, and a GET bucket without
        // list-type=2, both answer the S3 501.
        for (method, target) in [("POST", "/demo/k"), ("POST", "/demo"), ("GET", "/demo")] {
            let response = app
                .clone()
                .oneshot(signed_request(
                    method,
                    target,
                    &access.access_key,
                    &access.secret_key,
                    Vec::new(),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
            assert!(body_string(response).await.contains("NotImplemented"));
        }

        // Authentication still runs before the 501.
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/demo/k")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_mutation_without_quorum_returns_503_but_commits_locally() {
        // Three replicas with both peers unreachable: this node presumes
        // itself leader (ordinal 0), commits locally, then fails quorum.
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.cluster.replicas = 3;
        let state = Arc::new(AppState {
            store: Store::open(&config.data_dir).unwrap(),
            cluster: Cluster::new(&config).unwrap(),
            token: config.admin_token.clone(),
        });
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state.clone());

        let response = app
            .oneshot(signed_request(
                "PUT",
                "/demo/k",
                &access.access_key,
                &access.secret_key,
                b"v".to_vec(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(state.store.get_object_meta("demo", "k").is_ok());
    }

    #[tokio::test]
    async fn test_create_bucket_idempotent_through_api() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let access = state.store.create_access("demo", false).unwrap();
        let app = router(state.clone());

        let response = app
            .oneshot(signed_request(
                "PUT",
                "/demo",
                &access.access_key,
                &access.secret_key,
                Vec::new(),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.list_buckets().len(), 1);
    }
}
