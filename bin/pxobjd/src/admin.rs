//! Admin lifecycle surface: bucket and access-key management.
//!
//! Bearer-token authenticated. Mutations arriving at a follower are
//! proxied to the leader with the same discipline as the S3 surface.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, post},
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use pxobj_cluster::{Cluster, Service};
use pxobj_common::error::Error;
use pxobj_common::types::AccessKey;

use crate::state::AppState;

/// Build the `/admin` router.
///
/// A wrong method on a known path answers 404, like any unknown path on
/// this listener; the bearer check still runs first.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/admin/buckets", post(create_bucket).fallback(not_found))
        .route(
            "/admin/buckets/{name}",
            delete(delete_bucket).fallback(not_found),
        )
        .route("/admin/access", post(create_access).fallback(not_found))
        .route(
            "/admin/access/{access_key}",
            delete(delete_access).fallback(not_found),
        )
        .layer(middleware::from_fn_with_state(state.clone(), admin_layer))
        .with_state(state)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Bearer check plus leader routing for mutations.
async fn admin_layer(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if !bearer_ok(&state, &request) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    if state.cluster.enabled()
        && !Cluster::is_internal_replication(request.headers())
        && matches!(*request.method(), Method::POST | Method::DELETE)
        && !state.cluster.is_leader().await
    {
        return crate::s3::proxy(&state, request, Service::Admin).await;
    }
    next.run(request).await
}

pub(crate) fn bearer_ok(state: &AppState, request: &Request) -> bool {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(&format!("Bearer {}", state.token))
}

fn status_error(err: &Error) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, err.to_string()).into_response()
}

#[derive(Deserialize)]
struct CreateBucketBody {
    name: String,
}

async fn create_bucket(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<CreateBucketBody>(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    };
    if req.name.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    }
    if let Err(err) = state.store.create_bucket(&req.name) {
        return status_error(&err);
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::POST,
            &format!("/_cluster/replicate/buckets/{}", req.name),
            None,
            Bytes::new(),
        )
        .await
    {
        error!(%err, bucket = %req.name, "bucket create replication failed");
        return status_error(&err);
    }
    StatusCode::CREATED.into_response()
}

async fn delete_bucket(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    if let Err(err) = state.store.delete_bucket(&name) {
        return status_error(&err);
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::DELETE,
            &format!("/_cluster/replicate/buckets/{name}"),
            None,
            Bytes::new(),
        )
        .await
    {
        error!(%err, bucket = %name, "bucket delete replication failed");
        return status_error(&err);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAccessBody {
    bucket: String,
    #[serde(default)]
    read_only: bool,
}

async fn create_access(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let Ok(req) = serde_json::from_slice::<CreateAccessBody>(&body) else {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    };
    if req.bucket.is_empty() {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    }
    let access: AccessKey = match state.store.create_access(&req.bucket, req.read_only) {
        Ok(access) => access,
        Err(err) => return status_error(&err),
    };
    let payload = match serde_json::to_vec(&access) {
        Ok(payload) => payload,
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };
    if let Err(err) = state
        .cluster
        .replicate(
            Method::POST,
            "/_cluster/replicate/access",
            Some("application/json"),
            Bytes::from(payload),
        )
        .await
    {
        error!(%err, bucket = %req.bucket, "access create replication failed");
        return status_error(&err);
    }
    Json(access).into_response()
}

async fn delete_access(
    State(state): State<Arc<AppState>>,
    Path(access_key): Path<String>,
) -> Response {
    if let Err(err) = state.store.delete_access(&access_key) {
        return status_error(&err);
    }
    if let Err(err) = state
        .cluster
        .replicate(
            Method::DELETE,
            &format!("/_cluster/replicate/access/{access_key}"),
            None,
            Bytes::new(),
        )
        .await
    {
        error!(%err, "access delete replication failed");
        return status_error(&err);
    }
    StatusCode::NO_CONTENT.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use pxobj_cluster::Cluster;
    use pxobj_common::config::{ClusterTopology, Config};
    use pxobj_store::Store;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const TOKEN: &str = "test-token";

    fn test_state(dir: &TempDir) -> Arc<AppState> {
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            s3_port: 9000,
            admin_port: 19000,
            admin_token: TOKEN.into(),
            tls: None,
            cluster: ClusterTopology {
                pod_name: "pxobj-0".into(),
                namespace: "default".into(),
                service_name: "pxobj".into(),
                headless_service_name: "pxobj-headless".into(),
                replicas: 1,
            },
        };
        Arc::new(AppState {
            store: Store::open(&config.data_dir).unwrap(),
            cluster: Cluster::new(&config).unwrap(),
            token: config.admin_token.clone(),
        })
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: &str) -> Request {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let response = app
            .oneshot(request("POST", "/admin/buckets", None, r#"{"name":"demo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_bearer_is_unauthorized() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let response = app
            .oneshot(request("POST", "/admin/buckets", Some("nope"), r#"{"name":"demo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unmatched_method_is_not_found_after_bearer() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));

        for (method, target) in [
            ("GET", "/admin/buckets"),
            ("PUT", "/admin/buckets/demo"),
            ("GET", "/admin/access"),
        ] {
            let response = app
                .clone()
                .oneshot(request(method, target, Some(TOKEN), ""))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        // The bearer check still comes first.
        let response = app
            .oneshot(request("GET", "/admin/buckets", None, ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_and_delete_bucket() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(request("POST", "/admin/buckets", Some(TOKEN), r#"{"name":"demo"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(state.store.list_buckets().len(), 1);

        let response = app
            .oneshot(request("DELETE", "/admin/buckets/demo", Some(TOKEN), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.store.list_buckets().is_empty());
    }

    #[tokio::test]
    async fn test_create_bucket_rejects_bad_body() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        for body in ["not json", "{}", r#"{"name":""}"#] {
            let response = app
                .clone()
                .oneshot(request("POST", "/admin/buckets", Some(TOKEN), body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_delete_missing_bucket_is_not_found() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let response = app
            .oneshot(request("DELETE", "/admin/buckets/none", Some(TOKEN), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_access_key_lifecycle() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        state.store.create_bucket("demo").unwrap();
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/admin/access",
                Some(TOKEN),
                r#"{"bucket":"demo","readOnly":true}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let access: AccessKey = serde_json::from_slice(&bytes).unwrap();
        assert!(access.access_key.starts_with("PX"));
        assert!(access.read_only);
        assert_eq!(access.bucket, "demo");
        assert!(state.store.lookup_access_key(&access.access_key).is_ok());

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                &format!("/admin/access/{}", access.access_key),
                Some(TOKEN),
                "",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(state.store.lookup_access_key(&access.access_key).is_err());

        // Deleting an unknown key stays 204.
        let response = app
            .oneshot(request("DELETE", "/admin/access/PXUNKNOWN", Some(TOKEN), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_create_access_requires_existing_bucket() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir));
        let response = app
            .oneshot(request(
                "POST",
                "/admin/access",
                Some(TOKEN),
                r#"{"bucket":"none","readOnly":false}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
