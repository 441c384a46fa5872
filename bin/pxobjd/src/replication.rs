//! Internal replication surface under `/_cluster`.
//!
//! Accepts peer-originated writes only: bearer token, the internal
//! replication marker, and a verified peer client certificate are all
//! required. Writes apply to the local store and are never re-replicated.

use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Router,
};
use bytes::Bytes;
use tracing::debug;

use pxobj_cluster::Cluster;
use pxobj_common::error::Error;
use pxobj_common::types::AccessKey;

use crate::serve::PeerIdentity;
use crate::state::AppState;

/// Build the `/_cluster` router.
///
/// A wrong method on a known path answers 404; the bearer, marker, and
/// client-certificate gates still run first.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/_cluster/health", get(health).fallback(not_found))
        .route(
            "/_cluster/replicate/buckets/{name}",
            post(create_bucket).delete(delete_bucket).fallback(not_found),
        )
        .route(
            "/_cluster/replicate/objects/{bucket}/{*key}",
            put(put_object).delete(delete_object).fallback(not_found),
        )
        .route(
            "/_cluster/replicate/access",
            post(put_access).fallback(not_found),
        )
        .route(
            "/_cluster/replicate/access/{access_key}",
            delete(delete_access).fallback(not_found),
        )
        .layer(middleware::from_fn_with_state(state.clone(), gate_layer))
        .with_state(state)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

/// Bearer for everything; marker and mTLS for the replicate routes.
async fn gate_layer(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    if !crate::admin::bearer_ok(&state, &request) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    if request.uri().path() == "/_cluster/health" {
        return next.run(request).await;
    }
    if !Cluster::is_internal_replication(request.headers()) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }
    let verified = request
        .extensions()
        .get::<PeerIdentity>()
        .is_some_and(|peer| peer.client_cert_verified);
    if !verified {
        return (StatusCode::FORBIDDEN, "mTLS required").into_response();
    }
    next.run(request).await
}

async fn health() -> &'static str {
    "ok"
}

fn bad_request(err: &Error) -> Response {
    (StatusCode::BAD_REQUEST, err.to_string()).into_response()
}

async fn create_bucket(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    debug!(bucket = %name, "applying replicated bucket create");
    match state.store.create_bucket(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bad_request(&err),
    }
}

async fn delete_bucket(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.store.delete_bucket(&name) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) if err.is_not_found() => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::CONFLICT, err.to_string()).into_response(),
    }
}

async fn put_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
    payload: Bytes,
) -> Response {
    debug!(%bucket, %key, size = payload.len(), "applying replicated object put");
    match state
        .store
        .put_object(&bucket, &key, std::io::Cursor::new(&payload))
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bad_request(&err),
    }
}

async fn delete_object(
    State(state): State<Arc<AppState>>,
    Path((bucket, key)): Path<(String, String)>,
) -> Response {
    match state.store.delete_object(&bucket, &key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) if err.is_not_found() => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bad_request(&err),
    }
}

async fn put_access(State(state): State<Arc<AppState>>, payload: Bytes) -> Response {
    let Ok(access) = serde_json::from_slice::<AccessKey>(&payload) else {
        return (StatusCode::BAD_REQUEST, "invalid body").into_response();
    };
    match state.store.put_access(access) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => bad_request(&err),
    }
}

async fn delete_access(
    State(state): State<Arc<AppState>>,
    Path(access_key): Path<String>,
) -> Response {
    match state.store.delete_access(&access_key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}
