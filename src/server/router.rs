//! HTTP router, handlers and the client-certificate middleware

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Request},
    http::{StatusCode, request::Parts},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, warn};

use crate::mtls::{Authorization, ConnectionInfo, PeerCertificate};

/// Message returned for every unauthorized request.
pub const REJECTION_MESSAGE: &str = "Client certificate verification failed";

/// Create the router
///
/// Every route, the fallback included, sits behind [`require_client_cert`].
pub fn create_router() -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .fallback(not_found_handler)
        .layer(middleware::from_fn(require_client_cert))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// Reject requests whose connection is not authenticated.
///
/// The rejection carries no detail beyond [`REJECTION_MESSAGE`]; the reason
/// is logged server-side.
pub async fn require_client_cert(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_owned();

    let Some(info) = request.extensions().get::<Arc<ConnectionInfo>>().cloned() else {
        warn!(path = %path, "Request without connection info, rejecting");
        return rejection_response();
    };

    match &info.authorization {
        Authorization::Authenticated(peer) => {
            debug!(peer = %info.remote_addr, client = %peer.display_name(), path = %path, "Authorized request");
            next.run(request).await
        }
        Authorization::Rejected(reason) => {
            warn!(
                peer = %info.remote_addr,
                path = %path,
                reason = %reason,
                "Client certificate verification failed"
            );
            rejection_response()
        }
    }
}

/// Extractor for handlers that need the verified peer.
///
/// Rejects with the same 401 payload as the middleware, so a handler taking
/// it can never run for an unauthenticated connection.
#[derive(Debug, Clone)]
pub struct AuthenticatedPeer {
    /// The verified leaf certificate.
    pub certificate: PeerCertificate,
    /// The connection it arrived on.
    pub connection: Arc<ConnectionInfo>,
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedPeer {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let connection = parts
            .extensions
            .get::<Arc<ConnectionInfo>>()
            .cloned()
            .ok_or_else(rejection_response)?;

        let certificate = connection
            .authorization
            .peer()
            .cloned()
            .ok_or_else(rejection_response)?;

        Ok(Self {
            certificate,
            connection,
        })
    }
}

/// `GET /` greeting
async fn root_handler(peer: AuthenticatedPeer) -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "message": format!(
            "Hello, {}! mTLS connection established.",
            peer.certificate.display_name()
        ),
    }))
}

/// `GET /health` echoes the verified certificate and TLS parameters
async fn health_handler(peer: AuthenticatedPeer) -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "message": "mTLS connection verified",
        "clientInfo": peer.certificate,
        "tls": peer.connection.tls,
    }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": "Not found",
        })),
    )
}

/// Create a 401 rejection response
fn rejection_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "message": REJECTION_MESSAGE,
        })),
    )
        .into_response()
}
