//! Caller authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use ferry_core::{CallerIdentity, CatalogError};

use super::ErrorResponse;
use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Header carrying the caller's catalog API key.
pub const API_KEY_HEADER: &str = "SciCat-API-Key";

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Read the caller's API key from `SciCat-API-Key`, falling back to an
/// `Authorization: Bearer` header.
fn api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        if !key.is_empty() {
            return Some(key.to_string());
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|key| !key.is_empty())
        .map(str::to_string)
}

fn unauthorized(message: &str, details: Option<String>) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            message: message.to_string(),
            details,
        }),
    )
        .into_response()
}

/// Authentication middleware resolving the caller's API key through the
/// catalog.
///
/// On success the caller's `CallerIdentity` is stored in the request
/// extensions; an unknown key yields 401, a catalog failure 500.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(key) = api_key(request.headers()) else {
        AUTH_FAILURES_TOTAL.with_label_values(&["missing_key"]).inc();
        return unauthorized("no access token was provided with the request", None);
    };

    match state.catalog().user_identity(&key).await {
        Ok(identity) => {
            debug!(user = %identity.username, "Caller authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(CatalogError::AuthenticationFailed(details)) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["invalid_key"]).inc();
            unauthorized(
                "the access token provided with the request is invalid",
                Some(details),
            )
        }
        Err(e) => {
            AUTH_FAILURES_TOTAL.with_label_values(&["catalog_error"]).inc();
            warn!(error = %e, "Caller identity lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    message: "couldn't verify the access token".to_string(),
                    details: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Extractor for the authenticated caller.
///
/// Rejects with 401 when no identity is present, which only happens if the
/// route is not behind `auth_middleware`.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerIdentity);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = Response;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let caller = parts
            .extensions
            .get::<CallerIdentity>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| unauthorized("no user was found", None));
        std::future::ready(caller)
    }
}
