//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any client
//! credential, and sends them through the `AuthClient` to the protected API.
//! Upstream responses come back verbatim, including 401/403 once the pipeline
//! has given up on them.

use std::time::Instant;

use auth_pipeline::{AuthClient, Error};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, instrument, warn};
use transport::{ApiRequest, ApiResponse};

use crate::metrics::{self, ServiceMetrics};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Set by callers that must never end the session (background polling).
pub const SKIP_REDIRECT_HEADER: &str = "x-skip-auth-redirect";

/// Upper bound on buffered request bodies.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub client: AuthClient,
    pub metrics: ServiceMetrics,
}

/// JSON error response: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Forward an inbound request through the authenticated pipeline.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let _in_flight = state.metrics.track();
    let started = Instant::now();
    let method = request.method().clone();

    let url = match request.uri().path_and_query() {
        Some(pq) => state.client.endpoints().url_for(pq.as_str()),
        None => state.client.endpoints().base_url().to_string(),
    };
    let skip_redirect = request
        .headers()
        .get(SKIP_REDIRECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
    let headers = forwarded_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.metrics.record_error();
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                &request_id,
            );
        }
    };

    let mut api_request = ApiRequest::new(method.clone(), url).body(body);
    api_request.headers = headers;
    if skip_redirect {
        api_request = api_request.skip_redirect_on_auth_failure();
    }

    let response = match state.client.send(api_request).await {
        Ok(upstream) => upstream_response(upstream, &request_id),
        Err(e) => match e {
            Error::Unauthorized(upstream) | Error::Forbidden(upstream) | Error::Status(upstream) => {
                upstream_response(*upstream, &request_id)
            }
            Error::Timeout(msg) => {
                state.metrics.record_error();
                metrics::record_upstream_error("timeout");
                error!(error = %msg, "upstream timeout");
                error_response(
                    StatusCode::GATEWAY_TIMEOUT,
                    &format!("upstream timeout: {msg}"),
                    &request_id,
                )
            }
            Error::Network(msg) => {
                state.metrics.record_error();
                metrics::record_upstream_error("network");
                error!(error = %msg, "upstream request failed");
                error_response(
                    StatusCode::BAD_GATEWAY,
                    &format!("upstream error: {msg}"),
                    &request_id,
                )
            }
            Error::InvalidRequest(msg) => {
                state.metrics.record_error();
                warn!(error = %msg, "request could not be forwarded");
                error_response(StatusCode::BAD_REQUEST, &msg, &request_id)
            }
            Error::RenewalFailed(e) => {
                state.metrics.record_error();
                error_response(StatusCode::UNAUTHORIZED, &e.to_string(), &request_id)
            }
        },
    };

    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Inbound headers minus hop-by-hop, routing and credential headers.
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        let name_str = name.as_str();
        if is_hop_by_hop(name_str)
            || name_str == "host"
            || name_str == "content-length"
            || name_str == "authorization"
            || name_str == SKIP_REDIRECT_HEADER
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

fn upstream_response(upstream: ApiResponse, request_id: &str) -> Response {
    let mut response = Response::builder().status(upstream.status);
    for (name, value) in &upstream.headers {
        if !is_hop_by_hop(name.as_str()) {
            response = response.header(name, value);
        }
    }
    response
        .body(axum::body::Body::from(upstream.body))
        .unwrap_or_else(|e| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!("response build error: {e}"),
                request_id,
            )
        })
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
