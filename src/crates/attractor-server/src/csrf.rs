//! CSRF defense for the submission server: POST requests
//! with an `Origin` header must resolve to a localhost-family host;
//! requests without `Origin` pass through (programmatic callers). The
//! browser always sets `Origin` on cross-site POSTs, so this blocks a
//! malicious page on another origin from driving the API via the victim's
//! browser while leaving CLI/script callers (which never set `Origin`)
//! unaffected.

use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::ApiError;

pub async fn enforce_local_origin(request: Request, next: Next) -> Response {
    if request.method() == Method::POST {
        if let Some(origin) = request.headers().get(axum::http::header::ORIGIN) {
            if !is_localhost_origin(origin) {
                let origin_str = origin.to_str().unwrap_or("<non-utf8>").to_string();
                return ApiError::CrossOrigin(origin_str).into_response();
            }
        }
    }
    next.run(request).await
}

/// Also used by [`crate::routes`] to build the server's `CorsLayer`, so CORS
/// and CSRF agree on exactly which origins count as "local".
pub(crate) fn is_localhost_origin(origin: &HeaderValue) -> bool {
    let Ok(origin) = origin.to_str() else { return false };
    let Some(host_and_port) = origin.split("://").nth(1) else { return false };
    let host = host_and_port.split(':').next().unwrap_or("");
    matches!(host, "localhost" | "127.0.0.1" | "::1" | "[::1]")
}
