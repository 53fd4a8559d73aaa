//! Cross-origin policy: every origin is allowed

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderValue};
use hyper::{Response, StatusCode};

use crate::http::HttpResponse;

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Mark a response as readable from any origin
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
}

/// Answer an `OPTIONS` request as a CORS preflight.
///
/// Requested headers are reflected back as allowed.
pub fn build_preflight_response(request_headers: &HeaderMap) -> HttpResponse {
    let mut builder = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header("Access-Control-Allow-Methods", ALLOWED_METHODS)
        .header("Vary", "Access-Control-Request-Headers")
        .header("Content-Length", "0");

    if let Some(requested) = request_headers.get("access-control-request-headers") {
        builder = builder.header("Access-Control-Allow-Headers", requested.clone());
    }

    builder.body(Full::new(Bytes::new())).unwrap_or_else(|e| {
        crate::logger::log_error(&format!("Failed to build preflight response: {e}"));
        Response::new(Full::new(Bytes::new()))
    })
}
