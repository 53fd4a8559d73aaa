//! HTTP response building module
//!
//! Builders for every response the server emits, independent of routing.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::cache::CachePolicy;

pub type HttpResponse = Response<Full<Bytes>>;

const JSON: &str = "application/json; charset=utf-8";

/// Build a JSON response from any serializable body
pub fn json_response<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> HttpResponse {
    match serde_json::to_vec(body) {
        Ok(json) => Response::builder()
            .status(status)
            .header("Content-Type", JSON)
            .header("Content-Length", json.len())
            .body(Full::new(Bytes::from(json)))
            .unwrap_or_else(|e| {
                log_build_error(status.as_str(), &e);
                Response::new(Full::new(Bytes::new()))
            }),
        Err(e) => {
            crate::logger::log_error(&format!("Failed to serialize response: {e}"));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
        }
    }
}

/// `{"error": message}` with the given status
pub fn error_response(status: StatusCode, message: &str) -> HttpResponse {
    let body = serde_json::json!({ "error": message }).to_string();
    Response::builder()
        .status(status)
        .header("Content-Type", JSON)
        .header("Content-Length", body.len())
        .body(Full::new(Bytes::from(body)))
        .unwrap_or_else(|e| {
            log_build_error(status.as_str(), &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 404 Not Found response
pub fn build_404_response() -> HttpResponse {
    error_response(StatusCode::NOT_FOUND, "Not Found")
}

/// Build 413 Payload Too Large response
pub fn build_413_response(max_body_size: u64) -> HttpResponse {
    error_response(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {max_body_size} bytes"),
    )
}

/// Build 429 Too Many Requests response
pub fn build_429_response(retry_after_secs: u64) -> HttpResponse {
    const MESSAGE: &str = "Too many requests, please try again later.";
    Response::builder()
        .status(StatusCode::TOO_MANY_REQUESTS)
        .header("Content-Type", "text/plain; charset=utf-8")
        .header("Content-Length", MESSAGE.len())
        .header("Retry-After", retry_after_secs)
        .body(Full::new(Bytes::from_static(MESSAGE.as_bytes())))
        .unwrap_or_else(|e| {
            log_build_error("429", &e);
            Response::new(Full::new(Bytes::from_static(MESSAGE.as_bytes())))
        })
}

/// Build 304 Not Modified response
pub fn build_304_response(etag: &str, policy: CachePolicy) -> HttpResponse {
    Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header("ETag", etag)
        .header("Cache-Control", policy.to_header_value())
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("304", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 200 file response with validator and cache control
pub fn build_file_response(
    data: Bytes,
    content_type: &str,
    etag: &str,
    policy: CachePolicy,
) -> HttpResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Content-Length", data.len())
        .header("ETag", etag)
        .header("Cache-Control", policy.to_header_value())
        .body(Full::new(data))
        .unwrap_or_else(|e| {
            log_build_error("200", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
