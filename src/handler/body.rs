//! Request body collection under the configured ceiling

use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, CONTENT_LENGTH};
use hyper::StatusCode;

use crate::http::{self, HttpResponse};
use crate::logger;

/// Reject early when `Content-Length` already announces an oversized body
pub fn check_body_size(headers: &HeaderMap, max_body_size: u64) -> Option<HttpResponse> {
    let content_length = headers.get(CONTENT_LENGTH)?;
    content_length.to_str().map_or_else(
        |_| {
            logger::log_warning("Content-Length header contains non-ASCII characters");
            None
        },
        |size_str| match size_str.parse::<u64>() {
            Ok(size) if size > max_body_size => {
                logger::log_warning(&format!(
                    "Request body too large: {size} bytes (max: {max_body_size})"
                ));
                Some(http::build_413_response(max_body_size))
            }
            Err(_) => {
                logger::log_warning(&format!(
                    "Invalid Content-Length value: '{size_str}', skipping size check"
                ));
                None
            }
            _ => None,
        },
    )
}

/// Collect the whole body, failing with a ready response past `max_body_size`
pub async fn read_body<B>(body: B, max_body_size: u64) -> Result<Bytes, HttpResponse>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            logger::log_warning(&format!("Request body exceeded {max_body_size} bytes"));
            Err(http::build_413_response(max_body_size))
        }
        Err(e) => {
            logger::log_warning(&format!("Failed to read request body: {e}"));
            Err(http::error_response(
                StatusCode::BAD_REQUEST,
                "Failed to read request body",
            ))
        }
    }
}
