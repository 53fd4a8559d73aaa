//! `GET /api/content` and `POST /api/content`

use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::http::request::Parts;
use hyper::StatusCode;
use serde_json::Value;

use super::body::{check_body_size, read_body};
use crate::config::AppState;
use crate::http::{self, HttpResponse};
use crate::logger;
use crate::store::ContentDocument;

/// Return the whole document
pub async fn handle_get(state: &AppState) -> HttpResponse {
    http::json_response(StatusCode::OK, &state.content.get().await)
}

/// Shallow-merge the JSON object in the body into the document
pub async fn handle_post<B>(parts: &Parts, body: B, state: &AppState) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let max_body_size = state.config.http.max_body_size;
    if let Some(resp) = check_body_size(&parts.headers, max_body_size) {
        return resp;
    }
    let body = match read_body(body, max_body_size).await {
        Ok(body) => body,
        Err(resp) => return resp,
    };

    let partial = match parse_partial(&parts.headers, &body) {
        Ok(partial) => partial,
        Err(message) => {
            logger::log_warning(&format!("[CONTENT] Rejected update: {message}"));
            return http::error_response(StatusCode::BAD_REQUEST, &message);
        }
    };

    match state.content.update(partial).await {
        Ok(()) => http::json_response(StatusCode::OK, &serde_json::json!({ "success": true })),
        Err(e) => {
            logger::log_error(&format!("POST /api/content: {e}"));
            http::error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save content")
        }
    }
}

/// Decode a partial document.
///
/// Bodies that are not declared as JSON, and empty JSON bodies, carry no keys.
pub fn parse_partial(headers: &HeaderMap, body: &[u8]) -> Result<ContentDocument, String> {
    if !is_json(headers) || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ContentDocument::new());
    }

    match serde_json::from_slice(body) {
        Ok(Value::Object(partial)) => Ok(partial),
        Ok(_) => Err("Content update must be a JSON object".to_string()),
        Err(e) => Err(format!("Invalid JSON body: {e}")),
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|mime| {
            let mime = mime.trim().to_ascii_lowercase();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}
