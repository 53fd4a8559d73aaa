//! Request routing dispatch module
//!
//! Entry point for HTTP request processing: middleware in order (security
//! headers, CORS, rate limit), then the fixed route table.
//!
//! | Method     | Path             | Handler                       |
//! |------------|------------------|-------------------------------|
//! | POST       | `/api/upload`    | store one multipart file      |
//! | GET/HEAD   | `/uploads/*`     | stored upload or 404          |
//! | GET/HEAD   | `/api/content`   | whole content document        |
//! | POST       | `/api/content`   | shallow merge + save          |
//! | GET/HEAD   | anything else    | frontend asset or entry doc   |

use crate::config::AppState;
use crate::handler::{content, static_files, upload};
use crate::http::{self, HttpResponse};
use crate::logger::{self, AccessLogEntry};
use crate::middleware::{apply_cors_headers, apply_security_headers, build_preflight_response};
use crate::store::upload::PUBLIC_PREFIX;
use http_body_util::Full;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, REFERER, SERVER, USER_AGENT};
use hyper::http::request::Parts;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

const API_PREFIX: &str = "/api";

/// Request context for static lookups
pub struct RequestContext<'a> {
    pub path: &'a str,
    pub if_none_match: Option<String>,
}

impl<'a> RequestContext<'a> {
    fn from_parts(parts: &'a Parts) -> Self {
        Self {
            path: parts.uri.path(),
            if_none_match: parts
                .headers
                .get("if-none-match")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string),
        }
    }
}

/// Main entry point for HTTP request handling
///
/// Generic over the body so the whole pipeline can run on in-memory requests.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
    peer_addr: SocketAddr,
) -> Result<HttpResponse, Infallible>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let started = Instant::now();
    let is_head = req.method() == Method::HEAD;
    let access_entry = state
        .config
        .logging
        .access_log
        .then(|| access_entry_for(&req, peer_addr));

    let mut response = dispatch(req, &state, peer_addr).await;

    apply_security_headers(response.headers_mut());
    apply_cors_headers(response.headers_mut());
    if let Ok(server) = HeaderValue::from_str(&state.config.http.server_name) {
        response.headers_mut().insert(SERVER, server);
    }

    if let Some(mut entry) = access_entry {
        entry.status = response.status().as_u16();
        entry.body_bytes = if is_head {
            0
        } else {
            usize::try_from(response.body().size_hint().lower()).unwrap_or(usize::MAX)
        };
        entry.request_time_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        logger::log_access(&entry, &state.config.logging.access_log_format);
    }

    if is_head {
        let (parts, _) = response.into_parts();
        response = Response::from_parts(parts, Full::new(Bytes::new()));
    }
    Ok(response)
}

/// Preflight and rate limiting, then routing
async fn dispatch<B>(req: Request<B>, state: &AppState, peer_addr: SocketAddr) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    // A preflight ends here and is not counted against the client
    if req.method() == Method::OPTIONS {
        return build_preflight_response(req.headers());
    }

    let decision = state.rate_limiter.check(peer_addr.ip(), Instant::now());
    if !decision.allowed {
        logger::log_warning(&format!(
            "Rate limit exceeded for {}",
            peer_addr.ip()
        ));
        let mut resp = http::build_429_response(decision.reset_secs());
        decision.apply_headers(resp.headers_mut());
        return resp;
    }

    let mut resp = route_request(req, state).await;
    decision.apply_headers(resp.headers_mut());
    resp
}

/// Route table; API routes always win over the frontend fallback
async fn route_request<B>(req: Request<B>, state: &AppState) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (parts, body) = req.into_parts();
    let path = parts.uri.path();
    let is_read = matches!(parts.method, Method::GET | Method::HEAD);

    match (&parts.method, path) {
        (&Method::POST, "/api/upload") => upload::handle_upload(&parts, body, state).await,
        (&Method::GET | &Method::HEAD, "/api/content") => content::handle_get(state).await,
        (&Method::POST, "/api/content") => content::handle_post(&parts, body, state).await,
        _ if is_read && is_under(path, PUBLIC_PREFIX) => {
            let ctx = RequestContext::from_parts(&parts);
            static_files::serve_upload(&ctx, state.uploads.dir()).await
        }
        _ if is_under(path, API_PREFIX) => http::build_404_response(),
        _ if is_read => match &state.frontend {
            Some(frontend) => frontend.serve(&RequestContext::from_parts(&parts)).await,
            None => http::build_404_response(),
        },
        _ => http::error_response(
            StatusCode::NOT_FOUND,
            &format!("Cannot {} {path}", parts.method),
        ),
    }
}

/// `path` equals `prefix` or lies below it
fn is_under(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn access_entry_for<B>(req: &Request<B>, peer_addr: SocketAddr) -> AccessLogEntry {
    let header = |name: hyper::header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    };

    let mut entry = AccessLogEntry::new(
        peer_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = format!("{:?}", req.version())
        .trim_start_matches("HTTP/")
        .to_string();
    entry.referer = header(REFERER);
    entry.user_agent = header(USER_AGENT);
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use http_body_util::BodyExt;
    use hyper::header::{CONTENT_TYPE, HOST};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    const PEER: &str = "127.0.0.1:50000";
    const BOUNDARY: &str = "test-boundary";

    struct Harness {
        dir: TempDir,
        state: Arc<AppState>,
    }

    impl Harness {
        async fn new(with_frontend: bool) -> Self {
            let dir = TempDir::new().unwrap();
            if with_frontend {
                let dist = dir.path().join("dist");
                std::fs::create_dir_all(dist.join("assets")).unwrap();
                std::fs::write(dist.join("index.html"), b"<html>spa</html>").unwrap();
                std::fs::write(dist.join("assets").join("app.js"), b"run()").unwrap();
            }
            let state = Arc::new(AppState::new(&test_config(&dir)).await.unwrap());
            Self { dir, state }
        }

        async fn send(&self, req: Request<Full<Bytes>>) -> HttpResponse {
            self.send_from(req, PEER).await
        }

        async fn send_from(&self, req: Request<Full<Bytes>>, peer: &str) -> HttpResponse {
            handle_request(req, Arc::clone(&self.state), peer.parse().unwrap())
                .await
                .unwrap()
        }

        fn uploads(&self) -> std::path::PathBuf {
            self.dir.path().join("uploads")
        }
    }

    fn test_config(dir: &TempDir) -> Config {
        let missing = dir.path().join("no-config").to_string_lossy().into_owned();
        let mut cfg = Config::load_from(&missing, None).unwrap();
        cfg.logging.access_log = false;
        cfg.http.max_body_size = 1024;
        cfg.storage.uploads_dir = dir.path().join("uploads");
        cfg.storage.content_file = dir.path().join("siteContent.json");
        cfg.storage.frontend_dir = dir.path().join("dist");
        cfg
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::get(path).body(Full::new(Bytes::new())).unwrap()
    }

    fn post_json(path: &str, body: &Value) -> Request<Full<Bytes>> {
        Request::post(path)
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    fn upload_request(field: &str, filename: &str, data: &[u8]) -> Request<Full<Bytes>> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post("/api/upload")
            .header(HOST, "example.test:3001")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Full::new(Bytes::from(body)))
            .unwrap()
    }

    async fn body_bytes(resp: HttpResponse) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    async fn body_json(resp: HttpResponse) -> Value {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_fetch_round_trip() {
        let h = Harness::new(false).await;
        let data = b"\x00\xffraw bytes\r\n--not-a-boundary";

        let resp = h.send(upload_request("file", "photo one.png", data)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let url = body_json(resp).await["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("http://example.test:3001/uploads/"));
        assert!(url.ends_with("-photo%20one.png"));

        let path = url.trim_start_matches("http://example.test:3001");
        let fetched = h.send(get(path)).await;
        assert_eq!(fetched.status(), StatusCode::OK);
        assert_eq!(fetched.headers()["content-type"], "image/png");
        assert_eq!(body_bytes(fetched).await.as_ref(), data);
    }

    #[tokio::test]
    async fn test_upload_without_file_is_400_and_writes_nothing() {
        let h = Harness::new(false).await;
        let req = Request::post("/api/upload")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Full::new(Bytes::from(format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nx\r\n--{BOUNDARY}--\r\n"
            ))))
            .unwrap();

        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
        assert_eq!(std::fs::read_dir(h.uploads()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_over_ceiling_is_413() {
        let h = Harness::new(false).await;
        let resp = h.send(upload_request("file", "big.bin", &[7u8; 2048])).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(std::fs::read_dir(h.uploads()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_upload_is_404() {
        let h = Harness::new(true).await;
        let resp = h.send(get("/uploads/missing.png")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_fresh_content_is_default_document() {
        let h = Harness::new(false).await;
        let resp = h.send(get("/api/content")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"home": {}, "activities": {}}));
    }

    #[tokio::test]
    async fn test_update_then_get_reflects_merge() {
        let h = Harness::new(false).await;
        let first = json!({"home": {"title": "Club"}, "activities": {"list": [1]}});
        let resp = h.send(post_json("/api/content", &first)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"success": true}));

        let second = json!({"home": {"subtitle": "New"}, "contact": {"mail": "a@b.c"}});
        h.send(post_json("/api/content", &second)).await;

        let doc = body_json(h.send(get("/api/content")).await).await;
        assert_eq!(
            doc,
            json!({
                "home": {"subtitle": "New"},
                "activities": {"list": [1]},
                "contact": {"mail": "a@b.c"}
            })
        );

        let on_disk: Value =
            serde_json::from_slice(&std::fs::read(h.dir.path().join("siteContent.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk, doc);
    }

    #[tokio::test]
    async fn test_update_twice_is_idempotent() {
        let h = Harness::new(false).await;
        let partial = json!({"activities": {"x": true}});
        h.send(post_json("/api/content", &partial)).await;
        let once = body_json(h.send(get("/api/content")).await).await;
        h.send(post_json("/api/content", &partial)).await;
        let twice = body_json(h.send(get("/api/content")).await).await;
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_malformed_json_is_400() {
        let h = Harness::new(false).await;
        let req = Request::post("/api/content")
            .header(CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from_static(b"{broken")))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_save_failure_is_500() {
        let h = Harness::new(false).await;
        // A directory where the temp file would go makes the save fail
        std::fs::create_dir(h.dir.path().join("siteContent.json.tmp")).unwrap();
        std::fs::write(h.dir.path().join("siteContent.json.tmp").join("x"), b"").unwrap();

        let resp = h.send(post_json("/api/content", &json!({"home": 1}))).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await, json!({"error": "Failed to save content"}));

        // Memory keeps the merge
        let doc = body_json(h.send(get("/api/content")).await).await;
        assert_eq!(doc["home"], 1);
    }

    #[tokio::test]
    async fn test_spa_fallback_and_assets() {
        let h = Harness::new(true).await;

        let asset = h.send(get("/assets/app.js")).await;
        assert_eq!(asset.status(), StatusCode::OK);
        assert_eq!(body_bytes(asset).await.as_ref(), b"run()");

        let route = h.send(get("/activities/summer")).await;
        assert_eq!(route.status(), StatusCode::OK);
        assert_eq!(body_bytes(route).await.as_ref(), b"<html>spa</html>");
    }

    #[tokio::test]
    async fn test_api_paths_never_fall_back() {
        let h = Harness::new(true).await;
        let resp = h.send(get("/api/unknown")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_json(resp).await["error"].is_string());
    }

    #[tokio::test]
    async fn test_no_frontend_is_404() {
        let h = Harness::new(false).await;
        let resp = h.send(get("/")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let h = Harness::new(false).await;
        let req = Request::head("/api/content").body(Full::new(Bytes::new())).unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key("content-length"));
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn test_middleware_headers_on_every_response() {
        let h = Harness::new(false).await;
        for resp in [
            h.send(get("/api/content")).await,
            h.send(get("/nowhere")).await,
        ] {
            assert_eq!(resp.headers()["access-control-allow-origin"], "*");
            assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
            assert!(!resp.headers().contains_key("cross-origin-resource-policy"));
            assert!(resp.headers().contains_key("ratelimit-remaining"));
            assert_eq!(resp.headers()["server"], "site-server");
        }
    }

    #[tokio::test]
    async fn test_preflight() {
        let h = Harness::new(false).await;
        let req = Request::options("/api/content")
            .header("access-control-request-headers", "content-type")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = h.send(req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(resp.headers()["access-control-allow-headers"], "content-type");
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_rate_limit_per_client() {
        let h = Harness::new(false).await;
        for _ in 0..crate::middleware::rate_limit::MAX_REQUESTS {
            let resp = h.send(get("/api/content")).await;
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let limited = h.send(get("/api/content")).await;
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limited.headers().contains_key("retry-after"));
        assert_eq!(limited.headers()["access-control-allow-origin"], "*");

        let other = h.send_from(get("/api/content"), "127.0.0.2:50000").await;
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unmatched_method_is_404() {
        let h = Harness::new(true).await;
        let req = Request::put("/api/content").body(Full::new(Bytes::new())).unwrap();
        assert_eq!(h.send(req).await.status(), StatusCode::NOT_FOUND);

        let req = Request::delete("/somewhere").body(Full::new(Bytes::new())).unwrap();
        assert_eq!(h.send(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_is_under() {
        assert!(is_under("/uploads", "/uploads"));
        assert!(is_under("/uploads/a.png", "/uploads"));
        assert!(!is_under("/uploadsx", "/uploads"));
        assert!(!is_under("/apix", "/api"));
    }
}
