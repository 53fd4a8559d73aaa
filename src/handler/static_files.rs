//! Static file serving module
//!
//! Serves stored uploads and the prebuilt frontend bundle. Lookups never leave
//! their root directory.

use crate::handler::router::RequestContext;
use crate::http::{self, cache, cache::CachePolicy, mime, HttpResponse};
use crate::logger;
use hyper::body::Bytes;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Prebuilt single-page frontend: static assets plus one entry document
/// answered for every path that matches no asset.
#[derive(Debug, Clone)]
pub struct Frontend {
    root: PathBuf,
    entry_document: String,
}

impl Frontend {
    /// Use `dir` as the frontend root if it exists right now.
    ///
    /// Absence is reported once here and never re-checked.
    pub fn detect(dir: &Path, entry_document: &str) -> Option<Self> {
        if dir.is_dir() {
            Some(Self {
                root: dir.to_path_buf(),
                entry_document: entry_document.to_string(),
            })
        } else {
            logger::log_warning(&format!(
                "No frontend directory found at {}; build the frontend to serve it",
                dir.display()
            ));
            None
        }
    }

    /// Serve the matching asset, else the entry document
    pub async fn serve(&self, ctx: &RequestContext<'_>) -> HttpResponse {
        if let Some(resp) =
            serve_directory(ctx, &self.root, "/", Some(self.entry_document.as_str())).await
        {
            return resp;
        }

        let entry = self.root.join(&self.entry_document);
        match load_file(&entry).await {
            Some((content, content_type)) => {
                build_static_file_response(content, content_type, ctx, CachePolicy::NoCache)
            }
            None => {
                logger::log_error(&format!(
                    "Frontend entry document missing: {}",
                    entry.display()
                ));
                http::build_404_response()
            }
        }
    }
}

/// Serve a stored upload, or 404
pub async fn serve_upload(ctx: &RequestContext<'_>, uploads_dir: &Path) -> HttpResponse {
    serve_directory(ctx, uploads_dir, crate::store::upload::PUBLIC_PREFIX, None)
        .await
        .unwrap_or_else(http::build_404_response)
}

/// Serve a file from `root` addressed by the request path below `route_prefix`.
///
/// Directory requests resolve to `index_file` when one is given.
async fn serve_directory(
    ctx: &RequestContext<'_>,
    root: &Path,
    route_prefix: &str,
    index_file: Option<&str>,
) -> Option<HttpResponse> {
    let relative = relative_path(ctx.path, route_prefix)?;
    let (content, content_type) = load_from_directory(root, &relative, index_file).await?;
    Some(build_static_file_response(
        content,
        content_type,
        ctx,
        CachePolicy::STATIC,
    ))
}

/// Decode the request path and turn it into a relative path below `route_prefix`.
///
/// Returns `None` for paths outside the prefix, undecodable paths, and any
/// path containing a `..` segment.
pub fn relative_path(path: &str, route_prefix: &str) -> Option<PathBuf> {
    let rest = if route_prefix == "/" {
        path
    } else {
        let rest = path.strip_prefix(route_prefix)?;
        if !rest.is_empty() && !rest.starts_with('/') {
            return None;
        }
        rest
    };

    let decoded = percent_decode_str(rest).decode_utf8().ok()?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for segment in decoded.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if segment == ".." {
            return None;
        }
        relative.push(segment);
    }
    Some(relative)
}

/// Load a file below `root`, with index file support for directories
async fn load_from_directory(
    root: &Path,
    relative: &Path,
    index_file: Option<&str>,
) -> Option<(Bytes, &'static str)> {
    let mut file_path = root.join(relative);

    if file_path.is_dir() {
        file_path = file_path.join(index_file?);
    }

    // Security: ensure file_path is within root, symlinks included
    let root_canonical = match root.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            logger::log_warning(&format!(
                "Static directory not found or inaccessible '{}': {e}",
                root.display()
            ));
            return None;
        }
    };

    // File not found is common (404), no need to log
    let file_canonical = file_path.canonicalize().ok()?;
    if !file_canonical.starts_with(&root_canonical) {
        logger::log_warning(&format!(
            "Path traversal attempt blocked: {} -> {}",
            relative.display(),
            file_canonical.display()
        ));
        return None;
    }

    load_file(&file_canonical).await
}

/// Read a regular file and detect its content type
async fn load_file(path: &Path) -> Option<(Bytes, &'static str)> {
    let metadata = fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }

    match fs::read(path).await {
        Ok(content) => Some((Bytes::from(content), mime::content_type_for(path))),
        Err(e) => {
            logger::log_error(&format!("Failed to read file '{}': {e}", path.display()));
            None
        }
    }
}

/// Build a file response, or 304 when the client's copy is current
fn build_static_file_response(
    data: Bytes,
    content_type: &str,
    ctx: &RequestContext<'_>,
    policy: CachePolicy,
) -> HttpResponse {
    let etag = cache::generate_etag(&data);

    if cache::check_etag_match(ctx.if_none_match.as_deref(), &etag) {
        return http::build_304_response(&etag, policy);
    }

    http::build_file_response(data, content_type, &etag, policy)
}
