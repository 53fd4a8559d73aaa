//! `POST /api/upload`: one multipart file under the `file` field

use futures_util::stream;
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderMap, CONTENT_TYPE, HOST};
use hyper::http::request::Parts;
use hyper::StatusCode;
use multer::Multipart;
use std::convert::Infallible;

use super::body::{check_body_size, read_body};
use crate::config::AppState;
use crate::http::{self, HttpResponse};
use crate::logger;
use crate::store::{StoredFile, UploadError, UploadStore};

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "file";

pub async fn handle_upload<B>(parts: &Parts, body: B, state: &AppState) -> HttpResponse
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

    match receive_upload(&parts.headers, body, &state.uploads).await {
        Ok(file) => {
            let host = request_host(parts).unwrap_or_else(|| {
                format!("{}:{}", state.config.server.host, state.config.server.port)
            });
            let url = file.public_url(parts.uri.scheme_str().unwrap_or("http"), &host);
            logger::log_upload(&format!("Stored {}", file.path.display()));
            http::json_response(StatusCode::OK, &serde_json::json!({ "url": url }))
        }
        Err(e) => {
            if e.status().is_server_error() {
                logger::log_error(&format!("[UPLOAD] {e}"));
            } else {
                logger::log_warning(&format!("[UPLOAD] Rejected: {e}"));
            }
            http::error_response(e.status(), &e.to_string())
        }
    }
}

/// Parse a multipart body and store its single `file` part.
///
/// Text parts are ignored. A file part under another name, or a second `file`
/// part, rejects the whole request and removes anything already stored.
pub async fn receive_upload(
    headers: &HeaderMap,
    body: Bytes,
    store: &UploadStore,
) -> Result<StoredFile, UploadError> {
    let boundary = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| multer::parse_boundary(ct).ok())
        .ok_or(UploadError::MissingFile)?;

    let mut multipart = Multipart::new(
        stream::once(async move { Ok::<_, Infallible>(body) }),
        boundary,
    );

    let mut stored = None;
    if let Err(e) = read_fields(&mut multipart, store, &mut stored).await {
        if let Some(file) = &stored {
            store.discard(file).await;
        }
        return Err(e);
    }
    stored.ok_or(UploadError::MissingFile)
}

async fn read_fields(
    multipart: &mut Multipart<'_>,
    store: &UploadStore,
    stored: &mut Option<StoredFile>,
) -> Result<(), UploadError> {
    while let Some(field) = multipart.next_field().await? {
        let Some(file_name) = field.file_name().map(ToString::to_string) else {
            continue;
        };
        // Browsers send an empty filename for any file input left blank
        if file_name.is_empty() {
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        if name != UPLOAD_FIELD || stored.is_some() {
            return Err(UploadError::UnexpectedField(name));
        }
        *stored = Some(store.store_stream(&file_name, field).await?);
    }
    Ok(())
}

fn request_host(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
        .or_else(|| parts.uri.authority().map(ToString::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;
    use tempfile::TempDir;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn multipart_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_str(&format!("multipart/form-data; boundary={BOUNDARY}")).unwrap(),
        );
        headers
    }

    fn file_part(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        part.extend_from_slice(data);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn text_part(field: &str, value: &str) -> Vec<u8> {
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"\r\n\r\n{value}\r\n"
        )
        .into_bytes()
    }

    fn finish(parts: Vec<Vec<u8>>) -> Bytes {
        let mut body = parts.concat();
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Bytes::from(body)
    }

    fn files_in(dir: &TempDir) -> usize {
        std::fs::read_dir(dir.path()).unwrap().count()
    }

    #[tokio::test]
    async fn test_single_file_stored() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![
            text_part("caption", "hello"),
            file_part("file", "photo.png", b"\x89PNG data"),
        ]);

        let file = receive_upload(&multipart_headers(), body, &store).await.unwrap();
        assert!(file.filename.ends_with("-photo.png"));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"\x89PNG data");
    }

    #[tokio::test]
    async fn test_no_file_part() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![text_part("caption", "hello")]);

        let err = receive_upload(&multipart_headers(), body, &store).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_not_multipart() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let err = receive_upload(&headers, Bytes::from_static(b"{}"), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_filename_counts_as_missing() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![file_part("file", "", b"")]);

        let err = receive_upload(&multipart_headers(), body, &store).await.unwrap_err();
        assert!(matches!(err, UploadError::MissingFile));
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_unexpected_field_rolls_back() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![
            file_part("file", "a.txt", b"a"),
            file_part("avatar", "b.txt", b"b"),
        ]);

        let err = receive_upload(&multipart_headers(), body, &store).await.unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedField(ref name) if name == "avatar"));
        assert_eq!(files_in(&dir), 0);
    }

    #[tokio::test]
    async fn test_blank_file_input_under_other_field_ignored() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![
            file_part("file", "a.txt", b"hello"),
            file_part("avatar", "", b""),
        ]);

        let file = receive_upload(&multipart_headers(), body, &store).await.unwrap();
        assert!(file.filename.ends_with("-a.txt"));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"hello");
        assert_eq!(files_in(&dir), 1);
    }

    #[tokio::test]
    async fn test_second_file_rejected() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).unwrap();
        let body = finish(vec![
            file_part("file", "a.txt", b"a"),
            file_part("file", "b.txt", b"b"),
        ]);

        let err = receive_upload(&multipart_headers(), body, &store).await.unwrap_err();
        assert!(matches!(err, UploadError::UnexpectedField(_)));
        assert_eq!(files_in(&dir), 0);
    }
}
