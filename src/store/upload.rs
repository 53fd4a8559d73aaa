//! Upload store
//!
//! Flat directory of uploaded files. The filesystem is the only record: nothing
//! about a stored file is kept in memory once the request completes.

use futures_util::{Stream, StreamExt};
use hyper::body::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::UploadError;

/// URL path prefix the stored files are served under
pub const PUBLIC_PREFIX: &str = "/uploads";

/// Characters escaped when a stored name is placed in a URL path segment
const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Later milliseconds tried before giving up on a name
const MAX_NAME_ATTEMPTS: usize = 1000;

/// A file written by [`UploadStore::store_stream`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    /// Generated name: millisecond timestamp, `-`, original base name
    pub filename: String,
    pub path: PathBuf,
}

impl StoredFile {
    /// Absolute URL for this file as seen by the client that uploaded it
    pub fn public_url(&self, scheme: &str, host: &str) -> String {
        format!(
            "{scheme}://{host}{PUBLIC_PREFIX}/{}",
            utf8_percent_encode(&self.filename, PATH_SEGMENT)
        )
    }
}

pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    /// Open the upload directory, creating it when absent
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every chunk of `chunks` to a newly named file.
    ///
    /// The name never replaces an existing file: when the millisecond is taken
    /// the next free one is used. A failure part-way removes the partial file.
    pub async fn store_stream<S, E>(
        &self,
        original_name: &str,
        chunks: S,
    ) -> Result<StoredFile, UploadError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        UploadError: From<E>,
    {
        let (file, stored) = self
            .create_unique(original_name, chrono::Utc::now().timestamp_millis())
            .await?;

        match write_chunks(file, chunks).await {
            Ok(()) => Ok(stored),
            Err(e) => {
                let _ = fs::remove_file(&stored.path).await;
                Err(e)
            }
        }
    }

    async fn create_unique(
        &self,
        original_name: &str,
        mut timestamp_ms: i64,
    ) -> std::io::Result<(fs::File, StoredFile)> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let filename = generate_filename(original_name, timestamp_ms);
            let path = self.dir.join(&filename);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((file, StoredFile { filename, path })),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => timestamp_ms += 1,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free upload name for '{original_name}'"),
        ))
    }

    /// Remove a file stored earlier in the same request
    pub async fn discard(&self, file: &StoredFile) {
        let _ = fs::remove_file(&file.path).await;
    }
}

async fn write_chunks<S, E>(mut file: fs::File, chunks: S) -> Result<(), UploadError>
where
    S: Stream<Item = Result<Bytes, E>>,
    UploadError: From<E>,
{
    let mut chunks = std::pin::pin!(chunks);
    while let Some(chunk) = chunks.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

/// Client-supplied file name with any directory components removed
pub fn base_name(original_name: &str) -> &str {
    original_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(original_name)
}

/// Stored name for an upload: `<millis>-<base name>`
pub fn generate_filename(original_name: &str, timestamp_ms: i64) -> String {
    format!("{timestamp_ms}-{}", base_name(original_name))
}
