//! Site content store
//!
//! Holds the editable site content as one JSON object in memory and mirrors it
//! to a pretty-printed file. Writers are serialized behind the document lock and
//! every save goes through a temporary file followed by a rename, so the file on
//! disk is always either the previous or the next complete document.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

use super::error::ContentError;
use crate::logger;

/// The whole site content: top-level section name to arbitrary JSON
pub type ContentDocument = Map<String, Value>;

/// Sections created when no content file exists yet
pub const DEFAULT_SECTIONS: [&str; 2] = ["home", "activities"];

/// How the store came up at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    /// An existing content file was parsed
    Loaded,
    /// No file existed; the default document was created
    Created,
    /// The file existed but could not be used; memory starts empty and the file is untouched
    Empty,
}

pub struct ContentStore {
    path: PathBuf,
    document: RwLock<ContentDocument>,
    startup: StartupState,
}

impl ContentStore {
    /// Load the content file, or create it with the default sections when absent.
    ///
    /// Never fails: an unreadable or malformed file is logged and leaves the
    /// in-memory document empty without touching the file.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let (document, startup) = match fs::try_exists(&path).await {
            Ok(true) => match load_document(&path).await {
                Ok(document) => {
                    logger::log_content(&format!("Content file {} loaded", path.display()));
                    (document, StartupState::Loaded)
                }
                Err(e) => {
                    logger::log_error(&e.to_string());
                    (ContentDocument::new(), StartupState::Empty)
                }
            },
            Ok(false) => {
                let document = default_document();
                match persist(&path, &document).await {
                    Ok(()) => logger::log_warning(&format!(
                        "Created new content file {}",
                        path.display()
                    )),
                    Err(e) => logger::log_error(&e.to_string()),
                }
                (document, StartupState::Created)
            }
            Err(e) => {
                logger::log_error(&format!(
                    "Cannot access content file {}: {e}",
                    path.display()
                ));
                (ContentDocument::new(), StartupState::Empty)
            }
        };

        Self {
            path,
            document: RwLock::new(document),
            startup,
        }
    }

    /// Current document, as of the latest applied update
    pub async fn get(&self) -> ContentDocument {
        self.document.read().await.clone()
    }

    /// Shallow-merge `partial` into the document and save the result.
    ///
    /// Keys in `partial` replace same-named keys wholesale; other keys are kept.
    /// When saving fails the merge stays applied in memory and the error is
    /// returned, so memory may be ahead of disk.
    pub async fn update(&self, partial: ContentDocument) -> Result<(), ContentError> {
        let mut document = self.document.write().await;
        merge_top_level(&mut document, partial);
        persist(&self.path, &document).await
    }

    pub const fn startup_state(&self) -> StartupState {
        self.startup
    }
}

/// Document written when no content file exists
pub fn default_document() -> ContentDocument {
    DEFAULT_SECTIONS
        .iter()
        .map(|section| ((*section).to_string(), Value::Object(Map::new())))
        .collect()
}

/// Replace top-level keys of `document` with those of `partial`; nested values are not merged
pub fn merge_top_level(document: &mut ContentDocument, partial: ContentDocument) {
    for (key, value) in partial {
        document.insert(key, value);
    }
}

async fn load_document(path: &Path) -> Result<ContentDocument, ContentError> {
    let raw = fs::read(path).await.map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&raw).map_err(|source| ContentError::MalformedContentFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Write the document as pretty JSON via a sibling temp file and rename
async fn persist(path: &Path, document: &ContentDocument) -> Result<(), ContentError> {
    let json = serde_json::to_vec_pretty(document)?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let save_err = |source| ContentError::Save {
        path: path.to_path_buf(),
        source,
    };

    if let Err(e) = fs::write(&tmp_path, &json).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(save_err(e));
    }
    fs::rename(&tmp_path, path).await.map_err(save_err)
}
