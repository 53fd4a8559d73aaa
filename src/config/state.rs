// Application state module
// Everything a request handler needs, built once before the first accept

use super::types::Config;
use crate::handler::static_files::Frontend;
use crate::middleware::RateLimiter;
use crate::store::{ContentStore, UploadStore};

/// Application state
pub struct AppState {
    pub config: Config,
    pub uploads: UploadStore,
    pub content: ContentStore,
    /// Present only when the frontend bundle existed at startup
    pub frontend: Option<Frontend>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Open the stores and probe for the frontend bundle.
    ///
    /// Fails only when the upload directory cannot be created.
    pub async fn new(config: &Config) -> std::io::Result<Self> {
        let uploads = UploadStore::open(&config.storage.uploads_dir)?;
        let content = ContentStore::open(&config.storage.content_file).await;
        let frontend = Frontend::detect(
            &config.storage.frontend_dir,
            &config.storage.entry_document,
        );

        Ok(Self {
            config: config.clone(),
            uploads,
            content,
            frontend,
            rate_limiter: RateLimiter::default(),
        })
    }
}
