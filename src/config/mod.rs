// Configuration module entry point
// Loads layered configuration and builds the shared runtime state

mod state;
mod types;

use std::net::SocketAddr;

// Re-export public types
pub use state::AppState;
pub use types::{
    Config, HttpConfig, LoggingConfig, PerformanceConfig, ServerConfig, StorageConfig,
};

/// Default config file looked up next to the working directory (extension optional)
pub const DEFAULT_CONFIG_PATH: &str = "config";

impl Config {
    /// Load configuration from `.env`, the default config file and the environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // A missing .env file is the normal case in production
        dotenv::dotenv().ok();

        let path = std::env::var("SITE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(&path, std::env::var("PORT").ok())
    }

    /// Load configuration from the given file path (without extension)
    ///
    /// `port_override` carries the bare `PORT` variable, which wins over every other source.
    pub fn load_from(
        config_path: &str,
        port_override: Option<String>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("SITE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3001)?
            .set_default("logging.level", "info")?
            .set_default("logging.access_log", true)?
            .set_default("performance.keep_alive", true)?
            .set_default("performance.connection_timeout", 120)?
            .set_default("http.server_name", "site-server")?
            .set_default("http.max_body_size", 10_485_760)? // 10MB
            .set_default("storage.uploads_dir", "uploads")?
            .set_default("storage.content_file", "siteContent.json")?
            .set_default("storage.frontend_dir", "dist")?
            .set_default("storage.entry_document", "index.html")?;

        if let Some(port) = port_override.filter(|p| !p.trim().is_empty()) {
            let port: u16 = port.trim().parse().map_err(|e| {
                config::ConfigError::Message(format!("Invalid PORT value '{port}': {e}"))
            })?;
            builder = builder.set_override("server.port", i64::from(port))?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn get_socket_addr(&self) -> Result<SocketAddr, String> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| format!("Invalid address: {e}"))
    }
}
