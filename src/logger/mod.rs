//! Logger module
//!
//! Console/file logging for the server:
//! - Startup banner
//! - Access logging in several formats
//! - Marked warning and error lines (`[WARN]`, `[ERROR]`, ...)

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::Config;
use std::net::SocketAddr;

/// Initialize the logger with configuration
///
/// Should be called once at application startup. Until then every helper
/// writes straight to stdout/stderr.
pub fn init(config: &Config) -> std::io::Result<()> {
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
    )
}

fn write_info(message: &str) {
    match writer::get() {
        Some(w) => w.write_info(message),
        None => println!("{message}"),
    }
}

fn write_error(message: &str) {
    match writer::get() {
        Some(w) => w.write_error(message),
        None => eprintln!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config, frontend_served: bool) {
    write_info("======================================");
    write_info(&format!("Server listening on http://{addr}"));
    write_info(&format!("Log level: {}", config.logging.level));
    if let Some(workers) = config.server.workers {
        write_info(&format!("Worker threads: {workers}"));
    }
    write_info(&format!("Uploads: {}", config.storage.uploads_dir.display()));
    write_info(&format!("Content: {}", config.storage.content_file.display()));
    if frontend_served {
        write_info(&format!(
            "Frontend served from {}",
            config.storage.frontend_dir.display()
        ));
    }
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("Error log: {path}"));
    }
    write_info("======================================\n");
}

pub fn log_info(message: &str) {
    write_info(&format!("[INFO] {message}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_upload(message: &str) {
    write_info(&format!("[UPLOAD] {message}"));
}

pub fn log_content(message: &str) {
    write_info(&format!("[CONTENT] {message}"));
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_info(&entry.format(format));
}

pub fn log_shutdown(signal: &str) {
    write_info(&format!("\n[SIGNAL] {signal} received, shutting down"));
}
