//! Request handler module
//!
//! Route dispatch plus the handlers behind each route: uploads, the content
//! document, and static files.

mod body;
pub mod content;
pub mod router;
pub mod static_files;
pub mod upload;

// Re-export main entry point
pub use router::handle_request;
