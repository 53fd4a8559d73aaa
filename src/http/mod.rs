//! HTTP protocol layer module
//!
//! Response builders, MIME lookup and cache validators shared by every handler.

pub mod cache;
pub mod mime;
pub mod response;

// Re-export commonly used types
pub use response::{
    build_304_response, build_404_response, build_413_response, build_429_response,
    build_file_response, error_response, json_response, HttpResponse,
};
