//! Site server library
//!
//! File uploads, a JSON content document and static frontend serving over
//! hyper, behind security headers, CORS and per-client rate limiting.

pub mod config;
pub mod handler;
pub mod http;
pub mod logger;
pub mod middleware;
pub mod server;
pub mod store;
