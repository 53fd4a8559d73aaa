//! Request middleware
//!
//! Applied to every request before route dispatch, in this order:
//! security headers, cross-origin policy, rate limiting.

pub mod cors;
pub mod rate_limit;
pub mod security;

pub use cors::{apply_cors_headers, build_preflight_response};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use security::apply_security_headers;
