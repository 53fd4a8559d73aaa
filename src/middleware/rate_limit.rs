//! Per-client request rate limiting
//!
//! Each client IP gets a window that opens with its first request and lasts
//! [`WINDOW`]. At most [`MAX_REQUESTS`] requests are admitted per window; the
//! counter resets when the window closes.

use hyper::header::{HeaderMap, HeaderValue};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Window length
pub const WINDOW: Duration = Duration::from_secs(15 * 60);

/// Requests admitted per client per window
pub const MAX_REQUESTS: u32 = 300;

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    started: Instant,
    hits: u32,
}

/// Outcome of counting one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the client's window closes
    pub reset_after: Duration,
    pub window_secs: u64,
}

impl RateLimitDecision {
    /// Whole seconds until reset, rounded up
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Write the `RateLimit-*` headers describing this decision
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        if let Ok(policy) = HeaderValue::from_str(&format!("{};w={}", self.limit, self.window_secs))
        {
            headers.insert("ratelimit-policy", policy);
        }
        headers.insert("ratelimit-limit", HeaderValue::from(self.limit));
        headers.insert("ratelimit-remaining", HeaderValue::from(self.remaining));
        headers.insert("ratelimit-reset", HeaderValue::from(self.reset_secs()));
    }
}

pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    clients: Mutex<HashMap<IpAddr, ClientWindow>>,
    last_prune: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            clients: Mutex::new(HashMap::new()),
            last_prune: Mutex::new(Instant::now()),
        }
    }

    /// Count one request from `client` at `now`
    pub fn check(&self, client: IpAddr, now: Instant) -> RateLimitDecision {
        self.prune_expired(now);

        let mut clients = self.clients.lock();
        let entry = clients.entry(client).or_insert(ClientWindow {
            started: now,
            hits: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = ClientWindow {
                started: now,
                hits: 0,
            };
        }

        entry.hits = entry.hits.saturating_add(1);
        let reset_after = self
            .window
            .saturating_sub(now.saturating_duration_since(entry.started));

        RateLimitDecision {
            allowed: entry.hits <= self.max_requests,
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.hits),
            reset_after,
            window_secs: self.window.as_secs(),
        }
    }

    /// Number of clients currently tracked
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }

    /// Drop closed windows, at most once per window length
    fn prune_expired(&self, now: Instant) {
        {
            let mut last = self.last_prune.lock();
            if now.saturating_duration_since(*last) < self.window {
                return;
            }
            *last = now;
        }

        let window = self.window;
        self.clients
            .lock()
            .retain(|_, w| now.saturating_duration_since(w.started) < window);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(WINDOW, MAX_REQUESTS)
    }
}
