//! Fixed-window rate limiter for the protected `/mcp` route.
//!
//! Each key (peer IP, or one shared key) owns a counter for the current
//! window bucket, `floor(now / window)`. When the bucket moves on the count
//! resets. Requests past `max_requests` in a bucket are rejected.
//!
//! Windows are created lazily on first use and swept by a background task
//! once their bucket is over. State is in-memory only.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use http::{HeaderMap, HeaderName, HeaderValue, header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::KeyStrategy;

/// Window length for `/mcp`.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Requests admitted per key per window.
pub const DEFAULT_MAX_REQUESTS: u32 = 30;

pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("ratelimit-policy");
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the fixed-window limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Length of one window.
    pub window: Duration,
    /// Maximum admitted requests per key per window.
    pub max_requests: u32,
    /// How requests are grouped into windows.
    pub key_strategy: KeyStrategy,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            max_requests: DEFAULT_MAX_REQUESTS,
            key_strategy: KeyStrategy::ClientIp,
        }
    }
}

// ============================================================================
// Keys and decisions
// ============================================================================

/// Identity a window is tracked under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Shared by every client.
    Global,
    /// One peer address.
    Client(IpAddr),
}

/// Outcome of one [`FixedWindowRateLimiter::check`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    /// Whether the request may proceed.
    pub admitted: bool,
    /// Configured maximum per window.
    pub limit: u32,
    /// Admissions left in the current window.
    pub remaining: u32,
    /// Time until the current window ends.
    pub reset_after: Duration,
    /// Window length, for the policy header.
    pub window: Duration,
}

impl RateLimitStatus {
    /// Seconds until reset, rounded up so clients never retry early.
    pub fn reset_secs(&self) -> u64 {
        let secs = self.reset_after.as_secs();
        if self.reset_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// Write the standard rate-limit headers onto a response.
    ///
    /// Rejections additionally get `Retry-After`.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let policy = format!("{};w={}", self.limit, self.window.as_secs());
        if let Ok(value) = HeaderValue::from_str(&policy) {
            headers.insert(RATELIMIT_POLICY, value);
        }
        headers.insert(RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(RATELIMIT_RESET, HeaderValue::from(self.reset_secs()));
        if !self.admitted {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(self.reset_secs()));
        }
    }
}

// ============================================================================
// Rate Limiter
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Window {
    bucket: u64,
    count: u32,
}

/// Fixed-window counter keyed by [`RateLimitKey`].
///
/// The increment-and-compare for a key runs while holding that key's
/// `DashMap` shard lock, so concurrent requests on a multi-threaded runtime
/// cannot push a window past `max_requests` admissions. No lock is held
/// across an await point.
pub struct FixedWindowRateLimiter {
    windows: DashMap<RateLimitKey, Window>,
    config: RateLimiterConfig,
}

impl FixedWindowRateLimiter {
    /// Create a limiter with the given configuration.
    #[must_use]
    pub fn new(config: RateLimiterConfig) -> Self {
        info!(
            window_secs = config.window.as_secs(),
            max_requests = config.max_requests,
            key_strategy = ?config.key_strategy,
            "Rate limiter configured"
        );
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    /// Get a reference to the limiter configuration.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Map a peer address to the key its requests are counted under.
    pub fn key_for(&self, peer: Option<IpAddr>) -> RateLimitKey {
        match (self.config.key_strategy, peer) {
            (KeyStrategy::ClientIp, Some(ip)) => RateLimitKey::Client(ip),
            // Without a peer address everything shares one window.
            (KeyStrategy::ClientIp, None) | (KeyStrategy::Global, _) => RateLimitKey::Global,
        }
    }

    /// Count one request against `key` using the wall clock.
    pub fn check(&self, key: RateLimitKey) -> RateLimitStatus {
        self.check_at(key, SystemTime::now())
    }

    /// Count one request against `key` as of `now`.
    pub fn check_at(&self, key: RateLimitKey, now: SystemTime) -> RateLimitStatus {
        let now_ms = millis_since_epoch(now);
        let window_ms = self.window_ms();
        let bucket = now_ms / window_ms;

        let count = {
            let mut entry = self
                .windows
                .entry(key)
                .or_insert(Window { bucket, count: 0 });
            if entry.bucket != bucket {
                entry.bucket = bucket;
                entry.count = 0;
            }
            entry.count = entry.count.saturating_add(1);
            entry.count
        };

        let max = self.config.max_requests;
        let window_end_ms = (bucket + 1) * window_ms;
        let status = RateLimitStatus {
            admitted: count <= max,
            limit: max,
            remaining: max.saturating_sub(count),
            reset_after: Duration::from_millis(window_end_ms - now_ms),
            window: self.config.window,
        };

        if !status.admitted {
            debug!(key = ?key, count, limit = max, "Rate limit exceeded");
        }
        status
    }

    /// Remove windows whose bucket has already ended.
    ///
    /// Returns the number of entries removed.
    pub fn cleanup_stale(&self, now: SystemTime) -> usize {
        let current = millis_since_epoch(now) / self.window_ms();
        // Counted inside retain; len() races with concurrent inserts.
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let keep = window.bucket >= current;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            debug!(
                removed,
                remaining = self.windows.len(),
                "Cleaned up stale rate limit windows"
            );
        }
        removed
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Spawn a task that sweeps stale windows once per window length.
    ///
    /// The task stops when `shutdown` is cancelled.
    pub fn spawn_cleanup_task(self: &Arc<Self>, shutdown: CancellationToken) {
        let limiter = Arc::clone(self);
        let interval = limiter.config.window;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        limiter.cleanup_stale(SystemTime::now());
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter cleanup task shutting down");
                        break;
                    }
                }
            }
        });
    }

    fn window_ms(&self) -> u64 {
        (self.config.window.as_millis() as u64).max(1)
    }
}

fn millis_since_epoch(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Tests
// ============================================================================
