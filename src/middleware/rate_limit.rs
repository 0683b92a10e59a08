//! Rate limiting middleware.
//!
//! Token-bucket throttle for authentication endpoints, keyed by client
//! network identity. Buckets refill continuously and are created lazily on
//! first sight.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Path prefix the limiter guards; all other paths bypass it entirely.
const AUTH_PATH_PREFIX: &str = "/api/auth/";

/// Configuration for rate limiting.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Maximum bucket level (burst size).
    pub capacity: f64,
    /// Tokens restored per window.
    pub refill_tokens: f64,
    /// Refill window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        // 10 requests per minute on the auth path
        Self {
            capacity: 10.0,
            refill_tokens: 10.0,
            window: Duration::from_secs(60),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-client token buckets.
///
/// The outer map lock is held only for bucket lookup/creation; the
/// check-and-decrement runs under the per-bucket lock, so unrelated clients
/// never serialize on each other.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: Mutex<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check-and-consume one token for the client. Returns false
    /// without side effect when the bucket is empty.
    pub fn admit(&self, client_id: &str) -> bool {
        self.admit_at(client_id, Instant::now())
    }

    fn admit_at(&self, client_id: &str, now: Instant) -> bool {
        let bucket = {
            let mut buckets = self.buckets.lock();
            buckets
                .entry(client_id.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(Bucket {
                        tokens: self.config.capacity,
                        last_refill: now,
                    }))
                })
                .clone()
        };

        let mut bucket = bucket.lock();

        // Continuous refill, capped at capacity
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let rate = self.config.refill_tokens / self.config.window.as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * rate).min(self.config.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle for at least two windows (call from a background
    /// task).
    pub fn cleanup(&self) {
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let idle_cutoff = self.config.window * 2;

        buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.lock().last_refill) < idle_cutoff
        });
    }
}

/// Resolve the client identifier: first forwarded-for entry when present,
/// else the direct peer address. Trusting the header is a deployment
/// decision; an upstream proxy must strip or set it.
fn client_id(headers: &HeaderMap, addr: &SocketAddr) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|h| h.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(|first| first.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Rate limiting middleware function. Guards only the authentication path
/// prefix; rejected requests get a 429 before any credential logic runs.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !request.uri().path().starts_with(AUTH_PATH_PREFIX) {
        return next.run(request).await;
    }

    let client = client_id(request.headers(), &addr);

    if limiter.admit(&client) {
        return next.run(request).await;
    }

    warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");

    let body = serde_json::json!({
        "error": "rate_limited",
        "message": "Too many requests. Please try again later.",
    });

    (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitConfig::default())
    }

    #[test]
    fn test_capacity_admitted_then_rejected() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit_at("1.2.3.4", now));
        }
        // 11th within the same window is rejected
        assert!(!limiter.admit_at("1.2.3.4", now));
    }

    #[test]
    fn test_refill_restores_admission() {
        let limiter = limiter();
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit_at("1.2.3.4", start));
        }
        assert!(!limiter.admit_at("1.2.3.4", start));

        // After 6 seconds one token (10 per 60s) has refilled
        let later = start + Duration::from_secs(6);
        assert!(limiter.admit_at("1.2.3.4", later));
        assert!(!limiter.admit_at("1.2.3.4", later));

        // A full window restores full capacity but never exceeds it
        let much_later = later + Duration::from_secs(600);
        for _ in 0..10 {
            assert!(limiter.admit_at("1.2.3.4", much_later));
        }
        assert!(!limiter.admit_at("1.2.3.4", much_later));
    }

    #[test]
    fn test_clients_do_not_share_buckets() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..10 {
            assert!(limiter.admit_at("1.2.3.4", now));
        }
        assert!(!limiter.admit_at("1.2.3.4", now));

        // A different client is unaffected
        assert!(limiter.admit_at("5.6.7.8", now));
    }

    #[test]
    fn test_rejection_has_no_side_effect() {
        let limiter = limiter();
        let now = Instant::now();

        for _ in 0..10 {
            limiter.admit_at("1.2.3.4", now);
        }
        // Hammering an empty bucket must not push the level negative:
        // one refilled token later still admits exactly one request.
        for _ in 0..100 {
            assert!(!limiter.admit_at("1.2.3.4", now));
        }

        let later = now + Duration::from_secs(6);
        assert!(limiter.admit_at("1.2.3.4", later));
        assert!(!limiter.admit_at("1.2.3.4", later));
    }

    #[test]
    fn test_client_id_prefers_forwarded_for() {
        let addr: SocketAddr = "9.9.9.9:1234".parse().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", " 1.2.3.4 , 10.0.0.1".parse().unwrap());
        assert_eq!(client_id(&headers, &addr), "1.2.3.4");

        let empty = HeaderMap::new();
        assert_eq!(client_id(&empty, &addr), "9.9.9.9");
    }
}
