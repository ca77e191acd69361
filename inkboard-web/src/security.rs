//! Security utilities for the Inkboard web server
//!
//! Provides the per-IP rate limiter guarding CSRF token issuance and the
//! client IP extraction shared with the legacy identity path.

use axum::http::HeaderMap;
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, warn};

/// Rate limiting configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Rate limiter entry for tracking requests
#[derive(Debug, Clone)]
struct RateLimitEntry {
    requests: Vec<Instant>,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            last_request: Instant::now(),
        }
    }

    fn add_request(&mut self, now: Instant) {
        self.requests.push(now);
        self.last_request = now;
    }

    fn cleanup_old_requests(&mut self, window: Duration) {
        let cutoff = Instant::now() - window;
        self.requests.retain(|&request_time| request_time > cutoff);
    }

    fn request_count(&self) -> usize {
        self.requests.len()
    }
}

/// Rolling-window per-IP rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    entries: Arc<Mutex<HashMap<IpAddr, RateLimitEntry>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let limiter = Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
        };

        limiter.start_cleanup_task();
        limiter
    }

    pub fn check_rate_limit(&self, ip: IpAddr) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        let entry = entries.entry(ip).or_insert_with(RateLimitEntry::new);
        entry.cleanup_old_requests(window);

        if entry.request_count() >= self.config.requests_per_minute as usize {
            warn!("Rate limit exceeded for IP: {}", ip);
            false
        } else {
            entry.add_request(now);
            debug!(
                "Request allowed for IP: {} ({}/{})",
                ip,
                entry.request_count(),
                self.config.requests_per_minute
            );
            true
        }
    }

    fn start_cleanup_task(&self) {
        let entries = Arc::clone(&self.entries);
        let cleanup_interval = self.config.cleanup_interval;

        // Only spawned when a runtime is available; sync tests construct
        // the limiter without one.
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);

            loop {
                interval.tick().await;

                let mut entries = entries.lock().unwrap();
                let cutoff = Instant::now() - Duration::from_secs(300);

                entries.retain(|_, entry| entry.last_request > cutoff);
                debug!("Rate limiter cleanup completed");
            }
        });
    }
}

/// Security middleware state
#[derive(Debug, Clone)]
pub struct SecurityState {
    pub rate_limiter: Arc<RateLimiter>,
}

impl SecurityState {
    pub fn new(rate_limit_config: RateLimitConfig) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(rate_limit_config)),
        }
    }
}

/// Extract the apparent client IP from request headers.
///
/// Honors reverse-proxy headers first; the result is only used for rate
/// limiting and the legacy client identity, never for authorization.
pub fn client_ip(headers: &HeaderMap) -> IpAddr {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            if let Ok(ip) = ip_str.parse() {
                return ip;
            }
        }
    }

    // No connection info at this layer; default to loopback.
    "127.0.0.1".parse().unwrap()
}
