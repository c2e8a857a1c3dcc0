// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed window rate limiter for the contact endpoint.
//!
//! Each client (keyed by IP) gets `max_requests` hits per window. The window
//! opens on the client's first hit and the counter starts over once it
//! elapses. Counters live behind [`RateLimitStore`] so a single instance can
//! keep them in memory while a fleet shares them through Redis.

use crate::config::RateLimitConfig;
use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Counter state for one client in its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub key: String,
    pub hit_count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_reset_at
    }

    fn reset_in(&self, now: DateTime<Utc>) -> Duration {
        (self.window_reset_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Counter storage used by [`RateLimiter`].
///
/// `increment` must be atomic per key: concurrent callers never lose hits.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Current window for `key`, if one is open at `now`.
    async fn get(&self, key: &str, now: DateTime<Utc>)
        -> Result<Option<RateLimitEntry>, StoreError>;

    /// Count one hit, opening a new window when the previous one elapsed.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, StoreError>;

    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Drop elapsed windows. Returns how many were removed.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(0)
    }
}

/// In-process store for single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for MemoryStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).filter(|e| !e.is_expired(now)).cloned())
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, StoreError> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| StoreError::Unavailable(format!("window out of range: {e}")))?;

        let window_reset_at = now
            .checked_add_signed(window)
            .ok_or_else(|| StoreError::Unavailable("window end out of range".to_string()))?;

        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry {
                key: key.to_string(),
                hit_count: 0,
                window_reset_at,
            });

        if entry.is_expired(now) {
            entry.hit_count = 0;
            entry.window_reset_at = window_reset_at;
        }
        entry.hit_count = entry.hit_count.saturating_add(1);

        Ok(entry.clone())
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed
    Allowed {
        /// Remaining requests in current window
        remaining: u32,
        /// Time until window resets
        reset_in: Duration,
    },
    /// Request is rate limited
    Limited {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Fixed window rate limiter over an injectable store.
pub struct RateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    /// Create a limiter backed by a fresh [`MemoryStore`].
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(config: RateLimitConfig, store: Arc<dyn RateLimitStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Whether a request bypasses the limiter entirely.
    pub fn is_exempt(&self, path: &str, ip: Option<IpAddr>) -> bool {
        if self
            .config
            .skip_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return true;
        }
        self.config.exempt_loopback && ip.is_some_and(|ip| ip.is_loopback())
    }

    /// Count a hit for `client` at `now` and decide whether it may proceed.
    ///
    /// Store failures let the request through; the limiter never turns an
    /// outage of its backing store into a client-facing error.
    pub async fn check(&self, client: &str, now: DateTime<Utc>) -> RateLimitResult {
        let entry = match self
            .store
            .increment(client, self.config.window_duration(), now)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(client = %client, error = %e, "Rate limit store failed, allowing request");
                return RateLimitResult::Allowed {
                    remaining: self.config.max_requests,
                    reset_in: self.config.window_duration(),
                };
            }
        };

        if entry.hit_count <= self.config.max_requests {
            RateLimitResult::Allowed {
                remaining: self.config.max_requests - entry.hit_count,
                reset_in: entry.reset_in(now),
            }
        } else {
            let retry_after = entry.reset_in(now);
            debug!(client = %client, ?retry_after, "Client rate limit exceeded");
            RateLimitResult::Limited { retry_after }
        }
    }

    /// Forget a client's current window.
    pub async fn reset(&self, client: &str) -> Result<(), StoreError> {
        self.store.reset(client).await
    }

    /// Clean up expired entries (should be called periodically).
    pub async fn cleanup(&self, now: DateTime<Utc>) {
        match self.store.purge_expired(now).await {
            Ok(0) => {}
            Ok(removed) => debug!(removed, "Purged expired rate limit windows"),
            Err(e) => warn!(error = %e, "Rate limit cleanup failed"),
        }
    }
}

/// Derive the client IP, preferring forwarding headers over the peer address.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    forwarded.or_else(real_ip).or(peer.map(|addr| addr.ip()))
}

/// Redis-backed store shared by every instance of the service.
///
/// Windows are aligned to multiples of the window length so all instances
/// agree on boundaries without coordination.
#[cfg(feature = "redis")]
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
    window: Duration,
    timeout: Duration,
}

#[cfg(feature = "redis")]
impl RedisStore {
    pub fn new(url: &str, prefix: &str, window: Duration) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            window,
            timeout: Duration::from_millis(250),
        })
    }

    fn window_bounds(window: Duration, now: DateTime<Utc>) -> (i64, DateTime<Utc>) {
        let window_ms = (window.as_millis() as i64).max(1);
        let index = now.timestamp_millis().div_euclid(window_ms);
        let reset_at = DateTime::<Utc>::from_timestamp_millis((index + 1) * window_ms)
            .unwrap_or(now);
        (index, reset_at)
    }

    fn window_key(&self, key: &str, index: i64) -> String {
        format!("{}:rl:{key}:{index}", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        tokio::time::timeout(self.timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Unavailable("redis timeout".to_string()))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[cfg(feature = "redis")]
fn redis_err(e: redis::RedisError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[cfg(feature = "redis")]
#[async_trait]
impl RateLimitStore for RedisStore {
    async fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<RateLimitEntry>, StoreError> {
        use redis::AsyncCommands;

        let (index, window_reset_at) = Self::window_bounds(self.window, now);
        let mut conn = self.connection().await?;
        let count: Option<u32> = conn
            .get(self.window_key(key, index))
            .await
            .map_err(redis_err)?;

        Ok(count.map(|hit_count| RateLimitEntry {
            key: key.to_string(),
            hit_count,
            window_reset_at,
        }))
    }

    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateLimitEntry, StoreError> {
        use redis::AsyncCommands;

        let (index, window_reset_at) = Self::window_bounds(window, now);
        let window_key = self.window_key(key, index);
        let mut conn = self.connection().await?;

        let hit_count: u32 = conn.incr(&window_key, 1_u32).await.map_err(redis_err)?;
        if hit_count == 1 {
            let _: bool = conn
                .pexpire(&window_key, window.as_millis() as i64)
                .await
                .map_err(redis_err)?;
        }

        Ok(RateLimitEntry {
            key: key.to_string(),
            hit_count,
            window_reset_at,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        use redis::AsyncCommands;

        let (index, _) = Self::window_bounds(self.window, Utc::now());
        let mut conn = self.connection().await?;
        let _: usize = conn
            .del(self.window_key(key, index))
            .await
            .map_err(redis_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::TimeZone;
    use std::net::Ipv4Addr;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()
    }

    fn limiter(max_requests: u32, window_ms: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_ms,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_denies_request_over_limit() {
        let limiter = limiter(5, 60_000);
        let now = t0();

        // First 5 requests should succeed
        for i in 0..5 {
            match limiter.check("203.0.113.7", now).await {
                RateLimitResult::Allowed { remaining, .. } => assert_eq!(remaining, 4 - i),
                RateLimitResult::Limited { .. } => panic!("Should not be limited"),
            }
        }

        // 6th request should be limited
        match limiter.check("203.0.113.7", now).await {
            RateLimitResult::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            RateLimitResult::Allowed { .. } => panic!("Should be limited"),
        }
    }

    #[tokio::test]
    async fn test_window_elapses_and_resets() {
        let limiter = limiter(2, 60_000);
        let start = t0();

        assert!(limiter.check("client", start).await.is_allowed());
        assert!(limiter.check("client", start).await.is_allowed());

        let later = start + chrono::Duration::seconds(30);
        match limiter.check("client", later).await {
            RateLimitResult::Limited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30));
            }
            other => panic!("Should be limited, got {other:?}"),
        }

        let after_window = start + chrono::Duration::seconds(60);
        assert!(limiter.check("client", after_window).await.is_allowed());
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let limiter = limiter(1, 60_000);
        let now = t0();

        assert!(limiter.check("10.0.0.1", now).await.is_allowed());
        assert!(!limiter.check("10.0.0.1", now).await.is_allowed());
        assert!(limiter.check("10.0.0.2", now).await.is_allowed());
    }

    #[tokio::test]
    async fn test_reset_clears_window() {
        let limiter = limiter(1, 60_000);
        let now = t0();

        assert!(limiter.check("client", now).await.is_allowed());
        assert!(!limiter.check("client", now).await.is_allowed());
        limiter.reset("client").await.unwrap();
        assert!(limiter.check("client", now).await.is_allowed());
    }

    #[tokio::test]
    async fn test_memory_store_purges_expired_windows() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);
        let now = t0();

        store.increment("a", window, now).await.unwrap();
        store
            .increment("b", window, now + chrono::Duration::seconds(45))
            .await
            .unwrap();

        let removed = store
            .purge_expired(now + chrono::Duration::seconds(61))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.get("a", now).await.unwrap().is_none());
        assert_eq!(
            store.get("b", now).await.unwrap().map(|e| e.hit_count),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let now = t0();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .increment("shared", Duration::from_secs(60), now)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let entry = store.get("shared", now).await.unwrap().unwrap();
        assert_eq!(entry.hit_count, 50);
    }

    #[tokio::test]
    async fn test_window_past_calendar_range_does_not_panic() {
        let window = Duration::from_millis(10_000_000_000_000_000);
        let store = MemoryStore::new();

        let err = store.increment("203.0.113.9", window, t0()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.is_empty().await);

        // The limiter treats it like any other store failure.
        let limiter = limiter(1, 10_000_000_000_000_000);
        for _ in 0..3 {
            assert!(limiter.check("203.0.113.9", t0()).await.is_allowed());
        }
    }

    #[test]
    fn test_exempt_paths_and_loopback() {
        let limiter = RateLimiter::new(RateLimitConfig {
            exempt_loopback: true,
            ..Default::default()
        });
        let loopback = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let remote = Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 4)));

        assert!(limiter.is_exempt("/api/health", remote));
        assert!(limiter.is_exempt("/static/app.js", remote));
        assert!(!limiter.is_exempt("/api/contact", remote));
        assert!(limiter.is_exempt("/api/contact", loopback));

        let strict = RateLimiter::new(RateLimitConfig::default());
        assert!(!strict.is_exempt("/api/contact", loopback));
    }

    #[test]
    fn test_client_ip_prefers_forwarding_headers() {
        let peer: SocketAddr = "192.0.2.1:5000".parse().unwrap();

        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), Some(peer.ip()));

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some("198.51.100.9".parse().unwrap())
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.5, 10.0.0.1"),
        );
        assert_eq!(
            client_ip(&headers, Some(peer)),
            Some("203.0.113.5".parse().unwrap())
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(
            client_ip(&headers, None),
            Some("198.51.100.9".parse().unwrap())
        );
    }
}
