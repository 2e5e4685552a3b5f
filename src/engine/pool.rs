//! Reusable network connections under a scarce budget.
//!
//! Devices are polled far more often than connections are cheap to
//! establish, but endpoints are also volatile (address changes, reboots),
//! so entry health is asserted by the caller on release rather than
//! inferred from a "connected" flag. One mutex guards the pool structure
//! and is held only across scan/pointer swap; open and close I/O happens
//! outside the lock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::transport::{ConnectionHandle, Connector};

/// Pool parameters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolConfig {
    /// Maximum pooled entries (default 10).
    pub capacity: usize,
    /// Entries older than this are reopened on next acquire (default 5 min).
    pub max_age: Duration,
    /// Entries unused for this long are closed by the sweep (default 60 s).
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            max_age: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Override the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Override the maximum entry age.
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Override the idle timeout.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Rolling pool counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct PoolStats {
    /// Connections opened.
    pub opens: u64,
    /// Opens that failed (no slot consumed).
    pub failed_opens: u64,
    /// Acquires satisfied from a pooled entry.
    pub reuse_hits: u64,
    /// Entries evicted to make room at capacity.
    pub evictions: u64,
    /// Entries closed by the idle sweep.
    pub idle_closed: u64,
    /// Emergency flushes under memory pressure.
    pub flushes: u64,
}

/// One pooled connection plus its bookkeeping.
struct PoolEntry {
    handle: ConnectionHandle,
    healthy: bool,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
}

struct Inner {
    entries: HashMap<String, PoolEntry>,
    stats: PoolStats,
}

/// Endpoint-keyed pool of reusable connection handles.
///
/// The engine's poll loop is single-threaded, so each entry's handle is
/// held by at most one in-flight poll between `acquire` and `release`.
pub struct ConnectionPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    inner: Mutex<Inner>,
}

impl ConnectionPool {
    /// Create a pool that opens connections through `connector`.
    pub fn new(config: PoolConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: PoolStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("pool mutex poisoned")
    }

    /// Remove the least-recently-used entry; caller closes the handle
    /// outside the lock.
    fn evict_lru(inner: &mut Inner) -> Option<ConnectionHandle> {
        let key = inner
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used_at)
            .map(|(k, _)| k.clone())?;
        inner.stats.evictions += 1;
        inner.entries.remove(&key).map(|e| e.handle)
    }

    /// Acquire a connection for `endpoint`.
    ///
    /// A healthy entry younger than the maximum age is reused; an
    /// unhealthy or aged entry is closed and reopened into the same slot;
    /// an absent endpoint opens a new connection, evicting the
    /// least-recently-used entry first when the pool is at capacity.
    /// A failed open returns `None` without consuming a slot.
    pub async fn acquire(&self, endpoint: &str) -> Option<ConnectionHandle> {
        let stale = {
            let mut inner = self.lock();
            let reusable = match inner.entries.get(endpoint) {
                Some(e) => e.healthy && e.created_at.elapsed() < self.config.max_age,
                None => false,
            };
            if reusable {
                let e = inner
                    .entries
                    .get_mut(endpoint)
                    .expect("entry vanished under lock");
                e.last_used_at = Instant::now();
                e.use_count += 1;
                let handle = e.handle.clone();
                inner.stats.reuse_hits += 1;
                return Some(handle);
            }
            inner.entries.remove(endpoint).map(|e| e.handle)
        };
        if let Some(h) = stale {
            h.close().await;
        }

        // Make room before opening so a slow open cannot hold the pool
        // over capacity.
        let evicted = {
            let mut inner = self.lock();
            if inner.entries.len() >= self.config.capacity {
                Self::evict_lru(&mut inner)
            } else {
                None
            }
        };
        if let Some(h) = evicted {
            h.close().await;
        }

        let handle = match self.connector.open(endpoint).await {
            Ok(h) => h,
            Err(e) => {
                warn!(endpoint, error = %e, "connection open failed");
                self.lock().stats.failed_opens += 1;
                return None;
            }
        };

        let displaced = {
            let mut inner = self.lock();
            inner.stats.opens += 1;
            // The sweep may have freed or refilled slots while we were
            // opening; re-check capacity before inserting.
            let displaced = if inner.entries.len() >= self.config.capacity {
                Self::evict_lru(&mut inner)
            } else {
                None
            };
            let now = Instant::now();
            inner.entries.insert(
                endpoint.to_string(),
                PoolEntry {
                    handle: handle.clone(),
                    healthy: true,
                    created_at: now,
                    last_used_at: now,
                    use_count: 1,
                },
            );
            displaced
        };
        if let Some(h) = displaced {
            h.close().await;
        }

        Some(handle)
    }

    /// Return a connection with caller-asserted health. A timeout or
    /// protocol error during the poll downgrades health; unhealthy
    /// entries are closed immediately and never reused.
    pub async fn release(&self, endpoint: &str, handle: &ConnectionHandle, healthy: bool) {
        let to_close = {
            let mut inner = self.lock();
            let still_pooled = inner
                .entries
                .get(endpoint)
                .map_or(false, |e| Arc::ptr_eq(&e.handle, handle));
            if still_pooled {
                if healthy {
                    let e = inner
                        .entries
                        .get_mut(endpoint)
                        .expect("entry vanished under lock");
                    e.last_used_at = Instant::now();
                    None
                } else {
                    inner.entries.remove(endpoint).map(|e| e.handle)
                }
            } else {
                // The entry was flushed or replaced while the caller held
                // the handle; the caller's copy is no longer pooled.
                Some(handle.clone())
            }
        };
        if let Some(h) = to_close {
            h.close().await;
        }
    }

    /// Close idle entries, or every entry under memory pressure.
    pub async fn sweep(&self, low_memory: bool) {
        let removed: Vec<ConnectionHandle> = {
            let mut inner = self.lock();
            if low_memory {
                if !inner.entries.is_empty() {
                    inner.stats.flushes += 1;
                }
                inner.entries.drain().map(|(_, e)| e.handle).collect()
            } else {
                let idle: Vec<String> = inner
                    .entries
                    .iter()
                    .filter(|(_, e)| e.last_used_at.elapsed() >= self.config.idle_timeout)
                    .map(|(k, _)| k.clone())
                    .collect();
                inner.stats.idle_closed += idle.len() as u64;
                idle.into_iter()
                    .filter_map(|k| inner.entries.remove(&k).map(|e| e.handle))
                    .collect()
            }
        };
        for h in &removed {
            h.close().await;
        }
        if !removed.is_empty() {
            debug!(
                closed = removed.len(),
                low_memory, "pool sweep closed connections"
            );
        }
    }

    /// Close every pooled connection (shutdown or device-list rebuild).
    pub async fn close_all(&self) {
        let removed: Vec<ConnectionHandle> = {
            let mut inner = self.lock();
            inner.entries.drain().map(|(_, e)| e.handle).collect()
        };
        for h in &removed {
            h.close().await;
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// True when the pool holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Use count of one entry, if pooled.
    pub fn use_count(&self, endpoint: &str) -> Option<u64> {
        self.lock().entries.get(endpoint).map(|e| e.use_count)
    }

    /// Rolling counters.
    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::{EngineError, Result};
    use crate::core::transport::Connection;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestConn {
        closed: AtomicBool,
    }

    #[async_trait]
    impl Connection for TestConn {
        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct TestConnector {
        opened: AtomicUsize,
        fail: AtomicBool,
    }

    impl TestConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl Connector for TestConnector {
        async fn open(&self, endpoint: &str) -> Result<ConnectionHandle> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(EngineError::Connection(format!(
                    "refused: {}",
                    endpoint
                )));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(TestConn {
                closed: AtomicBool::new(false),
            }))
        }
    }

    fn pool_with(capacity: usize) -> (ConnectionPool, Arc<TestConnector>) {
        let connector = TestConnector::new();
        let pool = ConnectionPool::new(
            PoolConfig::default().with_capacity(capacity),
            connector.clone(),
        );
        (pool, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reuses_healthy_entry() {
        let (pool, connector) = pool_with(4);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, true).await;
        let b = pool.acquire("10.0.0.1:502").await.unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(pool.use_count("10.0.0.1:502"), Some(2));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().reuse_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_release_is_never_reused() {
        let (pool, connector) = pool_with(4);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, false).await;
        assert!(pool.is_empty());

        let b = pool.acquire("10.0.0.1:502").await.unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_used() {
        let (pool, _) = pool_with(2);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, true).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        let b = pool.acquire("10.0.0.2:502").await.unwrap();
        pool.release("10.0.0.2:502", &b, true).await;
        tokio::time::advance(Duration::from_millis(10)).await;

        let c = pool.acquire("10.0.0.3:502").await.unwrap();
        pool.release("10.0.0.3:502", &c, true).await;

        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().evictions, 1);
        // The oldest endpoint is gone; the two newer ones remain.
        assert!(pool.use_count("10.0.0.1:502").is_none());
        assert!(pool.use_count("10.0.0.2:502").is_some());
        assert!(pool.use_count("10.0.0.3:502").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_consumes_no_slot() {
        let (pool, connector) = pool_with(2);

        connector.fail.store(true, Ordering::SeqCst);
        assert!(pool.acquire("10.0.0.1:502").await.is_none());
        assert!(pool.is_empty());
        assert_eq!(pool.stats().failed_opens, 1);

        connector.fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire("10.0.0.1:502").await.is_some());
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aged_entry_is_reopened() {
        let (pool, connector) = pool_with(4);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, true).await;

        tokio::time::advance(Duration::from_secs(301)).await;
        let b = pool.acquire("10.0.0.1:502").await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_sweep_closes_entries() {
        let (pool, _) = pool_with(4);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, true).await;

        tokio::time::advance(Duration::from_secs(61)).await;
        pool.sweep(false).await;

        assert!(pool.is_empty());
        assert_eq!(pool.stats().idle_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_memory_flushes_everything() {
        let (pool, _) = pool_with(4);

        let a = pool.acquire("10.0.0.1:502").await.unwrap();
        pool.release("10.0.0.1:502", &a, true).await;
        let b = pool.acquire("10.0.0.2:502").await.unwrap();
        pool.release("10.0.0.2:502", &b, true).await;

        pool.sweep(true).await;
        assert!(pool.is_empty());
        assert_eq!(pool.stats().flushes, 1);
    }
}
