//! Rate tracker
//!
//! Fixed-window count of evaluated actions per environment. The count is
//! advisory context for the policy service, so read failures count as zero.

use crate::error::RateStoreError;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::Expiry;
use remedy_core::{Environment, RateConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counter store with atomic increment-with-expiry
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Current value, zero if the key is absent or expired
    async fn get(&self, key: &str) -> Result<u64, RateStoreError>;

    /// Increment and return the new value; a newly created key expires after `ttl`
    async fn increment_with_expiry(&self, key: &str, ttl: Duration)
        -> Result<u64, RateStoreError>;
}

#[derive(Debug)]
struct WindowCounter {
    count: AtomicU64,
    ttl: Duration,
}

struct CreatedTtl;

impl Expiry<String, Arc<WindowCounter>> for CreatedTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<WindowCounter>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process [`CounterStore`] on a moka cache
#[derive(Clone)]
pub struct InMemoryCounterStore {
    cache: Cache<String, Arc<WindowCounter>>,
}

impl InMemoryCounterStore {
    /// Create store holding at most `max_keys` counters
    #[must_use]
    pub fn new(max_keys: u64) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(max_keys)
                .expire_after(CreatedTtl)
                .build(),
        }
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new(RateConfig::default().max_tracked_keys)
    }
}

impl std::fmt::Debug for InMemoryCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCounterStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

#[async_trait::async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<u64, RateStoreError> {
        Ok(self
            .cache
            .get(key)
            .await
            .map_or(0, |c| c.count.load(Ordering::Acquire)))
    }

    async fn increment_with_expiry(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<u64, RateStoreError> {
        let counter = self
            .cache
            .get_with(key.to_string(), async move {
                Arc::new(WindowCounter {
                    count: AtomicU64::new(0),
                    ttl,
                })
            })
            .await;
        Ok(counter.count.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

/// Per-environment action counter
#[derive(Clone)]
pub struct RateTracker {
    store: Arc<dyn CounterStore>,
    window: Duration,
}

impl RateTracker {
    /// Create tracker over a store with a fixed window length
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, window: Duration) -> Self {
        Self {
            store,
            window: window.max(Duration::from_secs(1)),
        }
    }

    /// In-memory tracker from configuration
    #[must_use]
    pub fn from_config(config: &RateConfig) -> Self {
        Self::new(
            Arc::new(InMemoryCounterStore::new(config.max_tracked_keys)),
            config.window(),
        )
    }

    #[inline]
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Counter key for the window containing `at`
    #[must_use]
    pub fn window_key(&self, environment: Environment, at: DateTime<Utc>) -> String {
        let secs = u64::try_from(at.timestamp()).unwrap_or(0);
        let index = secs / self.window.as_secs();
        format!("remedy:rate:{}:{index}", environment.as_str())
    }

    /// Actions counted in the current window; zero on backend failure
    pub async fn count_recent_actions(&self, environment: Environment) -> u64 {
        let key = self.window_key(environment, Utc::now());
        match self.store.get(&key).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(%environment, error = %e, "rate store read failed, counting as zero");
                0
            }
        }
    }

    /// Count one action in the current window
    ///
    /// # Errors
    /// Propagates the store's [`RateStoreError`].
    pub async fn increment(&self, environment: Environment) -> Result<u64, RateStoreError> {
        let key = self.window_key(environment, Utc::now());
        self.store.increment_with_expiry(&key, self.window).await
    }
}

impl std::fmt::Debug for RateTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateTracker")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
