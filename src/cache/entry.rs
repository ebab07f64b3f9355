//! Cache Item Module
//!
//! Defines a single table entry: immutable key, value and TTL plus lock-guarded
//! access metadata.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Callback fired with the key right before an item leaves its table.
pub type ExpireCallback<K> = Arc<dyn Fn(&K) + Send + Sync>;

// == Access State ==
/// Mutable part of an item, guarded by the item's own lock.
struct AccessState<K> {
    accessed_at: Instant,
    access_count: u64,
    about_to_expire: Option<ExpireCallback<K>>,
}

// == Cache Item ==
/// One cached key/value pair and its metadata.
///
/// Key, value and TTL never change after construction. Access metadata and the
/// expiry callback sit behind a per-item mutex so that `keep_alive` on a hot item
/// never touches the table lock.
pub struct CacheItem<K, V> {
    key: K,
    value: V,
    /// Zero means the item never expires
    ttl: Duration,
    created_at: Instant,
    created_on: DateTime<Utc>,
    state: Mutex<AccessState<K>>,
}

impl<K, V> CacheItem<K, V> {
    // == Constructor ==
    /// Creates a new item. Creation and last access are both set to now.
    ///
    /// # Arguments
    /// * `key` - The item's cache key
    /// * `ttl` - Lifetime measured from creation, `Duration::ZERO` for never
    /// * `value` - The payload
    pub fn new(key: K, ttl: Duration, value: V) -> Self {
        let now = Instant::now();
        Self {
            key,
            value,
            ttl,
            created_at: now,
            created_on: Utc::now(),
            state: Mutex::new(AccessState {
                accessed_at: now,
                access_count: 0,
                about_to_expire: None,
            }),
        }
    }

    // == Keep Alive ==
    /// Records an access: bumps the counter and the last-access time.
    ///
    /// This does not extend the item's life; expiry is measured from creation.
    pub fn keep_alive(&self) {
        let mut state = self.state.lock();
        state.accessed_at = Instant::now();
        state.access_count += 1;
    }

    /// Replaces the callback fired before this item is removed. Last writer wins.
    pub fn set_about_to_expire_callback<F>(&self, callback: F)
    where
        F: Fn(&K) + Send + Sync + 'static,
    {
        self.state.lock().about_to_expire = Some(Arc::new(callback));
    }

    /// Clones the expiry callback out so it can run without holding the lock.
    pub(crate) fn about_to_expire_callback(&self) -> Option<ExpireCallback<K>> {
        self.state.lock().about_to_expire.clone()
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// True when the item has a finite lifetime.
    pub fn expires(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Monotonic creation time, used for expiry arithmetic.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wall-clock creation time, used for reporting.
    pub fn created_on(&self) -> DateTime<Utc> {
        self.created_on
    }

    pub fn accessed_at(&self) -> Instant {
        self.state.lock().accessed_at
    }

    pub fn access_count(&self) -> u64 {
        self.state.lock().access_count
    }

    // == Remaining ==
    /// Time left before expiry as seen at `now`.
    ///
    /// # Returns
    /// - `None` if the item never expires
    /// - `Some(Duration::ZERO)` if the item is already due
    /// - `Some(remaining)` otherwise
    pub fn remaining_at(&self, now: Instant) -> Option<Duration> {
        if !self.expires() {
            return None;
        }
        let age = now.saturating_duration_since(self.created_at);
        Some(self.ttl.saturating_sub(age))
    }

    /// Splits a loader-produced item into the parts an insert needs.
    pub(crate) fn into_parts(self) -> (Duration, V) {
        (self.ttl, self.value)
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for CacheItem<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItem")
            .field("key", &self.key)
            .field("value", &self.value)
            .field("ttl", &self.ttl)
            .field("created_on", &self.created_on)
            .field("access_count", &self.access_count())
            .finish_non_exhaustive()
    }
}
