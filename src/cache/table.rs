//! Cache Table Module
//!
//! A named, thread-safe map of [`CacheItem`]s with a self-adjusting expiration
//! timer, lifecycle callbacks and access ranking.
//!
//! Each table owns at most one pending sweep. A sweep removes every expired item
//! and reschedules itself for the soonest remaining expiry, so the number of
//! timers does not grow with the number of items.
//!
//! User callbacks never run while the table lock is held; they are free to call
//! back into the table.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheItem;
use crate::error::{CacheError, Result};
use crate::tasks::{background_handle, spawn_sweep};

/// Callback receiving an item that was just added or is about to be deleted.
pub type ItemCallback<K, V> = Arc<dyn Fn(&Arc<CacheItem<K, V>>) + Send + Sync>;

/// Loader invoked on a miss with the key and the caller's arguments.
pub type DataLoader<K, V, A> = Arc<dyn Fn(&K, &[A]) -> Option<CacheItem<K, V>> + Send + Sync>;

// == Table State ==
/// Everything guarded by the table lock. Items and the timer change together.
struct TableState<K, V, A> {
    items: HashMap<K, Arc<CacheItem<K, V>>>,
    /// Runtime the sweep timer is spawned on
    runtime: Handle,
    /// Wait of the currently scheduled sweep, zero when none is scheduled
    cleanup_interval: Duration,
    cleanup_timer: Option<JoinHandle<()>>,
    load_data: Option<DataLoader<K, V, A>>,
    added_item: Option<ItemCallback<K, V>>,
    about_to_delete_item: Option<ItemCallback<K, V>>,
}

struct TableShared<K, V, A> {
    name: String,
    log_events: AtomicBool,
    state: RwLock<TableState<K, V, A>>,
}

// == Cache Table ==
/// Handle to a named cache table.
///
/// Cloning is cheap and every clone refers to the same table. `A` is the type
/// of the extra arguments handed to the data loader by [`fetch_with`].
///
/// [`fetch_with`]: CacheTable::fetch_with
pub struct CacheTable<K, V, A = ()> {
    shared: Arc<TableShared<K, V, A>>,
}

impl<K, V, A> Clone for CacheTable<K, V, A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<K, V, A> CacheTable<K, V, A>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    // == Constructors ==
    /// Creates an empty table with no scheduled sweep.
    ///
    /// Sweeps run on a process-wide background runtime, so the table keeps
    /// expiring items whichever runtimes the caller starts and drops.
    ///
    /// # Panics
    /// Panics if the background runtime cannot be started. Use
    /// [`try_new`](CacheTable::try_new) to handle that case.
    pub fn new(name: impl Into<String>) -> Self {
        Self::try_new(name).expect("Failed to start sweeper runtime")
    }

    /// Creates an empty table with no scheduled sweep.
    ///
    /// # Errors
    /// - `Runtime` if the background sweeper runtime cannot be started
    pub fn try_new(name: impl Into<String>) -> Result<Self> {
        Ok(Self::with_runtime(name, background_handle()?))
    }

    /// Creates an empty table whose sweeps run on `runtime`.
    ///
    /// Once `runtime` shuts down, the table moves its sweeps to the background
    /// runtime. A sweep that was already pending when it shut down is
    /// rescheduled by the next insert.
    pub fn with_runtime(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(TableShared {
                name: name.into(),
                log_events: AtomicBool::new(false),
                state: RwLock::new(TableState {
                    items: HashMap::new(),
                    runtime,
                    cleanup_interval: Duration::ZERO,
                    cleanup_timer: None,
                    load_data: None,
                    added_item: None,
                    about_to_delete_item: None,
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    // == Insert ==
    /// Stores an item, replacing any item already stored under `key`.
    ///
    /// A replaced item is dropped silently: neither the delete callback nor its
    /// expiry callback fires. The added-item callback runs after the table lock
    /// is released.
    ///
    /// # Arguments
    /// * `key` - The key to store
    /// * `ttl` - Lifetime measured from now, `Duration::ZERO` for never
    /// * `value` - The value to store
    pub fn insert(&self, key: K, ttl: Duration, value: V) -> Arc<CacheItem<K, V>> {
        self.shared.add(CacheItem::new(key, ttl, value))
    }

    /// Inserts only if `key` is absent. Returns whether the item was added.
    pub fn not_found_add(&self, key: K, ttl: Duration, value: V) -> bool {
        self.shared.not_found_add(key, ttl, value)
    }

    // == Fetch ==
    /// Looks up `key`, recording an access on a hit.
    ///
    /// On a miss the data loader, if any, is asked for the item with no
    /// arguments.
    pub fn fetch(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        self.shared.value(key, &[])
    }

    /// Like [`fetch`](CacheTable::fetch), passing `args` to the loader on a miss.
    ///
    /// # Errors
    /// - `NotFound` if the key is absent and no loader is set
    /// - `NotLoadable` if the loader returned nothing
    pub fn fetch_with(&self, key: &K, args: &[A]) -> Result<Arc<CacheItem<K, V>>> {
        self.shared.value(key, args)
    }

    // == Delete ==
    /// Removes `key` and returns its item.
    ///
    /// The about-to-delete callback and the item's own expiry callback run
    /// before removal, outside the table lock.
    pub fn delete(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        self.shared.delete(key)
    }

    /// Membership test. Does not count as an access.
    pub fn exists(&self, key: &K) -> bool {
        self.shared.state.read().items.contains_key(key)
    }

    pub fn count(&self) -> usize {
        self.shared.state.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    // == Flush ==
    /// Drops every item and cancels the pending sweep. No callbacks fire.
    pub fn flush(&self) {
        let mut state = self.shared.state.write();
        if self.shared.logging() {
            info!(table = %self.shared.name, items = state.items.len(), "Flushing cache table");
        }

        state.items = HashMap::new();
        state.cleanup_interval = Duration::ZERO;
        if let Some(timer) = state.cleanup_timer.take() {
            timer.abort();
        }
    }

    // == Most Accessed ==
    /// Returns up to `count` items ordered by descending access count.
    ///
    /// Items with equal counts come back in no particular order.
    pub fn most_accessed(&self, count: usize) -> Vec<Arc<CacheItem<K, V>>> {
        let state = self.shared.state.write();

        let mut ranked: Vec<(u64, &Arc<CacheItem<K, V>>)> = state
            .items
            .values()
            .map(|item| (item.access_count(), item))
            .collect();
        ranked.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let top: Vec<Arc<CacheItem<K, V>>> = ranked
            .into_iter()
            .take(count)
            .map(|(_, item)| Arc::clone(item))
            .collect();
        top
    }

    // == For Each ==
    /// Visits every item present when the call started.
    ///
    /// The visitor works on a snapshot and runs without the table lock, so it
    /// may modify the table.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&K, &Arc<CacheItem<K, V>>),
    {
        let snapshot: Vec<Arc<CacheItem<K, V>>> =
            self.shared.state.read().items.values().cloned().collect();

        for item in &snapshot {
            visit(item.key(), item);
        }
    }

    /// Wait of the currently scheduled sweep, `Duration::ZERO` when none is pending.
    pub fn next_sweep_due(&self) -> Duration {
        self.shared.state.read().cleanup_interval
    }

    // == Callbacks ==
    /// Sets the loader consulted on a miss.
    pub fn set_data_loader<F>(&self, loader: F)
    where
        F: Fn(&K, &[A]) -> Option<CacheItem<K, V>> + Send + Sync + 'static,
    {
        self.shared.state.write().load_data = Some(Arc::new(loader));
    }

    /// Sets the callback fired after every insert.
    pub fn set_added_item_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        self.shared.state.write().added_item = Some(Arc::new(callback));
    }

    /// Sets the callback fired before an item is deleted or expires.
    pub fn set_about_to_delete_item_callback<F>(&self, callback: F)
    where
        F: Fn(&Arc<CacheItem<K, V>>) + Send + Sync + 'static,
    {
        self.shared.state.write().about_to_delete_item = Some(Arc::new(callback));
    }

    /// Turns lifecycle log events for this table on or off.
    pub fn set_logging(&self, enabled: bool) {
        self.shared.log_events.store(enabled, Ordering::Relaxed);
    }
}

impl<K, V, A> TableShared<K, V, A>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    fn logging(&self) -> bool {
        self.log_events.load(Ordering::Relaxed)
    }

    fn add(self: &Arc<Self>, item: CacheItem<K, V>) -> Arc<CacheItem<K, V>> {
        let item = Arc::new(item);
        let added_item = {
            let mut state = self.state.write();
            self.store(&mut state, Arc::clone(&item))
        };

        if let Some(callback) = added_item {
            callback(&item);
        }
        item
    }

    fn not_found_add(self: &Arc<Self>, key: K, ttl: Duration, value: V) -> bool {
        let mut state = self.state.write();
        if state.items.contains_key(&key) {
            return false;
        }

        let item = Arc::new(CacheItem::new(key, ttl, value));
        let added_item = self.store(&mut state, Arc::clone(&item));
        drop(state);

        if let Some(callback) = added_item {
            callback(&item);
        }
        true
    }

    /// Puts `item` into the map and pulls the next sweep forward if needed.
    /// Returns the added-item callback for the caller to run once unlocked.
    fn store(
        self: &Arc<Self>,
        state: &mut TableState<K, V, A>,
        item: Arc<CacheItem<K, V>>,
    ) -> Option<ItemCallback<K, V>> {
        if self.logging() {
            info!(
                table = %self.name,
                key = ?item.key(),
                ttl_ms = item.ttl().as_millis() as u64,
                "Adding item to cache table"
            );
        }

        let ttl = item.ttl();
        state.items.insert(item.key().clone(), item);

        // A running sweep takes its own handle first, so a finished one here
        // was cancelled by its runtime shutting down.
        let lost = state.cleanup_timer.as_ref().is_some_and(JoinHandle::is_finished);
        if lost {
            warn!(table = %self.name, "Pending sweep was cancelled, rescheduling");
        }

        // Anything scheduled would fire too late for this item.
        let sooner =
            !ttl.is_zero() && (state.cleanup_interval.is_zero() || ttl < state.cleanup_interval);
        if sooner {
            state.cleanup_interval = ttl;
        }
        if lost || sooner {
            self.schedule_sweep(state, Duration::ZERO);
        }

        state.added_item.clone()
    }

    fn value(self: &Arc<Self>, key: &K, args: &[A]) -> Result<Arc<CacheItem<K, V>>> {
        let (found, load_data) = {
            let state = self.state.read();
            (state.items.get(key).cloned(), state.load_data.clone())
        };

        if let Some(item) = found {
            item.keep_alive();
            return Ok(item);
        }

        let Some(load_data) = load_data else {
            return Err(CacheError::NotFound(self.name.clone()));
        };

        match load_data(key, args) {
            Some(loaded) => {
                let (ttl, value) = loaded.into_parts();
                Ok(self.add(CacheItem::new(key.clone(), ttl, value)))
            }
            None => Err(CacheError::NotLoadable(self.name.clone())),
        }
    }

    fn delete(&self, key: &K) -> Result<Arc<CacheItem<K, V>>> {
        loop {
            let item = self
                .state
                .read()
                .items
                .get(key)
                .cloned()
                .ok_or_else(|| CacheError::NotFound(self.name.clone()))?;

            // Lost a race with a concurrent replace; delete whatever is there now.
            if self.delete_item(key, &item) {
                return Ok(item);
            }
        }
    }

    /// Runs the delete callbacks for `item` and removes it from under `key`.
    ///
    /// Returns false without doing anything if `key` no longer maps to this
    /// exact item. A fresh item stored under `key` by one of the callbacks is
    /// left in place.
    fn delete_item(&self, key: &K, item: &Arc<CacheItem<K, V>>) -> bool {
        let about_to_delete_item = {
            let state = self.state.read();
            if !holds(&state.items, key, item) {
                return false;
            }
            state.about_to_delete_item.clone()
        };

        if let Some(callback) = about_to_delete_item {
            callback(item);
        }
        if let Some(callback) = item.about_to_expire_callback() {
            callback(item.key());
        }

        let mut state = self.state.write();
        if holds(&state.items, key, item) {
            if self.logging() {
                info!(
                    table = %self.name,
                    key = ?item.key(),
                    created_on = %item.created_on(),
                    access_count = item.access_count(),
                    "Deleting item from cache table"
                );
            }
            state.items.remove(key);
        }
        true
    }

    // == Expiration Check ==
    /// Removes expired items and schedules the next sweep for the soonest
    /// remaining expiry. Runs on the sweeper runtime, never on a caller's path.
    fn expiration_check(self: &Arc<Self>) {
        if self.logging() {
            let interval = self.state.read().cleanup_interval;
            if interval.is_zero() {
                debug!(table = %self.name, "Expiration check installed");
            } else {
                debug!(
                    table = %self.name,
                    after_ms = interval.as_millis() as u64,
                    "Expiration check triggered"
                );
            }
        }

        loop {
            let expired = {
                let mut state = self.state.write();
                if let Some(timer) = state.cleanup_timer.take() {
                    timer.abort();
                }

                let now = Instant::now();
                let mut smallest: Option<Duration> = None;
                let mut expired = Vec::new();

                for (key, item) in &state.items {
                    match item.remaining_at(now) {
                        None => {}
                        Some(remaining) if remaining.is_zero() => {
                            expired.push((key.clone(), Arc::clone(item)));
                        }
                        Some(remaining) => {
                            smallest = Some(smallest.map_or(remaining, |s| s.min(remaining)));
                        }
                    }
                }

                if expired.is_empty() {
                    match smallest {
                        Some(delay) => {
                            state.cleanup_interval = delay;
                            self.schedule_sweep(&mut state, delay);
                        }
                        None => state.cleanup_interval = Duration::ZERO,
                    }
                    return;
                }
                expired
            };

            // Deletion runs the callbacks, so the lock has to be released first.
            for (key, item) in &expired {
                if !self.delete_item(key, item) {
                    debug!(table = %self.name, key = ?key, "Expired item was replaced before removal");
                }
            }
        }
    }

    /// Replaces the pending sweep with one firing after `delay`.
    ///
    /// Falls back to the background runtime when the table's runtime has shut
    /// down.
    fn schedule_sweep(self: &Arc<Self>, state: &mut TableState<K, V, A>, delay: Duration) {
        if let Some(timer) = state.cleanup_timer.take() {
            timer.abort();
        }

        let mut timer = self.spawn_timer(&state.runtime, delay);
        if timer.is_finished() {
            match background_handle() {
                Ok(runtime) => {
                    warn!(table = %self.name, "Sweeper runtime has shut down, moving to background runtime");
                    timer = self.spawn_timer(&runtime, delay);
                    state.runtime = runtime;
                }
                Err(e) => {
                    warn!(table = %self.name, error = %e, "No runtime left for expiration sweeps");
                    state.cleanup_interval = Duration::ZERO;
                    return;
                }
            }
        }
        state.cleanup_timer = Some(timer);
    }

    fn spawn_timer(self: &Arc<Self>, runtime: &Handle, delay: Duration) -> JoinHandle<()> {
        spawn_sweep(runtime, delay, Arc::downgrade(self), |table: Arc<Self>| {
            table.expiration_check()
        })
    }
}

/// Whether `key` still maps to this exact item.
fn holds<K, V>(items: &HashMap<K, Arc<CacheItem<K, V>>>, key: &K, item: &Arc<CacheItem<K, V>>) -> bool
where
    K: Eq + Hash,
{
    items.get(key).is_some_and(|current| Arc::ptr_eq(current, item))
}

impl<K, V, A> Drop for TableShared<K, V, A> {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().cleanup_timer.take() {
            timer.abort();
        }
    }
}

impl<K, V, A> fmt::Debug for CacheTable<K, V, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("CacheTable")
            .field("name", &self.shared.name)
            .field("items", &state.items.len())
            .field("cleanup_interval", &state.cleanup_interval)
            .finish()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread::sleep;

    const LONG: Duration = Duration::from_secs(300);

    fn table() -> CacheTable<String, String> {
        CacheTable::new("test")
    }

    fn dead_runtime() -> Handle {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let handle = runtime.handle().clone();
        drop(runtime);
        handle
    }

    #[test]
    fn test_table_new() {
        let table = table();
        assert_eq!(table.name(), "test");
        assert_eq!(table.count(), 0);
        assert!(table.is_empty());
        assert_eq!(table.next_sweep_due(), Duration::ZERO);
    }

    #[test]
    fn test_insert_and_fetch() {
        let table = table();

        table.insert("key1".to_string(), LONG, "value1".to_string());
        let item = table.fetch(&"key1".to_string()).unwrap();

        assert_eq!(item.value(), "value1");
        assert_eq!(item.access_count(), 1);
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_fetch_nonexistent() {
        let table = table();

        let result = table.fetch(&"nonexistent".to_string());
        assert!(matches!(result, Err(CacheError::NotFound(_))));
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_exists_does_not_count_as_access() {
        let table = table();
        let item = table.insert("key1".to_string(), LONG, "value1".to_string());

        assert!(table.exists(&"key1".to_string()));
        assert!(!table.exists(&"key2".to_string()));
        assert_eq!(item.access_count(), 0);
    }

    #[test]
    fn test_overwrite_replaces_item_without_callbacks() {
        let table = table();
        let deletions = Arc::new(AtomicUsize::new(0));

        let counter = deletions.clone();
        table.set_about_to_delete_item_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let first = table.insert("key1".to_string(), LONG, "value1".to_string());
        let counter = deletions.clone();
        first.set_about_to_expire_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let second = table.insert("key1".to_string(), LONG, "value2".to_string());

        assert_eq!(table.count(), 1);
        assert_eq!(table.fetch(&"key1".to_string()).unwrap().value(), "value2");
        assert!(second.created_at() >= first.created_at());
        assert_eq!(deletions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delete() {
        let table = table();

        table.insert("key1".to_string(), LONG, "value1".to_string());
        let removed = table.delete(&"key1".to_string()).unwrap();

        assert_eq!(removed.value(), "value1");
        assert!(table.is_empty());
        assert!(matches!(table.fetch(&"key1".to_string()), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_delete_nonexistent() {
        let table = table();

        let result = table.delete(&"nonexistent".to_string());
        assert!(matches!(result, Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_delete_fires_both_callbacks() {
        let table = table();
        let table_hits = Arc::new(AtomicUsize::new(0));
        let item_hits = Arc::new(AtomicUsize::new(0));

        let counter = table_hits.clone();
        table.set_about_to_delete_item_callback(move |item| {
            assert_eq!(item.key(), "key1");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let item = table.insert("key1".to_string(), LONG, "value1".to_string());
        let counter = item_hits.clone();
        item.set_about_to_expire_callback(move |key| {
            assert_eq!(key, "key1");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        table.delete(&"key1".to_string()).unwrap();

        assert_eq!(table_hits.load(Ordering::SeqCst), 1);
        assert_eq!(item_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_callback_can_reenter_table() {
        let table = table();
        let seen = Arc::new(AtomicUsize::new(0));

        let inner = table.clone();
        let count_seen = seen.clone();
        table.set_about_to_delete_item_callback(move |_| {
            // Still present while the callback runs
            count_seen.store(inner.count(), Ordering::SeqCst);
            inner.insert("other".to_string(), LONG, "value".to_string());
        });
        table.insert("key1".to_string(), LONG, "value1".to_string());

        table.delete(&"key1".to_string()).unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!table.exists(&"key1".to_string()));
        assert!(table.exists(&"other".to_string()));
    }

    #[test]
    fn test_delete_item_skips_replaced_item() {
        let table = table();
        let deletions = Arc::new(AtomicUsize::new(0));

        let counter = deletions.clone();
        table.set_about_to_delete_item_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let stale = table.insert("key1".to_string(), LONG, "old".to_string());
        table.insert("key1".to_string(), LONG, "new".to_string());

        assert!(!table.shared.delete_item(&"key1".to_string(), &stale));
        assert_eq!(deletions.load(Ordering::SeqCst), 0);
        assert_eq!(table.fetch(&"key1".to_string()).unwrap().value(), "new");
    }

    #[test]
    fn test_try_new() {
        let table: CacheTable<String, String> = CacheTable::try_new("fallible").unwrap();
        assert_eq!(table.name(), "fallible");
    }

    #[test]
    fn test_sweeps_move_off_shut_down_runtime() {
        let table: CacheTable<String, String> = CacheTable::with_runtime("moved", dead_runtime());

        table.insert("key1".to_string(), Duration::from_millis(20), "value1".to_string());
        sleep(Duration::from_millis(150));

        assert!(!table.exists(&"key1".to_string()));
    }

    #[test]
    fn test_cancelled_sweep_is_rescheduled_by_next_insert() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let table: CacheTable<String, String> = CacheTable::with_runtime("lost", runtime.handle().clone());

        table.insert("key1".to_string(), Duration::from_millis(120), "value1".to_string());
        // Let the first sweep run and park a 120ms timer on the runtime
        sleep(Duration::from_millis(30));
        drop(runtime);

        table.insert("forever".to_string(), Duration::ZERO, "value".to_string());
        sleep(Duration::from_millis(250));

        assert!(!table.exists(&"key1".to_string()));
        assert!(table.exists(&"forever".to_string()));
    }

    #[test]
    fn test_flush() {
        let table = table();

        table.insert("key1".to_string(), LONG, "value1".to_string());
        table.insert("key2".to_string(), Duration::ZERO, "value2".to_string());
        table.flush();

        assert_eq!(table.count(), 0);
        assert_eq!(table.next_sweep_due(), Duration::ZERO);
        assert!(matches!(table.fetch(&"key1".to_string()), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_flush_fires_no_callbacks() {
        let table = table();
        let deletions = Arc::new(AtomicUsize::new(0));

        let counter = deletions.clone();
        table.set_about_to_delete_item_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        table.insert("key1".to_string(), Duration::from_millis(30), "value1".to_string());
        table.flush();

        sleep(Duration::from_millis(80));
        assert_eq!(deletions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_most_accessed_ranking() {
        let table: CacheTable<&'static str, u32> = CacheTable::new("ranking");

        for (key, hits) in [("a", 5), ("b", 1), ("c", 9), ("d", 3)] {
            table.insert(key, LONG, hits);
            for _ in 0..hits {
                table.fetch(&key).unwrap();
            }
        }

        let top = table.most_accessed(2);
        let keys: Vec<&str> = top.iter().map(|item| *item.key()).collect();
        assert_eq!(keys, vec!["c", "a"]);
        assert_eq!(top[0].access_count(), 9);
        assert_eq!(top[1].access_count(), 5);
    }

    #[test]
    fn test_most_accessed_more_than_available() {
        let table = table();
        table.insert("key1".to_string(), LONG, "value1".to_string());

        assert_eq!(table.most_accessed(10).len(), 1);
        assert!(table.most_accessed(0).is_empty());
    }

    #[test]
    fn test_loader_fills_miss() {
        let table: CacheTable<String, usize, usize> = CacheTable::new("loader");
        table.set_data_loader(|key: &String, args: &[usize]| {
            Some(CacheItem::new(key.clone(), LONG, key.len() + args.iter().sum::<usize>()))
        });

        let item = table.fetch_with(&"abc".to_string(), &[10, 20]).unwrap();

        assert_eq!(*item.value(), 33);
        assert!(table.exists(&"abc".to_string()));
        // Second lookup is a plain hit
        assert_eq!(*table.fetch(&"abc".to_string()).unwrap().value(), 33);
    }

    #[test]
    fn test_loader_without_result_is_not_loadable() {
        let table = table();
        table.set_data_loader(|_, _| None);

        let result = table.fetch(&"missing".to_string());
        assert!(matches!(result, Err(CacheError::NotLoadable(_))));
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_not_found_add() {
        let table = table();

        assert!(table.not_found_add("key1".to_string(), LONG, "value1".to_string()));
        assert!(!table.not_found_add("key1".to_string(), LONG, "value2".to_string()));
        assert_eq!(table.fetch(&"key1".to_string()).unwrap().value(), "value1");
    }

    #[test]
    fn test_for_each_visits_snapshot() {
        let table = table();
        for i in 0..5 {
            table.insert(format!("key{i}"), LONG, format!("value{i}"));
        }

        let mut visited = 0;
        table.for_each(|key, item| {
            assert_eq!(item.key(), key);
            // Mutating from inside the visitor must not deadlock
            table.delete(key).unwrap();
            visited += 1;
        });

        assert_eq!(visited, 5);
        assert!(table.is_empty());
    }

    #[test]
    fn test_added_callback_sees_completed_insert() {
        let table = table();
        let observed = Arc::new(AtomicUsize::new(0));

        let inner = table.clone();
        let count_seen = observed.clone();
        table.set_added_item_callback(move |item| {
            assert!(inner.exists(item.key()));
            count_seen.store(inner.count(), Ordering::SeqCst);
        });

        table.insert("key1".to_string(), LONG, "value1".to_string());
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_ttl_expiration() {
        let table = table();

        table.insert("key1".to_string(), Duration::from_millis(50), "value1".to_string());
        sleep(Duration::from_millis(10));
        assert!(table.exists(&"key1".to_string()));

        // Wait for expiration plus scheduler slack
        sleep(Duration::from_millis(150));
        assert!(!table.exists(&"key1".to_string()));
        assert_eq!(table.count(), 0);
        assert_eq!(table.next_sweep_due(), Duration::ZERO);
    }

    #[test]
    fn test_zero_ttl_survives_sweeps() {
        let table = table();

        table.insert("forever".to_string(), Duration::ZERO, "value".to_string());
        table.insert("brief".to_string(), Duration::from_millis(20), "value".to_string());

        sleep(Duration::from_millis(120));
        assert!(table.exists(&"forever".to_string()));
        assert!(!table.exists(&"brief".to_string()));
        assert_eq!(table.next_sweep_due(), Duration::ZERO);
    }

    #[test]
    fn test_access_does_not_extend_life() {
        let table = table();
        table.insert("key1".to_string(), Duration::from_millis(200), "value1".to_string());

        for _ in 0..4 {
            sleep(Duration::from_millis(30));
            table.fetch(&"key1".to_string()).unwrap();
        }

        sleep(Duration::from_millis(250));
        assert!(!table.exists(&"key1".to_string()));
    }

    #[test]
    fn test_expiry_runs_item_callback() {
        let table = table();
        let expired = Arc::new(AtomicUsize::new(0));

        let item = table.insert("key1".to_string(), Duration::from_millis(30), "value1".to_string());
        let counter = expired.clone();
        item.set_about_to_expire_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(150));
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_short_insert_pulls_sweep_forward() {
        let table = table();

        table.insert("long".to_string(), Duration::from_secs(10), "value".to_string());
        sleep(Duration::from_millis(50));
        let due = table.next_sweep_due();
        assert!(due <= Duration::from_secs(10) && due > Duration::from_secs(9));

        table.insert("short".to_string(), Duration::from_millis(60), "value".to_string());
        sleep(Duration::from_millis(20));
        assert!(table.next_sweep_due() <= Duration::from_millis(60));

        sleep(Duration::from_millis(150));
        assert!(!table.exists(&"short".to_string()));
        assert!(table.exists(&"long".to_string()));
        // Rescheduled for the remaining long-lived item
        assert!(table.next_sweep_due() > Duration::from_secs(9));
    }
}
