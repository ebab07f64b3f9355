//! Table Registry Module
//!
//! Hands out named cache tables, creating each one on first use.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::CacheTable;
use crate::config::Config;

// == Registry ==
/// Maps table names to lazily created [`CacheTable`]s.
///
/// The registry is a plain value: create one per application (or per test) and
/// share it however the application shares state.
pub struct Registry<K, V, A = ()> {
    tables: Mutex<HashMap<String, CacheTable<K, V, A>>>,
    /// Logging switch applied to newly created tables
    log_events: bool,
}

impl<K, V, A> Registry<K, V, A>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    /// Creates an empty registry whose tables start with logging off.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            log_events: false,
        }
    }

    /// Creates an empty registry using the configured logging switch.
    pub fn from_config(config: &Config) -> Self {
        Self {
            tables: Mutex::new(HashMap::new()),
            log_events: config.log_events,
        }
    }

    // == Table ==
    /// Returns the table called `name`, creating an empty one if needed.
    ///
    /// Repeated calls with the same name return handles to the same table.
    ///
    /// # Panics
    /// Panics if a new table is needed and the background sweeper runtime
    /// cannot be started. See [`CacheTable::new`].
    pub fn table(&self, name: &str) -> CacheTable<K, V, A> {
        let mut tables = self.tables.lock();
        if let Some(table) = tables.get(name) {
            return table.clone();
        }

        debug!(table = name, "Creating cache table");
        let table = CacheTable::new(name);
        table.set_logging(self.log_events);
        tables.insert(name.to_string(), table.clone());
        table
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tables.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.lock().is_empty()
    }
}

impl<K, V, A> Default for Registry<K, V, A>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    A: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
