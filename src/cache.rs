//! Shared stores for uploaded sources, parsed sheets and diff results.
//!
//! [`EntryStore`] is the one piece of shared mutable state in the crate. Values
//! are published whole as `Arc<V>` under a write lock and handed out as cheap
//! `Arc` clones under a read lock, so a reader never observes a partially
//! built table. Recency is tracked with an atomic tick per entry, which keeps
//! lookups on the read lock.
//!
//! Without a byte capacity a store keeps every entry until it is evicted
//! explicitly. With a capacity, least recently used entries are dropped after
//! each insert until the accounted size fits again; the entry being inserted
//! is never dropped by its own insert.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use log::{debug, info};

use crate::{ids::SourceId, source::SourceFormat, table::Table};

/// Approximate in-memory size used for capacity accounting.
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for Table {
    fn weight(&self) -> usize {
        self.estimated_bytes()
    }
}

struct Entry<V> {
    value: Arc<V>,
    bytes: usize,
    last_used: AtomicU64,
}

struct StoreState<K, V> {
    entries: HashMap<K, Entry<V>>,
    total_bytes: usize,
}

pub struct EntryStore<K, V> {
    name: &'static str,
    capacity: Option<usize>,
    clock: AtomicU64,
    state: RwLock<StoreState<K, V>>,
}

impl<K, V> EntryStore<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Weighted,
{
    pub fn new(name: &'static str, capacity: Option<usize>) -> Self {
        Self {
            name,
            capacity,
            clock: AtomicU64::new(0),
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                total_bytes: 0,
            }),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Publishes `value` under `key`, replacing any previous entry.
    pub fn put(&self, key: K, value: V) -> Arc<V> {
        let value = Arc::new(value);
        let bytes = value.weight();
        let entry = Entry {
            value: Arc::clone(&value),
            bytes,
            last_used: AtomicU64::new(self.tick()),
        };
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = state.entries.insert(key.clone(), entry) {
            state.total_bytes -= previous.bytes;
        }
        state.total_bytes += bytes;
        self.enforce_capacity(&mut state, &key);
        value
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let entry = state.entries.get(key)?;
        entry.last_used.store(self.tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.value))
    }

    pub fn contains(&self, key: &K) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.contains_key(key)
    }

    pub fn evict(&self, key: &K) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.entries.remove(key) {
            Some(entry) => {
                state.total_bytes -= entry.bytes;
                true
            }
            None => false,
        }
    }

    /// Removes every entry whose key matches `predicate`; returns the count.
    pub fn evict_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let doomed = state
            .entries
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect::<Vec<_>>();
        for key in &doomed {
            if let Some(entry) = state.entries.remove(key) {
                state.total_bytes -= entry.bytes;
            }
        }
        doomed.len()
    }

    pub fn any_key<F>(&self, predicate: F) -> bool
    where
        F: FnMut(&K) -> bool,
    {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.keys().any(predicate)
    }

    pub fn len(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_bytes(&self) -> usize {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.total_bytes
    }

    fn enforce_capacity(&self, state: &mut StoreState<K, V>, keep: &K) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while state.total_bytes > capacity {
            let victim = state
                .entries
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(entry) = state.entries.remove(&victim) {
                state.total_bytes -= entry.bytes;
                info!(
                    "Evicted {:?} from {} store ({} byte(s) freed)",
                    victim, self.name, entry.bytes
                );
            }
        }
    }
}

/// Original upload bytes, kept so sheets can be re-parsed on a table miss.
#[derive(Debug, Clone)]
pub struct RawSource {
    pub bytes: Vec<u8>,
    pub format: SourceFormat,
}

impl Weighted for RawSource {
    fn weight(&self) -> usize {
        self.bytes.len()
    }
}

pub type TableKey = (SourceId, String);

/// Raw Source Cache plus Table Cache, both keyed by source id.
pub struct SourceCache {
    raw: EntryStore<SourceId, RawSource>,
    tables: EntryStore<TableKey, Table>,
}

impl SourceCache {
    /// `capacity` applies to each of the two stores separately.
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            raw: EntryStore::new("raw source", capacity),
            tables: EntryStore::new("table", capacity),
        }
    }

    pub fn put(&self, id: SourceId, format: SourceFormat, bytes: Vec<u8>) -> Arc<RawSource> {
        debug!("Caching {} byte(s) of {format} source {id}", bytes.len());
        self.raw.put(id, RawSource { bytes, format })
    }

    pub fn get_raw(&self, id: SourceId) -> Option<Arc<RawSource>> {
        self.raw.get(&id)
    }

    pub fn put_table(&self, id: SourceId, sheet: &str, table: Table) -> Arc<Table> {
        self.tables.put((id, sheet.to_string()), table)
    }

    pub fn get_table(&self, id: SourceId, sheet: &str) -> Option<Arc<Table>> {
        self.tables.get(&(id, sheet.to_string()))
    }

    pub fn contains(&self, id: SourceId) -> bool {
        self.raw.contains(&id) || self.tables.any_key(|(source, _)| *source == id)
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.tables.is_empty()
    }

    /// Drops the raw bytes and every parsed sheet of `id`.
    pub fn evict(&self, id: SourceId) -> bool {
        let raw = self.raw.evict(&id);
        let sheets = self.tables.evict_where(|(source, _)| *source == id);
        raw || sheets > 0
    }
}
