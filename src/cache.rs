//! Read-mostly keyed caches of immutable values.

use std::fmt::{Debug, Formatter};
use std::hash::Hash;
use std::ops::{Add, AddAssign};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}
impl CacheStats {
    pub fn new(hits: usize, misses: usize) -> Self {
        Self { hits, misses }
    }

    pub fn lookups(&self) -> usize {
        self.hits + self.misses
    }
}

impl Add<bool> for CacheStats {
    type Output = CacheStats;

    fn add(self, cache_hit: bool) -> Self::Output {
        if cache_hit {
            Self {
                hits: self.hits + 1,
                ..self
            }
        } else {
            Self {
                misses: self.misses + 1,
                ..self
            }
        }
    }
}

impl Add for CacheStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            hits: self.hits + rhs.hits,
            misses: self.misses + rhs.misses,
        }
    }
}

impl AddAssign<bool> for CacheStats {
    fn add_assign(&mut self, cache_hit: bool) {
        if cache_hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

impl AddAssign for CacheStats {
    fn add_assign(&mut self, rhs: Self) {
        self.hits += rhs.hits;
        self.misses += rhs.misses;
    }
}

/// A map from keys to shared, immutable values, populated on first use.
///
/// Values are computed outside any lock; when two callers race on the same key, the first
/// insertion wins and both receive the same [Arc].
pub struct KeyedCache<K, V> {
    entries: RwLock<FxHashMap<K, Arc<V>>>,
    stats: Mutex<CacheStats>,
}
impl<K: Eq + Hash, V> KeyedCache<K, V> {
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    pub fn get_or_insert_with(&self, key: K, compute_f: impl FnOnce() -> V) -> Arc<V> {
        if let Some(value) = self.get(&key) {
            self.record(true);
            return value;
        }
        self.record(false);
        let computed = Arc::new(compute_f());
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.entry(key).or_insert(computed).clone()
    }

    /// Drops every entry whose key satisfies `predicate`, returning the number removed.
    pub fn invalidate(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| !predicate(key));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, cache_hit: bool) {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner) += cache_hit;
    }
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
            stats: Mutex::new(CacheStats::default()),
        }
    }
}

impl<K, V> Debug for KeyedCache<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner).len();
        let stats = *self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("KeyedCache")
            .field("entries", &entries)
            .field("stats", &stats)
            .finish()
    }
}
