use std::collections::HashMap;
use std::hash::Hash;

use indexmap::IndexMap;

use crate::error::{DbError, DbResult};

/// How many recently evicted entries are kept around for observation.
const EVICTED_CAPACITY: usize = 16;

/// A bounded map with least-recently-used eviction and pinning. Pinned
/// entries are never evicted; when every entry is pinned an insert fails
/// instead of growing the cache.
pub struct LruCache<K: Eq + Hash + Clone, V: Clone> {
    capacity: usize,
    map: HashMap<K, V>,
    /// Keys ordered from least to most recently used.
    recency: Vec<K>,
    pins: HashMap<K, u32>,
    evicted: IndexMap<K, V>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            capacity,
            map: HashMap::new(),
            recency: Vec::new(),
            pins: HashMap::new(),
            evicted: IndexMap::new(),
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.recency.iter().position(|k| k == key) {
            let k = self.recency.remove(pos);
            self.recency.push(k);
        }
    }

    /// Insert or replace. Returns the entry evicted to make room, if any,
    /// so the caller can write it back.
    pub fn put(&mut self, key: K, value: V) -> DbResult<Option<(K, V)>> {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            self.touch(&key);
            return Ok(None);
        }

        let mut evicted_pair = None;
        if self.map.len() >= self.capacity {
            let victim = self
                .recency
                .iter()
                .position(|k| self.pins.get(k).copied().unwrap_or(0) == 0)
                .ok_or_else(|| DbError::Lru("all cache entries are pinned".to_string()))?;
            let victim_key = self.recency.remove(victim);
            let victim_value = self.map.remove(&victim_key).unwrap();
            self.pins.remove(&victim_key);
            self.evicted
                .insert(victim_key.clone(), victim_value.clone());
            while self.evicted.len() > EVICTED_CAPACITY {
                self.evicted.shift_remove_index(0);
            }
            evicted_pair = Some((victim_key, victim_value));
        }

        self.map.insert(key.clone(), value);
        self.recency.push(key);
        Ok(evicted_pair)
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }
        self.map.get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn pin(&mut self, key: &K) -> DbResult<()> {
        if !self.map.contains_key(key) {
            return Err(DbError::Lru("cannot pin a missing entry".to_string()));
        }
        *self.pins.entry(key.clone()).or_insert(0) += 1;
        Ok(())
    }

    pub fn unpin(&mut self, key: &K) {
        if let Some(count) = self.pins.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.pins.remove(key);
            }
        }
    }

    /// Recently evicted entries, oldest first.
    pub fn evicted(&self) -> &IndexMap<K, V> {
        &self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
