// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Time-bounded LRU cache behind the key properties and key unwrap caches.

use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::RwLock;

/// Capacity of a cache unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> Entry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// An LRU cache whose entries also expire a fixed time after insertion.
///
/// Expired entries are never returned. They're dropped lazily on lookup, or
/// eagerly by [`TtlCache::evict_expired`].
pub struct TtlCache<K: Hash + Eq, V> {
    entries: RwLock<LruCache<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V> Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a cache holding up to [`DEFAULT_CACHE_CAPACITY`] entries.
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_CAPACITY)
    }

    /// Creates a cache holding up to `capacity` entries.
    pub fn with_capacity(ttl: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Time to live of new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live value for `key` and marks it recently used.
    pub async fn get(&self, key: &K) -> Option<V> {
        // Write lock: a hit reorders the LRU list.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Inserts `value`, replacing any entry for `key` and evicting the least
    /// recently used entry when full.
    pub async fn insert(&self, key: K, value: V) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .put(key, Entry { value, expires_at });
    }

    /// Removes the entry for `key`, returning its value if it was live.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let entry = self.entries.write().await.pop(key)?;
        entry.is_live(Instant::now()).then_some(entry.value)
    }

    /// Drops every expired entry.
    pub async fn evict_expired(&self) {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let expired: Vec<K> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
    }

    /// Drops every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of entries, expired ones not yet dropped included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether there are no entries at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
