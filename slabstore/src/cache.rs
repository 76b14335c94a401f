//! An LRU (Least Recently Used) cache for decoded nodes.
//!
use std::{collections::HashMap, fmt::Debug, hash::Hash, sync::Arc};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use crate::errors::Result;

/// An LRU (least recently used) cache.
///
/// Values must implement ``Cacheable``, which self reports size, intended to be the number of
/// bytes (more or less) an object takes up in memory. We use the number of bytes in the
/// serialized representation, which is close enough.
///
/// When adding an object pushes the total size over ``limit``, objects are evicted, least
/// recently used first, until the total is back under the limit. An object larger than the
/// limit is returned to the caller but never retained.
///
/// Keys are content ids and values are immutable, so nothing special needs to be done for cache
/// invalidation. (If a value changes, so will its key.)
///
pub(crate) struct Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    entries: Mutex<Entries<K, V>>,
}

/// A trait for objects that can be cached
///
pub(crate) trait Cacheable: Sized {
    /// Return the number of bytes in the serialized representation
    fn size(&self) -> u64;
}

struct Entries<K, V> {
    limit: u64,
    size: u64,

    /// Logical clock, bumped on every access
    clock: u64,

    map: HashMap<K, CacheEntry<V>>,
}

struct CacheEntry<V> {
    object: Arc<V>,
    size: u64,
    last_used: u64,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    /// Instantiate an empty cache with given size limit.
    ///
    pub fn new(limit: u64) -> Self {
        Self {
            entries: Mutex::new(Entries {
                limit,
                size: 0,
                clock: 0,
                map: HashMap::new(),
            }),
        }
    }

    /// Get an object by key
    ///
    /// If object isn't in the cache, will call ``load`` to load the object and then store it in
    /// the cache. The lock is not held while ``load`` runs.
    ///
    pub async fn get<L>(&self, key: &K, load: L) -> Result<Arc<V>>
    where
        L: FnOnce(K) -> BoxFuture<'static, Result<V>>,
    {
        if let Some(object) = self.entries.lock().lookup(key) {
            return Ok(object);
        }

        let object = Arc::new(load(*key).await?);
        self.entries.lock().insert(*key, &object);

        Ok(object)
    }

    #[cfg(test)]
    fn keys(&self) -> Vec<K> {
        let entries = self.entries.lock();
        let mut keys = entries
            .map
            .iter()
            .map(|(key, entry)| (entry.last_used, *key))
            .collect::<Vec<_>>();
        keys.sort_by(|a, b| b.0.cmp(&a.0));

        keys.into_iter().map(|(_, key)| key).collect()
    }
}

impl<K, V> Entries<K, V>
where
    K: Eq + Hash + Copy + Debug,
    V: Cacheable,
{
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn lookup(&mut self, key: &K) -> Option<Arc<V>> {
        let now = self.tick();
        let entry = self.map.get_mut(key)?;
        entry.last_used = now;

        Some(Arc::clone(&entry.object))
    }

    fn insert(&mut self, key: K, object: &Arc<V>) {
        let size = object.size();
        if size > self.limit {
            return;
        }

        let last_used = self.tick();
        let entry = CacheEntry {
            object: Arc::clone(object),
            size,
            last_used,
        };
        if let Some(old) = self.map.insert(key, entry) {
            self.size -= old.size;
        }
        self.size += size;

        while self.size > self.limit {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| *key);
            match oldest.and_then(|key| self.map.remove(&key)) {
                Some(evicted) => self.size -= evicted.size,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::future::FutureExt;

    struct DummyValue {
        value: u32,
        size: u64,
    }

    impl DummyValue {
        fn new(value: u32, size: u64) -> Self {
            DummyValue { value, size }
        }
    }

    impl Cacheable for DummyValue {
        fn size(&self) -> u64 {
            self.size
        }
    }

    #[tokio::test]
    async fn test_common_use() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let load = |key| async move { Ok(DummyValue::new(key, 25)) }.boxed();

        assert_eq!(cache.get(&1, load).await?.value, 1);
        assert_eq!(cache.keys(), vec![1]);

        let load = |_| panic!("I shouldn't get called");
        assert_eq!(cache.get(&1, load).await?.value, 1);

        let load = |key| async move { Ok(DummyValue::new(key, 25)) }.boxed();
        assert_eq!(cache.get(&2, load).await?.value, 2);
        assert_eq!(cache.get(&3, load).await?.value, 3);
        assert_eq!(cache.get(&4, load).await?.value, 4);
        assert_eq!(cache.keys(), vec![4, 3, 2, 1]);

        let load = |_| panic!("I shouldn't get called");
        assert_eq!(cache.get(&3, load).await?.value, 3);
        assert_eq!(cache.get(&1, load).await?.value, 1);
        assert_eq!(cache.keys(), vec![1, 3, 4, 2]);

        // Cache is now full, next load should push 2 and 4 out
        let load = |key| async move { Ok(DummyValue::new(key, 50)) }.boxed();
        assert_eq!(cache.get(&5, load).await?.value, 5);
        assert_eq!(cache.keys(), vec![5, 1, 3]);

        // Too big to keep, but still returned
        let load = |key| async move { Ok(DummyValue::new(key, 101)) }.boxed();
        assert_eq!(cache.get(&7, load).await?.value, 7);
        assert_eq!(cache.keys(), vec![5, 1, 3]);

        Ok(())
    }

    #[tokio::test]
    async fn test_zero_limit() -> Result<()> {
        let cache: Cache<u32, DummyValue> = Cache::new(0);
        let load = |key| async move { Ok(DummyValue::new(key, 1)) }.boxed();
        assert_eq!(cache.get(&1, load).await?.value, 1);
        assert!(cache.keys().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn test_load_error() {
        let cache: Cache<u32, DummyValue> = Cache::new(100);
        let load = |key: u32| {
            async move { Err(crate::errors::Error::NotFound(key.to_string())) }.boxed()
        };
        assert!(cache.get(&9, load).await.is_err());
        assert!(cache.keys().is_empty());
    }
}
