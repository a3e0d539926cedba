//! Fixed-capacity least-recently-used cache.

use std::hash::Hash;
use std::num::NonZeroUsize;

/// LRU map with a hard entry limit.
///
/// Reads through [`get`](Self::get) promote the entry to most recently
/// used; [`peek`](Self::peek) and [`has`](Self::has) do not. Not
/// thread-safe on its own: wrap it in a mutex to share it.
pub struct BoundedCache<K, V> {
    inner: lru::LruCache<K, V>,
}

/// Capacity 0 is treated as 1.
fn normalize(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    /// Default capacity used by [`Default`].
    pub const DEFAULT_CAPACITY: usize = 64;

    /// Create an empty cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: lru::LruCache::new(normalize(capacity)),
        }
    }

    /// Look up `key` and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    /// Look up `key` without touching recency.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.inner.peek(key)
    }

    /// Insert or replace.
    ///
    /// Replacing an existing key promotes it and returns `None`. Inserting
    /// a new key into a full cache evicts exactly one entry, the least
    /// recently used, and returns it.
    pub fn set(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.inner.contains(&key) {
            self.inner.put(key, value);
            return None;
        }
        self.inner.push(key, value)
    }

    /// Whether `key` is present. Does not promote.
    #[must_use]
    pub fn has(&self, key: &K) -> bool {
        self.inner.contains(key)
    }

    /// Remove `key`, returning its value.
    pub fn delete(&mut self, key: &K) -> Option<V> {
        self.inner.pop(key)
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Alias of [`len`](Self::len).
    #[must_use]
    pub fn size(&self) -> usize {
        self.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of entries.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.cap().get()
    }

    /// Change the capacity. Shrinking evicts from the least recently used
    /// end right away; growing never evicts.
    pub fn set_capacity(&mut self, capacity: usize) {
        let capacity = normalize(capacity);
        let evicted = self.inner.len().saturating_sub(capacity.get());
        self.inner.resize(capacity);
        if evicted > 0 {
            log::debug!("cache shrunk to {capacity}, evicted {evicted}");
        }
    }
}

impl<K: Hash + Eq, V> Default for BoundedCache<K, V> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn abc() -> BoundedCache<&'static str, u32> {
        let mut cache = BoundedCache::new(3);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("c", 3);
        cache
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = abc();
        assert_eq!(cache.set("d", 4), Some(("a", 1)));
        assert!(!cache.has(&"a"));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn get_promotes() {
        let mut cache = abc();
        assert_eq!(cache.get(&"a"), Some(&1));
        assert_eq!(cache.set("d", 4), Some(("b", 2)));
        assert!(cache.has(&"a"));
    }

    #[test]
    fn has_and_peek_do_not_promote() {
        let mut cache = abc();
        assert!(cache.has(&"a"));
        assert_eq!(cache.peek(&"a"), Some(&1));
        assert_eq!(cache.set("d", 4), Some(("a", 1)));
    }

    #[test]
    fn replacing_promotes_without_evicting() {
        let mut cache = abc();
        assert_eq!(cache.set("a", 10), None);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.set("d", 4), Some(("b", 2)));
        assert_eq!(cache.peek(&"a"), Some(&10));
    }

    #[test]
    fn miss_returns_none() {
        let mut cache = abc();
        assert_eq!(cache.get(&"zzz"), None);
    }

    #[test]
    fn delete_and_clear() {
        let mut cache = abc();
        assert_eq!(cache.delete(&"b"), Some(2));
        assert_eq!(cache.delete(&"b"), None);
        assert_eq!(cache.size(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn shrinking_evicts_from_lru_end() {
        let mut cache = abc();
        cache.get(&"a");
        cache.set_capacity(1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.has(&"a"));
    }

    #[test]
    fn growing_keeps_everything() {
        let mut cache = abc();
        cache.set_capacity(10);
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.set("d", 4), None);
    }

    #[test]
    fn zero_capacity_is_one() {
        let mut cache = BoundedCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.set(1, "x");
        assert_eq!(cache.set(2, "y"), Some((1, "x")));
        cache.set_capacity(0);
        assert_eq!(cache.capacity(), 1);
    }
}
