//! Bounded LRU cache with loader semantics.
//!
//! A miss runs the loader synchronously while the cache lock is held, so two
//! threads asking for the same key never load it twice. The lock is
//! reentrant: a loader may call back into the same cache on the same thread
//! (for example to prefetch a neighbour) without deadlocking. Whatever the
//! loader returns is cached, including failure values; callers check
//! validity and use [`LoadingCache::invalidate`] to force a reload.

use lru::LruCache;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::hash::Hash;
use std::num::NonZeroUsize;

type Loader<K, V> = Box<dyn Fn(&K) -> V + Send + Sync>;

/// LRU cache that fills misses from a loader function.
pub struct LoadingCache<K, V> {
    entries: ReentrantMutex<RefCell<LruCache<K, V>>>,
    loader: Loader<K, V>,
}

impl<K, V> LoadingCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries (at least one).
    pub fn new<F>(capacity: usize, loader: F) -> Self
    where
        F: Fn(&K) -> V + Send + Sync + 'static,
    {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: ReentrantMutex::new(RefCell::new(LruCache::new(capacity))),
            loader: Box::new(loader),
        }
    }

    /// Cached value for `key`, loading it on a miss.
    ///
    /// A hit moves the key to the most-recently-used position. A miss inserts
    /// the loaded value there and evicts the least-recently-used entry when
    /// the cache is full.
    pub fn get(&self, key: &K) -> V {
        let guard = self.entries.lock();
        if let Some(value) = guard.borrow_mut().get(key).cloned() {
            return value;
        }

        // No borrow is held here, so the loader may re-enter this cache.
        let value = (self.loader)(key);
        guard.borrow_mut().put(key.clone(), value.clone());
        value
    }

    /// Whether `key` is cached. Does not change recency.
    pub fn exists(&self, key: &K) -> bool {
        self.entries.lock().borrow().contains(key)
    }

    /// Number of cached entries.
    pub fn size(&self) -> usize {
        self.entries.lock().borrow().len()
    }

    /// Maximum number of cached entries.
    pub fn capacity(&self) -> usize {
        self.entries.lock().borrow().cap().get()
    }

    /// Drop `key`, so the next [`get`](Self::get) reloads it.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.lock().borrow_mut().pop(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.lock().borrow_mut().clear();
    }
}

impl<K: Hash + Eq, V> std::fmt::Debug for LoadingCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.entries.lock();
        let entries = guard.borrow();
        f.debug_struct("LoadingCache")
            .field("size", &entries.len())
            .field("capacity", &entries.cap())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_cache(capacity: usize) -> (LoadingCache<u32, u64>, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let cache = LoadingCache::new(capacity, move |key: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            u64::from(*key) * 10
        });
        (cache, loads)
    }

    #[test]
    fn test_hit_does_not_reload() {
        let (cache, loads) = counting_cache(4);
        assert_eq!(cache.get(&3), 30);
        assert_eq!(cache.get(&3), 30);
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.exists(&3));
        assert_eq!(cache.size(), 1);
    }

    #[test]
    fn test_debug_reports_occupancy() {
        let (cache, _) = counting_cache(4);
        cache.get(&1);
        cache.get(&2);
        let rendered = format!("{cache:?}");
        assert!(rendered.starts_with("LoadingCache"));
        assert!(rendered.contains("size: 2"));
        assert!(rendered.contains("capacity: 4"));
    }

    #[test]
    fn test_evicts_least_recent() {
        let (cache, _) = counting_cache(3);
        cache.get(&1);
        cache.get(&2);
        cache.get(&3);
        cache.get(&1);
        cache.get(&4);

        assert!(cache.exists(&1));
        assert!(!cache.exists(&2));
        assert!(cache.exists(&3));
        assert!(cache.exists(&4));
        assert_eq!(cache.size(), 3);
    }

    #[test]
    fn test_invalidate_reloads() {
        let (cache, loads) = counting_cache(2);
        cache.get(&7);
        assert_eq!(cache.invalidate(&7), Some(70));
        assert!(!cache.exists(&7));
        cache.get(&7);
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        cache.clear();
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let (cache, _) = counting_cache(0);
        assert_eq!(cache.capacity(), 1);
        cache.get(&1);
        cache.get(&2);
        assert_eq!(cache.size(), 1);
        assert!(cache.exists(&2));
    }

    #[test]
    fn test_loader_may_reenter() {
        let cache: Arc<LoadingCache<u32, u32>> = Arc::new_cyclic(|weak: &std::sync::Weak<_>| {
            let weak = weak.clone();
            LoadingCache::new(8, move |key: &u32| {
                if *key == 0 {
                    return 1;
                }
                let cache: Arc<LoadingCache<u32, u32>> =
                    weak.upgrade().expect("Test operation should succeed");
                cache.get(&(key - 1)) * 2
            })
        });
        assert_eq!(cache.get(&5), 32);
        assert_eq!(cache.size(), 6);
    }

    #[test]
    fn test_concurrent_single_load() {
        let (cache, loads) = counting_cache(16);
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get(&42))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("Test operation should succeed"), 420);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_capacity_plus_one_evicts_oldest(capacity in 2usize..32, touched in 0usize..32) {
            let (cache, _) = counting_cache(capacity);
            for key in 0..capacity as u32 {
                cache.get(&key);
            }
            // Touching a key protects it from the next eviction.
            let touched = (touched % capacity) as u32;
            cache.get(&touched);
            cache.get(&(capacity as u32));

            let victim = if touched == 0 { 1 } else { 0 };
            prop_assert_eq!(cache.size(), capacity);
            prop_assert!(!cache.exists(&victim));
            for key in (0..=capacity as u32).filter(|&key| key != victim) {
                prop_assert!(cache.exists(&key));
            }
        }
    }
}
