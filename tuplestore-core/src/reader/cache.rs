//! Shared cache of decoded pages

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Decoded pages keyed by file offset, bounded by a byte budget
#[derive(Debug)]
pub struct PageCache {
    inner: RwLock<CacheInner>,
    max_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Default)]
struct CacheInner {
    pages: BTreeMap<u64, Arc<Vec<u8>>>,
    current_size: usize,
}

impl PageCache {
    /// Create a cache; a zero budget disables caching
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner::default()),
            max_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, offset: u64) -> Option<Arc<Vec<u8>>> {
        let page = self.inner.read().pages.get(&offset).cloned();
        let counter = if page.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        page
    }

    /// Insert a page unless another reader got there first; returns the
    /// cached copy
    pub fn insert(&self, offset: u64, page: Vec<u8>) -> Arc<Vec<u8>> {
        let size = page.len();
        let page = Arc::new(page);
        if self.max_size == 0 || size > self.max_size {
            return page;
        }

        let mut inner = self.inner.write();
        if let Some(existing) = inner.pages.get(&offset) {
            return existing.clone();
        }
        while inner.current_size + size > self.max_size {
            // Simple eviction: drop the lowest offset
            let Some((&key, _)) = inner.pages.iter().next() else {
                break;
            };
            if let Some(removed) = inner.pages.remove(&key) {
                inner.current_size -= removed.len();
            }
        }
        inner.current_size += size;
        inner.pages.insert(offset, page.clone());
        page
    }

    /// Bytes currently cached
    pub fn size(&self) -> usize {
        self.inner.read().current_size
    }

    /// Number of cached pages
    pub fn len(&self) -> usize {
        self.inner.read().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) since creation
    pub fn hit_counts(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_evicts() {
        let cache = PageCache::new(100);
        cache.insert(0, vec![0; 60]);
        cache.insert(100, vec![1; 30]);
        assert_eq!(cache.size(), 90);

        cache.insert(200, vec![2; 40]);
        assert!(cache.get(0).is_none());
        assert_eq!(cache.size(), 70);
        assert_eq!(cache.get(200).unwrap()[0], 2);
        assert_eq!(cache.hit_counts(), (1, 1));
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = PageCache::new(100);
        cache.insert(8, vec![1; 4]);
        let page = cache.insert(8, vec![2; 4]);
        assert_eq!(page[0], 1);
        assert_eq!(cache.size(), 4);
    }

    #[test]
    fn test_disabled() {
        let cache = PageCache::new(0);
        let page = cache.insert(8, vec![1; 4]);
        assert_eq!(page.len(), 4);
        assert!(cache.is_empty());
    }
}
