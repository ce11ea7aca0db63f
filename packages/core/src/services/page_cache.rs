//! Identity cache
//!
//! Process-local map from page id to the last loaded copy of that page, plus
//! the child-sort helper and the selector result cache that depend on it.
//! Entries live until explicitly evicted; there is no size-based eviction.
//!
//! Copies handed out keep the `instance_id` of the cached entry, so two reads
//! of an unchanged page report the same instance.

use crate::models::{Page, PageId};
use crate::services::selector_cache::SelectorCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

#[derive(Debug, Default)]
pub struct PageCache {
    pages: RwLock<HashMap<PageId, Page>>,
    sortfields: RwLock<HashMap<PageId, String>>,
    selectors: SelectorCache,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl PageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: PageId) -> Option<Page> {
        let page = self.pages.read().get(&id).cloned();
        let counter = if page.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        page
    }

    pub fn contains(&self, id: PageId) -> bool {
        self.pages.read().contains_key(&id)
    }

    /// Cache a persisted page; new, null and deleted pages are ignored
    pub fn put(&self, page: &Page) {
        if page.id() <= 0 || page.is_new() || page.is_null() || page.is_deleted() {
            return;
        }
        self.pages.write().insert(page.id(), page.clone());
    }

    /// Drop one page and its child-sort entry
    pub fn evict(&self, id: PageId) -> bool {
        self.sortfields.write().remove(&id);
        self.pages.write().remove(&id).is_some()
    }

    /// Drop everything: pages, child-sort helper and selector results
    pub fn evict_all(&self) {
        self.pages.write().clear();
        self.sortfields.write().clear();
        self.selectors.clear();
    }

    /// Cached child sort of `parent_id`
    pub fn sortfield(&self, parent_id: PageId) -> Option<String> {
        self.sortfields.read().get(&parent_id).cloned()
    }

    pub fn set_sortfield(&self, parent_id: PageId, sortfield: String) {
        self.sortfields.write().insert(parent_id, sortfield);
    }

    pub fn selectors(&self) -> &SelectorCache {
        &self.selectors
    }

    pub fn len(&self) -> usize {
        self.pages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Template;
    use crate::services::selector_cache::CachedResult;

    fn persisted(id: PageId) -> Page {
        let mut page = Page::new(&Template::new(3, "basic-page"));
        page.id = id;
        page.mark_clean();
        page
    }

    #[test]
    fn test_put_get_evict() {
        let cache = PageCache::new();
        cache.put(&persisted(5));

        assert!(cache.get(5).is_some());
        assert!(cache.get(6).is_none());
        assert!(cache.evict(5));
        assert!(!cache.contains(5));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[test]
    fn test_new_pages_are_not_cached() {
        let cache = PageCache::new();
        cache.put(&Page::new(&Template::new(3, "basic-page")));
        cache.put(&Page::null());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_all_clears_dependents() {
        let cache = PageCache::new();
        cache.put(&persisted(5));
        cache.set_sortfield(1, "-created".to_string());
        cache.selectors().store(
            "sig".to_string(),
            CachedResult {
                ids: vec![5],
                total: 1,
                start: 0,
                limit: None,
            },
        );

        cache.evict_all();

        assert!(cache.is_empty());
        assert_eq!(cache.sortfield(1), None);
        assert!(cache.selectors().is_empty());
    }
}
