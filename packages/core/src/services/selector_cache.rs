//! Selector result cache
//!
//! Maps the signature of a find (canonical selector, result-affecting options
//! and active language) to the ids it produced. Pages themselves live in the
//! identity cache; a hit is hydrated through the loader, which serves cached
//! pages without touching storage.

use crate::models::{FindOptions, PageId, Selector};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Ids and paging of one cached find
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResult {
    pub ids: Vec<PageId>,
    pub total: usize,
    pub start: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Default)]
pub struct SelectorCache {
    entries: RwLock<HashMap<String, CachedResult>>,
}

impl SelectorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signature of a find; equivalent selectors produce equal signatures
    pub fn signature(selector: &Selector, options: &FindOptions, language_id: Option<i64>) -> String {
        let mut signature = format!("{} [{}]", selector.canonical(), options.signature());
        if let Some(language_id) = language_id {
            signature.push_str(&format!(" lang={}", language_id));
        }
        signature
    }

    pub fn lookup(&self, signature: &str) -> Option<CachedResult> {
        self.entries.read().get(signature).cloned()
    }

    pub fn store(&self, signature: String, result: CachedResult) {
        self.entries.write().insert(signature, result);
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(ids: &[PageId]) -> CachedResult {
        CachedResult {
            ids: ids.to_vec(),
            total: ids.len(),
            start: 0,
            limit: None,
        }
    }

    #[test]
    fn test_equivalent_selectors_share_signature() {
        let options = FindOptions::default();
        let a = SelectorCache::signature(&Selector::parse("42").unwrap(), &options, None);
        let b = SelectorCache::signature(&Selector::parse("id=42").unwrap(), &options, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_options_and_language_change_signature() {
        let selector = Selector::parse("parent=1").unwrap();
        let plain = SelectorCache::signature(&selector, &FindOptions::default(), None);
        let one = SelectorCache::signature(&selector, &FindOptions::find_one(), None);
        let localized = SelectorCache::signature(&selector, &FindOptions::default(), Some(2));

        assert_ne!(plain, one);
        assert_ne!(plain, localized);

        let tagged = FindOptions::default().with_caller("menu");
        assert_eq!(plain, SelectorCache::signature(&selector, &tagged, None));
    }

    #[test]
    fn test_store_lookup_clear() {
        let cache = SelectorCache::new();
        cache.store("sig".to_string(), result(&[3, 4]));

        assert_eq!(cache.lookup("sig"), Some(result(&[3, 4])));
        assert_eq!(cache.lookup("other"), None);

        cache.clear();
        assert!(cache.is_empty());
    }
}
