//! Auditable-element bookkeeping
//!
//! The master owns the authoritative URL → element-id map assembled during
//! the crawl; slaves keep a probabilistic filter of ids already forwarded
//! upstream so redundant upward reports are suppressed. Maps use BTree
//! collections so iteration, and therefore workload partitioning, is
//! deterministic.

use bloomfilter::Bloom;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// Element Registry
// ============================================================================

/// URL → set of element ids discovered on that page
///
/// Grows monotonically during the crawl phase; frozen (by convention, not by
/// type) before partitioning.
#[derive(Debug, Default, Clone)]
pub struct ElementRegistry {
    map: BTreeMap<String, BTreeSet<String>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge ids into the per-URL set
    pub fn record<I>(&mut self, url: &str, ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.map.entry(url.to_string()).or_default().extend(ids);
    }

    /// Merge a whole delta map (slave upward report)
    pub fn merge(&mut self, entries: BTreeMap<String, Vec<String>>) {
        for (url, ids) in entries {
            self.record(&url, ids);
        }
    }

    /// Ids recorded for one URL
    pub fn ids_for(&self, url: &str) -> Option<&BTreeSet<String>> {
        self.map.get(url)
    }

    /// All distinct ids across every URL
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.map.values().flatten().cloned().collect()
    }

    /// The underlying map, for partitioning
    pub fn map(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.map
    }

    /// URLs with at least one recorded element
    pub fn urls(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

// ============================================================================
// Seen-element filter (slave side)
// ============================================================================

/// Expected distinct element count for default filter sizing
const DEFAULT_CAPACITY: usize = 1_000_000;

/// Target false positive rate at expected capacity
const DEFAULT_FP_RATE: f64 = 0.001;

/// Probabilistic set of element ids already forwarded to the master
///
/// A false positive drops an id from one upward report; the master still
/// learns about the element from whichever instance audits its chunk, so the
/// rate only needs to stay small, not zero.
pub struct SeenElementFilter {
    bloom: Bloom<String>,
    inserted: usize,
}

impl SeenElementFilter {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY, DEFAULT_FP_RATE)
    }

    pub fn with_capacity(capacity: usize, fp_rate: f64) -> Self {
        Self {
            bloom: Bloom::new_for_fp_rate(capacity, fp_rate),
            inserted: 0,
        }
    }

    /// Drop ids already forwarded; remember and return the rest
    pub fn filter(&mut self, ids: Vec<String>) -> Vec<String> {
        let mut fresh = Vec::with_capacity(ids.len());
        for id in ids {
            if !self.bloom.check(&id) {
                self.bloom.set(&id);
                self.inserted += 1;
                fresh.push(id);
            }
        }
        fresh
    }

    /// Ids inserted so far
    pub fn inserted(&self) -> usize {
        self.inserted
    }
}

impl Default for SeenElementFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SeenElementFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeenElementFilter")
            .field("inserted", &self.inserted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_is_set_union() {
        let mut registry = ElementRegistry::new();
        registry.record("u1", vec!["e1".to_string(), "e2".to_string()]);
        registry.record("u1", vec!["e2".to_string(), "e3".to_string()]);

        let ids = registry.ids_for("u1").unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains("e1") && ids.contains("e2") && ids.contains("e3"));
    }

    #[test]
    fn test_merge_delta_map() {
        let mut registry = ElementRegistry::new();
        registry.record("u1", vec!["e1".to_string()]);

        let mut delta = BTreeMap::new();
        delta.insert("u1".to_string(), vec!["e2".to_string()]);
        delta.insert("u2".to_string(), vec!["e2".to_string(), "e3".to_string()]);
        registry.merge(delta);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.all_ids().len(), 3);
    }

    #[test]
    fn test_all_ids_distinct() {
        let mut registry = ElementRegistry::new();
        registry.record("u1", vec!["shared".to_string(), "a".to_string()]);
        registry.record("u2", vec!["shared".to_string(), "b".to_string()]);

        let all = registry.all_ids();
        assert_eq!(all.len(), 3);
    }

    #[test]
    fn test_filter_suppresses_repeats() {
        let mut filter = SeenElementFilter::with_capacity(1000, 0.001);

        let first = filter.filter(vec!["e1".to_string(), "e2".to_string()]);
        assert_eq!(first.len(), 2);

        let second = filter.filter(vec![
            "e1".to_string(),
            "e2".to_string(),
            "e3".to_string(),
        ]);
        assert_eq!(second, vec!["e3".to_string()]);
        assert_eq!(filter.inserted(), 3);
    }

    #[test]
    fn test_filter_dedupes_within_batch() {
        let mut filter = SeenElementFilter::with_capacity(1000, 0.001);
        let fresh = filter.filter(vec!["e1".to_string(), "e1".to_string()]);
        assert_eq!(fresh, vec!["e1".to_string()]);
    }
}
