//! Workload partitioning across grid instances
//!
//! Splits the crawl result into chunk count = slaves + 1 so that no two
//! instances audit the same element. URL chunks are balanced to within one;
//! element ids go to the currently least-loaded chunk so site-wide elements
//! (shared forms, logout links) are audited exactly once; plugin-discovered
//! pages are dealt round-robin in insertion order. By convention the last
//! chunk of every partition belongs to the master itself.

use std::collections::{BTreeMap, BTreeSet};

use crate::scan::spider::Page;

// ============================================================================
// Workload
// ============================================================================

/// One partitioned workload, ready for distribution
#[derive(Debug, Clone)]
pub struct Workload {
    /// Disjoint URL chunks, sizes differing by at most one
    pub url_chunks: Vec<Vec<String>>,

    /// Element-id chunks; every distinct id appears in exactly one
    pub element_chunks: Vec<Vec<String>>,

    /// Page chunks, round-robin over insertion order
    pub page_chunks: Vec<Vec<Page>>,
}

impl Workload {
    /// Partition urls, elements and pages into `n` chunks
    pub fn partition(
        urls: &[String],
        elements: &BTreeMap<String, BTreeSet<String>>,
        pages: Vec<Page>,
        n: usize,
    ) -> Self {
        Self {
            url_chunks: partition_urls(urls, n),
            element_chunks: partition_elements(elements, n),
            page_chunks: partition_pages(pages, n),
        }
    }

    /// Number of chunks in this workload
    pub fn chunk_count(&self) -> usize {
        self.url_chunks.len()
    }
}

// ============================================================================
// Partition functions
// ============================================================================

/// Split URLs into `n` disjoint chunks whose sizes differ by at most one
pub fn partition_urls(urls: &[String], n: usize) -> Vec<Vec<String>> {
    let n = n.max(1);
    let mut chunks = vec![Vec::new(); n];
    for (i, url) in urls.iter().enumerate() {
        chunks[i % n].push(url.clone());
    }
    chunks
}

/// Assign each distinct element id to exactly one of `n` chunks
///
/// Ids are visited in deterministic map order; each goes to the chunk with
/// the smallest current element count, ties broken by lowest chunk index. An
/// id appearing under several URLs is assigned once, on first sight.
pub fn partition_elements(
    elements: &BTreeMap<String, BTreeSet<String>>,
    n: usize,
) -> Vec<Vec<String>> {
    let n = n.max(1);
    let mut chunks: Vec<Vec<String>> = vec![Vec::new(); n];
    let mut assigned: BTreeSet<&String> = BTreeSet::new();

    for ids in elements.values() {
        for id in ids {
            if !assigned.insert(id) {
                continue;
            }
            let target = least_loaded(&chunks);
            chunks[target].push(id.clone());
        }
    }

    chunks
}

/// Deal pages round-robin over insertion order into `n` chunks
pub fn partition_pages(pages: Vec<Page>, n: usize) -> Vec<Vec<Page>> {
    let n = n.max(1);
    let mut chunks = vec![Vec::new(); n];
    for (i, page) in pages.into_iter().enumerate() {
        chunks[i % n].push(page);
    }
    chunks
}

fn least_loaded(chunks: &[Vec<String>]) -> usize {
    let mut target = 0;
    for (i, chunk) in chunks.iter().enumerate() {
        if chunk.len() < chunks[target].len() {
            target = i;
        }
    }
    target
}
