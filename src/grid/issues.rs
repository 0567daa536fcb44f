//! Issue model, the auto-flushing issue buffer, and summary deduplication
//!
//! Slaves trade live-data latency for bandwidth: full issues accumulate in a
//! buffer that flushes on size or on repeated small pushes, while stripped
//! one-per-unique-id summaries stream upstream immediately for the UI.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ============================================================================
// Issue
// ============================================================================

/// Severity of a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Informational,
    Low,
    Medium,
    High,
}

/// One observed variation of an issue (payload and response evidence)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueVariation {
    /// Injected payload
    pub payload: String,

    /// Response excerpt proving the finding
    pub response_excerpt: String,
}

/// A finding produced by an audit module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identity used for deduplication across instances
    pub unique_id: String,

    /// Check name that produced the finding
    pub name: String,

    /// URL the finding was observed on
    pub url: String,

    /// Element the finding belongs to, when applicable
    pub element_id: Option<String>,

    /// Severity of the finding
    pub severity: Severity,

    /// Observed variations; stripped from summaries
    #[serde(default)]
    pub variations: Vec<IssueVariation>,
}

impl Issue {
    /// A stripped copy suitable for live UI streaming
    pub fn summary(&self) -> Issue {
        Issue {
            variations: Vec::new(),
            ..self.clone()
        }
    }

    /// Whether this issue carries no variation evidence
    pub fn is_summary(&self) -> bool {
        self.variations.is_empty()
    }
}

// ============================================================================
// Issue Buffer
// ============================================================================

/// Callback invoked with the drained contents on every flush
pub type FlushCallback = Box<dyn Fn(Vec<Issue>) + Send + Sync>;

/// Size/attempt-triggered auto-flushing buffer for issues
///
/// Flushes when the buffered count reaches `SIZE`, or when `FILLUP_ATTEMPTS`
/// pushes have arrived without reaching it. The attempt counter resets on
/// every flush.
pub struct IssueBuffer {
    buffer: Vec<Issue>,
    attempts: u32,
    on_flush: Option<FlushCallback>,
}

impl IssueBuffer {
    /// Flush once this many issues are buffered
    pub const SIZE: usize = 100;

    /// Flush after this many pushes even below SIZE
    pub const FILLUP_ATTEMPTS: u32 = 10;

    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            attempts: 0,
            on_flush: None,
        }
    }

    /// Install the flush callback
    pub fn on_flush(&mut self, callback: FlushCallback) {
        self.on_flush = Some(callback);
    }

    /// Append a batch; returns the drained contents when a flush fired
    pub fn push(&mut self, issues: Vec<Issue>) -> Option<Vec<Issue>> {
        self.buffer.extend(issues);
        self.attempts += 1;

        if self.buffer.len() >= Self::SIZE {
            return Some(self.flush());
        }
        if self.attempts >= Self::FILLUP_ATTEMPTS && !self.buffer.is_empty() {
            return Some(self.flush());
        }
        None
    }

    /// Swap out the contents, invoke the callback, reset the attempt counter
    pub fn flush(&mut self) -> Vec<Issue> {
        self.attempts = 0;
        let drained = std::mem::take(&mut self.buffer);
        if let Some(cb) = &self.on_flush {
            cb(drained.clone());
        }
        drained
    }

    /// Drain the contents without invoking the callback
    pub fn take(&mut self) -> Vec<Issue> {
        self.attempts = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Pushes since the last flush
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

impl Default for IssueBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IssueBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueBuffer")
            .field("len", &self.buffer.len())
            .field("attempts", &self.attempts)
            .finish()
    }
}

// ============================================================================
// Summary set
// ============================================================================

/// Deduplicated issue summaries, keyed by unique_id, insertion order kept
#[derive(Debug, Default)]
pub struct IssueSummarySet {
    seen: HashSet<String>,
    summaries: Vec<Issue>,
}

impl IssueSummarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge summaries; returns how many were new
    pub fn merge<I>(&mut self, issues: I) -> usize
    where
        I: IntoIterator<Item = Issue>,
    {
        let mut added = 0;
        for issue in issues {
            if self.seen.insert(issue.unique_id.clone()) {
                self.summaries.push(issue.summary());
                added += 1;
            }
        }
        added
    }

    pub fn contains(&self, unique_id: &str) -> bool {
        self.seen.contains(unique_id)
    }

    /// All retained summaries in insertion order
    pub fn all(&self) -> Vec<Issue> {
        self.summaries.clone()
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }
}
