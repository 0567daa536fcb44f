//! Run state and scan statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Run State
// ============================================================================

/// Lifecycle state of a scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    Preparing,
    Crawling,
    Distributing,
    Auditing,
    Paused,
    CleaningUp,
    Done,
}

impl Default for RunState {
    fn default() -> Self {
        Self::NotStarted
    }
}

impl RunState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Preparing => "preparing",
            Self::Crawling => "crawling",
            Self::Distributing => "distributing",
            Self::Auditing => "auditing",
            Self::Paused => "paused",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Scan Stats
// ============================================================================

/// Numeric scan statistics
///
/// Aggregation across instances is element-wise: counters sum, timestamps
/// take the maximum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStats {
    /// Pages fetched by this instance's crawl
    pub pages_crawled: u64,

    /// Elements audited so far
    pub elements_audited: u64,

    /// HTTP requests performed by the audit
    pub requests_performed: u64,

    /// Issues found so far
    pub issues_found: u64,

    /// When the scan was prepared
    pub started_at: Option<DateTime<Utc>>,

    /// Most recent activity observed
    pub last_activity: Option<DateTime<Utc>>,
}

impl ScanStats {
    /// Element-wise merge: numeric sums, max of timestamps
    pub fn merge(&mut self, other: &ScanStats) {
        self.pages_crawled += other.pages_crawled;
        self.elements_audited += other.elements_audited;
        self.requests_performed += other.requests_performed;
        self.issues_found += other.issues_found;
        self.started_at = max_timestamp(self.started_at, other.started_at);
        self.last_activity = max_timestamp(self.last_activity, other.last_activity);
    }

    /// Stamp activity at now
    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}

/// Merge two stat sets into a fresh aggregate
pub fn merge_stats(a: &ScanStats, b: &ScanStats) -> ScanStats {
    let mut merged = a.clone();
    merged.merge(b);
    merged
}

fn max_timestamp(
    a: Option<DateTime<Utc>>,
    b: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

// ============================================================================
// Per-instance stats
// ============================================================================

/// Per-instance stat entry in an aggregated progress payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceStats {
    /// Peer address
    pub url: String,

    /// Peer run state
    pub status: RunState,

    /// Peer's own statistics
    pub stats: ScanStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_run_state_strings() {
        assert_eq!(RunState::NotStarted.as_str(), "not_started");
        assert_eq!(RunState::CleaningUp.to_string(), "cleaning_up");
        assert!(RunState::Done.is_done());
        assert!(!RunState::Auditing.is_done());
    }

    #[test]
    fn test_merge_sums_counters() {
        let a = ScanStats {
            pages_crawled: 3,
            elements_audited: 10,
            requests_performed: 100,
            issues_found: 2,
            ..Default::default()
        };
        let b = ScanStats {
            pages_crawled: 2,
            elements_audited: 5,
            requests_performed: 50,
            issues_found: 1,
            ..Default::default()
        };

        let merged = merge_stats(&a, &b);
        assert_eq!(merged.pages_crawled, 5);
        assert_eq!(merged.elements_audited, 15);
        assert_eq!(merged.requests_performed, 150);
        assert_eq!(merged.issues_found, 3);
    }

    #[test]
    fn test_merge_takes_max_timestamp() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let a = ScanStats {
            last_activity: Some(early),
            ..Default::default()
        };
        let b = ScanStats {
            last_activity: Some(late),
            ..Default::default()
        };

        assert_eq!(merge_stats(&a, &b).last_activity, Some(late));
        assert_eq!(merge_stats(&b, &a).last_activity, Some(late));

        let none = ScanStats::default();
        assert_eq!(merge_stats(&a, &none).last_activity, Some(early));
    }
}
