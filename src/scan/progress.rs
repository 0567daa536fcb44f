//! Live-progress payloads and aggregation rules
//!
//! The master fans a progress query out to every slave and folds the
//! responses into one payload: messages keep local-first order, issues
//! deduplicate by unique_id, per-instance stats sort by URL for stable
//! output, and aggregate stats merge element-wise. A slave that fails to
//! answer is dropped from that cycle.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::grid::issues::Issue;
use crate::scan::state::{InstanceStats, RunState, ScanStats};

// ============================================================================
// Options
// ============================================================================

fn default_true() -> bool {
    true
}

/// Sections to include in a progress payload
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProgressOptions {
    /// Include aggregate statistics
    #[serde(default = "default_true")]
    pub stats: bool,

    /// Include status messages
    #[serde(default = "default_true")]
    pub messages: bool,

    /// Query slaves and include per-instance sections
    #[serde(default = "default_true")]
    pub slaves: bool,

    /// Include issues
    #[serde(default = "default_true")]
    pub issues: bool,

    /// Return issues stripped to summary form
    #[serde(default)]
    pub as_hash: bool,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            stats: true,
            messages: true,
            slaves: true,
            issues: true,
            as_hash: false,
        }
    }
}

// ============================================================================
// Report
// ============================================================================

/// Aggregated progress payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    /// This instance's run state
    pub status: RunState,

    /// Whether any grid work is still in flight
    pub busy: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScanStats>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<Issue>>,

    /// Per-slave stat entries, sorted by url ascending
    #[serde(default)]
    pub instances: Vec<InstanceStats>,
}

impl ProgressReport {
    /// Fold slave responses into this local report
    ///
    /// `slave_reports` carries one entry per slave that answered; each is
    /// paired with the slave's URL.
    pub fn merge_slaves(&mut self, slave_reports: Vec<(String, ProgressReport)>) {
        let mut seen_ids: HashSet<String> = self
            .issues
            .iter()
            .flatten()
            .map(|i| i.unique_id.clone())
            .collect();

        for (url, report) in slave_reports {
            self.busy = self.busy || report.busy;

            if let (Some(all), Some(theirs)) = (&mut self.messages, report.messages) {
                all.extend(theirs);
            }

            if let (Some(all), Some(theirs)) = (&mut self.issues, report.issues) {
                for issue in theirs {
                    if seen_ids.insert(issue.unique_id.clone()) {
                        all.push(issue);
                    }
                }
            }

            let slave_stats = report.stats.unwrap_or_default();
            if let Some(aggregate) = &mut self.stats {
                aggregate.merge(&slave_stats);
            }

            self.instances.push(InstanceStats {
                url,
                status: report.status,
                stats: slave_stats,
            });
        }

        self.instances.sort_by(|a, b| a.url.cmp(&b.url));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::issues::Severity;

    fn issue(id: &str) -> Issue {
        Issue {
            unique_id: id.to_string(),
            name: "xss".to_string(),
            url: "http://t/".to_string(),
            element_id: None,
            severity: Severity::Low,
            variations: Vec::new(),
        }
    }

    fn report(busy: bool, messages: &[&str], issues: &[&str]) -> ProgressReport {
        ProgressReport {
            status: RunState::Auditing,
            busy,
            stats: Some(ScanStats {
                pages_crawled: 1,
                ..Default::default()
            }),
            messages: Some(messages.iter().map(|s| s.to_string()).collect()),
            issues: Some(issues.iter().map(|s| issue(s)).collect()),
            instances: Vec::new(),
        }
    }

    #[test]
    fn test_options_default() {
        let opts = ProgressOptions::default();
        assert!(opts.stats && opts.messages && opts.slaves && opts.issues);
        assert!(!opts.as_hash);
    }

    #[test]
    fn test_options_deserialize_defaults() {
        let opts: ProgressOptions = serde_json::from_str("{}").unwrap();
        assert!(opts.issues);
        assert!(!opts.as_hash);

        let opts: ProgressOptions =
            serde_json::from_str(r#"{"slaves": false, "as_hash": true}"#).unwrap();
        assert!(!opts.slaves);
        assert!(opts.as_hash);
    }

    #[test]
    fn test_merge_local_first_order_and_dedup() {
        let mut local = report(true, &["local started"], &["a", "b"]);
        let s1 = report(false, &["s1 started"], &["b", "c"]);
        let s2 = report(false, &["s2 started"], &["a", "d"]);

        local.merge_slaves(vec![
            ("s2:7331".to_string(), s2),
            ("s1:7331".to_string(), s1),
        ]);

        let messages = local.messages.unwrap();
        assert_eq!(messages[0], "local started");
        assert_eq!(messages.len(), 3);

        let ids: Vec<_> = local
            .issues
            .unwrap()
            .into_iter()
            .map(|i| i.unique_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_merge_sorts_instances_by_url() {
        let mut local = report(false, &[], &[]);
        local.merge_slaves(vec![
            ("s2:7331".to_string(), report(false, &[], &[])),
            ("s1:7331".to_string(), report(false, &[], &[])),
        ]);

        let urls: Vec<_> = local.instances.iter().map(|i| i.url.clone()).collect();
        assert_eq!(urls, vec!["s1:7331", "s2:7331"]);
    }

    #[test]
    fn test_merge_busy_is_logical_or() {
        let mut local = report(false, &[], &[]);
        local.merge_slaves(vec![("s1:7331".to_string(), report(true, &[], &[]))]);
        assert!(local.busy);

        let mut local = report(false, &[], &[]);
        local.merge_slaves(vec![("s1:7331".to_string(), report(false, &[], &[]))]);
        assert!(!local.busy);
    }

    #[test]
    fn test_merge_aggregates_stats() {
        let mut local = report(false, &[], &[]);
        local.merge_slaves(vec![
            ("s1:7331".to_string(), report(false, &[], &[])),
            ("s2:7331".to_string(), report(false, &[], &[])),
        ]);
        assert_eq!(local.stats.unwrap().pages_crawled, 3);
    }
}
