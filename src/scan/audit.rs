//! Audit engine seam and result routing
//!
//! Audit modules are external; the coordinator hands them an `AuditScope`
//! and a `ResultSink` and waits for the spawned task. The sink is an
//! explicit per-instance funnel: on a slave it feeds the issue buffer and
//! streams summaries to the master, locally it lands findings in the module
//! result set. Plugin results are a name → value map merged across the grid
//! during clean-up.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::grid::issues::Issue;
use crate::scan::spider::Page;
use crate::scan::state::ScanStats;

// ============================================================================
// Audit scope
// ============================================================================

/// The slice of the scan an instance audits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditScope {
    /// Scan target
    pub target: Option<String>,

    /// URLs this instance is restricted to
    pub urls: Vec<String>,

    /// Element ids this instance is restricted to
    pub elements: Vec<String>,

    /// Plugin-discovered pages assigned to this instance
    pub pages: Vec<Page>,
}

/// Outcome of a finished audit task
#[derive(Debug, Clone, Default)]
pub struct AuditOutcome {
    /// Statistics accumulated by the audit
    pub stats: ScanStats,
}

// ============================================================================
// Result sink
// ============================================================================

/// Explicit per-instance destination for audit findings
///
/// Reporting returns a future; awaiting it guarantees the batch reached its
/// destination (local result set, or the upstream buffer on a slave) before
/// the audit continues.
#[derive(Clone)]
pub struct ResultSink {
    report: Arc<dyn Fn(Vec<Issue>) -> futures::future::BoxFuture<'static, ()> + Send + Sync>,
}

impl ResultSink {
    pub fn new<F>(report: F) -> Self
    where
        F: Fn(Vec<Issue>) -> futures::future::BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self {
            report: Arc::new(report),
        }
    }

    /// Report a batch of findings
    pub async fn report(&self, issues: Vec<Issue>) {
        if !issues.is_empty() {
            (self.report)(issues).await;
        }
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ResultSink")
    }
}

// ============================================================================
// Auditor
// ============================================================================

/// The local audit pipeline, supplied by the host process
pub trait Auditor: Send + Sync + 'static {
    /// Start auditing the scope; findings go through the sink
    fn start(&self, scope: AuditScope, sink: ResultSink) -> JoinHandle<AuditOutcome>;
}

/// Auditor that finishes immediately without findings
///
/// Stands in when no audit modules are wired into the process.
pub struct NullAuditor;

impl Auditor for NullAuditor {
    fn start(&self, scope: AuditScope, _sink: ResultSink) -> JoinHandle<AuditOutcome> {
        tokio::spawn(async move {
            AuditOutcome {
                stats: ScanStats {
                    elements_audited: scope.elements.len() as u64,
                    ..Default::default()
                },
            }
        })
    }
}

// ============================================================================
// Plugin results
// ============================================================================

/// Results collected from loaded plugins, merged across the grid
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginResults(pub HashMap<String, serde_json::Value>);

impl PluginResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one plugin's result
    pub fn insert(&mut self, plugin: impl Into<String>, value: serde_json::Value) {
        self.0.insert(plugin.into(), value);
    }

    /// Merge another instance's results; existing entries win
    pub fn merge(&mut self, other: PluginResults) {
        for (plugin, value) in other.0 {
            self.0.entry(plugin).or_insert(value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::issues::Severity;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_null_auditor_completes() {
        let scope = AuditScope {
            elements: vec!["e1".to_string(), "e2".to_string()],
            ..Default::default()
        };
        let sink = ResultSink::new(|_| Box::pin(async {}));

        let outcome = NullAuditor.start(scope, sink).await.unwrap();
        assert_eq!(outcome.stats.elements_audited, 2);
    }

    #[tokio::test]
    async fn test_sink_skips_empty_batches() {
        let reported = Arc::new(Mutex::new(0usize));
        let counter = reported.clone();
        let sink = ResultSink::new(move |issues| {
            let counter = counter.clone();
            Box::pin(async move {
                *counter.lock().unwrap() += issues.len();
            })
        });

        sink.report(Vec::new()).await;
        sink.report(vec![Issue {
            unique_id: "a".to_string(),
            name: "sqli".to_string(),
            url: "http://t/".to_string(),
            element_id: None,
            severity: Severity::High,
            variations: Vec::new(),
        }])
        .await;

        assert_eq!(*reported.lock().unwrap(), 1);
    }

    #[test]
    fn test_plugin_results_merge_keeps_existing() {
        let mut local = PluginResults::new();
        local.insert("timing", serde_json::json!({"avg_ms": 12}));

        let mut remote = PluginResults::new();
        remote.insert("timing", serde_json::json!({"avg_ms": 99}));
        remote.insert("meta", serde_json::json!({"server": "nginx"}));

        local.merge(remote);
        assert_eq!(local.len(), 2);
        assert_eq!(local.0["timing"], serde_json::json!({"avg_ms": 12}));
    }
}
