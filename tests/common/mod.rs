//! Shared helpers for integration tests
#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use gridscan::config::ScanOptions;
use gridscan::grid::api;
use gridscan::grid::instance::Instance;
use gridscan::grid::issues::{Issue, Severity};
use gridscan::scan::audit::{AuditOutcome, AuditScope, Auditor, ResultSink};
use gridscan::scan::spider::{spider_channel, Page, SpiderCommand, SpiderEvent, SpiderPort};
use gridscan::scan::state::ScanStats;
use gridscan::scan::ScanCoordinator;

/// Build a bare issue with the given unique id
pub fn issue(id: &str) -> Issue {
    Issue {
        unique_id: id.to_string(),
        name: "reflected_xss".to_string(),
        url: "http://target.example/".to_string(),
        element_id: None,
        severity: Severity::Medium,
        variations: Vec::new(),
    }
}

/// Auditor producing one issue per element in its assigned scope
///
/// Lets tests verify element disjointness end to end: a double-audited
/// element shows up as a duplicate unique_id in the merged result set.
pub struct ElementAuditor;

impl Auditor for ElementAuditor {
    fn start(&self, scope: AuditScope, sink: ResultSink) -> JoinHandle<AuditOutcome> {
        tokio::spawn(async move {
            let issues: Vec<Issue> = scope
                .elements
                .iter()
                .map(|element| {
                    let mut found = issue(&format!("issue-{element}"));
                    found.element_id = Some(element.clone());
                    found
                })
                .collect();

            let audited = issues.len() as u64;
            sink.report(issues).await;

            AuditOutcome {
                stats: ScanStats {
                    elements_audited: audited,
                    requests_performed: audited * 3,
                    ..Default::default()
                },
            }
        })
    }
}

/// Auditor reporting a fixed issue set regardless of scope
pub struct CannedAuditor(pub Vec<Issue>);

impl Auditor for CannedAuditor {
    fn start(&self, _scope: AuditScope, sink: ResultSink) -> JoinHandle<AuditOutcome> {
        let issues = self.0.clone();
        tokio::spawn(async move {
            let found = issues.len() as u64;
            sink.report(issues).await;
            AuditOutcome {
                stats: ScanStats {
                    issues_found: 0,
                    requests_performed: found,
                    ..Default::default()
                },
            }
        })
    }
}

/// Spider that replays a page script once started
pub fn scripted_spider(mut port: SpiderPort, pages: Vec<Page>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(command) = port.commands.recv().await {
            match command {
                SpiderCommand::Start => {
                    for page in pages.clone() {
                        let _ = port.events.send(SpiderEvent::Page(page)).await;
                    }
                    let _ = port.events.send(SpiderEvent::RunComplete).await;
                    let _ = port.events.send(SpiderEvent::CrawlComplete).await;
                }
                SpiderCommand::UpdatePeers(_) | SpiderCommand::PeerDone(_) => {}
            }
        }
    })
}

/// One booted instance: coordinator plus its live RPC surface
pub struct TestInstance {
    pub coordinator: ScanCoordinator,
    pub instance: Instance,
    pub server: JoinHandle<()>,
}

/// Boot an instance on an ephemeral port with a scripted crawl
pub async fn boot_instance(
    token: &str,
    pages: Vec<Page>,
    auditor: Arc<dyn Auditor>,
    slave_deadline_secs: u64,
) -> TestInstance {
    let listener = api::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let options = ScanOptions {
        rpc_address: "127.0.0.1".to_string(),
        rpc_port: port,
        token: Some(token.to_string()),
        url: Some("http://target.example".to_string()),
        slave_deadline_secs,
        ..Default::default()
    };

    let (spider, spider_port) = spider_channel();
    let _ = scripted_spider(spider_port, pages);

    let coordinator = ScanCoordinator::new(options, auditor, spider).unwrap();
    let (addr, server) = api::serve_on(listener, coordinator.clone()).unwrap();

    TestInstance {
        coordinator,
        instance: Instance::new(addr.to_string(), token),
        server,
    }
}

/// Poll a condition until it holds or the timeout elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
