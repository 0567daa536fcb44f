//! Scan coordination: role state machine, grid orchestration, completion
//!
//! One `ScanCoordinator` drives a single scanner instance through an entire
//! scan. Solo instances audit locally; a master crawls, partitions the
//! discovered workload across its slaves plus itself, audits its own chunk
//! and converges once every slave reported done; a slave audits the chunk it
//! was handed and reports back through the master's privileged surface.
//!
//! All grid interaction goes through `GridClient`; there is no shared memory
//! between instances. Within one instance state lives behind async locks and
//! every mutation is commutative (set unions, monotone done set), so call
//! ordering across peers is irrelevant.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::{GridMode, ScanOptions};
use crate::error::{Error, Result};
use crate::grid::auth::TokenGuard;
use crate::grid::client::{
    CleanUpResponse, GridClient, InstanceDescriptor, SetMasterRequest,
};
use crate::grid::dispatcher::DispatcherClient;
use crate::grid::elements::{ElementRegistry, SeenElementFilter};
use crate::grid::instance::{Instance, InstanceRegistry};
use crate::grid::issues::{Issue, IssueBuffer, IssueSummarySet};
use crate::grid::partition::Workload;
use crate::metrics;
use crate::scan::audit::{AuditOutcome, AuditScope, Auditor, PluginResults, ResultSink};
use crate::scan::progress::{ProgressOptions, ProgressReport};
use crate::scan::report::{ReportData, ReportManager};
use crate::scan::role::{MasterLink, Role};
use crate::scan::spider::{Page, SpiderCommand, SpiderEvent, SpiderHandle};
use crate::scan::state::{RunState, ScanStats};

/// Poll interval while paused
const PAUSE_POLL: Duration = Duration::from_millis(200);

/// Liveness sweep interval for the dead-slave deadline
const LIVENESS_SWEEP: Duration = Duration::from_secs(5);

// ============================================================================
// Coordinator
// ============================================================================

struct Inner {
    options: RwLock<ScanOptions>,
    self_url: String,
    public_token: String,
    auth: TokenGuard,

    role: RwLock<Role>,
    run_state: RwLock<RunState>,
    extended_running: AtomicBool,
    paused: AtomicBool,
    finished_auditing: AtomicBool,
    cleaned_up: AtomicBool,
    prepared: AtomicBool,

    registry: InstanceRegistry,
    elements: RwLock<ElementRegistry>,
    seen_filter: Mutex<SeenElementFilter>,
    issue_buffer: Mutex<IssueBuffer>,
    summaries: RwLock<IssueSummarySet>,
    issues: RwLock<Vec<Issue>>,
    local_sitemap: RwLock<BTreeSet<String>>,
    override_sitemap: RwLock<BTreeSet<String>>,
    page_queue: Mutex<VecDeque<Page>>,
    plugin_results: RwLock<PluginResults>,
    messages: RwLock<Vec<String>>,
    stats: RwLock<ScanStats>,

    modules: Vec<String>,
    loaded_plugins: RwLock<Vec<String>>,

    client: GridClient,
    dispatcher: Option<DispatcherClient>,
    auditor: Arc<dyn Auditor>,
    spider_cmds: tokio::sync::mpsc::Sender<SpiderCommand>,
    spider_events: Mutex<Option<tokio::sync::mpsc::Receiver<SpiderEvent>>>,
    reports: ReportManager,
}

/// Coordination engine for one scanner instance
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

impl ScanCoordinator {
    /// Create a coordinator around the given collaborators
    pub fn new(
        options: ScanOptions,
        auditor: Arc<dyn Auditor>,
        spider: SpiderHandle,
    ) -> Result<Self> {
        options.validate()?;

        let self_url = options.self_url();
        let public_token = options
            .token
            .clone()
            .unwrap_or_else(TokenGuard::generate);

        let client = GridClient::new(options.rpc_timeout())?;
        let dispatcher = if options.dispatchers.is_empty() {
            None
        } else {
            Some(DispatcherClient::new(
                options.dispatchers.clone(),
                options.rpc_timeout(),
            )?)
        };

        Ok(Self {
            inner: Arc::new(Inner {
                options: RwLock::new(options),
                self_url,
                public_token,
                auth: TokenGuard::new(),
                role: RwLock::new(Role::Solo),
                run_state: RwLock::new(RunState::NotStarted),
                extended_running: AtomicBool::new(false),
                paused: AtomicBool::new(false),
                finished_auditing: AtomicBool::new(false),
                cleaned_up: AtomicBool::new(false),
                prepared: AtomicBool::new(false),
                registry: InstanceRegistry::new(),
                elements: RwLock::new(ElementRegistry::new()),
                seen_filter: Mutex::new(SeenElementFilter::new()),
                issue_buffer: Mutex::new(IssueBuffer::new()),
                summaries: RwLock::new(IssueSummarySet::new()),
                issues: RwLock::new(Vec::new()),
                local_sitemap: RwLock::new(BTreeSet::new()),
                override_sitemap: RwLock::new(BTreeSet::new()),
                page_queue: Mutex::new(VecDeque::new()),
                plugin_results: RwLock::new(PluginResults::new()),
                messages: RwLock::new(Vec::new()),
                stats: RwLock::new(ScanStats::default()),
                modules: Vec::new(),
                loaded_plugins: RwLock::new(Vec::new()),
                client,
                dispatcher,
                auditor,
                spider_cmds: spider.commands,
                spider_events: Mutex::new(Some(spider.events)),
                reports: ReportManager::new(),
            }),
        })
    }

    /// Replace the advertised audit module list
    pub fn with_modules(mut self, modules: Vec<String>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_modules before sharing")
            .modules = modules;
        self
    }

    // ------------------------------------------------------------------
    // Identity
    // ------------------------------------------------------------------

    /// The address peers use to reach this instance
    pub fn self_url(&self) -> &str {
        &self.inner.self_url
    }

    /// This instance's public RPC token
    pub fn public_token(&self) -> &str {
        &self.inner.public_token
    }

    /// The privileged grid token (never exposed over the public surface)
    pub fn priv_token(&self) -> &str {
        self.inner.auth.token()
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn revision(&self) -> &'static str {
        option_env!("GRIDSCAN_REVISION").unwrap_or("unreleased")
    }

    pub fn list_modules(&self) -> Vec<String> {
        self.inner.modules.clone()
    }

    pub async fn list_plugins(&self) -> Vec<String> {
        self.inner.loaded_plugins.read().await.clone()
    }

    // ------------------------------------------------------------------
    // Role queries and transitions
    // ------------------------------------------------------------------

    pub async fn role(&self) -> Role {
        self.inner.role.read().await.clone()
    }

    pub async fn is_solo(&self) -> bool {
        self.inner.role.read().await.is_solo()
    }

    pub async fn is_master(&self) -> bool {
        self.inner.role.read().await.is_master()
    }

    pub async fn is_slave(&self) -> bool {
        self.inner.role.read().await.is_slave()
    }

    /// Promote a solo instance to grid master; false when not solo
    pub async fn set_as_master(&self) -> bool {
        let mut role = self.inner.role.write().await;
        if !role.is_solo() {
            return false;
        }
        *role = Role::Master;
        drop(role);

        self.inner.options.write().await.grid_mode = GridMode::HighPerformance;
        info!("instance promoted to grid master");
        true
    }

    /// Attach this solo instance to a master; false when not solo
    ///
    /// Installs the slave-side crawl pipeline, loads the propagated plugin
    /// set and prepares the scan exactly once.
    pub async fn set_master(&self, request: SetMasterRequest) -> bool {
        {
            let mut role = self.inner.role.write().await;
            if !role.is_solo() {
                return false;
            }
            *role = Role::Slave(MasterLink {
                master: request.master.clone(),
                priv_token: request.priv_token.clone(),
            });
        }

        self.inner
            .options
            .write()
            .await
            .apply_cleaned(&request.options);

        self.install_slave_issue_forwarding(&request).await;
        self.spawn_slave_crawl_pipeline();
        self.prepare().await;

        info!(master = %request.master.url, "attached to master");
        true
    }

    /// Enslave a peer instance; elevates solo → master
    ///
    /// Fails with `missing_field` on a malformed descriptor. A slave cannot
    /// enslave: that reports `false` once (role violation).
    pub async fn enslave(&self, descriptor: InstanceDescriptor) -> Result<bool> {
        let url = descriptor
            .url
            .filter(|u| !u.is_empty())
            .ok_or_else(|| Error::MissingField("url".to_string()))?;
        let token = descriptor
            .token
            .ok_or_else(|| Error::MissingField("token".to_string()))?;

        self.enslave_instance(Instance::new(url, token)).await
    }

    async fn enslave_instance(&self, instance: Instance) -> Result<bool> {
        if self.is_slave().await {
            warn!(slave = %instance.url, "slave cannot enslave");
            return Ok(false);
        }

        // First enslavement implicitly elevates solo to master.
        self.set_as_master().await;

        let request = SetMasterRequest {
            master: Instance::new(self.self_url(), self.public_token()),
            priv_token: self.priv_token().to_string(),
            options: self.inner.options.read().await.cleaned(),
        };

        let attached = self.inner.client.set_master(&instance, &request).await?;
        if !attached {
            warn!(slave = %instance.url, "peer refused set_master");
            return Ok(false);
        }

        let added = self.inner.registry.add(instance.clone()).await;
        if added {
            metrics::slave_registered();
            self.message(format!("enslaved {}", instance.url)).await;
        }
        Ok(added)
    }

    // ------------------------------------------------------------------
    // Scan lifecycle
    // ------------------------------------------------------------------

    /// Start the scan; false when already running
    pub async fn run(&self) -> bool {
        if self.inner.extended_running.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.prepare().await;

        let role = self.role().await;
        match role {
            Role::Slave(_) => {
                let this = self.clone();
                tokio::spawn(async move { this.slave_loop().await });
            }
            Role::Master => {
                self.spawn_master();
            }
            Role::Solo => {
                // Solo degenerates to a plain local audit. Elevation only
                // happens through enslave or an explicit set_as_master.
                let this = self.clone();
                tokio::spawn(async move { this.solo_loop().await });
            }
        }

        true
    }

    fn spawn_master(&self) {
        let this = self.clone();
        tokio::spawn(async move { this.master_loop().await });
        self.spawn_liveness_sweeper();
    }

    /// Runs plugins and starts the scan timer, exactly once
    async fn prepare(&self) {
        if self.inner.prepared.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(RunState::Preparing).await;

        let plugins = self.inner.options.read().await.plugins.clone();
        if !plugins.is_empty() {
            debug!(?plugins, "loading plugins");
        }
        *self.inner.loaded_plugins.write().await = plugins;

        let mut stats = self.inner.stats.write().await;
        stats.started_at = Some(chrono::Utc::now());
        stats.touch();
        drop(stats);

        self.message("scan prepared").await;
    }

    /// Pause the scan and fan out to every slave
    pub async fn pause(&self) -> bool {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.each_slave(|client, slave| async move { client.pause(&slave).await })
            .await;
        true
    }

    /// Resume the scan and fan out to every slave
    pub async fn resume(&self) -> bool {
        self.inner.paused.store(false, Ordering::SeqCst);
        self.each_slave(|client, slave| async move { client.resume(&slave).await })
            .await;
        true
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Grid-wide clean-up; idempotent, false on the second call
    ///
    /// On a master this tears down every slave and merges their plugin
    /// results into the local set.
    pub async fn clean_up(&self) -> bool {
        if self.inner.cleaned_up.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.set_state(RunState::CleaningUp).await;

        if self.is_master().await {
            for slave in self.inner.registry.list().await {
                match self.inner.client.clean_up(&slave).await {
                    Ok(response) => {
                        self.inner
                            .plugin_results
                            .write()
                            .await
                            .merge(response.plugin_results);
                    }
                    Err(e) => {
                        metrics::rpc_failure("clean_up");
                        warn!(slave = %slave.url, error = %e, "clean_up dropped slave");
                    }
                }
            }
        }

        true
    }

    /// Whether any grid work is still in flight
    pub fn busy(&self) -> bool {
        self.inner.extended_running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> RunState {
        let state = *self.inner.run_state.read().await;
        if self.is_paused() && !state.is_done() {
            return RunState::Paused;
        }
        state
    }

    pub async fn stats(&self) -> ScanStats {
        self.inner.stats.read().await.clone()
    }

    pub async fn issues(&self) -> Vec<Issue> {
        self.collect_issues(false).await
    }

    pub async fn issue_summaries(&self) -> Vec<Issue> {
        self.collect_issues(true).await
    }

    pub async fn plugin_results(&self) -> PluginResults {
        self.inner.plugin_results.read().await.clone()
    }

    /// Peer-visible clean_up payload: op result plus local plugin results
    pub async fn clean_up_response(&self) -> CleanUpResponse {
        let cleaned = self.clean_up().await;
        CleanUpResponse {
            cleaned,
            plugin_results: self.plugin_results().await,
        }
    }

    // ------------------------------------------------------------------
    // Progress
    // ------------------------------------------------------------------

    /// Aggregate live progress, fanning out to slaves when requested
    pub async fn progress(&self, opts: ProgressOptions) -> ProgressReport {
        metrics::progress_requested();

        let mut report = ProgressReport {
            status: self.status().await,
            busy: self.busy(),
            stats: opts.stats.then_some(self.stats().await),
            messages: if opts.messages {
                Some(self.inner.messages.read().await.clone())
            } else {
                None
            },
            issues: if opts.issues {
                Some(self.collect_issues(opts.as_hash).await)
            } else {
                None
            },
            instances: Vec::new(),
        };

        if opts.slaves && self.is_master().await {
            let sub_opts = ProgressOptions {
                slaves: false,
                ..opts
            };

            let slaves = self.inner.registry.list().await;
            let queries = slaves.into_iter().map(|slave| {
                let client = self.inner.client.clone();
                async move {
                    let url = slave.url.clone();
                    (url, client.progress(&slave, sub_opts).await)
                }
            });

            let mut answered = Vec::new();
            for (url, result) in futures::future::join_all(queries).await {
                match result {
                    Ok(slave_report) => answered.push((url, slave_report)),
                    Err(e) => {
                        metrics::rpc_failure("progress");
                        warn!(slave = %url, error = %e, "progress dropped slave");
                    }
                }
            }
            report.merge_slaves(answered);
        }

        report
    }

    // ------------------------------------------------------------------
    // Reports
    // ------------------------------------------------------------------

    /// Render the scan result with the named report component
    pub async fn report_as(&self, name: &str) -> Result<Vec<u8>> {
        let data = self.report_data().await;
        self.inner.reports.report_as(name, &data)
    }

    /// The default serialized report (JSON component)
    pub async fn serialized_report(&self) -> Result<Vec<u8>> {
        self.report_as("json").await
    }

    async fn report_data(&self) -> ReportData {
        let mut sitemap = self.inner.override_sitemap.read().await.clone();
        sitemap.extend(self.inner.local_sitemap.read().await.iter().cloned());

        ReportData {
            target: self.inner.options.read().await.url.clone(),
            sitemap,
            issues: self.collect_issues(false).await,
            stats: self.stats().await,
            version: self.version().to_string(),
        }
    }

    // ------------------------------------------------------------------
    // Privileged surface
    // ------------------------------------------------------------------

    /// Token gate: masters validate, slaves accept unconditionally
    async fn authorized(&self, token: &str) -> bool {
        if self.is_slave().await {
            return true;
        }
        let ok = self.inner.auth.validate(token);
        if !ok {
            metrics::unauthorized_call();
        }
        ok
    }

    /// Narrow the local URL scope
    pub async fn restrict_paths(&self, paths: Vec<String>, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }
        self.inner.options.write().await.restrict_paths = paths;
        true
    }

    /// Narrow the local audit to the given element ids
    pub async fn restrict_to_elements(&self, elements: Vec<String>, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }
        self.inner.options.write().await.restrict_elements = elements;
        true
    }

    /// Push pages into the local page queue
    pub async fn update_page_queue(&self, pages: Vec<Page>, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }
        self.inner.page_queue.lock().await.extend(pages);
        true
    }

    /// Merge element ids into the authoritative map
    ///
    /// When a peer URL is signalled done, the spider stops waiting on that
    /// peer's crawl and the slave's liveness clock is refreshed.
    pub async fn update_element_ids_per_page(
        &self,
        entries: BTreeMap<String, Vec<String>>,
        token: &str,
        signal_done_peer_url: Option<String>,
    ) -> bool {
        if !self.authorized(token).await {
            return false;
        }

        let recorded: usize = entries.values().map(Vec::len).sum();
        self.inner.elements.write().await.merge(entries);
        metrics::elements_recorded(recorded);

        if let Some(peer) = signal_done_peer_url {
            self.inner.registry.touch(&peer).await;
            let _ = self
                .inner
                .spider_cmds
                .send(SpiderCommand::PeerDone(peer))
                .await;
        }
        true
    }

    /// Record a slave's completion; idempotent over the done set
    pub async fn slave_done(&self, url: String, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }

        if self.inner.registry.mark_done(&url).await {
            metrics::slave_done();
            self.message(format!("slave {url} done")).await;
        }
        self.cleanup_if_all_done().await;
        true
    }

    /// Store full issues into the module result set
    pub async fn register_issues(&self, issues: Vec<Issue>, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }

        metrics::issues_registered(issues.len());
        let mut stats = self.inner.stats.write().await;
        stats.issues_found += issues.len() as u64;
        stats.touch();
        drop(stats);

        self.inner.issues.write().await.extend(issues);
        true
    }

    /// Merge stripped summaries for live reporting, deduplicated by unique_id
    pub async fn register_issue_summaries(&self, issues: Vec<Issue>, token: &str) -> bool {
        if !self.authorized(token).await {
            return false;
        }
        self.inner.summaries.write().await.merge(issues);
        true
    }

    // ------------------------------------------------------------------
    // Run loops
    // ------------------------------------------------------------------

    async fn solo_loop(self) {
        self.wait_while_paused().await;
        self.set_state(RunState::Auditing).await;

        let scope = self.local_scope().await;
        let sink = self.local_sink();
        let outcome = self.run_audit(scope, sink).await;
        self.absorb_audit_outcome(outcome).await;

        self.inner.finished_auditing.store(true, Ordering::SeqCst);
        self.finish().await;
    }

    async fn master_loop(self) {
        self.wait_while_paused().await;
        self.dispatch_slaves().await;

        // Crawl phase: every page feeds the element map and the sitemap.
        self.set_state(RunState::Crawling).await;
        let _ = self.inner.spider_cmds.send(SpiderCommand::Start).await;

        if let Some(mut events) = self.inner.spider_events.lock().await.take() {
            while let Some(event) = events.recv().await {
                match event {
                    SpiderEvent::Page(page) => self.record_crawled_page(page).await,
                    SpiderEvent::RunComplete => debug!("spider pass complete"),
                    SpiderEvent::CrawlComplete => break,
                }
            }
        }

        // Distribution phase: freeze the element map, partition, hand out.
        self.set_state(RunState::Distributing).await;
        let pages: Vec<Page> = {
            let mut queue = self.inner.page_queue.lock().await;
            queue.drain(..).collect()
        };

        {
            let mut elements = self.inner.elements.write().await;
            let mut override_sitemap = self.inner.override_sitemap.write().await;
            for page in &pages {
                elements.record(&page.url, page.element_ids.iter().cloned());
                override_sitemap.insert(page.url.clone());
            }
            override_sitemap.extend(self.inner.local_sitemap.read().await.iter().cloned());
        }

        let urls: Vec<String> = self
            .inner
            .override_sitemap
            .read()
            .await
            .iter()
            .cloned()
            .collect();
        let slaves = self.inner.registry.list().await;
        let chunks = slaves.len() + 1;

        let workload = {
            let elements = self.inner.elements.read().await;
            Workload::partition(&urls, elements.map(), pages, chunks)
        };
        self.message(format!(
            "distributing {} urls across {} instances",
            urls.len(),
            chunks
        ))
        .await;

        // The last chunk is the master's own share.
        {
            let mut opts = self.inner.options.write().await;
            opts.restrict_paths = workload.url_chunks[chunks - 1].clone();
            opts.restrict_elements = workload.element_chunks[chunks - 1].clone();
        }
        self.inner
            .page_queue
            .lock()
            .await
            .extend(workload.page_chunks[chunks - 1].clone());

        for (i, slave) in slaves.iter().enumerate() {
            let result = self
                .inner
                .client
                .distribute_and_run(
                    slave,
                    workload.url_chunks[i].clone(),
                    workload.element_chunks[i].clone(),
                    workload.page_chunks[i].clone(),
                    self.priv_token(),
                )
                .await;

            if let Err(e) = result {
                metrics::rpc_failure("distribute_and_run");
                warn!(slave = %slave.url, error = %e, "distribution failed");
            }
        }

        // Let the spider know about its peers, then audit our own chunk.
        let _ = self
            .inner
            .spider_cmds
            .send(SpiderCommand::UpdatePeers(slaves))
            .await;

        self.set_state(RunState::Auditing).await;
        let scope = self.local_scope().await;
        let sink = self.local_sink();
        let outcome = self.run_audit(scope, sink).await;
        self.absorb_audit_outcome(outcome).await;

        self.inner.finished_auditing.store(true, Ordering::SeqCst);
        self.cleanup_if_all_done().await;
    }

    async fn slave_loop(self) {
        self.wait_while_paused().await;
        self.set_state(RunState::Auditing).await;

        let scope = self.local_scope().await;
        let sink = self.slave_sink();
        let outcome = self.run_audit(scope, sink).await;
        self.absorb_audit_outcome(outcome).await;

        if let Some(link) = self.role().await.master_link().cloned() {
            // Drain whatever the buffer still holds before reporting done so
            // the master never converges with issues in flight.
            let remaining = self.inner.issue_buffer.lock().await.take();
            if !remaining.is_empty() {
                metrics::issues_flushed(remaining.len());
                let result = self
                    .inner
                    .client
                    .register_issues(&link.master, remaining, &link.priv_token)
                    .await;
                if let Err(e) = result {
                    metrics::rpc_failure("register_issues");
                    warn!(error = %e, "dropped final issue batch");
                }
            }

            let result = self
                .inner
                .client
                .slave_done(&link.master, self.self_url(), &link.priv_token)
                .await;
            if let Err(e) = result {
                metrics::rpc_failure("slave_done");
                warn!(error = %e, "failed to report slave_done");
            }
        }

        self.set_state(RunState::Done).await;
        self.inner.extended_running.store(false, Ordering::SeqCst);
    }

    /// Ask dispatchers for slave instances and enslave each
    async fn dispatch_slaves(&self) {
        let Some(dispatcher) = &self.inner.dispatcher else {
            return;
        };
        let slots = self.inner.options.read().await.spawn_slaves;
        if slots == 0 {
            return;
        }

        let preferred = dispatcher.preferred().await;
        if preferred.is_empty() {
            warn!("no dispatchers reachable; running without spawned slaves");
            return;
        }

        for slot in 0..slots {
            let info = &preferred[slot % preferred.len()];
            match dispatcher.dispatch(&info.url, self.self_url()).await {
                Ok(instance) => match self.enslave_instance(instance).await {
                    Ok(true) => {}
                    Ok(false) => warn!(dispatcher = %info.url, "spawned instance refused"),
                    Err(e) => warn!(dispatcher = %info.url, error = %e, "enslave failed"),
                },
                Err(e) => {
                    metrics::rpc_failure("dispatch");
                    warn!(dispatcher = %info.url, error = %e, "dispatch failed");
                }
            }
        }
    }

    /// Master-side sweeper for the dead-slave deadline
    fn spawn_liveness_sweeper(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                let deadline = this.inner.options.read().await.slave_deadline_secs;
                let interval = if deadline == 0 {
                    LIVENESS_SWEEP
                } else {
                    LIVENESS_SWEEP.min(Duration::from_millis(deadline * 500).max(
                        Duration::from_millis(250),
                    ))
                };
                tokio::time::sleep(interval).await;

                if !this.busy() {
                    break;
                }

                let swept = this.inner.registry.presume_dead_done(deadline).await;
                if !swept.is_empty() {
                    for url in &swept {
                        warn!(slave = %url, "slave silent past deadline, presumed done");
                    }
                    this.cleanup_if_all_done().await;
                }
            }
        });
    }

    /// Converge once local audit and every slave are done
    async fn cleanup_if_all_done(&self) {
        if !self.inner.finished_auditing.load(Ordering::SeqCst) {
            return;
        }
        if !self.inner.registry.all_done().await {
            return;
        }

        self.clean_up().await;
        self.finish().await;
    }

    async fn finish(&self) {
        self.set_state(RunState::Done).await;
        self.inner.extended_running.store(false, Ordering::SeqCst);
        self.message("scan finished").await;
    }

    // ------------------------------------------------------------------
    // Crawl and audit plumbing
    // ------------------------------------------------------------------

    async fn record_crawled_page(&self, page: Page) {
        self.inner
            .elements
            .write()
            .await
            .record(&page.url, page.element_ids.iter().cloned());
        self.inner
            .local_sitemap
            .write()
            .await
            .insert(page.url.clone());

        let mut stats = self.inner.stats.write().await;
        stats.pages_crawled += 1;
        stats.touch();
    }

    /// Slave crawl callbacks: filter element ids, forward fresh ones upstream
    fn spawn_slave_crawl_pipeline(&self) {
        let this = self.clone();
        tokio::spawn(async move {
            let Some(mut events) = this.inner.spider_events.lock().await.take() else {
                return;
            };
            let Some(link) = this.role().await.master_link().cloned() else {
                return;
            };

            while let Some(event) = events.recv().await {
                match event {
                    SpiderEvent::Page(page) => {
                        this.inner
                            .local_sitemap
                            .write()
                            .await
                            .insert(page.url.clone());
                        {
                            let mut stats = this.inner.stats.write().await;
                            stats.pages_crawled += 1;
                            stats.touch();
                        }

                        let fresh = this
                            .inner
                            .seen_filter
                            .lock()
                            .await
                            .filter(page.element_ids.clone());
                        if fresh.is_empty() {
                            continue;
                        }

                        let mut entries = BTreeMap::new();
                        entries.insert(page.url, fresh);
                        let result = this
                            .inner
                            .client
                            .update_element_ids_per_page(
                                &link.master,
                                entries,
                                &link.priv_token,
                                None,
                            )
                            .await;
                        if let Err(e) = result {
                            metrics::rpc_failure("update_element_ids_per_page");
                            warn!(error = %e, "dropped element id report");
                        }
                    }
                    SpiderEvent::RunComplete => {
                        // Tell the master's spider this peer finished crawling.
                        let result = this
                            .inner
                            .client
                            .update_element_ids_per_page(
                                &link.master,
                                BTreeMap::new(),
                                &link.priv_token,
                                Some(this.self_url().to_string()),
                            )
                            .await;
                        if let Err(e) = result {
                            warn!(error = %e, "dropped crawl-done signal");
                        }
                    }
                    SpiderEvent::CrawlComplete => break,
                }
            }
        });
    }

    /// Wire the issue buffer to the master's privileged surface
    async fn install_slave_issue_forwarding(&self, request: &SetMasterRequest) {
        let client = self.inner.client.clone();
        let master = request.master.clone();
        let token = request.priv_token.clone();

        self.inner
            .issue_buffer
            .lock()
            .await
            .on_flush(Box::new(move |issues| {
                if issues.is_empty() {
                    return;
                }
                metrics::issues_flushed(issues.len());
                let client = client.clone();
                let master = master.clone();
                let token = token.clone();
                tokio::spawn(async move {
                    if let Err(e) = client.register_issues(&master, issues, &token).await {
                        metrics::rpc_failure("register_issues");
                        warn!(error = %e, "dropped issue batch");
                    }
                });
            }));
    }

    /// The audit scope assigned to this instance
    async fn local_scope(&self) -> AuditScope {
        let opts = self.inner.options.read().await;
        let pages: Vec<Page> = {
            let mut queue = self.inner.page_queue.lock().await;
            queue.drain(..).collect()
        };

        AuditScope {
            target: opts.url.clone(),
            urls: opts.restrict_paths.clone(),
            elements: opts.restrict_elements.clone(),
            pages,
        }
    }

    async fn run_audit(&self, scope: AuditScope, sink: ResultSink) -> AuditOutcome {
        match self.inner.auditor.start(scope, sink).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "audit task aborted");
                AuditOutcome::default()
            }
        }
    }

    async fn absorb_audit_outcome(&self, outcome: AuditOutcome) {
        let mut stats = self.inner.stats.write().await;
        stats.merge(&outcome.stats);
        stats.touch();
    }

    /// Findings land in the local module result set and the summary set
    fn local_sink(&self) -> ResultSink {
        let this = self.clone();
        ResultSink::new(move |issues| {
            let this = this.clone();
            Box::pin(async move {
                let token = this.priv_token().to_string();
                this.register_issues(issues.clone(), &token).await;
                this.register_issue_summaries(issues, &token).await;
            })
        })
    }

    /// Findings stream upstream: summaries immediately, full issues batched
    fn slave_sink(&self) -> ResultSink {
        let this = self.clone();
        ResultSink::new(move |issues| {
            let this = this.clone();
            Box::pin(async move {
                let Some(link) = this.role().await.master_link().cloned() else {
                    return;
                };

                let summaries: Vec<Issue> = issues.iter().map(Issue::summary).collect();
                this.inner.summaries.write().await.merge(summaries.clone());

                let result = this
                    .inner
                    .client
                    .register_issue_summaries(&link.master, summaries, &link.priv_token)
                    .await;
                if let Err(e) = result {
                    metrics::rpc_failure("register_issue_summaries");
                    warn!(error = %e, "dropped summary batch");
                }

                this.inner.issue_buffer.lock().await.push(issues);
            })
        })
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn collect_issues(&self, as_hash: bool) -> Vec<Issue> {
        let mut collected = self.inner.issues.read().await.clone();
        let mut seen: std::collections::HashSet<String> =
            collected.iter().map(|i| i.unique_id.clone()).collect();

        for summary in self.inner.summaries.read().await.all() {
            if seen.insert(summary.unique_id.clone()) {
                collected.push(summary);
            }
        }

        if as_hash {
            collected.iter().map(Issue::summary).collect()
        } else {
            collected
        }
    }

    async fn each_slave<F, Fut, T>(&self, op: F)
    where
        F: Fn(GridClient, Instance) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, crate::grid::client::ClientError>>,
    {
        for slave in self.inner.registry.list().await {
            let url = slave.url.clone();
            if let Err(e) = op(self.inner.client.clone(), slave).await {
                metrics::rpc_failure("fan_out");
                warn!(slave = %url, error = %e, "fan-out dropped slave");
            }
        }
    }

    async fn wait_while_paused(&self) {
        while self.is_paused() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    async fn set_state(&self, state: RunState) {
        *self.inner.run_state.write().await = state;
    }

    async fn message(&self, message: impl Into<String>) {
        self.inner.messages.write().await.push(message.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::issues::Severity;
    use crate::scan::audit::NullAuditor;
    use crate::scan::spider::{spawn_null_spider, spider_channel};

    fn coordinator() -> ScanCoordinator {
        coordinator_with(ScanOptions::default())
    }

    fn coordinator_with(options: ScanOptions) -> ScanCoordinator {
        let (handle, port) = spider_channel();
        let _ = spawn_null_spider(port);
        ScanCoordinator::new(options, Arc::new(NullAuditor), handle).unwrap()
    }

    fn issue(id: &str) -> Issue {
        Issue {
            unique_id: id.to_string(),
            name: "xss".to_string(),
            url: "http://t/".to_string(),
            element_id: None,
            severity: Severity::Medium,
            variations: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_set_as_master_only_from_solo() {
        let c = coordinator();
        assert!(c.is_solo().await);

        assert!(c.set_as_master().await);
        assert!(c.is_master().await);

        // Second call is a no-op false.
        assert!(!c.set_as_master().await);
    }

    #[tokio::test]
    async fn test_role_exclusivity() {
        let c = coordinator();
        let role = c.role().await;
        assert!(role.is_solo() && !role.is_master() && !role.is_slave());

        c.set_as_master().await;
        let role = c.role().await;
        assert!(!role.is_solo() && role.is_master() && !role.is_slave());
    }

    #[tokio::test]
    async fn test_set_master_rejected_when_not_solo() {
        let c = coordinator();
        c.set_as_master().await;

        let attached = c
            .set_master(SetMasterRequest {
                master: Instance::new("m:7331", "pub"),
                priv_token: "priv".to_string(),
                options: ScanOptions::default().cleaned(),
            })
            .await;
        assert!(!attached);
        assert!(c.is_master().await);
    }

    #[tokio::test]
    async fn test_enslave_missing_field() {
        let c = coordinator();
        let result = c
            .enslave(InstanceDescriptor {
                url: Some("s:7331".to_string()),
                token: None,
            })
            .await;
        assert!(matches!(result, Err(Error::MissingField(_))));
    }

    #[tokio::test]
    async fn test_slave_cannot_enslave() {
        let c = coordinator();
        assert!(
            c.set_master(SetMasterRequest {
                master: Instance::new("m:7331", "pub"),
                priv_token: "priv".to_string(),
                options: ScanOptions::default().cleaned(),
            })
            .await
        );

        let result = c
            .enslave(InstanceDescriptor {
                url: Some("other:7331".to_string()),
                token: Some("t".to_string()),
            })
            .await
            .unwrap();
        assert!(!result);
    }

    #[tokio::test]
    async fn test_token_gate_rejects_without_mutation() {
        let c = coordinator();
        c.set_as_master().await;

        assert!(!c.register_issues(vec![issue("a")], "wrong").await);
        assert!(c.issues().await.is_empty());

        assert!(
            !c.restrict_to_elements(vec!["e1".to_string()], "wrong")
                .await
        );
        assert!(c
            .inner
            .options
            .read()
            .await
            .restrict_elements
            .is_empty());
    }

    #[tokio::test]
    async fn test_token_gate_accepts_local_token() {
        let c = coordinator();
        c.set_as_master().await;

        let token = c.priv_token().to_string();
        assert!(c.register_issues(vec![issue("a")], &token).await);
        assert_eq!(c.issues().await.len(), 1);
    }

    #[tokio::test]
    async fn test_slave_ignores_token() {
        let c = coordinator();
        c.set_master(SetMasterRequest {
            master: Instance::new("m:7331", "pub"),
            priv_token: "priv".to_string(),
            options: ScanOptions::default().cleaned(),
        })
        .await;

        assert!(c.restrict_paths(vec!["http://t/a".to_string()], "anything").await);
    }

    #[tokio::test]
    async fn test_summary_registration_dedups() {
        let c = coordinator();
        c.set_as_master().await;
        let token = c.priv_token().to_string();

        c.register_issue_summaries(vec![issue("a"), issue("b")], &token)
            .await;
        c.register_issue_summaries(vec![issue("a"), issue("c")], &token)
            .await;

        assert_eq!(c.issue_summaries().await.len(), 3);
    }

    #[tokio::test]
    async fn test_clean_up_idempotent() {
        let c = coordinator();
        assert!(c.clean_up().await);
        assert!(!c.clean_up().await);
    }

    #[tokio::test]
    async fn test_solo_run_ignores_grid_config() {
        // grid_mode and dispatcher settings alone never elevate a solo
        // instance; only enslave or set_as_master do.
        let c = coordinator_with(ScanOptions {
            grid_mode: GridMode::HighPerformance,
            spawn_slaves: 2,
            dispatchers: vec!["127.0.0.1:1".to_string()],
            ..Default::default()
        });

        assert!(c.run().await);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while c.busy() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(!c.busy(), "solo scan never finished");
        assert!(c.is_solo().await);
        assert_eq!(c.status().await, RunState::Done);
        assert!(c.inner.registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_pause_sets_status() {
        let c = coordinator();
        c.pause().await;
        assert!(c.is_paused());
        assert_eq!(c.status().await, RunState::Paused);

        c.resume().await;
        assert!(!c.is_paused());
        assert_eq!(c.status().await, RunState::NotStarted);
    }
}
