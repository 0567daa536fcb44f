//! Configuration for a scanner instance
//!
//! Options are loaded from environment variables or built programmatically;
//! a subset of them is propagated to slaves when the grid is assembled.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Grid operation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridMode {
    /// Single instance, no grid
    Standalone,

    /// One master coordinating N slaves on a single scan
    HighPerformance,
}

impl Default for GridMode {
    fn default() -> Self {
        Self::Standalone
    }
}

impl GridMode {
    /// Parse from the configuration string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "standalone" => Some(Self::Standalone),
            "high_performance" => Some(Self::HighPerformance),
            _ => None,
        }
    }
}

/// Options consumed by the coordination layer
///
/// `restrict_paths` and `restrict_elements` start empty and are populated by
/// the orchestrator during workload distribution; everything else is operator
/// input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    /// RPC bind address
    pub rpc_address: String,

    /// RPC bind port
    pub rpc_port: u16,

    /// Grid operation mode
    pub grid_mode: GridMode,

    /// Scan target, propagated to slaves
    pub url: Option<String>,

    /// Plugins to load before prepare
    pub plugins: Vec<String>,

    /// This instance's public RPC token (peers present it on every request)
    pub token: Option<String>,

    /// Dispatcher URLs used to spawn slave instances
    pub dispatchers: Vec<String>,

    /// Slave slots to request from dispatchers
    pub spawn_slaves: usize,

    /// URL scope for the local audit (set by workload distribution)
    pub restrict_paths: Vec<String>,

    /// Element scope for the local audit (set by workload distribution)
    pub restrict_elements: Vec<String>,

    /// Seconds of silence after which a slave is presumed done; 0 disables
    pub slave_deadline_secs: u64,

    /// Peer request timeout in seconds
    pub rpc_timeout_secs: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            rpc_address: "127.0.0.1".to_string(),
            rpc_port: 7331,
            grid_mode: GridMode::Standalone,
            url: None,
            plugins: Vec::new(),
            token: None,
            dispatchers: Vec::new(),
            spawn_slaves: 0,
            restrict_paths: Vec::new(),
            restrict_elements: Vec::new(),
            slave_deadline_secs: 0,
            rpc_timeout_secs: 10,
        }
    }
}

impl ScanOptions {
    /// Load options from environment variables
    ///
    /// - `GRIDSCAN_RPC_ADDRESS` [default: 127.0.0.1]
    /// - `GRIDSCAN_RPC_PORT` [default: 7331]
    /// - `GRIDSCAN_GRID_MODE` (standalone, high_performance)
    /// - `GRIDSCAN_TARGET_URL`
    /// - `GRIDSCAN_PLUGINS` (comma separated)
    /// - `GRIDSCAN_TOKEN`
    /// - `GRIDSCAN_DISPATCHERS` (comma separated)
    /// - `GRIDSCAN_SPAWN_SLAVES` [default: 0]
    /// - `GRIDSCAN_SLAVE_DEADLINE` [default: 0, disabled]
    /// - `GRIDSCAN_RPC_TIMEOUT` [default: 10]
    pub fn from_env() -> Result<Self> {
        let grid_mode = match env::var("GRIDSCAN_GRID_MODE") {
            Ok(s) => GridMode::parse(&s)
                .ok_or_else(|| Error::config(format!("unknown grid mode: {s}")))?,
            Err(_) => GridMode::Standalone,
        };

        let opts = Self {
            rpc_address: env::var("GRIDSCAN_RPC_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            rpc_port: env::var("GRIDSCAN_RPC_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(7331),
            grid_mode,
            url: env::var("GRIDSCAN_TARGET_URL").ok(),
            plugins: parse_list(env::var("GRIDSCAN_PLUGINS").ok()),
            token: env::var("GRIDSCAN_TOKEN").ok(),
            dispatchers: parse_list(env::var("GRIDSCAN_DISPATCHERS").ok()),
            spawn_slaves: env::var("GRIDSCAN_SPAWN_SLAVES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            restrict_paths: Vec::new(),
            restrict_elements: Vec::new(),
            slave_deadline_secs: env::var("GRIDSCAN_SLAVE_DEADLINE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
            rpc_timeout_secs: env::var("GRIDSCAN_RPC_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        };

        opts.validate()?;
        Ok(opts)
    }

    /// The address peers use to reach this instance ("host:port")
    pub fn self_url(&self) -> String {
        format!("{}:{}", self.rpc_address, self.rpc_port)
    }

    /// Peer request timeout as a Duration
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    /// Whether high performance grid mode is enabled
    pub fn high_performance(&self) -> bool {
        self.grid_mode == GridMode::HighPerformance
    }

    /// A copy safe to propagate to a slave
    ///
    /// Instance-local keys (bind address, token, dispatchers, audit scope)
    /// are stripped; the slave keeps its own. The target, plugin set and
    /// timeouts travel with the scan.
    pub fn cleaned(&self) -> Self {
        Self {
            rpc_address: String::new(),
            rpc_port: 0,
            grid_mode: self.grid_mode,
            url: self.url.clone(),
            plugins: self.plugins.clone(),
            token: None,
            dispatchers: Vec::new(),
            spawn_slaves: 0,
            restrict_paths: Vec::new(),
            restrict_elements: Vec::new(),
            slave_deadline_secs: self.slave_deadline_secs,
            rpc_timeout_secs: self.rpc_timeout_secs,
        }
    }

    /// Apply propagated options on a slave, keeping instance-local keys
    pub fn apply_cleaned(&mut self, cleaned: &Self) {
        self.url = cleaned.url.clone();
        self.plugins = cleaned.plugins.clone();
        self.slave_deadline_secs = cleaned.slave_deadline_secs;
        self.rpc_timeout_secs = cleaned.rpc_timeout_secs;
    }

    /// Validate option values
    pub fn validate(&self) -> Result<()> {
        if self.rpc_address.is_empty() {
            return Err(Error::config("rpc_address cannot be empty"));
        }
        if self.rpc_timeout_secs == 0 {
            return Err(Error::config("rpc_timeout_secs must be positive"));
        }
        if let Some(target) = &self.url {
            url::Url::parse(target)
                .map_err(|e| Error::config(format!("invalid target url {target}: {e}")))?;
        }
        Ok(())
    }
}

fn parse_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    })
    .unwrap_or_default()
}
