//! Peer instance descriptors and the slave registry
//!
//! The master tracks every enslaved instance here. Entries are created by
//! `enslave` and never removed during a scan; completion is a monotone set of
//! done URLs. A last-seen timestamp per slave backs the optional liveness
//! deadline for slaves that die mid-scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

// ============================================================================
// Instance
// ============================================================================

/// A peer scanner instance, addressed by URL and RPC auth token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// "host:port" address of the peer's RPC surface
    pub url: String,

    /// The peer's public RPC token
    pub token: String,
}

impl Instance {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
        }
    }
}

// ============================================================================
// Slave liveness
// ============================================================================

/// Liveness state of a registered slave
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaveStatus {
    /// Still auditing its chunk
    Running,

    /// Reported `slave_done` (or was presumed done by the liveness deadline)
    Done,
}

/// Registry entry for one slave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveEntry {
    /// Peer descriptor
    pub instance: Instance,

    /// Liveness state
    pub status: SlaveStatus,

    /// When the slave was enslaved
    pub registered_at: DateTime<Utc>,

    /// Last privileged callback received from this slave
    pub last_seen: DateTime<Utc>,
}

impl SlaveEntry {
    fn new(instance: Instance) -> Self {
        let now = Utc::now();
        Self {
            instance,
            status: SlaveStatus::Running,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Seconds since the last callback from this slave
    pub fn seconds_since_seen(&self) -> i64 {
        (Utc::now() - self.last_seen).num_seconds()
    }
}

// ============================================================================
// Instance Registry
// ============================================================================

/// Registry of enslaved instances, owned by the master
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    slaves: Arc<RwLock<Vec<SlaveEntry>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slave; returns false if the URL is already present
    pub async fn add(&self, instance: Instance) -> bool {
        let mut slaves = self.slaves.write().await;
        if slaves.iter().any(|s| s.instance.url == instance.url) {
            return false;
        }
        slaves.push(SlaveEntry::new(instance));
        true
    }

    /// All registered instances in enslavement order
    pub async fn list(&self) -> Vec<Instance> {
        self.slaves
            .read()
            .await
            .iter()
            .map(|s| s.instance.clone())
            .collect()
    }

    /// All registry entries in enslavement order
    pub async fn entries(&self) -> Vec<SlaveEntry> {
        self.slaves.read().await.clone()
    }

    /// Number of registered slaves
    pub async fn len(&self) -> usize {
        self.slaves.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slaves.read().await.is_empty()
    }

    /// Record a completed slave; idempotent, returns whether newly marked
    pub async fn mark_done(&self, url: &str) -> bool {
        let mut slaves = self.slaves.write().await;
        match slaves.iter_mut().find(|s| s.instance.url == url) {
            Some(entry) if entry.status == SlaveStatus::Running => {
                entry.status = SlaveStatus::Done;
                entry.last_seen = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Refresh a slave's last-seen timestamp
    pub async fn touch(&self, url: &str) {
        let mut slaves = self.slaves.write().await;
        if let Some(entry) = slaves.iter_mut().find(|s| s.instance.url == url) {
            entry.last_seen = Utc::now();
        }
    }

    /// True when every registered slave is done (vacuously true when empty)
    pub async fn all_done(&self) -> bool {
        self.slaves
            .read()
            .await
            .iter()
            .all(|s| s.status == SlaveStatus::Done)
    }

    /// Presume silent slaves done once their last-seen exceeds the deadline
    ///
    /// Returns the URLs newly presumed done. A deadline of 0 disables the
    /// sweep entirely.
    pub async fn presume_dead_done(&self, deadline_secs: u64) -> Vec<String> {
        if deadline_secs == 0 {
            return Vec::new();
        }

        let mut swept = Vec::new();
        let mut slaves = self.slaves.write().await;
        for entry in slaves.iter_mut() {
            if entry.status == SlaveStatus::Running
                && entry.seconds_since_seen() > deadline_secs as i64
            {
                entry.status = SlaveStatus::Done;
                swept.push(entry.instance.url.clone());
            }
        }
        swept
    }
}
