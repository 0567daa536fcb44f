//! Role of an instance within the grid
//!
//! Exactly one of solo/master/slave holds at any moment. Solo is the initial
//! state; master and slave are terminal for the duration of the scan.
//! Operations that are only valid in some variants report a role violation
//! instead of acting.

use serde::{Deserialize, Serialize};

use crate::grid::instance::Instance;

/// Connection back to the master, held by a slave
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterLink {
    /// The master instance (address + its public token)
    pub master: Instance,

    /// The master's privileged token, presented on every callback
    pub priv_token: String,
}

/// Grid role of this instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Not part of a grid; a plain local scan
    Solo,

    /// Coordinating a grid of slaves
    Master,

    /// Attached to a master and auditing an assigned chunk
    Slave(MasterLink),
}

impl Default for Role {
    fn default() -> Self {
        Self::Solo
    }
}

impl Role {
    pub fn is_solo(&self) -> bool {
        matches!(self, Self::Solo)
    }

    pub fn is_master(&self) -> bool {
        matches!(self, Self::Master)
    }

    pub fn is_slave(&self) -> bool {
        matches!(self, Self::Slave(_))
    }

    /// The master link when this instance is a slave
    pub fn master_link(&self) -> Option<&MasterLink> {
        match self {
            Self::Slave(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Solo => "solo",
            Self::Master => "master",
            Self::Slave(_) => "slave",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
