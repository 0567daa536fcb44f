//! gridscan - distributed coordination engine for a web-application scanner
//!
//! A single logical scan runs cooperatively across a High Performance Grid:
//! one master instance and zero or more slaves crawl a target, partition the
//! discovered URLs and auditable elements into disjoint chunks, audit in
//! parallel and converge on a single merged result.
//!
//! # Architecture
//!
//! - [`config`] - instance options and propagation to slaves
//! - [`grid`] - membership, tokens, workload partitioning, RPC surface
//! - [`scan`] - role state machine, orchestration, progress, reports
//! - [`metrics`] - Prometheus instrumentation
//! - [`error`] - unified error type
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridscan::config::ScanOptions;
//! use gridscan::scan::audit::NullAuditor;
//! use gridscan::scan::spider::{spawn_null_spider, spider_channel};
//! use gridscan::scan::ScanCoordinator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (handle, port) = spider_channel();
//!     let _ = spawn_null_spider(port);
//!
//!     let coordinator =
//!         ScanCoordinator::new(ScanOptions::from_env()?, Arc::new(NullAuditor), handle)?;
//!     coordinator.run().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod grid;
pub mod metrics;
pub mod scan;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{GridMode, ScanOptions};
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::grid::{Instance, Issue, Severity, TokenGuard, Workload};
    pub use crate::scan::{ProgressOptions, Role, RunState, ScanCoordinator, ScanStats};
}

pub use config::ScanOptions;
pub use scan::ScanCoordinator;
