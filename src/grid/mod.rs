//! Grid membership, workload distribution and the intra-grid protocol
//!
//! One scan is executed cooperatively by a master and zero or more slaves.
//! This module holds the pieces the grid is built from:
//!
//! - [`auth`] - privileged-token generation and validation
//! - [`instance`] - peer descriptors and the slave registry
//! - [`elements`] - element-id bookkeeping and upward-report filtering
//! - [`partition`] - splitting the crawl result into disjoint chunks
//! - [`issues`] - the issue model, buffering and summary deduplication
//! - [`client`] - RPC client for peer instances
//! - [`api`] - this instance's HTTP RPC surface
//! - [`dispatcher`] - spawning slave instances through dispatchers

pub mod api;
pub mod auth;
pub mod client;
pub mod dispatcher;
pub mod elements;
pub mod instance;
pub mod issues;
pub mod partition;

pub use auth::TokenGuard;
pub use client::GridClient;
pub use instance::{Instance, InstanceRegistry, SlaveStatus};
pub use issues::{Issue, IssueBuffer, Severity};
pub use partition::Workload;
