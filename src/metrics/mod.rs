//! Prometheus metrics for the grid coordination layer

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Encoder,
    Gauge, TextEncoder,
};

lazy_static! {
    // Grid membership
    pub static ref GRID_REGISTERED_SLAVES: Gauge = register_gauge!(
        "gridscan_grid_registered_slaves",
        "Number of enslaved instances"
    )
    .unwrap();

    pub static ref GRID_SLAVES_DONE: Counter = register_counter!(
        "gridscan_grid_slaves_done_total",
        "Slaves that reported completion"
    )
    .unwrap();

    // Intra-grid RPC health
    pub static ref GRID_RPC_FAILURES: CounterVec = register_counter_vec!(
        "gridscan_grid_rpc_failures_total",
        "Peer RPC failures by operation",
        &["operation"]
    )
    .unwrap();

    pub static ref GRID_UNAUTHORIZED_CALLS: Counter = register_counter!(
        "gridscan_grid_unauthorized_calls_total",
        "Privileged calls rejected by the token gate"
    )
    .unwrap();

    // Workload and results
    pub static ref ELEMENTS_RECORDED: Counter = register_counter!(
        "gridscan_elements_recorded_total",
        "Element ids merged into the authoritative map"
    )
    .unwrap();

    pub static ref ISSUES_REGISTERED: Counter = register_counter!(
        "gridscan_issues_registered_total",
        "Full issues stored into the module result set"
    )
    .unwrap();

    pub static ref ISSUES_FLUSHED: Counter = register_counter!(
        "gridscan_issues_flushed_total",
        "Issues flushed upstream from slave buffers"
    )
    .unwrap();

    pub static ref PROGRESS_REQUESTS: Counter = register_counter!(
        "gridscan_progress_requests_total",
        "Progress aggregation requests served"
    )
    .unwrap();
}

pub fn slave_registered() {
    GRID_REGISTERED_SLAVES.inc();
}

pub fn slave_done() {
    GRID_SLAVES_DONE.inc();
}

pub fn rpc_failure(operation: &str) {
    GRID_RPC_FAILURES.with_label_values(&[operation]).inc();
}

pub fn unauthorized_call() {
    GRID_UNAUTHORIZED_CALLS.inc();
}

pub fn elements_recorded(count: usize) {
    ELEMENTS_RECORDED.inc_by(count as f64);
}

pub fn issues_registered(count: usize) {
    ISSUES_REGISTERED.inc_by(count as f64);
}

pub fn issues_flushed(count: usize) {
    ISSUES_FLUSHED.inc_by(count as f64);
}

pub fn progress_requested() {
    PROGRESS_REQUESTS.inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn export() -> prometheus::Result<String> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_grid_metrics() {
        slave_registered();
        rpc_failure("progress");

        let text = export().unwrap();
        assert!(text.contains("gridscan_grid_registered_slaves"));
        assert!(text.contains("gridscan_grid_rpc_failures_total"));
    }
}
