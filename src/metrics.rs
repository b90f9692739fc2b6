//! Metric helpers for the gateway.
//!
//! Thin wrappers around the `metrics` crate macros. No exporter is bundled;
//! the binary (or an embedding application) installs whichever recorder it
//! wants and these calls become no-ops otherwise.
//!
//! Provided metrics:
//! * `rpcgate_requests_total` (counter, label `status`)
//! * `rpcgate_request_duration_seconds` (histogram)
//! * `rpcgate_rpc_invocations_total` (counter, label `outcome`)
//! * `rpcgate_worker_pool_rejections_total` (counter)
//! * `rpcgate_name_table_applications` (gauge)
use std::time::Duration;

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const RPCGATE_REQUESTS_TOTAL: &str = "rpcgate_requests_total";
pub const RPCGATE_REQUEST_DURATION_SECONDS: &str = "rpcgate_request_duration_seconds";
pub const RPCGATE_RPC_INVOCATIONS_TOTAL: &str = "rpcgate_rpc_invocations_total";
pub const RPCGATE_WORKER_POOL_REJECTIONS_TOTAL: &str = "rpcgate_worker_pool_rejections_total";
pub const RPCGATE_NAME_TABLE_APPLICATIONS: &str = "rpcgate_name_table_applications";

static DESCRIBED: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        RPCGATE_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of gateway requests answered, by status."
    );
    describe_histogram!(
        RPCGATE_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Time from request context creation to response write."
    );
    describe_counter!(
        RPCGATE_RPC_INVOCATIONS_TOTAL,
        Unit::Count,
        "Remote invocations issued, by outcome."
    );
    describe_counter!(
        RPCGATE_WORKER_POOL_REJECTIONS_TOTAL,
        Unit::Count,
        "Requests rejected because the worker pool was saturated."
    );
    describe_gauge!(
        RPCGATE_NAME_TABLE_APPLICATIONS,
        "Applications currently present in the service name table."
    );
});

/// Count one answered request.
pub fn increment_request_total(status: &str) {
    counter!(RPCGATE_REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn record_request_duration(duration: Duration) {
    histogram!(RPCGATE_REQUEST_DURATION_SECONDS).record(duration.as_secs_f64());
}

/// Count one remote invocation outcome (`success`, `unavailable`, `timeout`, ...).
pub fn increment_rpc_invocation(outcome: &str) {
    counter!(RPCGATE_RPC_INVOCATIONS_TOTAL, "outcome" => outcome.to_string()).increment(1);
}

pub fn increment_worker_pool_rejections() {
    counter!(RPCGATE_WORKER_POOL_REJECTIONS_TOTAL).increment(1);
}

pub fn set_name_table_applications(count: usize) {
    gauge!(RPCGATE_NAME_TABLE_APPLICATIONS).set(count as f64);
}

/// Register metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    Lazy::force(&DESCRIBED);
    tracing::info!("Metric descriptions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_is_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        increment_request_total("success");
        record_request_duration(Duration::from_millis(3));
        increment_rpc_invocation("timeout");
        increment_worker_pool_rejections();
        set_name_table_applications(2);
    }
}
