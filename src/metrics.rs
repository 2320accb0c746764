//! Counters for platform detection, endpoint negotiation and rail ordering.
//!
//! The library only emits through the `metrics` facade. Embedders install
//! whichever recorder they use; without one every call is a no-op.

use ::metrics::{counter, describe_counter};
use tracing::debug;

use crate::error::ErrorKind;

pub const PLATFORM_DETECTIONS: &str = "efa_platform_detections_total";
pub const ENDPOINT_NEGOTIATIONS: &str = "efa_endpoint_negotiations_total";
pub const ENDPOINT_NEGOTIATION_FAILURES: &str = "efa_endpoint_negotiation_failures_total";
pub const RAIL_SORTS: &str = "efa_rail_sorts_total";
pub const ENV_DEFAULTS_APPLIED: &str = "efa_env_defaults_applied_total";

/// Register all metrics with their descriptions.
pub fn register_metrics() {
    describe_counter!(
        PLATFORM_DETECTIONS,
        "Platform initializations, labelled by whether the instance type is in the catalog"
    );
    describe_counter!(
        ENDPOINT_NEGOTIATIONS,
        "Domains that settled on an ordering outcome"
    );
    describe_counter!(
        ENDPOINT_NEGOTIATION_FAILURES,
        "Endpoint configuration calls that failed, by error class"
    );
    describe_counter!(RAIL_SORTS, "Rail ordering calls, by result");
    describe_counter!(
        ENV_DEFAULTS_APPLIED,
        "Environment variables filled in because the user left them unset"
    );

    debug!("Platform metrics registered");
}

pub fn record_platform_detected(known: bool) {
    counter!(PLATFORM_DETECTIONS, "known" => if known { "true" } else { "false" }).increment(1);
}

/// Record the outcome a domain settled on.
pub fn record_negotiation(outcome: &'static str) {
    counter!(ENDPOINT_NEGOTIATIONS, "outcome" => outcome).increment(1);
}

pub fn record_negotiation_failure(kind: ErrorKind) {
    counter!(ENDPOINT_NEGOTIATION_FAILURES, "kind" => kind.as_str()).increment(1);
}

/// Record a rail ordering call over `rails` devices.
pub fn record_rail_sort(rails: usize, ok: bool) {
    if rails == 0 {
        return;
    }
    counter!(RAIL_SORTS, "result" => if ok { "ok" } else { "error" }).increment(1);
}

pub fn record_env_default(name: &str) {
    counter!(ENV_DEFAULTS_APPLIED, "name" => name.to_string()).increment(1);
}
