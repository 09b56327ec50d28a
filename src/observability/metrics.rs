//! # Gateway Metrics
//!
//! Counters and histograms recorded through the `metrics` facade. No exporter
//! is installed by the gateway itself; an embedding application can install
//! any recorder and these series show up there.

use std::time::Duration;

/// Requests received by the HTTP front, labelled by response status
pub const REQUESTS_TOTAL: &str = "gateway_requests_total";

/// Finished invocations, labelled by function and outcome
pub const INVOCATIONS_TOTAL: &str = "gateway_invocations_total";

/// Execution time of invocations, labelled by function
pub const INVOCATION_DURATION_SECONDS: &str = "gateway_invocation_duration_seconds";

/// Sandboxes created, labelled by function
pub const SANDBOXES_CREATED_TOTAL: &str = "gateway_sandboxes_created_total";

/// Sandboxes destroyed, labelled by function and reason
pub const SANDBOXES_DESTROYED_TOTAL: &str = "gateway_sandboxes_destroyed_total";

pub fn request_completed(status: u16) {
    ::metrics::counter!(REQUESTS_TOTAL, "status" => status.to_string()).increment(1);
}

pub fn invocation_finished(function: &str, outcome: &'static str, duration: Duration) {
    ::metrics::counter!(
        INVOCATIONS_TOTAL,
        "function" => function.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!(INVOCATION_DURATION_SECONDS, "function" => function.to_string())
        .record(duration.as_secs_f64());
}

pub fn sandbox_created(function: &str) {
    ::metrics::counter!(SANDBOXES_CREATED_TOTAL, "function" => function.to_string()).increment(1);
}

pub fn sandbox_destroyed(function: &str, reason: &'static str) {
    ::metrics::counter!(
        SANDBOXES_DESTROYED_TOTAL,
        "function" => function.to_string(),
        "reason" => reason
    )
    .increment(1);
}
