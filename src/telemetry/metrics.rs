//! Metrics emitted through the `metrics` facade.
//!
//! Nothing is exported unless the embedding process installs a recorder.

use metrics::{counter, gauge};

pub fn record_auth_failure(reason: &str) {
    counter!("helper_auth_failures_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_session_opened(active: usize) {
    counter!("helper_sessions_opened_total").increment(1);
    gauge!("helper_sessions_active").set(active as f64);
}

pub fn record_session_closed(reason: &str, active: usize) {
    counter!("helper_sessions_closed_total", "reason" => reason.to_string()).increment(1);
    gauge!("helper_sessions_active").set(active as f64);
}

pub fn record_rate_limited(scope: &str) {
    counter!("helper_rate_limited_total", "scope" => scope.to_string()).increment(1);
}

pub fn record_protocol_violation(kind: &str) {
    counter!("helper_protocol_violations_total", "kind" => kind.to_string()).increment(1);
}

/// Count one executor call by outcome (`ok`, `error`, `timeout`, `untrusted`).
pub fn record_request(outcome: &str) {
    counter!("helper_requests_total", "outcome" => outcome.to_string()).increment(1);
}
