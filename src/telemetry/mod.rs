//! Telemetry for the helper.
//!
//! Structured logging, security audit events and metrics. Output goes to
//! stderr or a local file; the helper opens no network listeners.

mod logging;
mod metrics;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    record_auth_failure, record_protocol_violation, record_rate_limited, record_request,
    record_session_closed, record_session_opened,
};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{ConnectionSpan, SpanExt};
