//! Security audit logging for the helper.
//!
//! SECURITY: Every decision at the privilege boundary (who authenticated, who
//! was refused, which sessions opened and closed) is emitted here as a
//! structured event so it can be audited after the fact.

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Successful authentication.
    AuthSuccess,
    /// Failed authentication attempt.
    AuthFailure,
    /// Identity locked out after repeated failures.
    AuthLockout,
    /// Rate limiting triggered.
    RateLimited,
    SessionCreated,
    SessionExpired,
    /// Session closed by shutdown, transport close or revocation.
    SessionClosed,
    /// Concurrent session limit hit.
    SessionLimitReached,
    /// Request referenced a session that no longer exists.
    InvalidSession,
    /// Message out of order or undecodable.
    ProtocolViolation,
    /// Privileged operation failed or timed out.
    OperationFailed,
}

impl SecurityEvent {
    /// Get the severity level for this event.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::AuthSuccess => SecuritySeverity::Info,
            Self::AuthFailure => SecuritySeverity::Warning,
            Self::AuthLockout => SecuritySeverity::Critical,
            Self::RateLimited => SecuritySeverity::Warning,
            Self::SessionCreated => SecuritySeverity::Info,
            Self::SessionExpired => SecuritySeverity::Info,
            Self::SessionClosed => SecuritySeverity::Debug,
            Self::SessionLimitReached => SecuritySeverity::Warning,
            Self::InvalidSession => SecuritySeverity::Warning,
            Self::ProtocolViolation => SecuritySeverity::Error,
            Self::OperationFailed => SecuritySeverity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure => "auth_failure",
            Self::AuthLockout => "auth_lockout",
            Self::RateLimited => "rate_limited",
            Self::SessionCreated => "session_created",
            Self::SessionExpired => "session_expired",
            Self::SessionClosed => "session_closed",
            Self::SessionLimitReached => "session_limit_reached",
            Self::InvalidSession => "invalid_session",
            Self::ProtocolViolation => "protocol_violation",
            Self::OperationFailed => "operation_failed",
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Render details as `k=v` pairs separated by spaces.
fn render_details(details: &[(&str, &str)]) -> String {
    details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Log a security event with structured data.
///
/// # Example
/// ```
/// use netmon_helper::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::AuthFailure,
///     "Authentication rejected",
///     &[("identity", "netmon-ui"), ("reason", "invalid_proof")]
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let event_type = event.as_str();
    let severity = event.severity();
    let details = render_details(details);

    match severity {
        SecuritySeverity::Debug => {
            tracing::debug!(
                target: "security",
                event = event_type,
                severity = severity.as_str(),
                details = %details,
                "{}",
                message
            )
        }
        SecuritySeverity::Info => {
            tracing::info!(
                target: "security",
                event = event_type,
                severity = severity.as_str(),
                details = %details,
                "{}",
                message
            )
        }
        SecuritySeverity::Warning => {
            tracing::warn!(
                target: "security",
                event = event_type,
                severity = severity.as_str(),
                details = %details,
                "{}",
                message
            )
        }
        SecuritySeverity::Error | SecuritySeverity::Critical => {
            tracing::error!(
                target: "security",
                event = event_type,
                severity = severity.as_str(),
                details = %details,
                "{}",
                message
            )
        }
    }
}

/// Convenience macro for logging security events.
#[macro_export]
macro_rules! security_log {
    ($event:expr, $message:expr) => {
        $crate::telemetry::security_log::log_security_event($event, $message, &[])
    };
    ($event:expr, $message:expr, $($key:expr => $value:expr),+) => {
        $crate::telemetry::security_log::log_security_event(
            $event,
            $message,
            &[$(($key, $value)),+]
        )
    };
}
