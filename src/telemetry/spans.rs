//! Span utilities for helper connections.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{info_span, Span};

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Span covering one accepted connection.
///
/// Fields:
/// - `connection`: process-local sequence number
/// - `status`: filled in by `SpanExt::record_result`
/// - `error.message`: filled in on error
pub struct ConnectionSpan {
    id: u64,
    span: Span,
}

impl ConnectionSpan {
    pub fn new() -> Self {
        let id = NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            "helper_connection",
            connection = id,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        );
        Self { id, span }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn into_span(self) -> Span {
        self.span
    }
}

impl Default for ConnectionSpan {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ids_increase() {
        let a = ConnectionSpan::new();
        let b = ConnectionSpan::new();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_record_result_without_subscriber() {
        let span = ConnectionSpan::new().into_span();
        span.record_result::<(), _>(&Err("boom"));
        span.record_result::<_, String>(&Ok(()));
    }
}
