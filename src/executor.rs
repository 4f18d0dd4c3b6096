//! Privileged operations performed on behalf of authenticated sessions.
//!
//! The IPC layer treats request and result payloads as opaque bytes. The
//! default executor answers with per-interface byte counters, encoded as
//! [`ConnectionCounters`] so the UI side can decode them with the same type.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ipc::Principal;

/// Default counter source on Linux.
pub const PROC_NET_DEV: &str = "/proc/net/dev";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("Operation failed: {0}")]
    Failed(String),

    /// The session should not be trusted with further requests.
    #[error("Session no longer trusted: {0}")]
    Untrusted(String),
}

/// Performs one privileged query. Only ever called for an active,
/// rate-limited session; the caller enforces the per-request timeout.
#[async_trait]
pub trait PrivilegedExecutor: Send + Sync {
    async fn execute(
        &self,
        principal: &Principal,
        request: &[u8],
    ) -> Result<Vec<u8>, ExecutorError>;
}

/// Byte counters for one interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEntry {
    pub name: String,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Result payload of a connection-stats request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCounters {
    /// Unix seconds when the counters were read.
    pub captured_at: i64,
    pub entries: Vec<CounterEntry>,
}

impl ConnectionCounters {
    pub fn encode(&self) -> Result<Vec<u8>, ExecutorError> {
        bincode::serialize(self).map_err(|e| ExecutorError::Failed(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ExecutorError> {
        bincode::deserialize(bytes).map_err(|e| ExecutorError::Failed(e.to_string()))
    }

    pub fn total_rx(&self) -> u64 {
        self.entries.iter().map(|e| e.rx_bytes).sum()
    }

    pub fn total_tx(&self) -> u64 {
        self.entries.iter().map(|e| e.tx_bytes).sum()
    }
}

/// Reads interface counters from a `/proc/net/dev`-format file.
///
/// An empty request returns every interface; otherwise the request is a
/// UTF-8 interface name to filter on.
#[derive(Debug, Clone)]
pub struct InterfaceCountersExecutor {
    source: PathBuf,
}

impl Default for InterfaceCountersExecutor {
    fn default() -> Self {
        Self::new(PROC_NET_DEV)
    }
}

impl InterfaceCountersExecutor {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl PrivilegedExecutor for InterfaceCountersExecutor {
    async fn execute(
        &self,
        principal: &Principal,
        request: &[u8],
    ) -> Result<Vec<u8>, ExecutorError> {
        let filter = std::str::from_utf8(request)
            .map_err(|_| ExecutorError::Failed("interface filter is not UTF-8".into()))?
            .trim();

        let text = tokio::fs::read_to_string(&self.source).await.map_err(|e| {
            ExecutorError::Failed(format!("cannot read {}: {}", self.source.display(), e))
        })?;

        let mut entries = parse_proc_net_dev(&text)?;
        if !filter.is_empty() {
            entries.retain(|e| e.name == filter);
        }
        tracing::debug!(
            principal = %principal,
            interfaces = entries.len(),
            "Read interface counters"
        );

        ConnectionCounters {
            captured_at: chrono::Utc::now().timestamp(),
            entries,
        }
        .encode()
    }
}

/// Parse `/proc/net/dev`. Receive bytes are the first column after the
/// colon, transmit bytes the ninth.
pub fn parse_proc_net_dev(text: &str) -> Result<Vec<CounterEntry>, ExecutorError> {
    let mut entries = Vec::new();
    for line in text.lines().skip(2) {
        let Some((name, counters)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<&str> = counters.split_whitespace().collect();
        if fields.len() < 9 {
            return Err(ExecutorError::Failed(format!("short counter line for {}", name.trim())));
        }
        let parse = |s: &str| {
            s.parse::<u64>()
                .map_err(|e| ExecutorError::Failed(format!("bad counter {:?}: {}", s, e)))
        };
        entries.push(CounterEntry {
            name: name.trim().to_string(),
            rx_bytes: parse(fields[0])?,
            tx_bytes: parse(fields[8])?,
        });
    }
    Ok(entries)
}
