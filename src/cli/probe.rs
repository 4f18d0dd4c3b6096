//! Probe and stats subcommands: talk to a running helper as the UI would.

use std::time::Duration;

use interprocess::local_socket::tokio::Stream;
use thiserror::Error;

use crate::cli::{EXIT_CONFIG, EXIT_CONNECTION, EXIT_FAILURE, EXIT_SUCCESS};
use crate::config::EnvConfig;
use crate::executor::ConnectionCounters;
use crate::ipc::{AuthError, ClientError, HelperClient, MessageCodec};

/// Bound on each probe step.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("NETMON_HELPER_SECRET is not set")]
    MissingSecret,

    #[error("Invalid NETMON_HELPER_SECRET: {0}")]
    InvalidSecret(#[from] AuthError),

    #[error("{0}")]
    Client(#[from] ClientError),

    #[error("Helper did not answer within {0:?}")]
    Timeout(Duration),
}

impl ProbeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingSecret | Self::InvalidSecret(_) => EXIT_CONFIG,
            Self::Client(e) if e.is_unavailable() => EXIT_CONNECTION,
            Self::Timeout(_) => EXIT_CONNECTION,
            Self::Client(_) => EXIT_FAILURE,
        }
    }
}

async fn bounded<T, F>(future: F) -> Result<T, ProbeError>
where
    F: std::future::Future<Output = Result<T, ClientError>>,
{
    tokio::time::timeout(PROBE_TIMEOUT, future)
        .await
        .map_err(|_| ProbeError::Timeout(PROBE_TIMEOUT))?
        .map_err(ProbeError::from)
}

async fn open_session(cfg: &EnvConfig) -> Result<HelperClient<Stream>, ProbeError> {
    let secret = cfg.shared_secret().ok_or(ProbeError::MissingSecret)??;
    let codec = MessageCodec::new(cfg.ipc_server.max_message_size);
    let mut client = bounded(HelperClient::connect(&cfg.endpoint, codec)).await?;
    bounded(client.authenticate(&cfg.identity, &secret)).await?;
    Ok(client)
}

async fn probe(cfg: &EnvConfig) -> Result<(), ProbeError> {
    let mut client = open_session(cfg).await?;
    bounded(client.heartbeat()).await?;
    bounded(client.shutdown()).await
}

/// Authenticate and heartbeat. Exit 0 healthy, 1 refused, 2 config, 3 unreachable.
pub async fn run_probe(cfg: &EnvConfig) -> i32 {
    match probe(cfg).await {
        Ok(()) => {
            println!("Helper at {} is healthy.", cfg.endpoint);
            EXIT_SUCCESS
        }
        Err(e) => {
            eprintln!("Probe failed: {}", e);
            e.exit_code()
        }
    }
}

async fn stats(cfg: &EnvConfig, interface: &str) -> Result<ConnectionCounters, ProbeError> {
    let mut client = open_session(cfg).await?;
    let counters = bounded(client.interface_counters(interface)).await?;
    bounded(client.shutdown()).await?;
    Ok(counters)
}

/// Fetch and print interface counters.
pub async fn run_stats(cfg: &EnvConfig, interface: &str, json: bool) -> i32 {
    let counters = match stats(cfg, interface).await {
        Ok(counters) => counters,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    if json {
        match serde_json::to_string_pretty(&counters) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Failed to render counters: {}", e);
                return EXIT_FAILURE;
            }
        }
    } else {
        print_counters(&counters);
    }
    EXIT_SUCCESS
}

/// Format and print counters to stdout.
pub fn print_counters(counters: &ConnectionCounters) {
    if counters.entries.is_empty() {
        println!("No interfaces reported.");
        return;
    }

    println!("{:<16} {:>18} {:>18}", "INTERFACE", "RX BYTES", "TX BYTES");
    println!("{}", "-".repeat(54));
    for entry in &counters.entries {
        println!("{:<16} {:>18} {:>18}", entry.name, entry.rx_bytes, entry.tx_bytes);
    }
    println!("{}", "-".repeat(54));
    println!("{:<16} {:>18} {:>18}", "TOTAL", counters.total_rx(), counters.total_tx());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CounterEntry;
    use crate::ipc::ErrorCode;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ProbeError::MissingSecret.exit_code(), EXIT_CONFIG);
        assert_eq!(ProbeError::Timeout(PROBE_TIMEOUT).exit_code(), EXIT_CONNECTION);
        assert_eq!(ProbeError::Client(ClientError::Closed).exit_code(), EXIT_CONNECTION);
        let refused = ClientError::Rejected {
            code: ErrorCode::AuthenticationRejected.code(),
            message: "bad proof".into(),
        };
        assert_eq!(ProbeError::Client(refused).exit_code(), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_probe_without_secret_is_config_error() {
        let cfg = EnvConfig::default();
        assert_eq!(run_probe(&cfg).await, EXIT_CONFIG);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_unreachable_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EnvConfig {
            endpoint: dir.path().join("absent.sock").to_string_lossy().into_owned(),
            secret: Some("00112233445566778899aabbccddeeff".into()),
            ..EnvConfig::default()
        };
        assert_eq!(run_probe(&cfg).await, EXIT_CONNECTION);
    }

    #[test]
    fn test_print_counters_smoke() {
        print_counters(&ConnectionCounters::default());
        print_counters(&ConnectionCounters {
            captured_at: 0,
            entries: vec![CounterEntry {
                name: "eth0".into(),
                rx_bytes: 1,
                tx_bytes: 2,
            }],
        });
    }
}
