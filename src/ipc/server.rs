//! Local-socket accept loop and per-connection worker.
//!
//! One tokio task per accepted connection. Frames on a connection are handled
//! strictly in order; a worker ends when the peer closes, the handler asks
//! for a close, or the helper shuts down.

use std::sync::Arc;

use interprocess::local_socket::tokio::prelude::*;
use interprocess::local_socket::{GenericFilePath, ListenerOptions, ToFsName};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::framing::FramedTransport;
use super::handler::{Connection, Disposition, IpcHandler};
use super::protocol::{MessageCodec, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::{ConnectionSpan, SpanExt};

/// Default helper endpoint.
#[cfg(windows)]
pub const DEFAULT_ENDPOINT: &str = r"\\.\pipe\netmon-helper";

#[cfg(not(windows))]
pub const DEFAULT_ENDPOINT: &str = "/var/run/netmon-helper.sock";

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IPC transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

/// Configuration for the IPC server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcServerConfig {
    pub max_message_size: usize,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Accept connections on `endpoint` until `shutdown_rx` flips to `true` or
/// the coordinator begins draining.
pub async fn run_server(
    endpoint: String,
    handler: Arc<IpcHandler>,
    mut shutdown_rx: watch::Receiver<bool>,
    shutdown: Arc<ShutdownCoordinator>,
    config: IpcServerConfig,
) -> Result<(), ServerError> {
    prepare_endpoint(&endpoint)?;

    let name = endpoint
        .as_str()
        .to_fs_name::<GenericFilePath>()
        .map_err(|e| ServerError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
    let listener = ListenerOptions::new().name(name).create_tokio()?;
    restrict_endpoint(&endpoint)?;

    let codec = MessageCodec::new(config.max_message_size);
    let cancel = shutdown.token();
    tracing::info!(
        endpoint = %endpoint,
        max_message_size = config.max_message_size,
        "Helper listening"
    );

    loop {
        let stream = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    continue;
                }
            },
        };

        let Some(guard) = shutdown.track() else {
            break;
        };
        let span = ConnectionSpan::new();
        let handler = Arc::clone(&handler);
        let cancel = cancel.clone();
        tokio::spawn(
            async move {
                let _guard = guard;
                serve_connection(stream, handler, codec, cancel).await;
            }
            .instrument(span.into_span()),
        );
    }

    tracing::info!("Helper stopped accepting connections");
    drop(listener);
    cleanup_endpoint(&endpoint);
    Ok(())
}

/// Drive one connection until it closes. Generic over the stream so tests
/// can run it on an in-memory duplex.
pub async fn serve_connection<S>(
    stream: S,
    handler: Arc<IpcHandler>,
    codec: MessageCodec,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut transport = FramedTransport::new(stream, codec);
    let mut conn = Connection::new();
    let mut ended: Result<(), ProtocolError> = Ok(());
    tracing::debug!("Connection opened");

    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = transport.receive() => received,
        };

        let outcome = match received {
            Ok(Some(body)) => match codec.decode(&body) {
                Ok(message) => {
                    // Shutdown also abandons a request still in the executor
                    let handled = tokio::select! {
                        outcome = handler.handle(&mut conn, message) => Some(outcome),
                        _ = cancel.cancelled() => None,
                    };
                    match handled {
                        Some(outcome) => outcome,
                        None => {
                            tracing::debug!("Request abandoned for helper shutdown");
                            break;
                        }
                    }
                }
                Err(e) => handler.protocol_failure(&mut conn, e),
            },
            Ok(None) => break,
            Err(ProtocolError::Io(e)) => {
                tracing::debug!(error = %e, "Connection transport error");
                ended = Err(ProtocolError::Io(e));
                break;
            }
            Err(e) => handler.protocol_failure(&mut conn, e),
        };

        if let Some(reply) = &outcome.reply {
            if let Err(e) = transport.send_message(reply).await {
                tracing::debug!(error = %e, "Failed to send reply");
                ended = Err(e);
                break;
            }
        }
        if outcome.disposition == Disposition::Close {
            break;
        }
    }

    handler.disconnect(&conn);
    tracing::Span::current().record_result(&ended);
    tracing::debug!("Connection closed");
}

#[cfg(unix)]
fn prepare_endpoint(endpoint: &str) -> Result<(), ServerError> {
    use std::os::unix::fs::FileTypeExt;
    use std::path::Path;

    let path = Path::new(endpoint);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            // Only a refused connect proves nobody owns the socket
            match std::os::unix::net::UnixStream::connect(path) {
                Ok(_) => Err(ServerError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: "helper already running".into(),
                }),
                Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    std::fs::remove_file(path)?;
                    tracing::debug!(path = %path.display(), "Removed stale socket file");
                    Ok(())
                }
                Err(e) => Err(ServerError::InvalidEndpoint {
                    endpoint: endpoint.to_string(),
                    reason: format!("existing socket could not be checked: {}", e),
                }),
            }
        }
        Ok(_) => Err(ServerError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: "path exists and is not a socket".into(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn prepare_endpoint(_endpoint: &str) -> Result<(), ServerError> {
    Ok(())
}

#[cfg(unix)]
fn restrict_endpoint(endpoint: &str) -> Result<(), ServerError> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(endpoint, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_endpoint(_endpoint: &str) -> Result<(), ServerError> {
    Ok(())
}

#[cfg(unix)]
fn cleanup_endpoint(endpoint: &str) {
    if let Err(e) = std::fs::remove_file(endpoint) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(endpoint, error = %e, "Failed to remove socket file");
        }
    }
}

#[cfg(not(unix))]
fn cleanup_endpoint(_endpoint: &str) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_refuses_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-a-socket");
        std::fs::write(&path, b"x").unwrap();
        let result = prepare_endpoint(path.to_str().unwrap());
        assert!(matches!(result, Err(ServerError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_prepare_replaces_dead_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead.sock");
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

        assert!(prepare_endpoint(path.to_str().unwrap()).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn test_prepare_leaves_live_socket_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("live.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();

        let result = prepare_endpoint(path.to_str().unwrap());
        assert!(matches!(
            result,
            Err(ServerError::InvalidEndpoint { ref reason, .. })
                if reason.contains("already running")
        ));
        assert!(path.exists());
    }

    #[test]
    fn test_prepare_missing_path_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("helper.sock");
        assert!(prepare_endpoint(path.to_str().unwrap()).is_ok());
        assert!(dir.path().join("sub").is_dir());
    }
}
