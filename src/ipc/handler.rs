//! Per-connection message handling.
//!
//! Each connection starts in `AwaitingAuth`. The only message accepted there
//! is `Authenticate`; anything else closes the connection. Once a session is
//! open, every message passes the per-session rate limiter and refreshes the
//! session before it is serviced.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthError, Authenticator};
use super::protocol::{
    AuthAccepted, AuthenticateRequest, ErrorCode, Message, ProtocolError, RequestId, StatsRequest,
    StatsResponse,
};
use super::rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
use super::sessions::{CloseReason, SessionError, SessionId, SessionManager};
use crate::executor::{ExecutorError, PrivilegedExecutor};
use crate::telemetry::{self, SecurityEvent};

#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Authentication rejected: {0}")]
    Auth(#[from] AuthError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("{0}")]
    RateLimited(#[from] RateLimitError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
}

impl HandlerError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Protocol(e) => e.code(),
            Self::Auth(_) => ErrorCode::AuthenticationRejected,
            Self::Session(SessionError::TooManySessions { .. }) => ErrorCode::TooManySessions,
            Self::Session(SessionError::UnknownSession) => ErrorCode::UnknownSession,
            Self::RateLimited(_) => ErrorCode::RateLimitExceeded,
            Self::Executor(_) => ErrorCode::OperationError,
            Self::Timeout(_) => ErrorCode::OperationTimeout,
            Self::ProtocolViolation(_) => ErrorCode::ProtocolViolation,
        }
    }
}

/// Configuration for the IPC handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcHandlerConfig {
    pub max_requests_per_second: u32,
    /// Per-request bound on the executor.
    pub request_timeout: Duration,
    /// Rejected authenticate attempts tolerated on one connection.
    pub max_auth_failures_per_connection: u32,
}

impl Default for IpcHandlerConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 100,
            request_timeout: Duration::from_secs(10),
            max_auth_failures_per_connection: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingAuth { failures: u32 },
    Active(SessionId),
}

/// Protocol state of one connection.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::AwaitingAuth { failures: 0 },
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match &self.state {
            ConnectionState::Active(id) => Some(id),
            ConnectionState::AwaitingAuth { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

/// What the connection worker should do with one handled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub reply: Option<Message>,
    pub disposition: Disposition,
}

impl Outcome {
    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            disposition: Disposition::Continue,
        }
    }

    fn close_with(message: Message) -> Self {
        Self {
            reply: Some(message),
            disposition: Disposition::Close,
        }
    }

    fn error(err: &HandlerError, request_id: Option<RequestId>, disposition: Disposition) -> Self {
        Self {
            reply: Some(Message::error(err.code(), request_id, err.to_string())),
            disposition,
        }
    }
}

/// Handles IPC messages with authentication, sessions and rate limiting.
pub struct IpcHandler {
    authenticator: Arc<Authenticator>,
    sessions: Arc<SessionManager>,
    request_limiter: RateLimiter<SessionId>,
    executor: Arc<dyn PrivilegedExecutor>,
    config: IpcHandlerConfig,
}

impl IpcHandler {
    pub fn new(
        authenticator: Arc<Authenticator>,
        sessions: Arc<SessionManager>,
        executor: Arc<dyn PrivilegedExecutor>,
        config: IpcHandlerConfig,
    ) -> Self {
        Self {
            authenticator,
            sessions,
            request_limiter: RateLimiter::new(RateLimitConfig::per_second(
                config.max_requests_per_second,
            )),
            executor,
            config,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Process one decoded message for `conn`.
    pub async fn handle(&self, conn: &mut Connection, message: Message) -> Outcome {
        let session_id = match &conn.state {
            ConnectionState::AwaitingAuth { .. } => {
                return match message {
                    Message::Authenticate(request) => self.authenticate(conn, request),
                    other => self.violation(
                        conn,
                        format!("expected authenticate, got {}", other.message_type().as_str()),
                    ),
                };
            }
            ConnectionState::Active(id) => id.clone(),
        };

        match message {
            Message::Shutdown => {
                self.end_session(&session_id, CloseReason::ShutdownRequested);
                conn.state = ConnectionState::AwaitingAuth { failures: 0 };
                Outcome::close_with(Message::Shutdown)
            }
            Message::Heartbeat => match self.admit(conn, &session_id) {
                Ok(()) => Outcome::reply(Message::Heartbeat),
                Err(e) => self.admission_failure(&e, None),
            },
            Message::ConnectionStatsRequest(request) => {
                self.connection_stats(conn, &session_id, request).await
            }
            other => self.violation(
                conn,
                format!(
                    "unexpected {} on an authenticated connection",
                    other.message_type().as_str()
                ),
            ),
        }
    }

    /// Release the connection's session after the transport closed.
    pub fn disconnect(&self, conn: &Connection) {
        if let Some(id) = conn.session_id() {
            self.end_session(id, CloseReason::TransportClosed);
        }
    }

    /// Reply for a frame that failed to decode. The connection always closes.
    pub fn protocol_failure(&self, conn: &mut Connection, err: ProtocolError) -> Outcome {
        telemetry::record_protocol_violation(err.as_str());
        telemetry::log_security_event(
            SecurityEvent::ProtocolViolation,
            "Undecodable frame from helper client",
            &[("error", &err.to_string())],
        );
        if let Some(id) = conn.session_id().cloned() {
            self.end_session(&id, CloseReason::Revoked);
        }
        conn.state = ConnectionState::AwaitingAuth { failures: 0 };
        let err = HandlerError::from(err);
        Outcome::error(&err, None, Disposition::Close)
    }

    /// Periodic sweep of sessions, limiter windows and attempt records.
    pub fn spawn_maintenance(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.sessions.config().sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => self.sweep(),
                }
            }
        })
    }

    /// One maintenance pass.
    pub fn sweep(&self) {
        for id in self.sessions.sweep() {
            self.request_limiter.remove(&id);
        }
        self.request_limiter.prune();
        self.authenticator.prune();
    }

    fn authenticate(&self, conn: &mut Connection, request: AuthenticateRequest) -> Outcome {
        let verdict = self
            .authenticator
            .verify(&request.identity, request.timestamp, &request.proof);

        let principal = match verdict {
            Ok(principal) => principal,
            Err(e) => {
                let failures = match &mut conn.state {
                    ConnectionState::AwaitingAuth { failures } => {
                        *failures += 1;
                        *failures
                    }
                    ConnectionState::Active(_) => 0,
                };
                let close = matches!(e, AuthError::LockedOut { .. })
                    || failures >= self.config.max_auth_failures_per_connection;
                let disposition = if close { Disposition::Close } else { Disposition::Continue };
                return Outcome::error(&HandlerError::Auth(e), None, disposition);
            }
        };

        match self.sessions.open(principal) {
            Ok(session) => {
                let expires_in_secs = self.sessions.config().max_duration.as_secs();
                conn.state = ConnectionState::Active(session.id.clone());
                Outcome::reply(Message::AuthAccepted(AuthAccepted {
                    session_id: session.id.to_string(),
                    expires_in_secs,
                }))
            }
            Err(e) => Outcome::error(&HandlerError::Session(e), None, Disposition::Continue),
        }
    }

    async fn connection_stats(
        &self,
        conn: &mut Connection,
        session_id: &SessionId,
        request: StatsRequest,
    ) -> Outcome {
        let request_id = request.request_id;
        if let Err(e) = self.admit(conn, session_id) {
            return self.admission_failure(&e, Some(request_id));
        }
        let Some(session) = self.sessions.get(session_id) else {
            conn.state = ConnectionState::AwaitingAuth { failures: 0 };
            let err = HandlerError::Session(SessionError::UnknownSession);
            return Outcome::error(&err, Some(request_id), Disposition::Continue);
        };

        let timeout = self.config.request_timeout;
        let result = tokio::time::timeout(
            timeout,
            self.executor.execute(&session.principal, &request.payload),
        )
        .await;

        match result {
            Ok(Ok(payload)) => {
                telemetry::record_request("ok");
                Outcome::reply(Message::ConnectionStatsResponse(StatsResponse {
                    request_id,
                    payload,
                }))
            }
            Ok(Err(e @ ExecutorError::Untrusted(_))) => {
                telemetry::record_request("untrusted");
                telemetry::log_security_event(
                    SecurityEvent::OperationFailed,
                    "Executor withdrew trust from session",
                    &[("session", session_id.as_str()), ("error", &e.to_string())],
                );
                self.end_session(session_id, CloseReason::Revoked);
                conn.state = ConnectionState::AwaitingAuth { failures: 0 };
                Outcome::error(&HandlerError::Executor(e), Some(request_id), Disposition::Close)
            }
            Ok(Err(e)) => {
                telemetry::record_request("error");
                tracing::warn!(session = %session_id, error = %e, "Privileged operation failed");
                Outcome::error(&HandlerError::Executor(e), Some(request_id), Disposition::Continue)
            }
            Err(_) => {
                telemetry::record_request("timeout");
                telemetry::log_security_event(
                    SecurityEvent::OperationFailed,
                    "Privileged operation timed out",
                    &[("session", session_id.as_str())],
                );
                Outcome::error(
                    &HandlerError::Timeout(timeout),
                    Some(request_id),
                    Disposition::Continue,
                )
            }
        }
    }

    /// Rate-limit then refresh the session. A missing session drops the
    /// connection back to `AwaitingAuth` so the client can re-authenticate.
    fn admit(&self, conn: &mut Connection, session_id: &SessionId) -> Result<(), HandlerError> {
        if let Err(e) = self.request_limiter.check(session_id.clone()) {
            telemetry::record_rate_limited("request");
            telemetry::log_security_event(
                SecurityEvent::RateLimited,
                "Session request rate exceeded",
                &[("session", session_id.as_str())],
            );
            return Err(e.into());
        }
        if let Err(e) = self.sessions.touch(session_id) {
            self.request_limiter.remove(session_id);
            conn.state = ConnectionState::AwaitingAuth { failures: 0 };
            telemetry::log_security_event(
                SecurityEvent::InvalidSession,
                "Request on a closed session",
                &[("session", session_id.as_str())],
            );
            return Err(e.into());
        }
        Ok(())
    }

    fn admission_failure(&self, err: &HandlerError, request_id: Option<RequestId>) -> Outcome {
        Outcome::error(err, request_id, Disposition::Continue)
    }

    fn violation(&self, conn: &mut Connection, detail: String) -> Outcome {
        telemetry::record_protocol_violation("unexpected_message");
        telemetry::log_security_event(
            SecurityEvent::ProtocolViolation,
            "Protocol violation from helper client",
            &[("detail", detail.as_str())],
        );
        if let Some(id) = conn.session_id().cloned() {
            self.end_session(&id, CloseReason::Revoked);
        }
        conn.state = ConnectionState::AwaitingAuth { failures: 0 };
        Outcome::error(&HandlerError::ProtocolViolation(detail), None, Disposition::Close)
    }

    fn end_session(&self, id: &SessionId, reason: CloseReason) {
        self.sessions.close(id, reason);
        self.request_limiter.remove(id);
    }
}
