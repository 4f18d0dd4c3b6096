//! Session table with concurrency, duration and idle limits.
//!
//! A session exists only between a successful authenticate and its
//! termination. The absolute expiry is fixed at creation and never renewed
//! by activity, so even a well-behaved client has to re-authenticate
//! periodically.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use tokio::time::Instant;

use super::auth::Principal;
use crate::telemetry::{self, SecurityEvent};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Too many sessions (max {max})")]
    TooManySessions { max: usize },

    #[error("Session not found")]
    UnknownSession,
}

/// Opaque server-generated session identifier (64 hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created by a successful authenticate, nothing serviced yet.
    Authenticated,
    /// At least one heartbeat or request serviced.
    Active,
}

/// Why a session left the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Expired,
    ShutdownRequested,
    TransportClosed,
    /// The helper withdrew trust (protocol violation or executor verdict).
    Revoked,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::ShutdownRequested => "shutdown_requested",
            Self::TransportClosed => "transport_closed",
            Self::Revoked => "revoked",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub principal: Principal,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub expires_at: Instant,
    pub state: SessionState,
}

impl Session {
    /// Time left before the absolute expiry.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Configuration for the session table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Absolute cap from creation, not renewable.
    pub max_duration: Duration,
    /// Close a session when no heartbeat or request arrived for this long.
    pub idle_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            max_duration: Duration::from_secs(8 * 60 * 60),
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Owns the live session table.
pub struct SessionManager {
    sessions: DashMap<SessionId, Session>,
    live: AtomicUsize,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            live: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Create a session for an authenticated principal.
    pub fn open(&self, principal: Principal) -> Result<Session, SessionError> {
        self.reserve_slot()?;

        let now = Instant::now();
        let session = Session {
            id: SessionId::generate(),
            principal,
            created_at: now,
            last_activity: now,
            expires_at: super::deadline_after(now, self.config.max_duration),
            state: SessionState::Authenticated,
        };
        self.sessions.insert(session.id.clone(), session.clone());

        telemetry::record_session_opened(self.live_count());
        telemetry::log_security_event(
            SecurityEvent::SessionCreated,
            "Helper session opened",
            &[("principal", session.principal.as_str())],
        );
        Ok(session)
    }

    // CAS so concurrent opens never overshoot the limit
    fn reserve_slot(&self) -> Result<(), SessionError> {
        loop {
            let current = self.live.load(Ordering::Acquire);
            if current >= self.config.max_sessions {
                crate::security_log!(
                    SecurityEvent::SessionLimitReached,
                    "Session limit reached",
                    "max" => &self.config.max_sessions.to_string()
                );
                return Err(SessionError::TooManySessions {
                    max: self.config.max_sessions,
                });
            }
            if self
                .live
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    /// Record activity on a session and mark it active.
    ///
    /// A session past its absolute expiry is closed here even if the sweep
    /// has not reached it yet.
    pub fn touch(&self, id: &SessionId) -> Result<Session, SessionError> {
        let now = Instant::now();
        {
            let mut entry = self.sessions.get_mut(id).ok_or(SessionError::UnknownSession)?;
            if now < entry.expires_at {
                entry.last_activity = now;
                entry.state = SessionState::Active;
                return Ok(entry.clone());
            }
        }
        self.close(id, CloseReason::Expired);
        Err(SessionError::UnknownSession)
    }

    /// Remove a session. Closing an absent session is a no-op.
    pub fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some((_, session)) = self.sessions.remove(id) else {
            return false;
        };
        self.live.fetch_sub(1, Ordering::AcqRel);
        telemetry::record_session_closed(reason.as_str(), self.live_count());

        let event = match reason {
            CloseReason::Expired => SecurityEvent::SessionExpired,
            _ => SecurityEvent::SessionClosed,
        };
        telemetry::log_security_event(
            event,
            "Helper session closed",
            &[("principal", session.principal.as_str()), ("reason", reason.as_str())],
        );
        true
    }

    /// Close every session past its absolute expiry or idle window.
    pub fn sweep(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let stale: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|s| {
                now >= s.expires_at
                    || now.duration_since(s.last_activity) > self.config.idle_timeout
            })
            .map(|s| s.id.clone())
            .collect();

        stale
            .into_iter()
            .filter(|id| self.close(id, CloseReason::Expired))
            .collect()
    }

    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn max_sessions(&self) -> usize {
        self.config.max_sessions
    }
}
