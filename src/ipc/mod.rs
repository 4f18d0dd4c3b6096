//! IPC layer between the UI process and the elevated helper.
//!
//! Local sockets only (named pipe on Windows, Unix domain socket elsewhere).
//! Every connection must authenticate before any privileged request is
//! serviced.

mod auth;
pub mod client;
mod framing;
mod handler;
mod protocol;
mod rate_limit;
pub mod server;
mod sessions;

pub use auth::{
    AuthConfig, AuthError, Authenticator, CredentialVerifier, Principal, SharedSecret,
    MAX_IDENTITY_LEN, MIN_SECRET_LEN,
};
pub use client::{ClientError, HelperClient};
pub use framing::FramedTransport;
pub use handler::{
    Connection, ConnectionState, Disposition, HandlerError, IpcHandler, IpcHandlerConfig, Outcome,
};
pub use protocol::{
    AuthAccepted, AuthenticateRequest, ErrorCode, ErrorReply, Message, MessageCodec, MessageType,
    ProtocolError, RequestId, StatsRequest, StatsResponse, DEFAULT_MAX_MESSAGE_SIZE,
    FRAME_HEADER_LEN,
};
pub use rate_limit::{RateLimitConfig, RateLimitError, RateLimiter};
pub use server::{IpcServerConfig, ServerError, DEFAULT_ENDPOINT};
pub use sessions::{
    CloseReason, Session, SessionConfig, SessionError, SessionId, SessionManager, SessionState,
};

use std::time::Duration;

use tokio::time::Instant;

/// Stand-in for "never" when a configured duration overflows the clock.
const FAR_FUTURE: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// `now + after`, saturating instead of panicking on overflow.
pub(crate) fn deadline_after(now: Instant, after: Duration) -> Instant {
    now.checked_add(after)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}
