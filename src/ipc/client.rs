//! Client side of the helper protocol, used by the UI process.
//!
//! Requests on one connection are strictly sequential, so each call sends a
//! frame and waits for the matching reply.

use interprocess::local_socket::tokio::{prelude::*, Stream};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use super::auth::SharedSecret;
use super::framing::FramedTransport;
use super::protocol::{
    AuthAccepted, AuthenticateRequest, ErrorCode, ErrorReply, Message, MessageCodec, ProtocolError,
    RequestId, StatsRequest,
};
use crate::executor::ConnectionCounters;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Helper unreachable at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Helper closed the connection")]
    Closed,

    #[error("Helper rejected request ({code}): {message}")]
    Rejected { code: u16, message: String },

    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("Invalid result payload: {0}")]
    InvalidPayload(String),
}

impl ClientError {
    /// Known helper error code, if the helper replied with one.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Rejected { code, .. } => ErrorCode::from_code(*code),
            _ => None,
        }
    }

    /// The helper refused our identity or forgot our session.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::AuthenticationRejected) | Some(ErrorCode::UnknownSession)
        )
    }

    /// The helper cannot be reached or dropped the connection.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Closed | Self::Protocol(ProtocolError::Io(_))
        )
    }

    fn from_reply(reply: ErrorReply) -> Self {
        Self::Rejected {
            code: reply.code,
            message: reply.message,
        }
    }
}

/// Helper protocol client over any duplex stream.
pub struct HelperClient<S> {
    transport: FramedTransport<S>,
    next_request: u64,
    session: Option<AuthAccepted>,
}

impl HelperClient<Stream> {
    /// Connect to the helper's local socket.
    pub async fn connect(endpoint: &str, codec: MessageCodec) -> Result<Self, ClientError> {
        let connect_err = |reason: String| ClientError::Connect {
            endpoint: endpoint.to_string(),
            reason,
        };
        let name = endpoint
            .to_fs_name::<GenericFilePath>()
            .map_err(|e| connect_err(e.to_string()))?;
        let stream = Stream::connect(name)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        Ok(Self::new(stream, codec))
    }
}

impl<S> HelperClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, codec: MessageCodec) -> Self {
        Self {
            transport: FramedTransport::new(stream, codec),
            next_request: 1,
            session: None,
        }
    }

    /// Session granted by the last successful authenticate.
    pub fn session(&self) -> Option<&AuthAccepted> {
        self.session.as_ref()
    }

    /// Give up the session bookkeeping and return the raw transport.
    pub fn into_transport(self) -> FramedTransport<S> {
        self.transport
    }

    /// Authenticate with the launch secret using the current wall clock.
    pub async fn authenticate(
        &mut self,
        identity: &str,
        secret: &SharedSecret,
    ) -> Result<AuthAccepted, ClientError> {
        let timestamp = chrono::Utc::now().timestamp();
        self.send_authenticate(AuthenticateRequest {
            identity: identity.to_string(),
            timestamp,
            proof: secret.sign(identity, timestamp),
        })
        .await
    }

    /// Send a prepared authenticate message.
    pub async fn send_authenticate(
        &mut self,
        request: AuthenticateRequest,
    ) -> Result<AuthAccepted, ClientError> {
        match self.round_trip(Message::Authenticate(request)).await? {
            Message::AuthAccepted(accepted) => {
                self.session = Some(accepted.clone());
                Ok(accepted)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Issue a connection-stats request with an opaque payload.
    pub async fn connection_stats(&mut self, payload: Vec<u8>) -> Result<Vec<u8>, ClientError> {
        let request_id = RequestId(self.next_request);
        self.next_request += 1;

        let reply = self
            .round_trip(Message::ConnectionStatsRequest(StatsRequest {
                request_id,
                payload,
            }))
            .await?;
        match reply {
            Message::ConnectionStatsResponse(response) if response.request_id == request_id => {
                Ok(response.payload)
            }
            other => Err(unexpected(&other)),
        }
    }

    /// Fetch interface counters from the default executor. An empty
    /// `interface` returns all interfaces.
    pub async fn interface_counters(
        &mut self,
        interface: &str,
    ) -> Result<ConnectionCounters, ClientError> {
        let payload = self.connection_stats(interface.as_bytes().to_vec()).await?;
        ConnectionCounters::decode(&payload)
            .map_err(|e| ClientError::InvalidPayload(e.to_string()))
    }

    pub async fn heartbeat(&mut self) -> Result<(), ClientError> {
        match self.round_trip(Message::Heartbeat).await? {
            Message::Heartbeat => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// End the session. The helper acknowledges, then closes the connection.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        match self.round_trip(Message::Shutdown).await? {
            Message::Shutdown => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Send one message and read one reply. Error replies become
    /// `ClientError::Rejected`.
    pub async fn round_trip(&mut self, message: Message) -> Result<Message, ClientError> {
        self.transport.send_message(&message).await?;
        match self.transport.receive_message().await? {
            Some(Message::Error(reply)) => {
                if reply.kind() == Some(ErrorCode::UnknownSession) {
                    self.session = None;
                }
                Err(ClientError::from_reply(reply))
            }
            Some(reply) => Ok(reply),
            None => Err(ClientError::Closed),
        }
    }
}

fn unexpected(message: &Message) -> ClientError {
    ClientError::UnexpectedReply(message.message_type().as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let rejected = ClientError::Rejected {
            code: ErrorCode::AuthenticationRejected.code(),
            message: "no".into(),
        };
        assert!(rejected.is_unauthorized());
        assert!(!rejected.is_unavailable());

        let limited = ClientError::Rejected {
            code: ErrorCode::RateLimitExceeded.code(),
            message: "slow down".into(),
        };
        assert!(!limited.is_unauthorized());
        assert_eq!(limited.code(), Some(ErrorCode::RateLimitExceeded));

        assert!(ClientError::Closed.is_unavailable());
        let future = ClientError::Rejected {
            code: 500,
            message: String::new(),
        };
        assert_eq!(future.code(), None);
    }

    #[tokio::test]
    async fn test_closed_without_reply() {
        let (client, server) = tokio::io::duplex(1024);
        let mut client = HelperClient::new(client, MessageCodec::default());
        let peer = tokio::spawn(async move {
            let mut transport = FramedTransport::new(server, MessageCodec::default());
            let _ = transport.receive().await;
        });
        let result = client.heartbeat().await;
        assert!(matches!(result, Err(ClientError::Closed)));
        peer.await.unwrap();
    }
}
