//! Wire format and schema for helper IPC messages.
//!
//! A frame body is `[type tag: u8][payload]`. The tag alone selects the
//! payload shape; payloads are bincode-encoded with pinned options so that
//! a UI build and a helper build of different versions agree on the bytes.
//!
//! # Security
//! - Unknown type tags are rejected, never skipped
//! - Size check happens BEFORE parsing to prevent allocation attacks
//! - Trailing payload bytes are tolerated so newer peers can append fields

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum frame size, length prefix included (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Size of the frame length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
}

impl ProtocolError {
    /// Wire error code reported to the peer before the connection closes.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(_) | Self::Malformed(_) => ErrorCode::MalformedMessage,
            Self::MessageTooLarge { .. } => ErrorCode::MessageTooLarge,
            Self::UnknownMessageType(_) => ErrorCode::UnknownMessageType,
        }
    }

    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Malformed(_) => "malformed",
            Self::UnknownMessageType(_) => "unknown_message_type",
        }
    }
}

/// Closed set of message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Authenticate = 0x01,
    AuthAccepted = 0x02,
    ConnectionStatsRequest = 0x03,
    ConnectionStatsResponse = 0x04,
    Heartbeat = 0x05,
    Shutdown = 0x06,
    Error = 0x07,
}

impl MessageType {
    pub fn from_tag(tag: u8) -> Result<Self, ProtocolError> {
        match tag {
            0x01 => Ok(Self::Authenticate),
            0x02 => Ok(Self::AuthAccepted),
            0x03 => Ok(Self::ConnectionStatsRequest),
            0x04 => Ok(Self::ConnectionStatsResponse),
            0x05 => Ok(Self::Heartbeat),
            0x06 => Ok(Self::Shutdown),
            0x07 => Ok(Self::Error),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => "authenticate",
            Self::AuthAccepted => "auth_accepted",
            Self::ConnectionStatsRequest => "connection_stats_request",
            Self::ConnectionStatsResponse => "connection_stats_response",
            Self::Heartbeat => "heartbeat",
            Self::Shutdown => "shutdown",
            Self::Error => "error",
        }
    }
}

/// Error codes carried by [`ErrorReply`]. Numeric on the wire so a peer can
/// still read a code it does not name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MalformedMessage,
    UnknownMessageType,
    MessageTooLarge,
    AuthenticationRejected,
    TooManySessions,
    UnknownSession,
    RateLimitExceeded,
    OperationError,
    OperationTimeout,
    ProtocolViolation,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            Self::MalformedMessage => 1,
            Self::UnknownMessageType => 2,
            Self::MessageTooLarge => 3,
            Self::AuthenticationRejected => 4,
            Self::TooManySessions => 5,
            Self::UnknownSession => 6,
            Self::RateLimitExceeded => 7,
            Self::OperationError => 8,
            Self::OperationTimeout => 9,
            Self::ProtocolViolation => 10,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::MalformedMessage),
            2 => Some(Self::UnknownMessageType),
            3 => Some(Self::MessageTooLarge),
            4 => Some(Self::AuthenticationRejected),
            5 => Some(Self::TooManySessions),
            6 => Some(Self::UnknownSession),
            7 => Some(Self::RateLimitExceeded),
            8 => Some(Self::OperationError),
            9 => Some(Self::OperationTimeout),
            10 => Some(Self::ProtocolViolation),
            _ => None,
        }
    }
}

/// Client-chosen request identifier, echoed in the matching response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// First message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub identity: String,
    /// Unix seconds at the client when the proof was computed.
    pub timestamp: i64,
    pub proof: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAccepted {
    pub session_id: String,
    /// Seconds until the session's absolute expiry.
    pub expires_in_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRequest {
    pub request_id: RequestId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub request_id: RequestId,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub request_id: Option<RequestId>,
    pub code: u16,
    pub message: String,
}

impl ErrorReply {
    pub fn new(code: ErrorCode, request_id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            request_id,
            code: code.code(),
            message: message.into(),
        }
    }

    /// Known error code, if this build names it.
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

/// All helper IPC messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Authenticate(AuthenticateRequest),
    AuthAccepted(AuthAccepted),
    ConnectionStatsRequest(StatsRequest),
    ConnectionStatsResponse(StatsResponse),
    Heartbeat,
    Shutdown,
    Error(ErrorReply),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Authenticate(_) => MessageType::Authenticate,
            Self::AuthAccepted(_) => MessageType::AuthAccepted,
            Self::ConnectionStatsRequest(_) => MessageType::ConnectionStatsRequest,
            Self::ConnectionStatsResponse(_) => MessageType::ConnectionStatsResponse,
            Self::Heartbeat => MessageType::Heartbeat,
            Self::Shutdown => MessageType::Shutdown,
            Self::Error(_) => MessageType::Error,
        }
    }

    pub fn error(
        code: ErrorCode,
        request_id: Option<RequestId>,
        message: impl Into<String>,
    ) -> Self {
        Self::Error(ErrorReply::new(code, request_id, message))
    }
}

/// Pinned bincode options. Changing any of these breaks cross-version decode.
fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .allow_trailing_bytes()
}

/// Encodes and decodes frame bodies with a maximum size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageCodec {
    max_message_size: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl MessageCodec {
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Largest body that fits in a frame once the length prefix is counted.
    pub fn max_body_size(&self) -> usize {
        self.max_message_size.saturating_sub(FRAME_HEADER_LEN)
    }

    /// Reject a body whose frame would exceed the limit. The error reports
    /// the full frame size.
    pub fn check_body_len(&self, len: usize) -> Result<(), ProtocolError> {
        if len > self.max_body_size() {
            return Err(ProtocolError::MessageTooLarge {
                size: len.saturating_add(FRAME_HEADER_LEN),
                max: self.max_message_size,
            });
        }
        Ok(())
    }

    /// Encode message to a frame body with size limit enforcement.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let mut body = vec![message.message_type().tag()];
        let result = match message {
            Message::Authenticate(p) => wire_options().serialize_into(&mut body, p),
            Message::AuthAccepted(p) => wire_options().serialize_into(&mut body, p),
            Message::ConnectionStatsRequest(p) => wire_options().serialize_into(&mut body, p),
            Message::ConnectionStatsResponse(p) => wire_options().serialize_into(&mut body, p),
            Message::Error(p) => wire_options().serialize_into(&mut body, p),
            Message::Heartbeat | Message::Shutdown => Ok(()),
        };
        result.map_err(|e| ProtocolError::Malformed(e.to_string()))?;

        self.check_body_len(body.len())?;
        Ok(body)
    }

    /// Decode a frame body. The tag selects the payload shape; nothing in the
    /// payload influences which type is built.
    pub fn decode(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        // SECURITY: Check size BEFORE parsing to prevent memory exhaustion
        self.check_body_len(body.len())?;

        let (&tag, payload) = body
            .split_first()
            .ok_or_else(|| ProtocolError::Malformed("empty frame body".into()))?;

        let message = match MessageType::from_tag(tag)? {
            MessageType::Authenticate => Message::Authenticate(self.decode_payload(payload)?),
            MessageType::AuthAccepted => Message::AuthAccepted(self.decode_payload(payload)?),
            MessageType::ConnectionStatsRequest => {
                Message::ConnectionStatsRequest(self.decode_payload(payload)?)
            }
            MessageType::ConnectionStatsResponse => {
                Message::ConnectionStatsResponse(self.decode_payload(payload)?)
            }
            MessageType::Error => Message::Error(self.decode_payload(payload)?),
            MessageType::Heartbeat => Message::Heartbeat,
            MessageType::Shutdown => Message::Shutdown,
        };
        Ok(message)
    }

    fn decode_payload<T: DeserializeOwned>(&self, payload: &[u8]) -> Result<T, ProtocolError> {
        wire_options()
            .with_limit(self.max_body_size() as u64)
            .deserialize(payload)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_tags_are_stable() {
        assert_eq!(MessageType::Authenticate.tag(), 0x01);
        assert_eq!(MessageType::ConnectionStatsRequest.tag(), 0x03);
        assert_eq!(MessageType::Error.tag(), 0x07);
        for tag in 0x01..=0x07u8 {
            assert_eq!(MessageType::from_tag(tag).unwrap().tag(), tag);
        }
    }

    #[test]
    fn test_unknown_tag_rejected() {
        assert!(matches!(
            MessageType::from_tag(0x00),
            Err(ProtocolError::UnknownMessageType(0x00))
        ));
        assert!(matches!(
            MessageType::from_tag(0xFF),
            Err(ProtocolError::UnknownMessageType(0xFF))
        ));
    }

    #[test]
    fn test_error_code_roundtrip_and_unknown() {
        assert_eq!(
            ErrorCode::from_code(ErrorCode::RateLimitExceeded.code()),
            Some(ErrorCode::RateLimitExceeded)
        );
        assert_eq!(ErrorCode::from_code(0), None);
        assert_eq!(ErrorCode::from_code(999), None);

        let reply = ErrorReply {
            request_id: None,
            code: 999,
            message: "future".into(),
        };
        assert_eq!(reply.kind(), None);
    }

    #[test]
    fn test_heartbeat_is_single_byte() {
        let codec = MessageCodec::default();
        assert_eq!(codec.encode(&Message::Heartbeat).unwrap(), vec![0x05]);
        assert_eq!(codec.encode(&Message::Shutdown).unwrap(), vec![0x06]);
    }

    #[test]
    fn test_authenticate_layout_is_pinned() {
        let codec = MessageCodec::default();
        let body = codec
            .encode(&Message::Authenticate(AuthenticateRequest {
                identity: "ui".into(),
                timestamp: 1,
                proof: vec![0xAA],
            }))
            .unwrap();
        // tag, u64 len + "ui", i64 timestamp, u64 len + proof
        let mut expected = vec![0x01];
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(b"ui");
        expected.extend_from_slice(&1i64.to_le_bytes());
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.push(0xAA);
        assert_eq!(body, expected);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let codec = MessageCodec::new(64);
        let msg = Message::ConnectionStatsResponse(StatsResponse {
            request_id: RequestId(1),
            payload: vec![0u8; 128],
        });
        assert!(matches!(codec.encode(&msg), Err(ProtocolError::MessageTooLarge { .. })));
    }

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::UnknownMessageType(9).code(), ErrorCode::UnknownMessageType);
        assert_eq!(
            ProtocolError::MessageTooLarge { size: 2, max: 1 }.code(),
            ErrorCode::MessageTooLarge
        );
        assert_eq!(ProtocolError::Malformed("x".into()).code(), ErrorCode::MalformedMessage);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MessageTooLarge { size: 100, max: 50 };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("50"));
        assert!(ProtocolError::UnknownMessageType(0x2a).to_string().contains("0x2a"));
    }
}
