//! Codec tests: round-trips for every message shape and decode failures.

use netmon_helper::ipc::{
    AuthAccepted, AuthenticateRequest, ErrorCode, ErrorReply, Message, MessageCodec, ProtocolError,
    RequestId, StatsRequest, StatsResponse, FRAME_HEADER_LEN,
};

fn all_shapes() -> Vec<Message> {
    vec![
        Message::Authenticate(AuthenticateRequest {
            identity: "netmon-ui".into(),
            timestamp: 1_700_000_000,
            proof: vec![7u8; 32],
        }),
        Message::AuthAccepted(AuthAccepted {
            session_id: "ab".repeat(32),
            expires_in_secs: 28_800,
        }),
        Message::ConnectionStatsRequest(StatsRequest {
            request_id: RequestId(42),
            payload: b"eth0".to_vec(),
        }),
        Message::ConnectionStatsResponse(StatsResponse {
            request_id: RequestId(42),
            payload: vec![1, 2, 3, 4],
        }),
        Message::Heartbeat,
        Message::Shutdown,
        Message::error(ErrorCode::RateLimitExceeded, Some(RequestId(9)), "slow down"),
        Message::error(ErrorCode::ProtocolViolation, None, ""),
    ]
}

#[test]
fn test_roundtrip_every_shape() {
    let codec = MessageCodec::default();
    for message in all_shapes() {
        let body = codec.encode(&message).unwrap();
        assert_eq!(body[0], message.message_type().tag());
        assert_eq!(codec.decode(&body).unwrap(), message);
    }
}

#[test]
fn test_empty_payloads_roundtrip() {
    let codec = MessageCodec::default();
    let message = Message::ConnectionStatsRequest(StatsRequest {
        request_id: RequestId(0),
        payload: Vec::new(),
    });
    assert_eq!(codec.decode(&codec.encode(&message).unwrap()).unwrap(), message);
}

#[test]
fn test_empty_body_is_malformed() {
    let codec = MessageCodec::default();
    assert!(matches!(codec.decode(&[]), Err(ProtocolError::Malformed(_))));
}

#[test]
fn test_unknown_tag_is_rejected() {
    let codec = MessageCodec::default();
    assert!(matches!(
        codec.decode(&[0x7F, 0, 0]),
        Err(ProtocolError::UnknownMessageType(0x7F))
    ));
}

#[test]
fn test_truncated_payload_is_malformed() {
    let codec = MessageCodec::default();
    let body = codec.encode(&all_shapes()[0]).unwrap();
    for cut in 1..body.len() {
        assert!(
            matches!(codec.decode(&body[..cut]), Err(ProtocolError::Malformed(_))),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn test_trailing_bytes_are_tolerated() {
    let codec = MessageCodec::default();
    let message = Message::ConnectionStatsResponse(StatsResponse {
        request_id: RequestId(1),
        payload: vec![5],
    });
    let mut body = codec.encode(&message).unwrap();
    body.extend_from_slice(&[0xEE; 8]);
    assert_eq!(codec.decode(&body).unwrap(), message);
}

#[test]
fn test_oversized_body_rejected_before_parse() {
    // The limit covers the length prefix, so a 16-byte frame carries 12 body bytes
    let codec = MessageCodec::new(16);
    assert_eq!(codec.max_body_size(), 16 - FRAME_HEADER_LEN);

    let body = vec![0x05u8; 13];
    assert!(matches!(
        codec.decode(&body),
        Err(ProtocolError::MessageTooLarge { size: 17, max: 16 })
    ));

    let at_limit = vec![0x05u8; 12];
    assert!(!matches!(codec.decode(&at_limit), Err(ProtocolError::MessageTooLarge { .. })));
}

#[test]
fn test_declared_length_beyond_limit_is_malformed() {
    // A payload claiming a huge proof length must not allocate it
    let codec = MessageCodec::new(4096);
    let mut body = vec![0x01];
    body.extend_from_slice(&2u64.to_le_bytes());
    body.extend_from_slice(b"ui");
    body.extend_from_slice(&0i64.to_le_bytes());
    body.extend_from_slice(&u64::MAX.to_le_bytes());
    assert!(matches!(codec.decode(&body), Err(ProtocolError::Malformed(_))));
}

#[test]
fn test_unknown_error_code_still_decodes() {
    let codec = MessageCodec::default();
    let message = Message::Error(ErrorReply {
        request_id: None,
        code: 4242,
        message: "from the future".into(),
    });
    match codec.decode(&codec.encode(&message).unwrap()).unwrap() {
        Message::Error(reply) => {
            assert_eq!(reply.code, 4242);
            assert_eq!(reply.kind(), None);
        }
        other => panic!("unexpected {:?}", other),
    }
}
