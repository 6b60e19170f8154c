//! Property-based and wire-format tests for frame decoding.
//!
//! The decoder sits directly behind the network, so it must reject garbage
//! without panicking and keep the JSON shape other clients depend on.

use proptest::prelude::*;
use showroom_proto::{
    BearerToken, ClientFrame, MessageId, ProtocolError, RoomId, ServerFrame, ServerMessage, UserId,
};

fn message(seq: u64, correlation: Option<&str>) -> ServerMessage {
    ServerMessage {
        id: MessageId::from("m1"),
        room_id: RoomId::from("r1"),
        sender: UserId::from("bob"),
        body: "hi".into(),
        created_at: 1000,
        seq,
        correlation: correlation.map(MessageId::from),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: arbitrary text never panics the decoder
    #[test]
    fn prop_decode_arbitrary_text_never_panics(text in ".{0,512}") {
        let _ = ServerFrame::decode(&text);
        let _ = ClientFrame::decode(&text);
    }

    /// Property: a decoded message frame keeps the server sequence number
    #[test]
    fn prop_message_frame_keeps_seq(seq in any::<u64>(), body in "[a-zA-Z0-9 ]{0,64}") {
        let mut msg = message(seq, None);
        msg.body = body.clone();
        let text = ServerFrame::MessageSent { message: msg }.encode()?;

        match ServerFrame::decode(&text)? {
            ServerFrame::MessageSent { message } => {
                prop_assert_eq!(message.seq, seq);
                prop_assert_eq!(message.body, body);
            },
            other => prop_assert!(false, "unexpected frame {:?}", other),
        }
    }
}

#[test]
fn authenticate_wire_shape() {
    let frame = ClientFrame::Authenticate { token: BearerToken::new("t0k") };
    insta::assert_snapshot!(frame.encode().unwrap(), @r#"{"type":"authenticate","token":"t0k"}"#);
}

#[test]
fn mark_read_wire_shape() {
    let frame = ClientFrame::MarkRead { room_id: RoomId::from("r1"), up_to: 42 };
    insta::assert_snapshot!(frame.encode().unwrap(), @r#"{"type":"mark_read","room_id":"r1","up_to":42}"#);
}

#[test]
fn message_sent_omits_missing_correlation() {
    let frame = ServerFrame::MessageSent { message: message(3, None) };
    insta::assert_snapshot!(
        frame.encode().unwrap(),
        @r#"{"type":"message_sent","message":{"id":"m1","room_id":"r1","sender":"bob","body":"hi","created_at":1000,"seq":3}}"#
    );
}

#[test]
fn delivered_frame_carries_correlation() {
    let text = r#"{"type":"message_delivered","message":{"id":"m9","room_id":"r1","sender":"me","body":"yo","created_at":5,"seq":9,"correlation":"local-1"}}"#;
    let frame = ServerFrame::decode(text).unwrap();
    match frame {
        ServerFrame::MessageDelivered { message } => {
            assert_eq!(message.correlation, Some(MessageId::from("local-1")));
            assert_eq!(message.seq, 9);
        },
        other => panic!("unexpected frame {other:?}"),
    }
}

#[test]
fn truncated_frame_is_malformed() {
    let result = ServerFrame::decode(r#"{"type":"auth_accepted""#);
    assert!(matches!(result, Err(ProtocolError::Malformed(_))));
}
