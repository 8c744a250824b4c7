//! Property-based tests for the wire codec
//!
//! Every message survives an encode/decode round trip, and no byte string
//! makes the decoder panic.

use popin_core::{
    BoothStatus, Message, MessageType, NodeId, PacketError, RegisterReason, Role,
    MAX_DESCRIPTION_LEN, MAX_FRAME_LEN, MAX_TEXT_LEN,
};
use proptest::prelude::*;

/// Generate arbitrary node id
fn arb_node_id() -> impl Strategy<Value = NodeId> {
    any::<u8>().prop_map(NodeId::new)
}

/// Generate text without NUL bytes, up to `max` characters
fn arb_text(max: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>().prop_filter("no NUL", |c| *c != '\0'), 0..=max)
        .prop_map(|chars| chars.into_iter().collect())
}

/// Generate text that fits its wire limit
fn arb_fitting_text(max: usize) -> impl Strategy<Value = String> {
    arb_text(max).prop_map(move |text| {
        let mut end = text.len().min(max);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_string()
    })
}

fn arb_reason() -> impl Strategy<Value = RegisterReason> {
    prop_oneof![
        Just(RegisterReason::Success),
        Just(RegisterReason::AlreadyUsed),
        Just(RegisterReason::FullWaiting),
    ]
}

/// Generate a message a user may send
fn arb_user_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        Just(Message::BoothScan),
        Just(Message::ConnectRequest),
        Just(Message::RegisterRequest),
        Just(Message::QueueLeave),
        Just(Message::ExitRequest),
        any::<bool>().prop_map(|accept| Message::UserResponse { accept }),
        arb_fitting_text(MAX_TEXT_LEN).prop_map(|text| Message::Chat { sender: None, text }),
    ]
}

/// Generate a message an admin may send
fn arb_admin_message() -> impl Strategy<Value = Message> {
    prop_oneof![
        (arb_node_id(), any::<u8>(), any::<u8>(), any::<u8>()).prop_map(
            |(booth_id, current_count, capacity, waiting_count)| {
                Message::BoothAnnounce(BoothStatus {
                    booth_id,
                    current_count,
                    capacity,
                    waiting_count,
                })
            }
        ),
        (
            any::<u8>(),
            any::<u8>(),
            any::<u8>(),
            arb_fitting_text(MAX_DESCRIPTION_LEN)
        )
            .prop_map(|(current_count, capacity, waiting_count, description)| {
                Message::BoothInfo {
                    current_count,
                    capacity,
                    waiting_count,
                    description,
                }
            }),
        (any::<bool>(), arb_reason())
            .prop_map(|(success, reason)| Message::RegisterResponse { success, reason }),
        (any::<u8>(), any::<u8>())
            .prop_map(|(position, total)| Message::QueueInfo { position, total }),
        (any::<u8>(), any::<u8>())
            .prop_map(|(position, total)| Message::QueueUpdate { position, total }),
        Just(Message::QueueReady),
        Just(Message::TimeoutAlert),
        any::<bool>().prop_map(|success| Message::ExitResponse { success }),
        arb_fitting_text(MAX_TEXT_LEN).prop_map(|text| Message::AdminMessage { text }),
        (arb_node_id(), arb_fitting_text(MAX_TEXT_LEN)).prop_map(|(sender, text)| {
            Message::Chat {
                sender: Some(sender),
                text,
            }
        }),
    ]
}

proptest! {
    #[test]
    fn prop_user_messages_round_trip(message in arb_user_message()) {
        let bytes = message.encode();
        prop_assert_eq!(Message::decode(&bytes, Role::User), Ok(message));
    }

    #[test]
    fn prop_admin_messages_round_trip(message in arb_admin_message()) {
        let bytes = message.encode();
        prop_assert!(bytes.len() <= MAX_FRAME_LEN);
        prop_assert_eq!(Message::decode(&bytes, Role::Admin), Ok(message));
    }

    #[test]
    fn prop_encode_into_matches_encode(message in arb_admin_message()) {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let len = message.encode_into(&mut buf).unwrap();
        let encoded = message.encode();
        prop_assert_eq!(&buf[..len], encoded.as_slice());
    }

    #[test]
    fn prop_over_long_text_is_truncated(text in arb_text(300)) {
        let bytes = Message::AdminMessage { text: text.clone() }.encode();
        match Message::decode(&bytes, Role::Admin) {
            Ok(Message::AdminMessage { text: decoded }) => {
                prop_assert!(decoded.len() <= MAX_TEXT_LEN);
                prop_assert!(text.starts_with(&decoded));
            }
            other => prop_assert!(false, "unexpected decode result {:?}", other),
        }
    }

    #[test]
    fn prop_decoder_never_panics(
        bytes in prop::collection::vec(any::<u8>(), 0..128),
        from_admin in any::<bool>(),
    ) {
        let role = if from_admin { Role::Admin } else { Role::User };
        if let Ok(message) = Message::decode(&bytes, role) {
            prop_assert_eq!(message.message_type().as_u8(), bytes[0]);
        }
    }

    #[test]
    fn prop_truncated_frames_are_rejected(message in arb_admin_message(), cut in 1usize..4) {
        let bytes = message.encode();
        prop_assume!(bytes.len() > cut);
        let short = &bytes[..bytes.len() - cut];
        match message {
            // Text payloads lose their terminator; fixed payloads lose fields
            Message::QueueReady | Message::TimeoutAlert => {
                prop_assert!(Message::decode(short, Role::Admin).is_ok());
            }
            _ => prop_assert!(Message::decode(short, Role::Admin).is_err()),
        }
    }
}

#[test]
fn test_reserved_tags_are_reported() {
    for tag in [0x01u8, 0x03, 0x08, 0x12] {
        let message_type = MessageType::from_u8(tag).unwrap();
        assert!(message_type.is_reserved());
        assert_eq!(
            Message::decode(&[tag, 0], Role::Admin),
            Err(PacketError::ReservedMessageType { message_type })
        );
    }
}
