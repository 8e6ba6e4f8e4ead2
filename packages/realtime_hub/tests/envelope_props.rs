use proptest::prelude::*;

use realtime_hub::{Envelope, EnvelopeKind, UserId};

fn arb_kind() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("private_message".to_string()),
        Just("typing".to_string()),
        Just(String::new()),
        "[a-z_]{1,16}",
    ]
}

proptest! {
    #[test]
    fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = Envelope::decode(&bytes);
    }

    #[test]
    fn with_sender_always_wins(
        kind in arb_kind(),
        claimed in any::<u64>(),
        actual in any::<u64>(),
        to in any::<u64>(),
        content in ".{0,64}",
    ) {
        let wire = serde_json::json!({
            "type": kind,
            "from_user_id": claimed,
            "to_user_id": to,
            "content": content,
        })
        .to_string();

        let env = Envelope::decode(wire.as_bytes()).unwrap().with_sender(UserId(actual));

        prop_assert_eq!(env.from_user_id, UserId(actual));
        prop_assert_eq!(env.to_user_id, UserId(to));
        prop_assert_eq!(&env.content, &content);
        prop_assert_eq!(env.kind.as_str(), kind.as_str());
    }

    #[test]
    fn only_private_message_tag_routes(kind in arb_kind()) {
        let parsed = EnvelopeKind::from(kind.clone());
        prop_assert_eq!(parsed == EnvelopeKind::PrivateMessage, kind == "private_message");
    }
}
