use gcs_proto::conf::ConfPayload;
use gcs_proto::types::{ActionId, ActionType, GroupUuid, Seqno};
use gcs_proto::wire::Frame;
use proptest::prelude::*;

fn arb_action_type() -> impl Strategy<Value = ActionType> {
    prop_oneof![
        Just(ActionType::Tordered),
        Just(ActionType::CommitCut),
        Just(ActionType::StateReq),
        Just(ActionType::Join),
        Just(ActionType::Sync),
        Just(ActionType::Flow),
        Just(ActionType::Service),
    ]
}

proptest! {
    #[test]
    fn frame_roundtrip(
        action_id in any::<u64>(),
        frag_count in 1u32..2000,
        index_offset in 0u32..2000,
        ty in arb_action_type(),
        total_size in any::<u64>(),
        payload in proptest::collection::vec(any::<u8>(), 0..4096),
    ) {
        let frame = Frame {
            action_id: ActionId(action_id),
            frag_index: index_offset % frag_count,
            frag_count,
            action_type: ty,
            total_size,
            payload,
        };
        let back = Frame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(back, frame);
    }

    #[test]
    fn conf_roundtrip(
        seqno in -1i64..1_000_000,
        conf_id in -1i64..10_000,
        uuid in any::<[u8; 16]>(),
        st_required in any::<bool>(),
        member_count in 0usize..16,
    ) {
        let members: Vec<String> =
            (0..member_count).map(|i| format!("node{}", i)).collect();
        let conf = ConfPayload {
            seqno: Seqno(seqno),
            conf_id,
            group_uuid: GroupUuid(uuid),
            st_required,
            my_idx: 0,
            members,
        };
        let back = ConfPayload::from_bytes(&conf.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(back, conf);
    }
}
