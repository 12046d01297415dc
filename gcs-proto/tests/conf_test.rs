use gcs_proto::conf::ConfPayload;
use gcs_proto::types::{GroupUuid, Seqno};
use gcs_proto::MAX_MEMBER_ID_LEN;

fn sample() -> ConfPayload {
    ConfPayload {
        seqno: Seqno(5),
        conf_id: 2,
        group_uuid: GroupUuid([0xAA; 16]),
        st_required: false,
        my_idx: 1,
        members: vec!["node0".into(), "node1".into(), "node2".into()],
    }
}

#[test]
fn test_conf_roundtrip() {
    let conf = sample();
    let back = ConfPayload::from_bytes(&conf.to_bytes().unwrap()).unwrap();
    assert_eq!(back, conf);
    assert_eq!(back.memb_num(), 3);
    assert!(back.is_primary());
}

#[test]
fn test_conf_non_primary() {
    let mut conf = sample();
    conf.conf_id = ConfPayload::NON_PRIMARY;
    conf.st_required = true;
    let back = ConfPayload::from_bytes(&conf.to_bytes().unwrap()).unwrap();
    assert!(!back.is_primary());
    assert!(back.st_required);
}

#[test]
fn test_conf_header_layout() {
    // The header is position-based: an application without the library must
    // be able to read it with plain little-endian loads.
    let conf = sample();
    let bytes = conf.to_bytes().unwrap();
    assert_eq!(i64::from_le_bytes(bytes[0..8].try_into().unwrap()), 5);
    assert_eq!(i64::from_le_bytes(bytes[8..16].try_into().unwrap()), 2);
    assert_eq!(&bytes[16..32], &[0xAA; 16]);
    assert_eq!(bytes[32], 0); // st_required
    assert_eq!(u32::from_le_bytes(bytes[33..37].try_into().unwrap()), 3);
    assert_eq!(u32::from_le_bytes(bytes[37..41].try_into().unwrap()), 1);
    // First member id, NUL-terminated.
    assert_eq!(&bytes[41..47], b"node0\0");
}

#[test]
fn test_conf_member_id_length_limit() {
    let mut conf = sample();
    conf.members[0] = "x".repeat(MAX_MEMBER_ID_LEN - 1); // 39 chars + NUL = 40, ok
    let bytes = conf.to_bytes().unwrap();
    assert_eq!(ConfPayload::from_bytes(&bytes).unwrap(), conf);

    conf.members[0] = "x".repeat(MAX_MEMBER_ID_LEN); // one too many
    assert!(conf.to_bytes().is_err());
}

#[test]
fn test_conf_rejects_nul_in_member_id() {
    let mut conf = sample();
    conf.members[0] = "bad\0id".into();
    assert!(conf.to_bytes().is_err());
}

#[test]
fn test_conf_rejects_truncation() {
    let bytes = sample().to_bytes().unwrap();
    for cut in [0, 7, 16, 40, bytes.len() - 1] {
        assert!(
            ConfPayload::from_bytes(&bytes[..cut]).is_err(),
            "cut at {} accepted",
            cut
        );
    }
}

#[test]
fn test_conf_rejects_trailing_garbage() {
    let mut bytes = sample().to_bytes().unwrap();
    bytes.push(7);
    assert!(ConfPayload::from_bytes(&bytes).is_err());
}

#[test]
fn test_conf_empty_membership() {
    // A node alone in a non-primary component may see an empty member list.
    let conf = ConfPayload {
        seqno: Seqno::NIL,
        conf_id: ConfPayload::NON_PRIMARY,
        group_uuid: GroupUuid::NIL,
        st_required: false,
        my_idx: 0,
        members: Vec::new(),
    };
    let back = ConfPayload::from_bytes(&conf.to_bytes().unwrap()).unwrap();
    assert_eq!(back, conf);
}
