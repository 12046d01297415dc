use gcs_proto::fnv::{Fnv64, fnv1a_32, fnv1a_64, fnv1a_128};
use std::hash::Hasher;

#[test]
fn test_fnv32_reference_vectors() {
    assert_eq!(fnv1a_32(b""), 0x811c9dc5);
    assert_eq!(fnv1a_32(b"a"), 0xe40c292c);
    assert_eq!(fnv1a_32(b"foobar"), 0xbf9cf968);
}

#[test]
fn test_fnv64_reference_vectors() {
    assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    assert_eq!(fnv1a_64(b"foobar"), 0x85944171f73967e8);
}

#[test]
fn test_fnv128_offset_basis() {
    assert_eq!(fnv1a_128(b""), 0x6c62272e07bb014262b821756295c58d);
}

#[test]
fn test_fnv128_distinguishes_nearby_inputs() {
    let a = fnv1a_128(b"node0:node1:7");
    let b = fnv1a_128(b"node0:node1:8");
    let c = fnv1a_128(b"node0:node2:7");
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
}

#[test]
fn test_hasher_matches_one_shot() {
    let data = b"the quick brown fox";
    let mut hasher = Fnv64::new();
    hasher.write(&data[..7]);
    hasher.write(&data[7..]);
    assert_eq!(hasher.finish(), fnv1a_64(data));
}

#[test]
fn test_hasher_empty_is_basis() {
    let hasher = Fnv64::new();
    assert_eq!(hasher.finish(), fnv1a_64(b""));
}
