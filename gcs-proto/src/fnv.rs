//! FNV-1a hashing in 32, 64 and 128-bit widths.
//!
//! Uses the reference primes and offset bases so fingerprints stay
//! comparable across versions and implementations. The library derives
//! fresh group uuids from the 128-bit variant; nothing here touches the
//! state machine.

const PRIME_32: u32 = 16777619;
const BASIS_32: u32 = 2166136261;

const PRIME_64: u64 = 1099511628211;
const BASIS_64: u64 = 14695981039346656037;

const PRIME_128: u128 = 0x0000000001000000000000000000013b;
const BASIS_128: u128 = 0x6c62272e07bb014262b821756295c58d;

pub fn fnv1a_32(data: &[u8]) -> u32 {
    data.iter().fold(BASIS_32, |hash, &byte| {
        (hash ^ byte as u32).wrapping_mul(PRIME_32)
    })
}

pub fn fnv1a_64(data: &[u8]) -> u64 {
    data.iter().fold(BASIS_64, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(PRIME_64)
    })
}

pub fn fnv1a_128(data: &[u8]) -> u128 {
    data.iter().fold(BASIS_128, |hash, &byte| {
        (hash ^ byte as u128).wrapping_mul(PRIME_128)
    })
}

/// Incremental 64-bit FNV-1a, pluggable wherever a [`std::hash::Hasher`] is
/// expected.
#[derive(Debug, Clone)]
pub struct Fnv64 {
    state: u64,
}

impl Fnv64 {
    pub fn new() -> Self {
        Fnv64 { state: BASIS_64 }
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::hash::Hasher for Fnv64 {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state = (self.state ^ byte as u64).wrapping_mul(PRIME_64);
        }
    }
}
