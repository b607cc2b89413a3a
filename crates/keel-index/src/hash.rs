//! Injected hash functions.
//!
//! The table routes keys by a 32-bit hash supplied from outside, so tests
//! and specialized deployments can control bucket placement. The default
//! hashes the key's on-page encoding with SipHash-1-3 and truncates.

use std::hash::Hasher;

use keel_common::types::FixedSlot;
use siphasher::sip::SipHasher13;

/// Hashes keys to the 32-bit values that drive directory routing.
pub trait HashFn<K>: Send + Sync {
    /// Returns the key's 32-bit hash.
    fn hash(&self, key: &K) -> u32;
}

/// SipHash-1-3 based default hash function.
#[derive(Debug, Clone)]
pub struct SipHashFn {
    k0: u64,
    k1: u64,
}

impl SipHashFn {
    /// Creates a hash function with fixed keys, so hashes are stable
    /// across runs and the on-disk directory stays valid.
    pub fn new() -> Self {
        Self {
            k0: 0x6b65_656c_6462_2d68,
            k1: 0x6173_682d_696e_6478,
        }
    }

    /// Creates a hash function with caller-chosen SipHash keys.
    pub fn with_keys(k0: u64, k1: u64) -> Self {
        Self { k0, k1 }
    }
}

impl Default for SipHashFn {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: FixedSlot> HashFn<K> for SipHashFn {
    fn hash(&self, key: &K) -> u32 {
        let mut buf = [0u8; 16];
        debug_assert!(K::ENCODED_LEN <= buf.len());
        key.write_to(&mut buf[..K::ENCODED_LEN]);

        let mut hasher = SipHasher13::new_with_keys(self.k0, self.k1);
        hasher.write(&buf[..K::ENCODED_LEN]);
        hasher.finish() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        let a = SipHashFn::new();
        let b = SipHashFn::new();
        assert_eq!(HashFn::<u64>::hash(&a, &42), HashFn::<u64>::hash(&b, &42));
    }

    #[test]
    fn test_different_keys_differ() {
        let hasher = SipHashFn::new();
        // Not guaranteed in general, but these must not collide for the
        // default keys - a tripwire against degenerate hashing.
        assert_ne!(
            HashFn::<u64>::hash(&hasher, &1),
            HashFn::<u64>::hash(&hasher, &2)
        );
    }

    #[test]
    fn test_custom_keys_change_hashes() {
        let a = SipHashFn::new();
        let b = SipHashFn::with_keys(1, 2);
        assert_ne!(
            HashFn::<u64>::hash(&a, &42),
            HashFn::<u64>::hash(&b, &42)
        );
    }
}
