//! Blake2b-256 hashing and the 32-byte hash type.

use crate::types::encoding::EncodeSink;
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use chainvm_derive::BinaryCodec;
use std::fmt;

/// Hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size Blake2b-256 hash, the protocol's identity for transactions,
/// contracts, code and trie nodes.
///
/// Deliberately `Copy`: execution passes hashes around constantly and a
/// 32-byte copy beats the indirection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// The all-zero hash, the sentinel for empty roots and unset references.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Digest of a single byte slice.
    pub fn of(data: &[u8]) -> Hash {
        let mut hasher = Hasher::new();
        hasher.write(data);
        hasher.finish()
    }

    /// Starts an incremental digest.
    pub fn hasher() -> Hasher {
        Hasher::new()
    }

    /// The hash as a byte slice.
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// The hash as a byte Vec.
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Rebuilds a hash from exactly [`HASH_LEN`] bytes.
    pub fn from_slice(slice: &[u8]) -> Option<Hash> {
        let bytes: [u8; HASH_LEN] = slice.try_into().ok()?;
        Some(Hash(bytes))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Incremental Blake2b-256 digest.
///
/// Accepts chunks through [`write`](Hasher::write) and collapses to a
/// [`Hash`]. Implements [`EncodeSink`], so any `Encode` type can be hashed
/// by encoding straight into the hasher with no intermediate buffer.
pub struct Hasher {
    state: Blake2b<U32>,
}

impl Hasher {
    /// A fresh digest state.
    pub fn new() -> Hasher {
        Hasher {
            state: Blake2b::new(),
        }
    }

    /// Feeds a chunk into the digest.
    pub fn write(&mut self, data: &[u8]) {
        self.state.update(data);
    }

    /// Collapses the digest into the final hash.
    pub fn finish(self) -> Hash {
        Hash(self.state.finalize().into())
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Hasher::new()
    }
}

impl EncodeSink for Hasher {
    fn write(&mut self, bytes: &[u8]) {
        self.state.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_writes_match_the_one_shot_digest() {
        let mut hasher = Hash::hasher();
        hasher.write(b"hello ");
        hasher.write(b"world");
        assert_eq!(hasher.finish(), Hash::of(b"hello world"));
    }

    #[test]
    fn encoding_into_the_hasher_matches_hashing_the_encoding() {
        use crate::types::encoding::Encode;

        let value: u64 = 0xDEAD_BEEF;
        let mut hasher = Hash::hasher();
        value.encode(&mut hasher);
        assert_eq!(hasher.finish(), Hash::of(&value.to_bytes()));
    }

    #[test]
    fn from_slice_requires_exact_length() {
        assert!(Hash::from_slice(&[0u8; 31]).is_none());
        assert!(Hash::from_slice(&[0u8; 33]).is_none());
        assert_eq!(Hash::from_slice(&[0u8; 32]), Some(Hash::zero()));
    }

    #[test]
    fn display_renders_lowercase_hex() {
        let rendered = Hash::of(b"x").to_string();
        assert_eq!(rendered.len(), 2 * HASH_LEN);
        assert!(rendered.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn different_inputs_produce_different_hashes() {
        assert_ne!(Hash::of(b"a"), Hash::of(b"b"));
        assert_ne!(Hash::of(b"a"), Hash::zero());
    }
}
