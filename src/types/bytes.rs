//! Immutable shared byte buffer.
//!
//! Backs the VM's `ByteVec` values. The payload sits behind an `Arc<[u8]>`:
//! cloning a value on the operand stack bumps a refcount, and a buffer can
//! never change once built. Anything that produces new bytes (concatenation,
//! decoding) allocates a fresh buffer.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use std::ops::Deref;
use std::sync::Arc;

/// A reference-counted, immutable byte sequence.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Bytes(Arc<[u8]>);

impl Bytes {
    /// Wraps anything convertible to owned bytes.
    pub fn new(data: impl Into<Vec<u8>>) -> Bytes {
        Bytes::from_vec(data.into())
    }

    /// Takes ownership of a byte vector without copying.
    pub fn from_vec(data: Vec<u8>) -> Bytes {
        Bytes(Arc::from(data))
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty buffer.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The bytes as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Copies the bytes into a fresh `Vec<u8>`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// A new buffer holding `self` followed by `other`.
    pub fn concat(&self, other: &Bytes) -> Bytes {
        let mut joined = Vec::with_capacity(self.len() + other.len());
        joined.extend_from_slice(self);
        joined.extend_from_slice(other);
        Bytes::from_vec(joined)
    }
}

impl Default for Bytes {
    fn default() -> Bytes {
        Bytes::from_vec(Vec::new())
    }
}

impl Deref for Bytes {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(data: Vec<u8>) -> Bytes {
        Bytes::from_vec(data)
    }
}

impl From<&[u8]> for Bytes {
    fn from(data: &[u8]) -> Bytes {
        Bytes(Arc::from(data))
    }
}

impl From<&str> for Bytes {
    fn from(text: &str) -> Bytes {
        Bytes::from(text.as_bytes())
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(data: [u8; N]) -> Bytes {
        Bytes::from(data.as_slice())
    }
}

impl Encode for Bytes {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self);
    }
}

impl Decode for Bytes {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Vec::<u8>::decode(input).map(Bytes::from_vec)
    }
}
