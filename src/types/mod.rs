//! Foundation types shared across the toolchain.
//!
//! - [`hash::Hash`]: fixed-size 32-byte Blake2b-256 hashes
//! - [`bytes::Bytes`]: reference-counted copy-on-write byte buffers
//! - [`encoding`]: deterministic binary serialization traits
//! - [`numeric`]: checked 256-bit integer arithmetic

pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod numeric;
