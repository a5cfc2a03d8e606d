//! Deterministic binary serialization.
//!
//! Every on-chain artifact (instructions, methods, scripts, contracts,
//! outputs, world-state records) passes through these traits, so hashing and
//! wire transmission are bit-exact across nodes.
//!
//! # Format
//!
//! | shape            | encoding                                          |
//! |------------------|---------------------------------------------------|
//! | integers         | little-endian, fixed width (`usize` as `u64`)     |
//! | `U256` / `I256`  | 32 bytes big-endian (raw bits for `I256`)         |
//! | `bool`           | one byte, 0 or 1                                  |
//! | `Vec<T>`, `String` | `u64` length prefix, then the elements          |
//! | `Option<T>`      | one tag byte (0/1), then the value if present     |
//! | `[T; N]`         | elements back to back, no prefix                  |
//! | enums (derived)  | one tag byte, then the variant's fields           |
//!
//! Decoding is strict: unknown tags, non-canonical booleans, oversized
//! length prefixes and trailing bytes are all rejected.

use crate::types::bytes::Bytes;
use primitive_types::U256;

/// Maximum element count accepted for any length-prefixed sequence.
///
/// A wire-supplied length is attacker-controlled; this cap keeps a bogus
/// prefix from reserving gigabytes before the first element fails to parse.
const MAX_SEQUENCE_LEN: usize = 1 << 20;

/// Receiver for encoded bytes.
///
/// Byte buffers collect the output; `Hasher` digests it directly so encoded
/// values can be hashed without materializing them.
pub trait EncodeSink {
    /// Appends raw bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Serialization to the deterministic binary format.
pub trait Encode {
    /// Writes the binary representation into the sink.
    fn encode<S: EncodeSink>(&self, sink: &mut S);

    /// Serializes into a fresh immutable buffer.
    fn to_bytes(&self) -> Bytes {
        let mut sink = Vec::new();
        self.encode(&mut sink);
        Bytes::from_vec(sink)
    }
}

/// Why a decode failed.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Input ended before the value was complete.
    UnexpectedEof,
    /// The bytes are not a canonical encoding of the target type.
    InvalidValue,
    /// A length prefix exceeds [`MAX_SEQUENCE_LEN`].
    LengthOverflow,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::InvalidValue => write!(f, "invalid value"),
            DecodeError::LengthOverflow => write!(f, "length prefix too large"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Deserialization from the deterministic binary format.
pub trait Decode: Sized {
    /// Reads one value, advancing `reader` past the consumed bytes.
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole slice.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = data;
        let value = Self::decode(&mut reader)?;
        match reader.is_empty() {
            true => Ok(value),
            false => Err(DecodeError::InvalidValue),
        }
    }
}

/// Splits `n` bytes off the front of the reader.
fn take<'a>(reader: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if n > reader.len() {
        return Err(DecodeError::UnexpectedEof);
    }
    let (taken, rest) = reader.split_at(n);
    *reader = rest;
    Ok(taken)
}

// Fixed-width integers, signed and unsigned alike.
macro_rules! int_codec {
    ($($int:ty),* $(,)?) => {$(
        impl Encode for $int {
            fn encode<S: EncodeSink>(&self, sink: &mut S) {
                sink.write(&self.to_le_bytes());
            }
        }

        impl Decode for $int {
            fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
                let raw = take(reader, std::mem::size_of::<$int>())?;
                Ok(<$int>::from_le_bytes(raw.try_into().expect("sized read")))
            }
        }
    )*};
}

int_codec!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

// usize travels as u64 so 32- and 64-bit nodes agree on the wire.
impl Encode for usize {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        (*self as u64).encode(sink);
    }
}

impl Decode for usize {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        usize::try_from(u64::decode(reader)?).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        sink.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(reader, 1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// U256 travels big-endian at fixed width, matching its display and the
// numeric conventions of the instruction immediates.
impl Encode for U256 {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        let mut raw = [0u8; 32];
        self.to_big_endian(&mut raw);
        sink.write(&raw);
    }
}

impl Decode for U256 {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(U256::from_big_endian(take(reader, 32)?))
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        self.len().encode(sink);
        for item in self {
            item.encode(sink);
        }
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = usize::decode(reader)?;
        if len > MAX_SEQUENCE_LEN {
            return Err(DecodeError::LengthOverflow);
        }
        let mut items = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            items.push(T::decode(reader)?);
        }
        Ok(items)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        self.len().encode(sink);
        sink.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        let raw = Vec::<u8>::decode(reader)?;
        String::from_utf8(raw).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        match self {
            None => sink.write(&[0]),
            Some(value) => {
                sink.write(&[1]);
                value.encode(sink);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        match take(reader, 1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(T::decode(reader)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

// Fixed-size arrays carry no prefix; the length is part of the type.
impl<T: Encode, const N: usize> Encode for [T; N] {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        for item in self {
            item.encode(sink);
        }
    }
}

impl<T: Decode, const N: usize> Decode for [T; N] {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut items = Vec::with_capacity(N);
        for _ in 0..N {
            items.push(T::decode(reader)?);
        }
        items.try_into().map_err(|_| DecodeError::InvalidValue)
    }
}

// Pairs back the token-amount lists attached to outputs.
impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, sink: &mut S) {
        self.0.encode(sink);
        self.1.encode(sink);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(reader: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(reader)?, B::decode(reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode, then decode strictly, expecting the same value back.
    fn roundtrip<T: Encode + Decode + PartialEq + std::fmt::Debug>(value: T) {
        let encoded = value.to_bytes();
        assert_eq!(T::from_bytes(&encoded).unwrap(), value);
    }

    #[test]
    fn integers_travel_little_endian() {
        assert_eq!(0x12345678u32.to_bytes().as_slice(), &[0x78, 0x56, 0x34, 0x12]);
        roundtrip(u8::MAX);
        roundtrip(-1i64);
        roundtrip(u128::MAX / 3);
    }

    #[test]
    fn usize_always_occupies_eight_bytes() {
        assert_eq!(7usize.to_bytes().len(), 8);
        roundtrip(usize::MAX.min(u64::MAX as usize));
    }

    #[test]
    fn u256_travels_big_endian_at_fixed_width() {
        let encoded = U256::from(0x0102u64).to_bytes();
        assert_eq!(encoded.len(), 32);
        assert_eq!(&encoded[30..], &[0x01, 0x02]);
        roundtrip(U256::MAX);
    }

    #[test]
    fn bool_rejects_non_canonical_bytes() {
        roundtrip(true);
        roundtrip(false);
        for bad in [2u8, 0x80, 0xFF] {
            assert_eq!(bool::from_bytes(&[bad]), Err(DecodeError::InvalidValue));
        }
    }

    #[test]
    fn sequences_carry_a_length_prefix() {
        let items: Vec<u16> = vec![10, 20, 30];
        let encoded = items.to_bytes();
        assert_eq!(&encoded[0..8], &3u64.to_le_bytes());
        roundtrip(items);
        roundtrip(String::from("chain\u{00e9}"));
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let bogus = ((MAX_SEQUENCE_LEN as u64) + 1).to_bytes();
        assert_eq!(
            Vec::<u8>::from_bytes(&bogus),
            Err(DecodeError::LengthOverflow)
        );
    }

    #[test]
    fn option_tags_one_byte() {
        assert_eq!(Option::<u32>::None.to_bytes().as_slice(), &[0]);
        roundtrip(Some(99u64));
        roundtrip(Option::<u64>::None);
        assert_eq!(
            Option::<u32>::from_bytes(&[9, 0, 0, 0, 0]),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn arrays_have_no_prefix() {
        assert_eq!([1u8, 2, 3].to_bytes().as_slice(), &[1, 2, 3]);
        roundtrip([0xAABBu16, 0xCCDD]);
    }

    #[test]
    fn pairs_concatenate_their_halves() {
        let pair: (u8, u32) = (0xAB, 0x01020304);
        assert_eq!(pair.to_bytes().len(), 5);
        roundtrip(pair);
    }

    #[test]
    fn strict_decoding_rejects_leftovers_and_truncation() {
        assert_eq!(u8::from_bytes(&[1, 2]), Err(DecodeError::InvalidValue));
        assert_eq!(u32::from_bytes(&[1, 2]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn decode_advances_through_the_input() {
        let mut reader: &[u8] = &[0x01, 0x02, 0x03, 0x04];
        assert_eq!(u8::decode(&mut reader).unwrap(), 0x01);
        assert_eq!(u16::decode(&mut reader).unwrap(), 0x0302);
        assert_eq!(reader, &[0x04]);
    }

    #[test]
    fn invalid_utf8_is_not_a_string() {
        let mut encoded = 2usize.to_bytes().to_vec();
        encoded.extend_from_slice(&[0xFF, 0xFE]);
        assert_eq!(String::from_bytes(&encoded), Err(DecodeError::InvalidValue));
    }
}
