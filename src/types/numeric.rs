//! Fixed-precision 256-bit integer types for the VM value domain.
//!
//! `U256` comes from `primitive_types`; [`I256`] is a two's-complement signed
//! view over the same 256 bits. All arithmetic used by the VM is checked:
//! overflow, underflow and division by zero return `None` instead of
//! wrapping, and the caller maps that to an arithmetic failure.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
pub use primitive_types::U256;

/// Signed 256-bit integer in two's-complement representation.
///
/// The raw bits are stored as a `U256`; bit 255 is the sign. This matches the
/// on-chain encoding, which serializes the raw 32 bytes big-endian.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct I256(U256);

impl I256 {
    /// The zero value.
    pub const fn zero() -> I256 {
        I256(U256::zero())
    }

    /// Largest representable value, `2^255 - 1`.
    pub fn max_value() -> I256 {
        I256(U256::MAX >> 1)
    }

    /// Smallest representable value, `-2^255`.
    pub fn min_value() -> I256 {
        I256(U256::one() << 255)
    }

    /// Wraps raw two's-complement bits.
    pub const fn from_raw(raw: U256) -> I256 {
        I256(raw)
    }

    /// Returns the raw two's-complement bits.
    pub const fn to_raw(self) -> U256 {
        self.0
    }

    /// Converts a small signed integer.
    pub fn from_i64(v: i64) -> I256 {
        if v >= 0 {
            I256(U256::from(v as u64))
        } else {
            I256(twos_negate(U256::from(v.unsigned_abs())))
        }
    }

    /// Returns true if the sign bit is set.
    pub fn is_negative(self) -> bool {
        self.0.bit(255)
    }

    /// Magnitude as an unsigned 256-bit value.
    ///
    /// Well-defined for every value including `min_value()`, whose magnitude
    /// `2^255` fits in a `U256`.
    fn magnitude(self) -> U256 {
        if self.is_negative() {
            twos_negate(self.0)
        } else {
            self.0
        }
    }

    /// Builds a value from a sign and magnitude, checking representability.
    fn from_sign_magnitude(negative: bool, mag: U256) -> Option<I256> {
        if mag.is_zero() {
            return Some(I256::zero());
        }
        if negative {
            // |min| = 2^255
            if mag > U256::one() << 255 {
                return None;
            }
            Some(I256(twos_negate(mag)))
        } else {
            if mag > U256::MAX >> 1 {
                return None;
            }
            Some(I256(mag))
        }
    }

    /// Checked addition; `None` on signed overflow.
    pub fn checked_add(self, other: I256) -> Option<I256> {
        let (raw, _) = self.0.overflowing_add(other.0);
        let result = I256(raw);
        // Overflow iff both operands share a sign the result does not.
        if self.is_negative() == other.is_negative()
            && result.is_negative() != self.is_negative()
        {
            return None;
        }
        Some(result)
    }

    /// Checked subtraction; `None` on signed overflow.
    pub fn checked_sub(self, other: I256) -> Option<I256> {
        let (raw, _) = self.0.overflowing_sub(other.0);
        let result = I256(raw);
        if self.is_negative() != other.is_negative()
            && result.is_negative() != self.is_negative()
        {
            return None;
        }
        Some(result)
    }

    /// Checked multiplication; `None` on signed overflow.
    pub fn checked_mul(self, other: I256) -> Option<I256> {
        let negative = self.is_negative() != other.is_negative();
        let mag = self.magnitude().checked_mul(other.magnitude())?;
        I256::from_sign_magnitude(negative, mag)
    }

    /// Checked division; `None` on division by zero or `min / -1`.
    pub fn checked_div(self, other: I256) -> Option<I256> {
        if other.0.is_zero() {
            return None;
        }
        let negative = self.is_negative() != other.is_negative();
        let mag = self.magnitude() / other.magnitude();
        I256::from_sign_magnitude(negative, mag)
    }

    /// Checked remainder; `None` on division by zero.
    ///
    /// The result carries the sign of the dividend (truncated division).
    pub fn checked_rem(self, other: I256) -> Option<I256> {
        if other.0.is_zero() {
            return None;
        }
        let mag = self.magnitude() % other.magnitude();
        I256::from_sign_magnitude(self.is_negative(), mag)
    }
}

impl std::fmt::Display for I256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_negative() {
            write!(f, "-{}", self.magnitude())
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Two's-complement negation of raw bits.
fn twos_negate(raw: U256) -> U256 {
    (!raw).overflowing_add(U256::one()).0
}

impl Encode for I256 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let mut buf = [0u8; 32];
        self.0.to_big_endian(&mut buf);
        out.write(&buf);
    }
}

impl Decode for I256 {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let bytes = <[u8; 32]>::decode(input)?;
        Ok(I256(U256::from_big_endian(&bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i(v: i64) -> I256 {
        I256::from_i64(v)
    }

    #[test]
    fn from_i64_roundtrips_sign() {
        assert!(!i(7).is_negative());
        assert!(i(-7).is_negative());
        assert_eq!(i(-7).checked_add(i(7)), Some(I256::zero()));
    }

    #[test]
    fn add_detects_positive_overflow() {
        assert_eq!(I256::max_value().checked_add(i(1)), None);
        assert_eq!(
            I256::max_value().checked_add(i(-1)),
            I256::max_value().checked_sub(i(1))
        );
    }

    #[test]
    fn add_detects_negative_overflow() {
        assert_eq!(I256::min_value().checked_add(i(-1)), None);
        assert_eq!(I256::min_value().checked_add(i(1)).unwrap().checked_sub(i(1)), Some(I256::min_value()));
    }

    #[test]
    fn mul_sign_rules() {
        assert_eq!(i(-3).checked_mul(i(4)), Some(i(-12)));
        assert_eq!(i(-3).checked_mul(i(-4)), Some(i(12)));
    }

    #[test]
    fn div_truncates_toward_zero() {
        assert_eq!(i(-7).checked_div(i(2)), Some(i(-3)));
        assert_eq!(i(7).checked_div(i(-2)), Some(i(-3)));
        assert_eq!(i(-7).checked_rem(i(2)), Some(i(-1)));
    }

    #[test]
    fn div_by_zero_and_min_by_minus_one_fail() {
        assert_eq!(i(1).checked_div(I256::zero()), None);
        assert_eq!(I256::min_value().checked_div(i(-1)), None);
    }

    #[test]
    fn min_value_magnitude_is_representable() {
        // -(2^255) negated back must produce the same bit pattern.
        assert_eq!(
            I256::from_sign_magnitude(true, U256::one() << 255),
            Some(I256::min_value())
        );
    }

    #[test]
    fn encoding_is_raw_big_endian() {
        let v = i(-1);
        let bytes = crate::types::encoding::Encode::to_bytes(&v);
        assert_eq!(bytes.as_slice(), &[0xFF; 32]);
        let back = I256::from_bytes(&bytes).unwrap();
        assert_eq!(back, v);
    }
}
