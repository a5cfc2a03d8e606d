//! Runtime values and their type tags.

use crate::core::lockup::LockupScript;
use crate::types::bytes::Bytes;
use crate::types::numeric::{I256, U256};
use crate::vm::errors::ExecutionError;
use chainvm_derive::BinaryCodec;

/// A value on the operand stack, in locals, or in contract fields.
///
/// Equality is structural. Cloning is cheap for every variant: `ByteVec`
/// shares its buffer and the rest are `Copy`-sized.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
#[repr(u8)]
pub enum Val {
    /// Boolean value.
    Bool(bool) = 0,
    /// 256-bit unsigned integer.
    U256(U256) = 1,
    /// 256-bit signed integer.
    I256(I256) = 2,
    /// Immutable byte sequence.
    ByteVec(Bytes) = 3,
    /// A lockup-script address.
    Address(LockupScript) = 4,
}

/// Static type tag of a [`Val`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
#[repr(u8)]
pub enum ValType {
    Bool = 0,
    U256 = 1,
    I256 = 2,
    ByteVec = 3,
    Address = 4,
}

impl Val {
    /// The zero value of the given type.
    pub fn zero(ty: ValType) -> Val {
        match ty {
            ValType::Bool => Val::Bool(false),
            ValType::U256 => Val::U256(U256::zero()),
            ValType::I256 => Val::I256(I256::zero()),
            ValType::ByteVec => Val::ByteVec(Bytes::default()),
            ValType::Address => Val::Address(LockupScript::asset(Default::default())),
        }
    }

    /// The type tag of this value.
    pub fn ty(&self) -> ValType {
        match self {
            Val::Bool(_) => ValType::Bool,
            Val::U256(_) => ValType::U256,
            Val::I256(_) => ValType::I256,
            Val::ByteVec(_) => ValType::ByteVec,
            Val::Address(_) => ValType::Address,
        }
    }

    /// Type name used in mismatch errors.
    pub fn type_name(&self) -> &'static str {
        self.ty().name()
    }

    /// Extracts a boolean or fails with a type mismatch.
    pub fn into_bool(self) -> Result<bool, ExecutionError> {
        match self {
            Val::Bool(v) => Ok(v),
            other => Err(mismatch("Bool", &other)),
        }
    }

    /// Extracts an unsigned integer or fails with a type mismatch.
    pub fn into_u256(self) -> Result<U256, ExecutionError> {
        match self {
            Val::U256(v) => Ok(v),
            other => Err(mismatch("U256", &other)),
        }
    }

    /// Extracts a signed integer or fails with a type mismatch.
    pub fn into_i256(self) -> Result<I256, ExecutionError> {
        match self {
            Val::I256(v) => Ok(v),
            other => Err(mismatch("I256", &other)),
        }
    }

    /// Extracts a byte vector or fails with a type mismatch.
    pub fn into_bytes(self) -> Result<Bytes, ExecutionError> {
        match self {
            Val::ByteVec(v) => Ok(v),
            other => Err(mismatch("ByteVec", &other)),
        }
    }

    /// Extracts an address or fails with a type mismatch.
    pub fn into_address(self) -> Result<LockupScript, ExecutionError> {
        match self {
            Val::Address(v) => Ok(v),
            other => Err(mismatch("Address", &other)),
        }
    }
}

impl ValType {
    /// Human-readable type name.
    pub const fn name(&self) -> &'static str {
        match self {
            ValType::Bool => "Bool",
            ValType::U256 => "U256",
            ValType::I256 => "I256",
            ValType::ByteVec => "ByteVec",
            ValType::Address => "Address",
        }
    }
}

fn mismatch(expected: &'static str, actual: &Val) -> ExecutionError {
    ExecutionError::TypeMismatch {
        expected,
        actual: actual.type_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};
    use crate::types::hash::Hash;

    #[test]
    fn zero_values_match_their_types() {
        for ty in [
            ValType::Bool,
            ValType::U256,
            ValType::I256,
            ValType::ByteVec,
            ValType::Address,
        ] {
            assert_eq!(Val::zero(ty).ty(), ty);
        }
    }

    #[test]
    fn extractors_enforce_types() {
        assert_eq!(Val::Bool(true).into_bool(), Ok(true));
        assert!(matches!(
            Val::Bool(true).into_u256(),
            Err(ExecutionError::TypeMismatch {
                expected: "U256",
                actual: "Bool"
            })
        ));
    }

    #[test]
    fn val_codec_roundtrip() {
        let vals = [
            Val::Bool(true),
            Val::U256(U256::from(42u64)),
            Val::I256(I256::from_i64(-42)),
            Val::ByteVec(Bytes::from("abc")),
            Val::Address(LockupScript::asset(Hash::of(b"a"))),
        ];
        for val in vals {
            let bytes = val.to_bytes();
            assert_eq!(Val::from_bytes(&bytes).unwrap(), val);
        }
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(Val::ByteVec(Bytes::from("ab")), Val::ByteVec(Bytes::from("ab")));
        assert_ne!(Val::U256(U256::zero()), Val::I256(I256::zero()));
    }
}
