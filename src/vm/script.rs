//! Compiled script and contract artifacts.
//!
//! A [`Method`] is an immutable sequence of instructions plus its frame
//! layout. Scripts and contracts are non-empty method collections; method 0
//! is always the entry point. The on-chain representation of each artifact is
//! its byte-serialized method array, and decoding re-validates the packaging
//! invariants so no malformed artifact can enter the world state.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::types::hash::Hash;
use crate::vm::instr::Instr;
use chainvm_derive::BinaryCodec;

/// One compiled method.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Method {
    /// Whether the method is callable from outside its script/contract.
    pub is_public: bool,
    /// Whether the method may move assets.
    pub is_payable: bool,
    /// Number of arguments popped into the frame's first locals.
    pub args_len: u8,
    /// Total local slots, arguments included.
    pub locals_len: u16,
    /// Number of values the method returns.
    pub returns_len: u8,
    /// Instruction sequence; the pc ranges over `[0, instrs.len()]`.
    pub instrs: Vec<Instr>,
}

/// Why a method collection cannot be packaged into an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    /// The method list is empty.
    EmptyMethods,
    /// Method 0 of a script must be public.
    EntryNotPublic,
    /// Non-entry script methods must be private.
    NonEntryPublic(usize),
}

impl std::fmt::Display for PackageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PackageError::EmptyMethods => write!(f, "artifact needs at least one method"),
            PackageError::EntryNotPublic => write!(f, "entry method must be public"),
            PackageError::NonEntryPublic(i) => {
                write!(f, "script method {} must be private", i)
            }
        }
    }
}

impl std::error::Error for PackageError {}

/// Validates the script invariants: non-empty, public entry, private rest.
fn check_script_methods(methods: &[Method]) -> Result<(), PackageError> {
    let entry = methods.first().ok_or(PackageError::EmptyMethods)?;
    if !entry.is_public {
        return Err(PackageError::EntryNotPublic);
    }
    if let Some(i) = methods.iter().skip(1).position(|m| m.is_public) {
        return Err(PackageError::NonEntryPublic(i + 1));
    }
    Ok(())
}

macro_rules! impl_script_codec {
    ($ty:ident, methods) => {
        impl Encode for $ty {
            fn encode<S: EncodeSink>(&self, out: &mut S) {
                self.methods.encode(out);
            }
        }

        impl Decode for $ty {
            fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                let methods = Vec::<Method>::decode(input)?;
                $ty::from_methods(methods).map_err(|_| DecodeError::InvalidValue)
            }
        }
    };
}

/// A script executed without any world state: pure asset unlock logic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatelessScript {
    methods: Vec<Method>,
}

impl StatelessScript {
    /// Packages methods into a script, enforcing the entry invariants.
    pub fn from_methods(methods: Vec<Method>) -> Result<StatelessScript, PackageError> {
        check_script_methods(&methods)?;
        Ok(StatelessScript { methods })
    }

    /// The method table.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// The entry method.
    pub fn entry(&self) -> &Method {
        &self.methods[0]
    }
}

impl_script_codec!(StatelessScript, methods);

/// A script executed against the staging world state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulScript {
    methods: Vec<Method>,
}

impl StatefulScript {
    /// Packages methods into a script, enforcing the entry invariants.
    pub fn from_methods(methods: Vec<Method>) -> Result<StatefulScript, PackageError> {
        check_script_methods(&methods)?;
        Ok(StatefulScript { methods })
    }

    /// The method table.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// The entry method.
    pub fn entry(&self) -> &Method {
        &self.methods[0]
    }
}

impl_script_codec!(StatefulScript, methods);

/// A deployable contract: persisted fields plus its method table.
///
/// Unlike scripts, contracts may expose any mix of public and private
/// methods; only emptiness is rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatefulContract {
    /// Number of persisted field slots (arrays flattened).
    pub field_len: u16,
    methods: Vec<Method>,
}

impl StatefulContract {
    /// Packages a contract, rejecting an empty method table.
    pub fn from_methods(
        field_len: u16,
        methods: Vec<Method>,
    ) -> Result<StatefulContract, PackageError> {
        if methods.is_empty() {
            return Err(PackageError::EmptyMethods);
        }
        Ok(StatefulContract { field_len, methods })
    }

    /// The method table.
    pub fn methods(&self) -> &[Method] {
        &self.methods
    }

    /// Looks up a method by index.
    pub fn method(&self, index: u8) -> Option<&Method> {
        self.methods.get(index as usize)
    }

    /// Hash of the serialized contract, used as the code-trie key.
    pub fn code_hash(&self) -> Hash {
        let mut h = Hash::hasher();
        h.write(b"CONTRACT_CODE");
        self.encode(&mut h);
        h.finish()
    }
}

impl Encode for StatefulContract {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.field_len.encode(out);
        self.methods.encode(out);
    }
}

impl Decode for StatefulContract {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let field_len = u16::decode(input)?;
        let methods = Vec::<Method>::decode(input)?;
        StatefulContract::from_methods(field_len, methods).map_err(|_| DecodeError::InvalidValue)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::types::numeric::U256;

    /// A minimal public entry method for artifact tests.
    pub fn entry_method(instrs: Vec<Instr>) -> Method {
        Method {
            is_public: true,
            is_payable: false,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs,
        }
    }

    fn private_method() -> Method {
        Method {
            is_public: false,
            is_payable: false,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs: vec![Instr::Return],
        }
    }

    #[test]
    fn script_requires_public_entry() {
        let mut bad = entry_method(vec![Instr::Return]);
        bad.is_public = false;
        assert_eq!(
            StatefulScript::from_methods(vec![bad]),
            Err(PackageError::EntryNotPublic)
        );
    }

    #[test]
    fn script_rejects_public_non_entry() {
        let methods = vec![entry_method(vec![Instr::Return]), entry_method(vec![])];
        assert_eq!(
            StatefulScript::from_methods(methods),
            Err(PackageError::NonEntryPublic(1))
        );
    }

    #[test]
    fn empty_method_list_rejected_everywhere() {
        assert_eq!(
            StatelessScript::from_methods(vec![]),
            Err(PackageError::EmptyMethods)
        );
        assert_eq!(
            StatefulContract::from_methods(0, vec![]),
            Err(PackageError::EmptyMethods)
        );
    }

    #[test]
    fn script_codec_roundtrip() {
        let script = StatefulScript::from_methods(vec![
            entry_method(vec![
                Instr::U256Const(U256::from(1u64)),
                Instr::CallLocal(1),
                Instr::Return,
            ]),
            private_method(),
        ])
        .unwrap();
        let bytes = script.to_bytes();
        assert_eq!(StatefulScript::from_bytes(&bytes).unwrap(), script);
    }

    #[test]
    fn decoding_revalidates_invariants() {
        // Encode a script-shaped method array with a private entry by hand.
        let mut bad_entry = entry_method(vec![Instr::Return]);
        bad_entry.is_public = false;
        let bytes = vec![bad_entry].to_bytes();
        assert_eq!(
            StatefulScript::from_bytes(&bytes),
            Err(DecodeError::InvalidValue)
        );
    }

    #[test]
    fn contract_codec_roundtrip_and_code_hash() {
        let contract = StatefulContract::from_methods(
            2,
            vec![entry_method(vec![Instr::LoadField(0), Instr::Return])],
        )
        .unwrap();
        let bytes = contract.to_bytes();
        let decoded = StatefulContract::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, contract);
        assert_eq!(decoded.code_hash(), contract.code_hash());

        let other = StatefulContract::from_methods(
            3,
            vec![entry_method(vec![Instr::LoadField(0), Instr::Return])],
        )
        .unwrap();
        assert_ne!(contract.code_hash(), other.code_hash());
    }
}
