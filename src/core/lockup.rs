//! Lockup scripts and chain identities.
//!
//! A lockup script is the opaque spend condition attached to an output; the
//! VM treats it as an address value. Two forms exist: asset lockups (a
//! public-key hash) and contract lockups (the contract's id).

use crate::types::hash::Hash;
use chainvm_derive::BinaryCodec;
use std::fmt;

/// Identifier of a deployed contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BinaryCodec)]
pub struct ContractId(pub Hash);

impl ContractId {
    /// Returns the id as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }

    /// Builds a contract id from exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Option<ContractId> {
        Hash::from_slice(slice).map(ContractId)
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a token class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BinaryCodec)]
pub struct TokenId(pub Hash);

/// Spend condition attached to an output, used by the VM as an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BinaryCodec)]
#[repr(u8)]
pub enum LockupScript {
    /// Pay-to-public-key-hash asset lockup.
    Asset(Hash) = 0,
    /// Output owned by a contract.
    Contract(ContractId) = 1,
}

impl LockupScript {
    /// Asset lockup from a public-key hash.
    pub fn asset(hash: Hash) -> LockupScript {
        LockupScript::Asset(hash)
    }

    /// Contract lockup for the given contract id.
    pub fn contract(id: ContractId) -> LockupScript {
        LockupScript::Contract(id)
    }

    /// Returns true for asset lockups.
    pub fn is_asset(&self) -> bool {
        matches!(self, LockupScript::Asset(_))
    }

    /// Returns the contract id for contract lockups.
    pub fn contract_id(&self) -> Option<ContractId> {
        match self {
            LockupScript::Contract(id) => Some(*id),
            LockupScript::Asset(_) => None,
        }
    }
}

impl fmt::Display for LockupScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockupScript::Asset(hash) => write!(f, "asset:{}", hash),
            LockupScript::Contract(id) => write!(f, "contract:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, Encode};

    #[test]
    fn lockup_codec_roundtrip() {
        let asset = LockupScript::asset(Hash::of(b"key"));
        let contract = LockupScript::contract(ContractId(Hash::of(b"c")));
        for lockup in [asset, contract] {
            let bytes = lockup.to_bytes();
            assert_eq!(LockupScript::from_bytes(&bytes).unwrap(), lockup);
        }
    }

    #[test]
    fn contract_id_accessor() {
        let id = ContractId(Hash::of(b"c"));
        assert_eq!(LockupScript::contract(id).contract_id(), Some(id));
        assert_eq!(LockupScript::asset(Hash::zero()).contract_id(), None);
        assert!(LockupScript::asset(Hash::zero()).is_asset());
    }
}
