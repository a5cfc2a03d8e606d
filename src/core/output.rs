//! Transaction outputs and output references.

use crate::core::lockup::{ContractId, LockupScript, TokenId};
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::types::numeric::U256;
use chainvm_derive::BinaryCodec;

/// An output spendable under an asset or contract lockup.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct AssetOutput {
    /// ALF amount carried by the output.
    pub amount: U256,
    /// Spend condition.
    pub lockup: LockupScript,
    /// Token amounts carried alongside the ALF amount.
    pub tokens: Vec<(TokenId, U256)>,
}

impl AssetOutput {
    /// Plain ALF output with no tokens.
    pub fn alf(amount: U256, lockup: LockupScript) -> AssetOutput {
        AssetOutput {
            amount,
            lockup,
            tokens: Vec::new(),
        }
    }
}

/// The single asset output a live contract holds in the world state.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct ContractOutput {
    /// ALF amount held by the contract.
    pub amount: U256,
    /// Owning contract.
    pub id: ContractId,
    /// Token amounts held by the contract.
    pub tokens: Vec<(TokenId, U256)>,
}

impl ContractOutput {
    /// Views the contract output as a spendable asset output.
    pub fn to_asset_output(&self) -> AssetOutput {
        AssetOutput {
            amount: self.amount,
            lockup: LockupScript::contract(self.id),
            tokens: self.tokens.clone(),
        }
    }
}

/// Any output stored in the output trie.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
#[repr(u8)]
pub enum Output {
    /// Output under an asset or contract lockup, spendable by transactions.
    Asset(AssetOutput) = 0,
    /// The dedicated asset output of a live contract.
    Contract(ContractOutput) = 1,
}

/// Reference to an output in the world state.
///
/// Derived deterministically from the creating transaction and the output's
/// position, so every node computes identical references.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, BinaryCodec)]
pub struct TxOutputRef(pub Hash);

impl TxOutputRef {
    /// Reference for the `index`-th asset output of transaction `tx_id`.
    pub fn asset(tx_id: &Hash, index: usize) -> TxOutputRef {
        let mut h = Hash::hasher();
        h.write(b"ASSET_OUTPUT_REF");
        h.write(tx_id.as_slice());
        (index as u32).encode(&mut h);
        TxOutputRef(h.finish())
    }

    /// Reference for a contract output generated at `index` by `tx_id`.
    ///
    /// The output itself participates in the derivation so that replacing a
    /// contract's asset yields a fresh reference even at a stable index.
    pub fn contract(tx_id: &Hash, output: &ContractOutput, index: usize) -> TxOutputRef {
        let mut h = Hash::hasher();
        h.write(b"CONTRACT_OUTPUT_REF");
        h.write(tx_id.as_slice());
        output.encode(&mut h);
        (index as u32).encode(&mut h);
        TxOutputRef(h.finish())
    }

    /// The underlying key bytes, used to address the output trie.
    pub fn key(&self) -> Hash {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::Decode;

    fn contract_output(amount: u64) -> ContractOutput {
        ContractOutput {
            amount: U256::from(amount),
            id: ContractId(Hash::of(b"token")),
            tokens: vec![],
        }
    }

    #[test]
    fn output_codec_roundtrip() {
        let out = AssetOutput {
            amount: U256::from(100u64),
            lockup: LockupScript::asset(Hash::of(b"alice")),
            tokens: vec![(TokenId(Hash::of(b"t")), U256::from(5u64))],
        };
        let bytes = out.to_bytes();
        assert_eq!(AssetOutput::from_bytes(&bytes).unwrap(), out);
    }

    #[test]
    fn refs_are_deterministic() {
        let tx_id = Hash::of(b"tx");
        assert_eq!(TxOutputRef::asset(&tx_id, 0), TxOutputRef::asset(&tx_id, 0));
        assert_ne!(TxOutputRef::asset(&tx_id, 0), TxOutputRef::asset(&tx_id, 1));
    }

    #[test]
    fn contract_ref_depends_on_output_contents() {
        let tx_id = Hash::of(b"tx");
        let a = TxOutputRef::contract(&tx_id, &contract_output(1), 0);
        let b = TxOutputRef::contract(&tx_id, &contract_output(2), 0);
        assert_ne!(a, b);
    }

    #[test]
    fn contract_output_converts_to_asset_output() {
        let out = contract_output(42);
        let asset = out.to_asset_output();
        assert_eq!(asset.amount, U256::from(42u64));
        assert_eq!(asset.lockup, LockupScript::contract(out.id));
    }
}
