//! Persisted contract state records.

use crate::core::output::TxOutputRef;
use crate::types::hash::Hash;
use crate::vm::value::Val;
use chainvm_derive::BinaryCodec;

/// The contract-trie record for one live contract.
///
/// Code is stored once in the code trie and referenced by hash; fields and
/// the reference to the contract's current asset output live here and change
/// as the contract executes.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct ContractStateRecord {
    /// Key of the contract's code in the code trie.
    pub code_hash: Hash,
    /// Current values of the contract's persisted field slots.
    pub fields: Vec<Val>,
    /// Reference to the contract's current asset output in the output trie.
    pub asset_ref: TxOutputRef,
}

impl ContractStateRecord {
    /// Hash of the record, used for staging change detection.
    pub fn state_hash(&self) -> Hash {
        use crate::types::encoding::Encode;
        let mut h = Hash::hasher();
        h.write(b"CONTRACT_STATE");
        self.encode(&mut h);
        h.finish()
    }
}
