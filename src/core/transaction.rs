//! Transaction shapes consumed by the VM and the emulator.
//!
//! The toolchain does not validate full transactions; it only needs the
//! pieces execution depends on: inputs with their previous outputs, fixed
//! outputs, the gas budget and the serialized script. Block assembly and
//! mempool policy live elsewhere.

use crate::core::output::{AssetOutput, TxOutputRef};
use crate::crypto::Signature;
use crate::types::bytes::Bytes;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::types::numeric::U256;
use chainvm_derive::BinaryCodec;

/// A transaction input: the reference of the output it spends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TxInput {
    /// Output consumed by this input.
    pub output_ref: TxOutputRef,
}

/// The signed-over portion of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct UnsignedTransaction {
    /// Inputs in spend order.
    pub inputs: Vec<TxInput>,
    /// Outputs fixed at build time; generated outputs are appended after
    /// script execution.
    pub fixed_outputs: Vec<AssetOutput>,
    /// Gas budget for executing the script.
    pub gas_limit: u64,
    /// Price per gas unit, paid from the first input's lockup.
    pub gas_price: U256,
    /// Serialized stateful script, if the transaction carries one.
    pub script_bytes: Option<Bytes>,
}

impl UnsignedTransaction {
    /// Computes the transaction id: the Blake2b hash of the encoded body.
    pub fn id(&self) -> Hash {
        let mut h = Hash::hasher();
        h.write(b"TX_ID");
        self.encode(&mut h);
        h.finish()
    }

    /// Total fee the transaction offers: `gas_limit * gas_price`.
    pub fn gas_fee(&self) -> Option<U256> {
        U256::from(self.gas_limit).checked_mul(self.gas_price)
    }
}

/// A transaction with its signature stacks, as carried by the mempool.
///
/// Input signatures unlock the spent outputs; script signatures feed the
/// script's `VerifyTxSignature` instructions. Both stacks are consumed
/// top-down during execution.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TransactionTemplate {
    /// The signed-over body.
    pub unsigned: UnsignedTransaction,
    /// Signatures unlocking the inputs, one per distinct signer.
    pub input_signatures: Vec<Signature>,
    /// Signatures available to the script's signature stack.
    pub script_signatures: Vec<Signature>,
}

impl TransactionTemplate {
    /// The id of the underlying unsigned transaction.
    pub fn id(&self) -> Hash {
        self.unsigned.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lockup::LockupScript;
    use crate::types::encoding::Decode;

    fn sample_unsigned() -> UnsignedTransaction {
        UnsignedTransaction {
            inputs: vec![TxInput {
                output_ref: TxOutputRef::asset(&Hash::of(b"prev"), 0),
            }],
            fixed_outputs: vec![AssetOutput::alf(
                U256::from(10u64),
                LockupScript::asset(Hash::of(b"alice")),
            )],
            gas_limit: 20_000,
            gas_price: U256::from(100u64),
            script_bytes: None,
        }
    }

    #[test]
    fn id_is_deterministic_and_binding() {
        let tx = sample_unsigned();
        assert_eq!(tx.id(), tx.id());

        let mut changed = tx.clone();
        changed.gas_limit += 1;
        assert_ne!(tx.id(), changed.id());
    }

    #[test]
    fn id_ignores_signatures() {
        let tx = sample_unsigned();
        let a = TransactionTemplate {
            unsigned: tx.clone(),
            input_signatures: vec![],
            script_signatures: vec![],
        };
        let b = TransactionTemplate {
            unsigned: tx,
            input_signatures: vec![Signature::zero()],
            script_signatures: vec![Signature::zero()],
        };
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn gas_fee_is_limit_times_price() {
        let tx = sample_unsigned();
        assert_eq!(tx.gas_fee(), Some(U256::from(2_000_000u64)));
    }

    #[test]
    fn template_codec_roundtrip() {
        let template = TransactionTemplate {
            unsigned: sample_unsigned(),
            input_signatures: vec![Signature::zero()],
            script_signatures: vec![Signature::zero(), Signature::zero()],
        };
        let bytes = template.to_bytes();
        assert_eq!(TransactionTemplate::from_bytes(&bytes).unwrap(), template);
    }
}
