//! VM error taxonomy.
//!
//! Execution failures and IO failures are kept orthogonal: an
//! [`ExecutionError`] reflects what the contract did (and still consumes the
//! gas charged so far), while an [`IoFailure`] means the world state is in an
//! indeterminate condition and the transaction must be aborted without
//! charging the user or committing staging.

use crate::core::lockup::ContractId;
use chainvm_derive::Error;

/// Storage failures surfaced while executing against the world state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoFailure {
    /// Contract state could not be loaded from the contract trie.
    #[error("io: failed to load contract state: {0}")]
    LoadContract(String),
    /// Previous outputs could not be loaded from the output trie.
    #[error("io: failed to load outputs: {0}")]
    LoadOutputs(String),
    /// A staged write could not be applied.
    #[error("io: failed to update world state: {0}")]
    UpdateState(String),
}

/// Failures raised by contract execution itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// Push on a full operand or frame stack.
    #[error("stack overflow")]
    StackOverflow,
    /// Pop on an empty stack or below the current frame's segment.
    #[error("stack underflow")]
    StackUnderflow,
    /// The gas budget ran out.
    #[error("out of gas")]
    OutOfGas,
    /// Checked arithmetic failed: overflow, underflow or division by zero.
    #[error("arithmetic error")]
    ArithmeticError,
    /// Unknown opcode byte in serialized code.
    #[error("invalid opcode: {0:#04x}")]
    InvalidOpcode(u8),
    /// Jump target outside the method's instruction range.
    #[error("jump target {target} outside [0, {len}]")]
    InvalidPc { target: i64, len: usize },
    /// Operand type does not match what the instruction expects.
    ///
    /// Compiled code never triggers this; it guards hand-built scripts.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Transaction input index outside the input list.
    #[error("invalid tx input index: {0}")]
    InvalidTxInputIndex(usize),
    /// Referenced transaction input does not exist in the world state.
    #[error("tx input does not exist")]
    NonExistTxInput,
    /// Initial balances were requested for a non-payable entry method.
    #[error("expected non-payable method")]
    ExpectNonPayableMethod,
    /// An asset instruction ran inside a non-payable frame.
    #[error("expected payable method")]
    ExpectPayableMethod,
    /// A balance operation would underflow or address an absent lockup.
    #[error("invalid balances")]
    InvalidBalances,
    /// The first input cannot cover the transaction's gas fee.
    #[error("unable to pay gas fee")]
    UnableToPayGasFee,
    /// Contract destruction refunds must target an asset address.
    #[error("invalid address type in contract destroy")]
    InvalidAddressTypeInContractDestroy,
    /// A contract's asset was consumed but never re-emitted as an output.
    #[error("contract asset used but not flushed")]
    ContractAssetUnflushed,
    /// `UseContractAssets` on a contract that is already in use.
    #[error("contract asset already in use")]
    ContractAssetAlreadyInUsing,
    /// An output was generated for a contract whose asset was never used.
    #[error("contract asset not loaded: {0}")]
    ContractAssetNotLoaded(ContractId),
    /// A stateful-only instruction ran under a stateless context.
    #[error("instruction requires a stateful context")]
    ExpectStatefulContext,
    /// Method index outside the script or contract method table.
    #[error("invalid method index: {0}")]
    InvalidMethodIndex(u8),
    /// External call to a private method.
    #[error("external call to private method {0}")]
    ExternalPrivateMethodCall(u8),
    /// A method was entered or completed with the wrong number of values.
    #[error("method arity mismatch: expected {expected} values, got {actual}")]
    InvalidMethodArity { expected: usize, actual: usize },
    /// `DestroyContract` ran in a frame that belongs to no contract.
    #[error("destroy called outside a contract method")]
    DestroyOutsideContract,
    /// Referenced contract does not exist in the world state.
    #[error("contract does not exist: {0}")]
    NonExistContract(ContractId),
    /// A value could not be converted to the requested shape.
    #[error("invalid conversion")]
    InvalidConversion,
    /// The tx signature stack is exhausted.
    #[error("insufficient signatures")]
    InsufficientSignatures,
    /// A transaction signature failed verification.
    #[error("signature verification failed")]
    SignatureVerificationFailed,
    /// Local variable index outside the frame's locals.
    #[error("invalid local index: {0}")]
    InvalidLocalIndex(u16),
    /// Field index outside the contract's fields.
    #[error("invalid field index: {0}")]
    InvalidFieldIndex(u16),
    /// Serialized code could not be decoded.
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

/// Two-level VM result error: IO failures or execution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    /// The world state is indeterminate; abort without commit.
    #[error("{0}")]
    Io(IoFailure),
    /// The contract failed; gas up to the failing instruction is consumed.
    #[error("{0}")]
    Execution(ExecutionError),
}

impl From<IoFailure> for VmError {
    fn from(value: IoFailure) -> Self {
        VmError::Io(value)
    }
}

impl From<ExecutionError> for VmError {
    fn from(value: ExecutionError) -> Self {
        VmError::Execution(value)
    }
}

/// Result type threaded through every VM step.
pub type ExeResult<T> = Result<T, VmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_execution_display_distinctly() {
        let io: VmError = IoFailure::LoadContract("trie miss".into()).into();
        let exe: VmError = ExecutionError::OutOfGas.into();
        assert!(io.to_string().starts_with("io:"));
        assert_eq!(exe.to_string(), "out of gas");
    }

    #[test]
    fn from_impls_compose_with_question_mark() {
        fn io() -> ExeResult<()> {
            Err(IoFailure::UpdateState("disk".into()))?;
            Ok(())
        }
        fn exe() -> ExeResult<()> {
            Err(ExecutionError::StackOverflow)?;
            Ok(())
        }
        assert!(matches!(io(), Err(VmError::Io(_))));
        assert!(matches!(exe(), Err(VmError::Execution(_))));
    }
}
