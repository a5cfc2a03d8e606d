//! Instruction set definitions.
//!
//! The [`for_each_instr!`] macro holds the canonical instruction table and
//! invokes a callback macro for code generation, so several modules can
//! generate instruction-related code without duplicating the definitions.
//!
//! This module generates:
//! - The [`Instr`] enum with explicit opcode discriminants
//! - `mnemonic()`, `base_gas()`, `is_stateful()` accessors
//!
//! # Wire Format
//!
//! Instructions serialize to a dense byte stream: one opcode byte followed by
//! the immediates in fixed layout (`BinaryCodec` reuses the discriminant as
//! the opcode byte). Serialization and deserialization are bit-exact
//! inverses; unknown opcode bytes fail decoding.
//!
//! # Gas
//!
//! `base_gas()` is the fixed part of an instruction's cost. Hashing and
//! byte-vector instructions add the size-dependent surcharges from
//! [`gas`](crate::vm::gas) at execution time, after their input sizes are
//! known and before any state is mutated.

use crate::core::lockup::LockupScript;
use crate::types::bytes::Bytes;
use crate::types::numeric::{I256, U256};
use chainvm_derive::BinaryCodec;

/// Invokes a callback macro with the complete instruction table.
///
/// Table row: `Name(immediates) = opcode, "MNEMONIC", base_gas, kind` where
/// `kind` is `pure` (legal in both script flavors) or `stateful` (requires
/// the stateful context).
#[macro_export]
macro_rules! for_each_instr {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Constants and stack
            // =========================
            /// Pushes Bool(true).
            ConstTrue = 0x00, "CONST_TRUE", 2, pure,
            /// Pushes Bool(false).
            ConstFalse = 0x01, "CONST_FALSE", 2, pure,
            /// Pushes the immediate U256.
            U256Const(U256) = 0x02, "U256_CONST", 2, pure,
            /// Pushes the immediate I256.
            I256Const(I256) = 0x03, "I256_CONST", 2, pure,
            /// Pushes the immediate byte vector.
            BytesConst(Bytes) = 0x04, "BYTES_CONST", 2, pure,
            /// Pushes the immediate address.
            AddressConst(LockupScript) = 0x05, "ADDRESS_CONST", 2, pure,
            /// Pushes local slot `i` of the current frame.
            LoadLocal(u8) = 0x06, "LOAD_LOCAL", 3, pure,
            /// Pops into local slot `i` of the current frame.
            StoreLocal(u8) = 0x07, "STORE_LOCAL", 3, pure,
            /// Pops and discards the top value.
            Pop = 0x08, "POP", 2, pure,
            // =========================
            // Arithmetic (checked)
            // =========================
            /// Pops two U256, pushes their sum; overflow is an arithmetic error.
            AddU256 = 0x10, "ADD_U256", 5, pure,
            /// Pops two U256, pushes their difference; underflow is an arithmetic error.
            SubU256 = 0x11, "SUB_U256", 5, pure,
            /// Pops two U256, pushes their product; overflow is an arithmetic error.
            MulU256 = 0x12, "MUL_U256", 5, pure,
            /// Pops two U256, pushes their quotient; divisor 0 is an arithmetic error.
            DivU256 = 0x13, "DIV_U256", 5, pure,
            /// Pops two U256, pushes the remainder; divisor 0 is an arithmetic error.
            ModU256 = 0x14, "MOD_U256", 5, pure,
            /// Pops two I256, pushes their sum; overflow is an arithmetic error.
            AddI256 = 0x15, "ADD_I256", 5, pure,
            /// Pops two I256, pushes their difference; overflow is an arithmetic error.
            SubI256 = 0x16, "SUB_I256", 5, pure,
            /// Pops two I256, pushes their product; overflow is an arithmetic error.
            MulI256 = 0x17, "MUL_I256", 5, pure,
            /// Pops two I256, pushes their quotient; divisor 0 and MIN/-1 are arithmetic errors.
            DivI256 = 0x18, "DIV_I256", 5, pure,
            /// Pops two I256, pushes the remainder; divisor 0 is an arithmetic error.
            ModI256 = 0x19, "MOD_I256", 5, pure,
            // =========================
            // Comparison and logic
            // =========================
            /// Pops two values of the same type, pushes structural equality.
            EqVal = 0x20, "EQ", 4, pure,
            /// Pops two values of the same type, pushes structural inequality.
            NeVal = 0x21, "NE", 4, pure,
            /// Pops two U256, pushes `lhs < rhs`.
            LtU256 = 0x22, "LT_U256", 4, pure,
            /// Pops two U256, pushes `lhs <= rhs`.
            LeU256 = 0x23, "LE_U256", 4, pure,
            /// Pops two U256, pushes `lhs > rhs`.
            GtU256 = 0x24, "GT_U256", 4, pure,
            /// Pops two U256, pushes `lhs >= rhs`.
            GeU256 = 0x25, "GE_U256", 4, pure,
            /// Pops a Bool, pushes its negation.
            NotBool = 0x26, "NOT_BOOL", 3, pure,
            /// Pops two Bool, pushes their conjunction.
            AndBool = 0x27, "AND_BOOL", 3, pure,
            /// Pops two Bool, pushes their disjunction.
            OrBool = 0x28, "OR_BOOL", 3, pure,
            /// Pops two ByteVec, pushes their concatenation; gas scales with size.
            ByteVecConcat = 0x29, "BYTEVEC_CONCAT", 2, pure,
            /// Pops a ByteVec, pushes its length as U256.
            ByteVecSize = 0x2A, "BYTEVEC_SIZE", 2, pure,
            // =========================
            // Control flow
            // =========================
            /// Unconditional relative jump; the offset is a signed byte
            /// counted in instructions from the already-advanced pc.
            Jump(i8) = 0x30, "JUMP", 8, pure,
            /// Pops a Bool, jumps when true.
            IfTrue(i8) = 0x31, "IF_TRUE", 8, pure,
            /// Pops a Bool, jumps when false.
            IfFalse(i8) = 0x32, "IF_FALSE", 8, pure,
            /// Pops the method's declared return values and completes the frame.
            Return = 0x33, "RETURN", 8, pure,
            /// Calls method `i` of the current script or contract.
            CallLocal(u8) = 0x34, "CALL_LOCAL", 20, pure,
            /// Pops a contract id (32-byte ByteVec) and calls its method `i`.
            CallExternal(u8) = 0x35, "CALL_EXTERNAL", 20, stateful,
            // =========================
            // Contract fields
            // =========================
            /// Pushes field slot `i` of the current contract.
            LoadField(u16) = 0x40, "LOAD_FIELD", 5, stateful,
            /// Pops into field slot `i` of the current contract.
            StoreField(u16) = 0x41, "STORE_FIELD", 8, stateful,
            // =========================
            // Crypto
            // =========================
            /// Pops a ByteVec, pushes its Blake2b-256 digest; gas scales with size.
            Blake2b = 0x50, "BLAKE2B", 30, pure,
            /// Pops a ByteVec, pushes its Keccak-256 digest; gas scales with size.
            Keccak256 = 0x51, "KECCAK256", 30, pure,
            /// Pops a public key, pops one tx signature, verifies over the tx id.
            VerifyTxSignature = 0x52, "VERIFY_TX_SIGNATURE", 2000, pure,
            /// Pops a 32-byte hash and a 65-byte signature, pushes the
            /// recovered 20-byte eth address.
            EthEcRecover = 0x53, "ETH_ECRECOVER", 2500, pure,
            // =========================
            // Events
            // =========================
            /// Pops an event id ByteVec then `n` values, emits a log record.
            Log(u8) = 0x60, "LOG", 8, stateful,
            // =========================
            // Assets and contracts (payable frames only)
            // =========================
            /// Pops [address, amount]: moves amount from the address's
            /// spendable balance to its approved balance.
            ApproveAlf = 0x70, "APPROVE_ALF", 10, stateful,
            /// Pops [from, to, amount]: moves amount from `from`'s approved
            /// balance into `to`'s pending output balance.
            TransferAlf = 0x71, "TRANSFER_ALF", 14, stateful,
            /// Pops a contract id, consumes the contract's asset output into
            /// its spendable balance.
            UseContractAssets = 0x72, "USE_CONTRACT_ASSETS", 14, stateful,
            /// Pops an address, drains its pending output balance into a
            /// generated output.
            GenerateOutput = 0x73, "GENERATE_OUTPUT", 14, stateful,
            /// Pops a refund address, destroys the current contract and
            /// refunds its remaining balance.
            DestroyContract = 0x74, "DESTROY_CONTRACT", 20, stateful,
        }
    };
}

macro_rules! stateful_flag {
    (pure) => {
        false
    };
    (stateful) => {
        true
    };
}

macro_rules! define_instrs {
    (
        $(
            $(#[$doc:meta])*
            $name:ident $(($($imm:ty),+))? = $opcode:literal, $mnemonic:literal, $gas:literal, $kind:ident
        ),* $(,)?
    ) => {
        /// A VM instruction with its immediate operands.
        #[derive(Debug, Clone, PartialEq, Eq, BinaryCodec)]
        #[repr(u8)]
        pub enum Instr {
            $(
                $(#[$doc])*
                $name $(($($imm),+))? = $opcode,
            )*
        }

        impl Instr {
            /// Returns the opcode byte.
            pub const fn opcode(&self) -> u8 {
                match self {
                    $( Instr::$name { .. } => $opcode, )*
                }
            }

            /// Returns the assembly mnemonic.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instr::$name { .. } => $mnemonic, )*
                }
            }

            /// Returns the fixed part of this instruction's gas cost.
            pub const fn base_gas(&self) -> u64 {
                match self {
                    $( Instr::$name { .. } => $gas, )*
                }
            }

            /// Returns true when the instruction requires the stateful context.
            pub const fn is_stateful(&self) -> bool {
                match self {
                    $( Instr::$name { .. } => stateful_flag!($kind), )*
                }
            }
        }
    };
}

for_each_instr!(define_instrs);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::encoding::{Decode, DecodeError, Encode};
    use crate::types::hash::Hash;
    use crate::vm::gas;

    fn sample_instrs() -> Vec<Instr> {
        vec![
            Instr::ConstTrue,
            Instr::U256Const(U256::from(7u64)),
            Instr::I256Const(I256::from_i64(-7)),
            Instr::BytesConst(Bytes::from("payload")),
            Instr::AddressConst(LockupScript::asset(Hash::of(b"a"))),
            Instr::LoadLocal(3),
            Instr::AddU256,
            Instr::Jump(-5),
            Instr::IfFalse(17),
            Instr::CallLocal(2),
            Instr::CallExternal(1),
            Instr::LoadField(300),
            Instr::Log(4),
            Instr::Return,
        ]
    }

    #[test]
    fn codec_roundtrip_for_every_shape() {
        for instr in sample_instrs() {
            let bytes = instr.to_bytes();
            assert_eq!(Instr::from_bytes(&bytes).unwrap(), instr, "{:?}", instr);
        }
    }

    #[test]
    fn wire_format_starts_with_opcode_byte() {
        for instr in sample_instrs() {
            assert_eq!(instr.to_bytes()[0], instr.opcode(), "{:?}", instr);
        }
    }

    #[test]
    fn unknown_opcode_fails_decoding() {
        assert_eq!(Instr::from_bytes(&[0xFE]), Err(DecodeError::InvalidValue));
    }

    #[test]
    fn jump_offset_is_single_signed_byte() {
        let bytes = Instr::Jump(-2).to_bytes();
        assert_eq!(bytes.as_slice(), &[0x30, 0xFE]);
    }

    #[test]
    fn stateful_flags_split_the_groups() {
        assert!(!Instr::AddU256.is_stateful());
        assert!(!Instr::Blake2b.is_stateful());
        assert!(Instr::LoadField(0).is_stateful());
        assert!(Instr::ApproveAlf.is_stateful());
        assert!(Instr::CallExternal(0).is_stateful());
    }

    #[test]
    fn instruction_table_call_costs_match() {
        assert_eq!(Instr::CallLocal(0).base_gas(), gas::CALL_BASE_GAS);
        assert_eq!(Instr::CallExternal(0).base_gas(), gas::CALL_BASE_GAS);
        assert_eq!(Instr::Blake2b.base_gas(), gas::HASH_BASE_GAS);
        assert_eq!(Instr::Keccak256.base_gas(), gas::HASH_BASE_GAS);
    }
}
