//! Gas accounting.
//!
//! Every instruction charges gas before touching any state; the charge
//! itself is the only mutation allowed to precede a failure. Costs come in
//! two parts: a per-opcode base advertised by the instruction table, and
//! size-dependent surcharges computed here for hashing and byte-vector work.

use crate::types::numeric::U256;
use crate::vm::errors::ExecutionError;

/// Minimum gas a transaction must provide.
pub const MINIMAL_GAS: u64 = 20_000;

/// Hard per-transaction gas ceiling.
pub const MAXIMAL_GAS_PER_TX: u64 = 625_000;

/// Gas charged when any frame is pushed, including the entry frame.
///
/// `CallLocal`/`CallExternal` advertise the same figure as their base gas;
/// `instruction_table_call_costs_match` pins the two together.
pub const CALL_BASE_GAS: u64 = 20;

/// Fixed overhead of a hashing instruction.
pub const HASH_BASE_GAS: u64 = 30;

/// Per-32-byte-word surcharge of a hashing instruction.
pub const HASH_WORD_GAS: u64 = 6;

/// Per-32-byte-word surcharge of byte-vector operations.
pub const BYTES_WORD_GAS: u64 = 1;

/// Gas charged per 1 KiB of deployed or executed code by `check_code_size`.
pub const CODE_KIB_GAS: u64 = 200;

/// Remaining gas for one execution.
///
/// The box only ever decreases; `gas_used` against the initial budget is the
/// caller's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasBox(u64);

impl GasBox {
    /// A budget of `amount` gas units.
    pub const fn new(amount: u64) -> GasBox {
        GasBox(amount)
    }

    /// Gas still available.
    pub const fn remaining(&self) -> u64 {
        self.0
    }

    /// Charges `amount` gas, failing with `OutOfGas` when the budget is
    /// smaller than the charge.
    pub fn charge(&mut self, amount: u64) -> Result<(), ExecutionError> {
        if self.0 < amount {
            self.0 = 0;
            return Err(ExecutionError::OutOfGas);
        }
        self.0 -= amount;
        Ok(())
    }
}

/// Number of 32-byte words covering `len` bytes.
fn words(len: usize) -> u64 {
    (len as u64).div_ceil(32)
}

/// Size-dependent surcharge of hashing `len` input bytes.
///
/// The base cost is carried by the instruction table; this is the part that
/// scales with the input.
pub fn hash_surcharge(len: usize) -> u64 {
    words(len) * HASH_WORD_GAS
}

/// Size-dependent surcharge of byte-vector operations over `len` bytes.
pub fn bytes_surcharge(len: usize) -> u64 {
    words(len) * BYTES_WORD_GAS
}

/// Gas cost of carrying `len` bytes of code in a transaction.
pub fn code_size_gas(len: usize) -> u64 {
    (len as u64).div_ceil(1024) * CODE_KIB_GAS
}

/// Price per gas unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GasPrice(pub U256);

impl GasPrice {
    /// Total fee for `gas` units at this price.
    pub fn fee(&self, gas: u64) -> Option<U256> {
        self.0.checked_mul(U256::from(gas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_decreases_and_fails_at_zero() {
        let mut gas = GasBox::new(10);
        gas.charge(4).unwrap();
        assert_eq!(gas.remaining(), 6);
        gas.charge(6).unwrap();
        assert_eq!(gas.remaining(), 0);
        assert_eq!(gas.charge(1), Err(ExecutionError::OutOfGas));
    }

    #[test]
    fn failed_charge_drains_the_box() {
        let mut gas = GasBox::new(5);
        assert_eq!(gas.charge(10), Err(ExecutionError::OutOfGas));
        assert_eq!(gas.remaining(), 0);
    }

    #[test]
    fn surcharges_round_up_to_words() {
        assert_eq!(hash_surcharge(0), 0);
        assert_eq!(hash_surcharge(1), HASH_WORD_GAS);
        assert_eq!(hash_surcharge(32), HASH_WORD_GAS);
        assert_eq!(hash_surcharge(33), 2 * HASH_WORD_GAS);
    }

    #[test]
    fn code_size_gas_rounds_up_to_kib() {
        assert_eq!(code_size_gas(0), 0);
        assert_eq!(code_size_gas(1), CODE_KIB_GAS);
        assert_eq!(code_size_gas(1024), CODE_KIB_GAS);
        assert_eq!(code_size_gas(1025), 2 * CODE_KIB_GAS);
    }

    #[test]
    fn gas_price_fee_checks_overflow() {
        assert_eq!(
            GasPrice(U256::from(2u64)).fee(21),
            Some(U256::from(42u64))
        );
        assert_eq!(GasPrice(U256::MAX).fee(2), None);
    }
}
