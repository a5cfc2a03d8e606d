//! Chain-level domain types: addresses, outputs, transactions and the
//! difficulty-adjustment helpers.

pub mod consensus;
pub mod lockup;
pub mod output;
pub mod transaction;
