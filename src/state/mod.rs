//! World state: persisted tries, the staging overlay, and the pruner.

pub mod contract;
pub mod pruner;
pub mod smt;
pub mod store;
pub mod world;
