//! Per-execution contract pool.
//!
//! Caches the contracts one execution has touched and tracks each
//! contract's asset-use state machine:
//!
//! ```text
//! NotUsed --use_asset--> InUse --flush_asset--> Flushed
//!            InUse/Flushed --mark_destroyed--> (gone)
//! ```
//!
//! An execution must not finish with any contract still `InUse`: a consumed
//! contract asset that was never re-emitted as an output would destroy funds.

use crate::core::lockup::ContractId;
use crate::state::world::CachedWorldState;
use crate::vm::errors::{ExeResult, ExecutionError};
use crate::vm::script::StatefulContract;
use crate::vm::value::Val;
use std::collections::HashMap;
use std::sync::Arc;

/// Asset-use state of one contract within one execution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractAssetState {
    /// The contract's asset output has not been touched.
    NotUsed,
    /// The asset output was consumed; a replacement must be generated.
    InUse,
    /// A replacement output was generated.
    Flushed,
}

/// A contract loaded into the pool: its code and working field values.
pub struct LoadedContract {
    /// Decoded contract code, shared with the world-state code cache.
    pub code: Arc<StatefulContract>,
    /// Working copy of the contract's fields; written through to staging on
    /// every store.
    pub fields: Vec<Val>,
}

/// Cache of contracts loaded by the current execution.
#[derive(Default)]
pub struct ContractPool {
    loaded: HashMap<ContractId, LoadedContract>,
    asset_states: HashMap<ContractId, ContractAssetState>,
}

impl ContractPool {
    /// An empty pool.
    pub fn new() -> ContractPool {
        ContractPool::default()
    }

    /// Loads a contract through the staging world state, caching it.
    pub fn load(
        &mut self,
        world: &CachedWorldState<'_>,
        id: ContractId,
    ) -> ExeResult<&mut LoadedContract> {
        if !self.loaded.contains_key(&id) {
            let (code, record) = world.get_contract(&id)?;
            self.loaded.insert(
                id,
                LoadedContract {
                    code,
                    fields: record.fields,
                },
            );
        }
        Ok(self.loaded.get_mut(&id).expect("just inserted"))
    }

    /// Borrows an already-loaded contract.
    pub fn get_loaded(&mut self, id: &ContractId) -> Option<&mut LoadedContract> {
        self.loaded.get_mut(id)
    }

    /// Current asset state of a contract.
    pub fn asset_state(&self, id: &ContractId) -> ContractAssetState {
        self.asset_states
            .get(id)
            .copied()
            .unwrap_or(ContractAssetState::NotUsed)
    }

    /// `NotUsed -> InUse`; anything else is a double use.
    pub fn use_asset(&mut self, id: ContractId) -> Result<(), ExecutionError> {
        match self.asset_state(&id) {
            ContractAssetState::NotUsed => {
                self.asset_states.insert(id, ContractAssetState::InUse);
                Ok(())
            }
            ContractAssetState::InUse | ContractAssetState::Flushed => {
                Err(ExecutionError::ContractAssetAlreadyInUsing)
            }
        }
    }

    /// `InUse -> Flushed`; flushing an unused asset is a logic error.
    pub fn flush_asset(&mut self, id: ContractId) -> Result<(), ExecutionError> {
        match self.asset_state(&id) {
            ContractAssetState::InUse => {
                self.asset_states.insert(id, ContractAssetState::Flushed);
                Ok(())
            }
            _ => Err(ExecutionError::ContractAssetNotLoaded(id)),
        }
    }

    /// Removes a destroyed contract from the pool.
    ///
    /// Only used (`InUse` or `Flushed`) contracts can be destroyed; the
    /// asset must have been consumed so no output is orphaned.
    pub fn mark_destroyed(&mut self, id: ContractId) -> Result<(), ExecutionError> {
        match self.asset_state(&id) {
            ContractAssetState::InUse | ContractAssetState::Flushed => {
                self.asset_states.remove(&id);
                self.loaded.remove(&id);
                Ok(())
            }
            ContractAssetState::NotUsed => Err(ExecutionError::ContractAssetNotLoaded(id)),
        }
    }

    /// Fails when any contract would end the execution `InUse`.
    pub fn check_all_flushed(&self) -> Result<(), ExecutionError> {
        if self
            .asset_states
            .values()
            .any(|s| *s == ContractAssetState::InUse)
        {
            return Err(ExecutionError::ContractAssetUnflushed);
        }
        Ok(())
    }
}
