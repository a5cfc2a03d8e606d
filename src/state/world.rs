//! Persisted world state and its staging overlay.
//!
//! The persisted state is three sparse merkle tries: outputs (the UTXO set),
//! contract state and contract code. Executions never touch the tries
//! directly; they run against a [`CachedWorldState`] overlay that buffers
//! every write and either vanishes on failure or is folded back into the
//! tries by [`PersistedWorldState::apply`] on success.

use crate::core::lockup::ContractId;
use crate::core::output::{AssetOutput, ContractOutput, Output, TxOutputRef};
use crate::core::transaction::TxInput;
use crate::state::contract::ContractStateRecord;
use crate::state::smt::{hash_to_h256, h256_to_hash, Trie, TrieValue};
use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use crate::vm::errors::{ExeResult, ExecutionError, IoFailure};
use crate::vm::script::StatefulContract;
use crate::vm::value::Val;
use chainvm_derive::BinaryCodec;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Merkle roots of the three tries; together they identify a world state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct WorldStateRoots {
    pub outputs: Hash,
    pub contracts: Hash,
    pub code: Hash,
}

/// An immutable snapshot of the chain state, rooted at three merkle roots.
///
/// Executions treat it as read-only; only [`apply`](Self::apply) mutates it,
/// and only with the writes of a successfully finished staging overlay.
pub struct PersistedWorldState {
    outputs: Trie,
    contracts: Trie,
    code: Trie,
    /// Decoded-code cache shared by every execution over this state.
    code_cache: DashMap<Hash, Arc<StatefulContract>>,
}

impl Default for PersistedWorldState {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistedWorldState {
    /// An empty world state.
    pub fn new() -> PersistedWorldState {
        PersistedWorldState {
            outputs: Trie::default(),
            contracts: Trie::default(),
            code: Trie::default(),
            code_cache: DashMap::new(),
        }
    }

    /// The current merkle roots.
    pub fn roots(&self) -> WorldStateRoots {
        WorldStateRoots {
            outputs: h256_to_hash(self.outputs.root()),
            contracts: h256_to_hash(self.contracts.root()),
            code: h256_to_hash(self.code.root()),
        }
    }

    /// Opens a staging overlay over this snapshot.
    pub fn staging(&self) -> CachedWorldState<'_> {
        CachedWorldState {
            base: self,
            outputs: BTreeMap::new(),
            contracts: BTreeMap::new(),
            code: BTreeMap::new(),
        }
    }

    fn read(trie: &Trie, key: &Hash) -> Result<Option<Vec<u8>>, String> {
        let value = trie
            .get(&hash_to_h256(key))
            .map_err(|e| e.to_string())?;
        if value.0.is_empty() {
            Ok(None)
        } else {
            Ok(Some(value.0))
        }
    }

    /// Reads an output from the output trie.
    pub fn get_output(&self, output_ref: &TxOutputRef) -> Result<Option<Output>, IoFailure> {
        let raw = Self::read(&self.outputs, &output_ref.key()).map_err(IoFailure::LoadOutputs)?;
        raw.map(|bytes| {
            Output::from_bytes(&bytes).map_err(|e| IoFailure::LoadOutputs(e.to_string()))
        })
        .transpose()
    }

    /// Reads a contract record from the contract trie.
    pub fn get_contract_record(
        &self,
        id: &ContractId,
    ) -> Result<Option<ContractStateRecord>, IoFailure> {
        let raw = Self::read(&self.contracts, &id.0).map_err(IoFailure::LoadContract)?;
        raw.map(|bytes| {
            ContractStateRecord::from_bytes(&bytes)
                .map_err(|e| IoFailure::LoadContract(e.to_string()))
        })
        .transpose()
    }

    /// Reads contract code, decoding through the shared cache.
    pub fn get_code(&self, code_hash: &Hash) -> Result<Option<Arc<StatefulContract>>, IoFailure> {
        if let Some(code) = self.code_cache.get(code_hash) {
            return Ok(Some(Arc::clone(&code)));
        }
        let raw = Self::read(&self.code, code_hash).map_err(IoFailure::LoadContract)?;
        match raw {
            None => Ok(None),
            Some(bytes) => {
                let contract = StatefulContract::from_bytes(&bytes)
                    .map_err(|e| IoFailure::LoadContract(e.to_string()))?;
                let contract = Arc::new(contract);
                self.code_cache
                    .insert(*code_hash, Arc::clone(&contract));
                Ok(Some(contract))
            }
        }
    }

    /// Seeds an asset output directly into the persisted state.
    ///
    /// Used for genesis construction and tests; regular execution writes go
    /// through staging.
    pub fn add_asset_output(
        &mut self,
        output_ref: TxOutputRef,
        output: AssetOutput,
    ) -> Result<(), IoFailure> {
        self.outputs
            .update(
                hash_to_h256(&output_ref.key()),
                TrieValue(Output::Asset(output).to_bytes().to_vec()),
            )
            .map_err(|e| IoFailure::UpdateState(e.to_string()))?;
        Ok(())
    }

    /// Deploys a contract directly into the persisted state.
    ///
    /// Writes the code, the state record and the contract's asset output.
    pub fn deploy_contract(
        &mut self,
        id: ContractId,
        code: &StatefulContract,
        fields: Vec<Val>,
        output: ContractOutput,
        output_ref: TxOutputRef,
    ) -> Result<(), IoFailure> {
        let code_hash = code.code_hash();
        let record = ContractStateRecord {
            code_hash,
            fields,
            asset_ref: output_ref,
        };
        let map_err = |e: sparse_merkle_tree::error::Error| IoFailure::UpdateState(e.to_string());
        self.code
            .update(
                hash_to_h256(&code_hash),
                TrieValue(code.to_bytes().to_vec()),
            )
            .map_err(map_err)?;
        self.contracts
            .update(hash_to_h256(&id.0), TrieValue(record.to_bytes().to_vec()))
            .map_err(map_err)?;
        self.outputs
            .update(
                hash_to_h256(&output_ref.key()),
                TrieValue(Output::Contract(output).to_bytes().to_vec()),
            )
            .map_err(map_err)?;
        Ok(())
    }

    /// Applies the writes of a finished staging overlay, returning the new
    /// roots.
    ///
    /// The overlay must have been opened over this same snapshot; applying a
    /// foreign overlay silently merges unrelated state.
    pub fn apply(&mut self, writes: StagedWrites) -> Result<WorldStateRoots, IoFailure> {
        let map_err = |e: sparse_merkle_tree::error::Error| IoFailure::UpdateState(e.to_string());
        for (key, value) in writes.outputs {
            self.outputs
                .update(hash_to_h256(&key), TrieValue(value.unwrap_or_default()))
                .map_err(map_err)?;
        }
        for (key, value) in writes.contracts {
            self.contracts
                .update(hash_to_h256(&key), TrieValue(value.unwrap_or_default()))
                .map_err(map_err)?;
        }
        for (key, value) in writes.code {
            self.code
                .update(hash_to_h256(&key), TrieValue(value.unwrap_or_default()))
                .map_err(map_err)?;
        }
        Ok(self.roots())
    }
}

/// Writes accumulated by a staging overlay; `None` values are deletions.
pub struct StagedWrites {
    pub outputs: Vec<(Hash, Option<Vec<u8>>)>,
    pub contracts: Vec<(Hash, Option<Vec<u8>>)>,
    pub code: Vec<(Hash, Option<Vec<u8>>)>,
}

/// Mutable copy-on-write overlay over a persisted snapshot.
///
/// Reads fall through to the base snapshot for keys not yet written; writes
/// stay in the overlay until [`into_writes`](Self::into_writes) hands them to
/// [`PersistedWorldState::apply`]. Dropping the overlay discards every
/// staged change, which is exactly what failed transactions and dry runs
/// need.
pub struct CachedWorldState<'a> {
    base: &'a PersistedWorldState,
    outputs: BTreeMap<Hash, Option<Vec<u8>>>,
    contracts: BTreeMap<Hash, Option<Vec<u8>>>,
    code: BTreeMap<Hash, Option<Vec<u8>>>,
}

impl<'a> CachedWorldState<'a> {
    /// Consumes the overlay and returns its pending writes.
    pub fn into_writes(self) -> StagedWrites {
        StagedWrites {
            outputs: self.outputs.into_iter().collect(),
            contracts: self.contracts.into_iter().collect(),
            code: self.code.into_iter().collect(),
        }
    }

    /// Reads an output through the overlay.
    pub fn get_output(&self, output_ref: &TxOutputRef) -> Result<Option<Output>, IoFailure> {
        if let Some(staged) = self.outputs.get(&output_ref.key()) {
            return staged
                .as_deref()
                .map(|bytes| {
                    Output::from_bytes(bytes).map_err(|e| IoFailure::LoadOutputs(e.to_string()))
                })
                .transpose();
        }
        self.base.get_output(output_ref)
    }

    fn get_record(&self, id: &ContractId) -> Result<Option<ContractStateRecord>, IoFailure> {
        if let Some(staged) = self.contracts.get(&id.0) {
            return staged
                .as_deref()
                .map(|bytes| {
                    ContractStateRecord::from_bytes(bytes)
                        .map_err(|e| IoFailure::LoadContract(e.to_string()))
                })
                .transpose();
        }
        self.base.get_contract_record(id)
    }

    fn put_record(&mut self, id: &ContractId, record: &ContractStateRecord) {
        self.contracts
            .insert(id.0, Some(record.to_bytes().to_vec()));
    }

    /// Loads a contract's code and current state record.
    pub fn get_contract(
        &self,
        id: &ContractId,
    ) -> ExeResult<(Arc<StatefulContract>, ContractStateRecord)> {
        let record = self
            .get_record(id)?
            .ok_or(ExecutionError::NonExistContract(*id))?;
        let code = match self.code.get(&record.code_hash) {
            Some(Some(bytes)) => Arc::new(
                StatefulContract::from_bytes(bytes)
                    .map_err(|e| IoFailure::LoadContract(e.to_string()))?,
            ),
            Some(None) => {
                return Err(
                    IoFailure::LoadContract(format!("code {} deleted in staging", record.code_hash))
                        .into(),
                )
            }
            None => self
                .base
                .get_code(&record.code_hash)?
                .ok_or_else(|| {
                    IoFailure::LoadContract(format!("code {} missing", record.code_hash))
                })?,
        };
        Ok((code, record))
    }

    /// Writes back a contract's mutable fields.
    ///
    /// A store that leaves the record's state hash unchanged (same value
    /// written over itself) skips the overlay write.
    pub fn save_contract_fields(&mut self, id: &ContractId, fields: Vec<Val>) -> ExeResult<()> {
        let mut record = self
            .get_record(id)?
            .ok_or(ExecutionError::NonExistContract(*id))?;
        let unchanged = record.state_hash();
        record.fields = fields;
        if record.state_hash() != unchanged {
            self.put_record(id, &record);
        }
        Ok(())
    }

    /// Consumes the contract's current asset output.
    ///
    /// Returns the consumed reference and output; the output is deleted from
    /// the overlay so it cannot be spent twice. The caller tracks the
    /// NotUsed/InUse/Flushed machine; this only moves the asset.
    pub fn use_contract_asset(
        &mut self,
        id: &ContractId,
    ) -> ExeResult<(TxOutputRef, ContractOutput)> {
        let record = self
            .get_record(id)?
            .ok_or(ExecutionError::NonExistContract(*id))?;
        let output = match self.get_output(&record.asset_ref)? {
            Some(Output::Contract(output)) => output,
            Some(Output::Asset(_)) | None => {
                // The record points at a missing or non-contract output: the
                // world state itself is inconsistent.
                return Err(IoFailure::LoadOutputs(format!(
                    "contract {} asset output missing",
                    id
                ))
                .into());
            }
        };
        self.outputs.insert(record.asset_ref.key(), None);
        Ok((record.asset_ref, output))
    }

    /// Writes the contract's replacement asset output.
    pub fn update_contract(
        &mut self,
        id: &ContractId,
        output_ref: TxOutputRef,
        output: ContractOutput,
    ) -> ExeResult<()> {
        let mut record = self
            .get_record(id)?
            .ok_or(ExecutionError::NonExistContract(*id))?;
        record.asset_ref = output_ref;
        self.put_record(id, &record);
        self.outputs.insert(
            output_ref.key(),
            Some(Output::Contract(output).to_bytes().to_vec()),
        );
        Ok(())
    }

    /// Creates a contract without checking for a previous record.
    ///
    /// "Unsafe" in the protocol sense: the caller guarantees id freshness
    /// (ids are derived from tx ids, which cannot repeat).
    pub fn create_contract_unsafe(
        &mut self,
        id: ContractId,
        code: &StatefulContract,
        fields: Vec<Val>,
        output_ref: TxOutputRef,
        output: ContractOutput,
    ) -> ExeResult<()> {
        let code_hash = code.code_hash();
        self.code
            .insert(code_hash, Some(code.to_bytes().to_vec()));
        let record = ContractStateRecord {
            code_hash,
            fields,
            asset_ref: output_ref,
        };
        self.put_record(&id, &record);
        self.outputs.insert(
            output_ref.key(),
            Some(Output::Contract(output).to_bytes().to_vec()),
        );
        Ok(())
    }

    /// Removes a contract's record and any remaining asset output.
    ///
    /// Code stays in the code trie; unreferenced code is the pruner's
    /// responsibility.
    pub fn remove_contract(&mut self, id: &ContractId) -> ExeResult<()> {
        let record = self
            .get_record(id)?
            .ok_or(ExecutionError::NonExistContract(*id))?;
        if self.get_output(&record.asset_ref)?.is_some() {
            self.outputs.insert(record.asset_ref.key(), None);
        }
        self.contracts.insert(id.0, None);
        Ok(())
    }

    /// Resolves the asset outputs spent by the given inputs, in order.
    pub fn get_pre_outputs(&self, inputs: &[TxInput]) -> ExeResult<Vec<AssetOutput>> {
        let mut outputs = Vec::with_capacity(inputs.len());
        for input in inputs {
            match self.get_output(&input.output_ref)? {
                Some(Output::Asset(output)) => outputs.push(output),
                Some(Output::Contract(_)) | None => {
                    return Err(ExecutionError::NonExistTxInput.into())
                }
            }
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lockup::LockupScript;
    use crate::types::numeric::U256;
    use crate::vm::instr::Instr;
    use crate::vm::script::tests::entry_method;

    fn contract() -> StatefulContract {
        StatefulContract::from_methods(1, vec![entry_method(vec![Instr::Return])]).unwrap()
    }

    fn deployed() -> (PersistedWorldState, ContractId, TxOutputRef) {
        let mut world = PersistedWorldState::new();
        let id = ContractId(Hash::of(b"counter"));
        let output_ref = TxOutputRef::asset(&Hash::of(b"deploy-tx"), 0);
        let output = ContractOutput {
            amount: U256::from(1000u64),
            id,
            tokens: vec![],
        };
        world
            .deploy_contract(
                id,
                &contract(),
                vec![Val::U256(U256::zero())],
                output,
                output_ref,
            )
            .unwrap();
        (world, id, output_ref)
    }

    #[test]
    fn staging_reads_through_to_base() {
        let (world, id, _) = deployed();
        let staging = world.staging();
        let (code, record) = staging.get_contract(&id).unwrap();
        assert_eq!(code.as_ref(), &contract());
        assert_eq!(record.fields, vec![Val::U256(U256::zero())]);
    }

    #[test]
    fn staged_field_write_shadows_base_until_applied() {
        let (mut world, id, _) = deployed();
        let roots_before = world.roots();

        let mut staging = world.staging();
        staging
            .save_contract_fields(&id, vec![Val::U256(U256::from(7u64))])
            .unwrap();
        let (_, record) = staging.get_contract(&id).unwrap();
        assert_eq!(record.fields, vec![Val::U256(U256::from(7u64))]);

        // Base unchanged until apply.
        assert_eq!(world.roots(), roots_before);
        let writes = staging.into_writes();
        let roots_after = world.apply(writes).unwrap();
        assert_ne!(roots_after, roots_before);

        let (_, record) = world.staging().get_contract(&id).unwrap();
        assert_eq!(record.fields, vec![Val::U256(U256::from(7u64))]);
    }

    #[test]
    fn rewriting_identical_fields_stages_no_write() {
        let (world, id, _) = deployed();
        let mut staging = world.staging();
        staging
            .save_contract_fields(&id, vec![Val::U256(U256::zero())])
            .unwrap();
        let writes = staging.into_writes();
        assert!(writes.contracts.is_empty());
    }

    #[test]
    fn dropping_staging_discards_writes() {
        let (world, id, _) = deployed();
        let roots_before = world.roots();
        {
            let mut staging = world.staging();
            staging
                .save_contract_fields(&id, vec![Val::U256(U256::from(9u64))])
                .unwrap();
        }
        assert_eq!(world.roots(), roots_before);
    }

    #[test]
    fn use_contract_asset_consumes_the_output() {
        let (world, id, output_ref) = deployed();
        let mut staging = world.staging();

        let (consumed_ref, output) = staging.use_contract_asset(&id).unwrap();
        assert_eq!(consumed_ref, output_ref);
        assert_eq!(output.amount, U256::from(1000u64));

        // Second use sees no output and reports world inconsistency.
        assert!(matches!(
            staging.use_contract_asset(&id),
            Err(crate::vm::errors::VmError::Io(IoFailure::LoadOutputs(_)))
        ));
    }

    #[test]
    fn update_contract_moves_the_asset_ref() {
        let (world, id, old_ref) = deployed();
        let mut staging = world.staging();
        staging.use_contract_asset(&id).unwrap();

        let new_ref = TxOutputRef::asset(&Hash::of(b"tx2"), 1);
        let new_output = ContractOutput {
            amount: U256::from(900u64),
            id,
            tokens: vec![],
        };
        staging
            .update_contract(&id, new_ref, new_output.clone())
            .unwrap();

        let (_, record) = staging.get_contract(&id).unwrap();
        assert_eq!(record.asset_ref, new_ref);
        assert_eq!(
            staging.get_output(&new_ref).unwrap(),
            Some(Output::Contract(new_output))
        );
        assert_eq!(staging.get_output(&old_ref).unwrap(), None);
    }

    #[test]
    fn remove_contract_deletes_record_and_output() {
        let (world, id, output_ref) = deployed();
        let mut staging = world.staging();
        staging.remove_contract(&id).unwrap();

        assert!(matches!(
            staging.get_contract(&id),
            Err(crate::vm::errors::VmError::Execution(
                ExecutionError::NonExistContract(_)
            ))
        ));
        assert_eq!(staging.get_output(&output_ref).unwrap(), None);
    }

    #[test]
    fn created_contract_visible_in_staging_only() {
        let (mut world, _, _) = deployed();
        let id = ContractId(Hash::of(b"fresh"));
        let output_ref = TxOutputRef::asset(&Hash::of(b"tx3"), 0);
        let output = ContractOutput {
            amount: U256::from(1u64),
            id,
            tokens: vec![],
        };

        let mut staging = world.staging();
        staging
            .create_contract_unsafe(id, &contract(), vec![], output_ref, output)
            .unwrap();
        assert!(staging.get_contract(&id).is_ok());

        let writes = staging.into_writes();
        world.apply(writes).unwrap();
        assert!(world.staging().get_contract(&id).is_ok());
    }

    #[test]
    fn pre_outputs_resolved_in_input_order() {
        let mut world = PersistedWorldState::new();
        let tx = Hash::of(b"funding");
        let r0 = TxOutputRef::asset(&tx, 0);
        let r1 = TxOutputRef::asset(&tx, 1);
        let alice = LockupScript::asset(Hash::of(b"alice"));
        world
            .add_asset_output(r0, AssetOutput::alf(U256::from(5u64), alice))
            .unwrap();
        world
            .add_asset_output(r1, AssetOutput::alf(U256::from(7u64), alice))
            .unwrap();

        let staging = world.staging();
        let outputs = staging
            .get_pre_outputs(&[TxInput { output_ref: r1 }, TxInput { output_ref: r0 }])
            .unwrap();
        assert_eq!(outputs[0].amount, U256::from(7u64));
        assert_eq!(outputs[1].amount, U256::from(5u64));

        let missing = TxInput {
            output_ref: TxOutputRef::asset(&tx, 9),
        };
        assert!(matches!(
            staging.get_pre_outputs(&[missing]),
            Err(crate::vm::errors::VmError::Execution(
                ExecutionError::NonExistTxInput
            ))
        ));
    }
}
