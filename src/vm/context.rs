//! Execution contexts: the environment one script execution runs in.
//!
//! The stateless context carries the block env, tx env and gas; the stateful
//! context adds the staging world state, the balance buckets, the generated
//! outputs and the contract pool. Instructions reach the environment through
//! the [`RunEnv`] capability trait; stateful-only instructions require the
//! concrete [`StatefulContext`].

use crate::core::consensus::Target;
use crate::core::lockup::{ContractId, LockupScript, TokenId};
use crate::core::output::{AssetOutput, ContractOutput, TxOutputRef};
use crate::core::transaction::TransactionTemplate;
use crate::crypto::Signature;
use crate::state::world::CachedWorldState;
use crate::types::bytes::Bytes;
use crate::types::hash::Hash;
use crate::types::numeric::U256;
use crate::vm::errors::{ExeResult, ExecutionError};
use crate::vm::gas::{GasBox, GasPrice};
use crate::vm::pool::{ContractAssetState, ContractPool};
use crate::vm::stack::Stack;
use crate::vm::value::Val;
use std::collections::BTreeMap;

/// Identifier of the active hard fork.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct HardFork(pub u8);

impl HardFork {
    /// The launch rules.
    pub const GENESIS: HardFork = HardFork(0);
}

/// Consensus facts about the block the transaction executes in.
#[derive(Clone, Debug)]
pub struct BlockEnv {
    /// Chain id, for signature domain separation.
    pub chain_id: u32,
    /// Block timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// Difficulty target of the block.
    pub target: Target,
    /// Active hard fork.
    pub hard_fork: HardFork,
}

/// Transaction-level environment: the template, its resolved previous
/// outputs, and the pop-only script signature stack.
pub struct TxEnv {
    /// The transaction being executed.
    pub tx: TransactionTemplate,
    /// Cached id of the transaction.
    pub tx_id: Hash,
    /// The outputs consumed by the transaction's inputs, in input order.
    pub prev_outputs: Vec<AssetOutput>,
    signatures: Stack<Signature>,
}

impl TxEnv {
    /// Builds the environment; the signature stack pops signatures in the
    /// order the template lists them.
    pub fn new(tx: TransactionTemplate, prev_outputs: Vec<AssetOutput>) -> TxEnv {
        let tx_id = tx.id();
        let mut signatures = Stack::new(tx.script_signatures.len());
        for signature in tx.script_signatures.iter().rev() {
            // Within capacity by construction.
            let _ = signatures.push(*signature);
        }
        TxEnv {
            tx,
            tx_id,
            prev_outputs,
            signatures,
        }
    }

    /// Pops the next script signature.
    pub fn pop_signature(&mut self) -> Result<Signature, ExecutionError> {
        self.signatures
            .pop()
            .map_err(|_| ExecutionError::InsufficientSignatures)
    }

    /// The transaction's gas price.
    pub fn gas_price(&self) -> GasPrice {
        GasPrice(self.tx.unsigned.gas_price)
    }

    /// The transaction's gas limit.
    pub fn gas_limit(&self) -> u64 {
        self.tx.unsigned.gas_limit
    }

    /// Number of outputs fixed before execution.
    pub fn fixed_outputs_len(&self) -> usize {
        self.tx.unsigned.fixed_outputs.len()
    }
}

/// Balance of one lockup: an ALF amount plus token amounts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BalancesPerLockup {
    pub alf: U256,
    pub tokens: BTreeMap<TokenId, U256>,
}

impl BalancesPerLockup {
    /// True when no ALF and no tokens remain.
    pub fn is_empty(&self) -> bool {
        self.alf.is_zero() && self.tokens.values().all(|v| v.is_zero())
    }

    fn add_alf(&mut self, amount: U256) -> Option<()> {
        self.alf = self.alf.checked_add(amount)?;
        Some(())
    }

    fn sub_alf(&mut self, amount: U256) -> Option<()> {
        self.alf = self.alf.checked_sub(amount)?;
        Some(())
    }

    fn add_token(&mut self, token: TokenId, amount: U256) -> Option<()> {
        let entry = self.tokens.entry(token).or_insert_with(U256::zero);
        *entry = entry.checked_add(amount)?;
        Some(())
    }

    /// Token list in deterministic order, zero amounts dropped.
    pub fn token_vec(&self) -> Vec<(TokenId, U256)> {
        self.tokens
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(token, amount)| (*token, *amount))
            .collect()
    }
}

/// Ordered lockup-to-balance map.
///
/// Entries keep insertion order so generated outputs are deterministic.
/// Every mutation is checked: subtraction fails instead of underflowing and
/// sums fail instead of overflowing.
#[derive(Debug, Default)]
pub struct Balances {
    entries: Vec<(LockupScript, BalancesPerLockup)>,
}

impl Balances {
    /// An empty balance table.
    pub fn new() -> Balances {
        Balances::default()
    }

    /// Sums a list of outputs into per-lockup balances.
    ///
    /// Returns `None` on amount overflow.
    pub fn from_outputs(outputs: &[AssetOutput]) -> Option<Balances> {
        let mut balances = Balances::new();
        for output in outputs {
            balances.add_alf(output.lockup, output.amount)?;
            for (token, amount) in &output.tokens {
                balances.add_token(output.lockup, *token, *amount)?;
            }
        }
        Some(balances)
    }

    /// Borrows the balance of a lockup.
    pub fn get(&self, lockup: &LockupScript) -> Option<&BalancesPerLockup> {
        self.entries
            .iter()
            .find(|(l, _)| l == lockup)
            .map(|(_, b)| b)
    }

    fn entry_mut(&mut self, lockup: LockupScript) -> &mut BalancesPerLockup {
        if let Some(pos) = self.entries.iter().position(|(l, _)| *l == lockup) {
            return &mut self.entries[pos].1;
        }
        self.entries.push((lockup, BalancesPerLockup::default()));
        &mut self.entries.last_mut().expect("just pushed").1
    }

    /// Credits ALF; `None` on overflow.
    pub fn add_alf(&mut self, lockup: LockupScript, amount: U256) -> Option<()> {
        self.entry_mut(lockup).add_alf(amount)
    }

    /// Debits ALF; `None` when the lockup is absent or short.
    pub fn sub_alf(&mut self, lockup: &LockupScript, amount: U256) -> Option<()> {
        self.entries
            .iter_mut()
            .find(|(l, _)| l == lockup)
            .and_then(|(_, b)| b.sub_alf(amount))
    }

    /// Credits a token amount; `None` on overflow.
    pub fn add_token(&mut self, lockup: LockupScript, token: TokenId, amount: U256) -> Option<()> {
        self.entry_mut(lockup).add_token(token, amount)
    }

    /// Removes and returns a lockup's whole balance.
    pub fn take(&mut self, lockup: &LockupScript) -> Option<BalancesPerLockup> {
        let pos = self.entries.iter().position(|(l, _)| l == lockup)?;
        let (_, balance) = self.entries.remove(pos);
        if balance.is_empty() {
            return None;
        }
        Some(balance)
    }

    /// True when no entry holds any amount.
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|(_, b)| b.is_empty())
    }
}

/// One emitted event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    /// Contract that emitted the event; `None` for script-level logs.
    pub contract: Option<ContractId>,
    /// Event identifier bytes.
    pub event_id: Bytes,
    /// Event payload values.
    pub fields: Vec<Val>,
}

/// Capabilities every instruction may rely on.
pub trait RunEnv {
    /// The block environment.
    fn block_env(&self) -> &BlockEnv;
    /// The transaction environment.
    fn tx_env(&self) -> &TxEnv;
    /// Mutable transaction environment (signature stack).
    fn tx_env_mut(&mut self) -> &mut TxEnv;
    /// Charges gas, failing with `OutOfGas` when the budget is short.
    fn charge_gas(&mut self, amount: u64) -> Result<(), ExecutionError>;
    /// Gas still available.
    fn gas_remaining(&self) -> u64;
}

/// Context for stateless (asset script) execution.
pub struct StatelessContext {
    pub block_env: BlockEnv,
    pub tx_env: TxEnv,
    gas: GasBox,
}

impl StatelessContext {
    /// Builds a stateless context with the given gas budget.
    pub fn new(block_env: BlockEnv, tx_env: TxEnv, gas: GasBox) -> StatelessContext {
        StatelessContext {
            block_env,
            tx_env,
            gas,
        }
    }
}

impl RunEnv for StatelessContext {
    fn block_env(&self) -> &BlockEnv {
        &self.block_env
    }

    fn tx_env(&self) -> &TxEnv {
        &self.tx_env
    }

    fn tx_env_mut(&mut self) -> &mut TxEnv {
        &mut self.tx_env
    }

    fn charge_gas(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.gas.charge(amount)
    }

    fn gas_remaining(&self) -> u64 {
        self.gas.remaining()
    }
}

/// Context for stateful (tx script / contract) execution.
///
/// Owns the staging world state for the duration of one execution; callers
/// take it back with [`into_world`](Self::into_world) to commit, or simply
/// drop the context to discard every staged change.
pub struct StatefulContext<'a> {
    pub block_env: BlockEnv,
    pub tx_env: TxEnv,
    gas: GasBox,
    /// Staging world state, exclusively owned by this execution.
    pub world: CachedWorldState<'a>,
    /// Input assets still spendable.
    spendable: Balances,
    /// Amounts approved for contract use.
    approved: Balances,
    /// Amounts waiting to be emitted as outputs.
    output_balances: Balances,
    /// Outputs generated by execution, append-only.
    pub generated_outputs: Vec<AssetOutput>,
    /// Contract outputs consumed by execution, append-only.
    pub contract_inputs: Vec<TxOutputRef>,
    /// Contracts loaded by this execution.
    pub pool: ContractPool,
    /// Events emitted by this execution.
    pub logs: Vec<LogRecord>,
}

impl<'a> StatefulContext<'a> {
    /// Builds a stateful context with empty balances.
    pub fn new(
        block_env: BlockEnv,
        tx_env: TxEnv,
        world: CachedWorldState<'a>,
        gas: GasBox,
    ) -> StatefulContext<'a> {
        StatefulContext {
            block_env,
            tx_env,
            gas,
            world,
            spendable: Balances::new(),
            approved: Balances::new(),
            output_balances: Balances::new(),
            generated_outputs: Vec::new(),
            contract_inputs: Vec::new(),
            pool: ContractPool::new(),
            logs: Vec::new(),
        }
    }

    /// Releases the staging world state for commit.
    pub fn into_world(self) -> CachedWorldState<'a> {
        self.world
    }

    /// Seeds the spendable balances for a payable entry method.
    ///
    /// Balances come from the previous outputs, minus the gas fee charged to
    /// the first output's lockup.
    pub fn load_initial_balances(&mut self, entry_payable: bool) -> Result<(), ExecutionError> {
        if !entry_payable {
            return Err(ExecutionError::ExpectNonPayableMethod);
        }
        let mut balances = Balances::from_outputs(&self.tx_env.prev_outputs)
            .ok_or(ExecutionError::InvalidBalances)?;

        let fee = self
            .tx_env
            .gas_price()
            .fee(self.tx_env.gas_limit())
            .ok_or(ExecutionError::UnableToPayGasFee)?;
        let payer = self
            .tx_env
            .prev_outputs
            .first()
            .map(|o| o.lockup)
            .ok_or(ExecutionError::UnableToPayGasFee)?;
        balances
            .sub_alf(&payer, fee)
            .ok_or(ExecutionError::UnableToPayGasFee)?;

        self.spendable = balances;
        Ok(())
    }

    /// `fixed_outputs.len() + generated_outputs.len()`.
    pub fn next_output_index(&self) -> usize {
        self.tx_env.fixed_outputs_len() + self.generated_outputs.len()
    }

    /// Deterministic reference for the next contract output.
    pub fn next_contract_output_ref(&self, output: &ContractOutput) -> TxOutputRef {
        TxOutputRef::contract(&self.tx_env.tx_id, output, self.next_output_index())
    }

    /// Moves `amount` from a lockup's spendable bucket to its approved one.
    pub fn approve_alf(
        &mut self,
        lockup: LockupScript,
        amount: U256,
    ) -> Result<(), ExecutionError> {
        self.spendable
            .sub_alf(&lockup, amount)
            .ok_or(ExecutionError::InvalidBalances)?;
        self.approved
            .add_alf(lockup, amount)
            .ok_or(ExecutionError::InvalidBalances)
    }

    /// Moves `amount` from `from`'s approved bucket to `to`'s output bucket.
    pub fn transfer_alf(
        &mut self,
        from: LockupScript,
        to: LockupScript,
        amount: U256,
    ) -> Result<(), ExecutionError> {
        self.approved
            .sub_alf(&from, amount)
            .ok_or(ExecutionError::InvalidBalances)?;
        self.output_balances
            .add_alf(to, amount)
            .ok_or(ExecutionError::InvalidBalances)
    }

    /// Consumes a contract's asset output into its spendable bucket.
    pub fn use_contract_assets(&mut self, id: ContractId) -> ExeResult<()> {
        self.pool.use_asset(id)?;
        let (output_ref, output) = self.world.use_contract_asset(&id)?;
        self.contract_inputs.push(output_ref);

        let lockup = LockupScript::contract(id);
        self.spendable
            .add_alf(lockup, output.amount)
            .ok_or(ExecutionError::InvalidBalances)?;
        for (token, amount) in output.tokens {
            self.spendable
                .add_token(lockup, token, amount)
                .ok_or(ExecutionError::InvalidBalances)?;
        }
        Ok(())
    }

    /// Drains a lockup's output bucket into a generated output.
    ///
    /// For a contract lockup this also writes the contract's replacement
    /// output, flushing its asset state.
    pub fn generate_output(&mut self, lockup: LockupScript) -> ExeResult<()> {
        let bucket = self
            .output_balances
            .take(&lockup)
            .ok_or(ExecutionError::InvalidBalances)?;

        match lockup.contract_id() {
            Some(id) => {
                if self.pool.asset_state(&id) != ContractAssetState::InUse {
                    return Err(ExecutionError::ContractAssetNotLoaded(id).into());
                }
                let output = ContractOutput {
                    amount: bucket.alf,
                    id,
                    tokens: bucket.token_vec(),
                };
                let output_ref = self.next_contract_output_ref(&output);
                self.world.update_contract(&id, output_ref, output.clone())?;
                self.pool.flush_asset(id)?;
                self.generated_outputs.push(output.to_asset_output());
            }
            None => {
                self.generated_outputs.push(AssetOutput {
                    amount: bucket.alf,
                    lockup,
                    tokens: bucket.token_vec(),
                });
            }
        }
        Ok(())
    }

    /// Destroys `id`, refunding its remaining spendable balance to `refund`.
    pub fn destroy_contract(
        &mut self,
        id: ContractId,
        refund: LockupScript,
    ) -> ExeResult<()> {
        if !refund.is_asset() {
            return Err(ExecutionError::InvalidAddressTypeInContractDestroy.into());
        }
        if let Some(bucket) = self.spendable.take(&LockupScript::contract(id)) {
            self.generated_outputs.push(AssetOutput {
                amount: bucket.alf,
                lockup: refund,
                tokens: bucket.token_vec(),
            });
        }
        self.world.remove_contract(&id)?;
        self.pool.mark_destroyed(id)?;
        Ok(())
    }

    /// Loads a contract's code through the pool.
    pub fn load_contract(
        &mut self,
        id: ContractId,
    ) -> ExeResult<std::sync::Arc<crate::vm::script::StatefulContract>> {
        Ok(self.pool.load(&self.world, id)?.code.clone())
    }

    /// Reads a field of a loaded contract.
    pub fn load_field(&mut self, id: ContractId, index: u16) -> ExeResult<Val> {
        let loaded = self.pool.load(&self.world, id)?;
        loaded
            .fields
            .get(index as usize)
            .cloned()
            .ok_or_else(|| ExecutionError::InvalidFieldIndex(index).into())
    }

    /// Writes a field of a loaded contract, writing through to staging.
    pub fn store_field(&mut self, id: ContractId, index: u16, value: Val) -> ExeResult<()> {
        let loaded = self.pool.load(&self.world, id)?;
        let slot = loaded
            .fields
            .get_mut(index as usize)
            .ok_or(ExecutionError::InvalidFieldIndex(index))?;
        *slot = value;
        let fields = loaded.fields.clone();
        self.world.save_contract_fields(&id, fields)
    }

    /// End-of-execution invariant: no contract may remain `InUse`.
    pub fn check_contracts_flushed(&self) -> Result<(), ExecutionError> {
        self.pool.check_all_flushed()
    }

    /// Spendable balance of a lockup (tests and balance checks).
    pub fn spendable(&self, lockup: &LockupScript) -> Option<&BalancesPerLockup> {
        self.spendable.get(lockup)
    }
}

impl RunEnv for StatefulContext<'_> {
    fn block_env(&self) -> &BlockEnv {
        &self.block_env
    }

    fn tx_env(&self) -> &TxEnv {
        &self.tx_env
    }

    fn tx_env_mut(&mut self) -> &mut TxEnv {
        &mut self.tx_env
    }

    fn charge_gas(&mut self, amount: u64) -> Result<(), ExecutionError> {
        self.gas.charge(amount)
    }

    fn gas_remaining(&self) -> u64 {
        self.gas.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{TxInput, UnsignedTransaction};
    use crate::state::world::PersistedWorldState;

    fn lockup(seed: &[u8]) -> LockupScript {
        LockupScript::asset(Hash::of(seed))
    }

    fn template(gas_limit: u64, gas_price: u64) -> TransactionTemplate {
        TransactionTemplate {
            unsigned: UnsignedTransaction {
                inputs: vec![TxInput {
                    output_ref: TxOutputRef::asset(&Hash::of(b"prev"), 0),
                }],
                fixed_outputs: vec![],
                gas_limit,
                gas_price: U256::from(gas_price),
                script_bytes: None,
            },
            input_signatures: vec![],
            script_signatures: vec![Signature::zero(), Signature::zero()],
        }
    }

    fn block_env() -> BlockEnv {
        BlockEnv {
            chain_id: 0,
            timestamp_ms: 1_000,
            target: Target(U256::MAX),
            hard_fork: HardFork::GENESIS,
        }
    }

    #[test]
    fn signature_stack_pops_in_template_order() {
        let mut template = template(20_000, 1);
        template.script_signatures = vec![Signature([1u8; 64]), Signature([2u8; 64])];
        let mut env = TxEnv::new(template, vec![]);
        assert_eq!(env.pop_signature().unwrap(), Signature([1u8; 64]));
        assert_eq!(env.pop_signature().unwrap(), Signature([2u8; 64]));
        assert_eq!(
            env.pop_signature(),
            Err(ExecutionError::InsufficientSignatures)
        );
    }

    #[test]
    fn balances_never_underflow() {
        let mut balances = Balances::new();
        balances.add_alf(lockup(b"a"), U256::from(10u64)).unwrap();
        assert!(balances.sub_alf(&lockup(b"a"), U256::from(11u64)).is_none());
        assert!(balances.sub_alf(&lockup(b"b"), U256::one()).is_none());
        balances.sub_alf(&lockup(b"a"), U256::from(10u64)).unwrap();
        assert!(balances.is_empty());
    }

    #[test]
    fn balances_from_outputs_sums_per_lockup() {
        let outputs = vec![
            AssetOutput::alf(U256::from(3u64), lockup(b"a")),
            AssetOutput::alf(U256::from(4u64), lockup(b"a")),
            AssetOutput::alf(U256::from(5u64), lockup(b"b")),
        ];
        let balances = Balances::from_outputs(&outputs).unwrap();
        assert_eq!(balances.get(&lockup(b"a")).unwrap().alf, U256::from(7u64));
        assert_eq!(balances.get(&lockup(b"b")).unwrap().alf, U256::from(5u64));
    }

    fn stateful_ctx(world: &PersistedWorldState, prev: Vec<AssetOutput>) -> StatefulContext<'_> {
        let tx_env = TxEnv::new(template(20_000, 1), prev);
        StatefulContext::new(block_env(), tx_env, world.staging(), GasBox::new(100_000))
    }

    #[test]
    fn initial_balances_deduct_gas_fee_from_first_output() {
        let world = PersistedWorldState::new();
        let prev = vec![
            AssetOutput::alf(U256::from(100_000u64), lockup(b"payer")),
            AssetOutput::alf(U256::from(50u64), lockup(b"other")),
        ];
        let mut ctx = stateful_ctx(&world, prev);
        ctx.load_initial_balances(true).unwrap();

        // fee = 20_000 * 1
        assert_eq!(
            ctx.spendable(&lockup(b"payer")).unwrap().alf,
            U256::from(80_000u64)
        );
        assert_eq!(ctx.spendable(&lockup(b"other")).unwrap().alf, U256::from(50u64));
    }

    #[test]
    fn initial_balances_fail_when_fee_unpayable() {
        let world = PersistedWorldState::new();
        let prev = vec![AssetOutput::alf(U256::from(10u64), lockup(b"payer"))];
        let mut ctx = stateful_ctx(&world, prev);
        assert_eq!(
            ctx.load_initial_balances(true),
            Err(ExecutionError::UnableToPayGasFee)
        );
    }

    #[test]
    fn initial_balances_reject_non_payable_entry() {
        let world = PersistedWorldState::new();
        let mut ctx = stateful_ctx(&world, vec![]);
        assert_eq!(
            ctx.load_initial_balances(false),
            Err(ExecutionError::ExpectNonPayableMethod)
        );
    }

    #[test]
    fn approve_transfer_generate_moves_balances_to_outputs() {
        let world = PersistedWorldState::new();
        let prev = vec![AssetOutput::alf(U256::from(100_000u64), lockup(b"payer"))];
        let mut ctx = stateful_ctx(&world, prev);
        ctx.load_initial_balances(true).unwrap();

        ctx.approve_alf(lockup(b"payer"), U256::from(500u64)).unwrap();
        ctx.transfer_alf(lockup(b"payer"), lockup(b"dest"), U256::from(500u64))
            .unwrap();
        ctx.generate_output(lockup(b"dest")).unwrap();

        assert_eq!(
            ctx.generated_outputs,
            vec![AssetOutput::alf(U256::from(500u64), lockup(b"dest"))]
        );
        // Unapproved funds cannot transfer.
        assert_eq!(
            ctx.transfer_alf(lockup(b"payer"), lockup(b"dest"), U256::one()),
            Err(ExecutionError::InvalidBalances)
        );
    }

    #[test]
    fn next_output_index_counts_fixed_and_generated() {
        let world = PersistedWorldState::new();
        let prev = vec![AssetOutput::alf(U256::from(100_000u64), lockup(b"payer"))];
        let mut ctx = stateful_ctx(&world, prev);
        ctx.load_initial_balances(true).unwrap();
        assert_eq!(ctx.next_output_index(), 0);

        ctx.approve_alf(lockup(b"payer"), U256::from(1u64)).unwrap();
        ctx.transfer_alf(lockup(b"payer"), lockup(b"dest"), U256::from(1u64))
            .unwrap();
        ctx.generate_output(lockup(b"dest")).unwrap();
        assert_eq!(ctx.next_output_index(), 1);
    }
}
