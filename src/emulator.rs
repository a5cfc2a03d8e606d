//! Gas-metered dry-run emulation of transaction scripts.
//!
//! Packages a transaction template around a compiled script, runs it against
//! a staging world state derived from the chain's current group view, and
//! reports the gas a real submission would consume. Nothing is committed:
//! the staging overlay is dropped whether execution succeeds or fails.

use crate::core::output::{AssetOutput, TxOutputRef};
use crate::core::transaction::{TransactionTemplate, TxInput, UnsignedTransaction};
use crate::crypto::Signature;
use crate::state::world::PersistedWorldState;
use crate::types::encoding::Encode;
use crate::types::numeric::U256;
use crate::utils::log::Logger;
use crate::vm::context::{BlockEnv, LogRecord, RunEnv, StatefulContext, TxEnv};
use crate::vm::errors::{IoFailure, VmError};
use crate::vm::gas::{self, GasBox};
use crate::vm::machine::execute_stateful;
use crate::vm::script::StatefulScript;
use crate::vm::value::Val;

/// Worst-case signature padding for fee estimation.
///
/// The emulator cannot know how many signers the final transaction will
/// carry, so both signature stacks are padded to this size.
pub const DUMMY_SIGNATURE_COUNT: usize = 16;

/// Number of address groups the chain is sharded into.
pub const GROUP_COUNT: u32 = 4;

/// Default gas price used when the caller supplies none.
pub const DEFAULT_GAS_PRICE: u64 = 100;

/// Sharding coordinates of one chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainIndex {
    pub from_group: u32,
    pub to_group: u32,
}

impl ChainIndex {
    /// The intra-group chain of `group`.
    pub fn intra(group: u32) -> ChainIndex {
        ChainIndex {
            from_group: group,
            to_group: group,
        }
    }
}

/// Derives the group an input belongs to.
pub fn input_group(input: &TxInput) -> u32 {
    u32::from(input.output_ref.key().0[0]) % GROUP_COUNT
}

/// Chain collaborator the emulator reads from.
///
/// Implementations provide a block env suitable for dry runs and a group
/// view that already includes mempool effects. The emulator requires
/// exclusive use of the returned view for the duration of one emulation and
/// never writes through it.
pub trait BlockFlow {
    /// Block environment a dry run should execute under.
    fn dry_run_block_env(&self, chain_index: ChainIndex) -> Result<BlockEnv, IoFailure>;

    /// World state of the group, with mempool transactions applied.
    fn mutable_group_view(&self, group: u32) -> Result<&PersistedWorldState, IoFailure>;
}

/// What an emulated execution produced.
#[derive(Clone, Debug)]
pub struct EmulatedExecution {
    /// Values returned by the script's entry method.
    pub returns: Vec<Val>,
    /// Outputs the script generated.
    pub generated_outputs: Vec<AssetOutput>,
    /// Contract outputs the script consumed.
    pub contract_inputs: Vec<TxOutputRef>,
    /// Events the script emitted.
    pub logs: Vec<LogRecord>,
}

/// Result of one emulation.
#[derive(Clone, Debug)]
pub struct TxScriptEmulationResult {
    /// `MAXIMAL_GAS_PER_TX` minus the gas remaining at return.
    pub gas_used: u64,
    /// The execution's observable effects.
    pub execution: EmulatedExecution,
}

/// The emulator, when the node supports it.
pub struct TxScriptEmulator<F: BlockFlow> {
    flow: F,
    logger: Logger,
}

/// Emulation capability of a node.
///
/// Nodes without the capability construct `Disabled`; callers must handle
/// both variants at construction time instead of discovering an
/// unimplemented path at runtime.
pub enum ScriptEmulator<F: BlockFlow> {
    Enabled(TxScriptEmulator<F>),
    Disabled,
}

impl<F: BlockFlow> ScriptEmulator<F> {
    /// An emulator backed by the given chain collaborator.
    pub fn enabled(flow: F) -> ScriptEmulator<F> {
        ScriptEmulator::Enabled(TxScriptEmulator {
            flow,
            logger: Logger::new("emulator"),
        })
    }

    /// Emulates a script, or fails when the node has no emulator.
    pub fn emulate(
        &self,
        inputs: &[(TxInput, AssetOutput)],
        fixed_outputs: Vec<AssetOutput>,
        script: &StatefulScript,
        gas_limit: Option<u64>,
        gas_price: Option<U256>,
    ) -> Result<TxScriptEmulationResult, String> {
        match self {
            ScriptEmulator::Enabled(emulator) => {
                emulator.emulate(inputs, fixed_outputs, script, gas_limit, gas_price)
            }
            ScriptEmulator::Disabled => {
                Err("tx script emulation is not supported by this node".to_string())
            }
        }
    }
}

impl<F: BlockFlow> TxScriptEmulator<F> {
    /// Runs the script in a scratch staging world state and reports gas.
    ///
    /// Inner failures carry two classes: IO failures mean the chain state
    /// could not be read, execution failures mean the script itself failed;
    /// both are flattened into the returned string with their class named.
    pub fn emulate(
        &self,
        inputs: &[(TxInput, AssetOutput)],
        fixed_outputs: Vec<AssetOutput>,
        script: &StatefulScript,
        gas_limit: Option<u64>,
        gas_price: Option<U256>,
    ) -> Result<TxScriptEmulationResult, String> {
        let first = inputs
            .first()
            .ok_or_else(|| "emulation needs at least one input".to_string())?;
        let group = input_group(&first.0);
        let chain_index = ChainIndex::intra(group);

        let block_env = self
            .flow
            .dry_run_block_env(chain_index)
            .map_err(|e| e.to_string())?;
        let view = self
            .flow
            .mutable_group_view(group)
            .map_err(|e| e.to_string())?;

        let script_bytes = script.to_bytes();
        let template = TransactionTemplate {
            unsigned: UnsignedTransaction {
                inputs: inputs.iter().map(|(input, _)| *input).collect(),
                fixed_outputs,
                gas_limit: gas_limit.unwrap_or(gas::MINIMAL_GAS),
                gas_price: gas_price.unwrap_or_else(|| U256::from(DEFAULT_GAS_PRICE)),
                script_bytes: Some(script_bytes.clone()),
            },
            input_signatures: vec![Signature::zero(); DUMMY_SIGNATURE_COUNT],
            script_signatures: vec![Signature::zero(); DUMMY_SIGNATURE_COUNT],
        };

        // Code size is charged against a fresh budget before execution; the
        // same budget then meters the run itself.
        let mut gas_box = GasBox::new(gas::MAXIMAL_GAS_PER_TX);
        gas_box
            .charge(gas::code_size_gas(script_bytes.len()))
            .map_err(|e| flatten(VmError::Execution(e)))?;

        let prev_outputs: Vec<AssetOutput> =
            inputs.iter().map(|(_, output)| output.clone()).collect();
        let tx_env = TxEnv::new(template, prev_outputs);
        let mut ctx = StatefulContext::new(block_env, tx_env, view.staging(), gas_box);

        let returns = execute_stateful(script, &mut ctx, Vec::new()).map_err(flatten)?;

        let gas_used = gas::MAXIMAL_GAS_PER_TX - ctx.gas_remaining();
        self.logger.info(&format!(
            "dry run used {} gas, generated {} outputs",
            gas_used,
            ctx.generated_outputs.len()
        ));

        Ok(TxScriptEmulationResult {
            gas_used,
            execution: EmulatedExecution {
                returns,
                generated_outputs: ctx.generated_outputs.clone(),
                contract_inputs: ctx.contract_inputs.clone(),
                logs: ctx.logs.clone(),
            },
        })
        // `ctx` (and the staging overlay it owns) drops here; the dry run
        // leaves the persisted world state untouched.
    }
}

/// Flattens the two-level error into a class-tagged message.
fn flatten(error: VmError) -> String {
    match error {
        VmError::Io(io) => format!("io failure: {}", io),
        VmError::Execution(exe) => format!("execution failure: {}", exe),
    }
}
