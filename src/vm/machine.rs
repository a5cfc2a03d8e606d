//! The execution engine.
//!
//! Runs a script's entry method to completion over a bounded frame stack and
//! a bounded operand stack shared by all frames. Every instruction charges
//! its gas before touching any state. Two drivers share the pure instruction
//! set: [`execute_stateless`] runs asset scripts against the stateless
//! context, [`execute_stateful`] runs transaction scripts with world-state,
//! balance and contract-pool access.

use crate::core::lockup::ContractId;
use crate::crypto;
use crate::types::bytes::Bytes;
use crate::types::numeric::U256;
use crate::vm::context::{LogRecord, RunEnv, StatefulContext, StatelessContext};
use crate::vm::errors::{ExeResult, ExecutionError};
use crate::vm::frame::{Frame, ReturnTo};
use crate::vm::gas;
use crate::vm::instr::Instr;
use crate::vm::script::{Method, StatefulScript, StatelessScript};
use crate::vm::stack::{Stack, FRAME_STACK_CAPACITY, OPERAND_STACK_CAPACITY};
use crate::vm::value::Val;
use std::sync::Arc;

/// Executes a stateless script's entry method with the given arguments.
///
/// Returns the values the entry method returns. Stateful instructions fail
/// with `ExpectStatefulContext`.
pub fn execute_stateless(
    script: &StatelessScript,
    ctx: &mut StatelessContext,
    args: Vec<Val>,
) -> ExeResult<Vec<Val>> {
    let mut frames: Stack<Frame> = Stack::new(FRAME_STACK_CAPACITY);
    let mut ops: Stack<Val> = Stack::new(OPERAND_STACK_CAPACITY);
    let mut collected: Vec<Val> = Vec::new();

    push_entry_frame(ctx, &mut frames, script.entry().clone(), args)?;

    loop {
        let instr = match next_instr(&mut frames, &mut ops)? {
            Some(instr) => instr,
            None => break,
        };
        ctx.charge_gas(instr.base_gas())?;

        if exec_pure(ctx, &mut frames, &mut ops, &instr)? {
            continue;
        }
        match instr {
            Instr::Return => return_frame(&mut frames, &mut ops, &mut collected)?,
            Instr::CallLocal(index) => {
                let method = script
                    .methods()
                    .get(index as usize)
                    .cloned()
                    .ok_or(ExecutionError::InvalidMethodIndex(index))?;
                call_frame(&mut frames, &mut ops, method, None)?;
            }
            _ => return Err(ExecutionError::ExpectStatefulContext.into()),
        }
    }

    Ok(collected)
}

/// Executes a stateful script's entry method with the given arguments.
///
/// For a payable entry, the context's spendable balances are seeded from the
/// previous outputs minus the gas fee. After normal completion the
/// contract-asset invariant is checked: no contract may remain `InUse`.
pub fn execute_stateful(
    script: &StatefulScript,
    ctx: &mut StatefulContext<'_>,
    args: Vec<Val>,
) -> ExeResult<Vec<Val>> {
    let mut frames: Stack<Frame> = Stack::new(FRAME_STACK_CAPACITY);
    let mut ops: Stack<Val> = Stack::new(OPERAND_STACK_CAPACITY);
    let mut collected: Vec<Val> = Vec::new();

    if script.entry().is_payable {
        ctx.load_initial_balances(true)?;
    }
    push_entry_frame(ctx, &mut frames, script.entry().clone(), args)?;

    loop {
        let instr = match next_instr(&mut frames, &mut ops)? {
            Some(instr) => instr,
            None => break,
        };
        ctx.charge_gas(instr.base_gas())?;

        if exec_pure(ctx, &mut frames, &mut ops, &instr)? {
            continue;
        }
        exec_stateful_instr(script, ctx, &mut frames, &mut ops, &mut collected, instr)?;
    }

    ctx.check_contracts_flushed()?;
    Ok(collected)
}

/// Charges the entry call and pushes the entry frame.
fn push_entry_frame<C: RunEnv>(
    ctx: &mut C,
    frames: &mut Stack<Frame>,
    entry: Method,
    args: Vec<Val>,
) -> ExeResult<()> {
    if args.len() != entry.args_len as usize {
        return Err(ExecutionError::InvalidMethodArity {
            expected: entry.args_len as usize,
            actual: args.len(),
        }
        .into());
    }
    ctx.charge_gas(gas::CALL_BASE_GAS)?;
    frames.push(Frame::new(entry, args, 0, ReturnTo::Collector, None))?;
    Ok(())
}

/// Borrows the active frame.
fn current(frames: &mut Stack<Frame>) -> Result<&mut Frame, ExecutionError> {
    frames.top_mut().ok_or(ExecutionError::StackUnderflow)
}

/// Fetches the next instruction, retiring completed frames.
///
/// Returns `None` when the frame stack has drained and execution is done.
fn next_instr(frames: &mut Stack<Frame>, ops: &mut Stack<Val>) -> ExeResult<Option<Instr>> {
    loop {
        let (complete, implicit) = match frames.top_mut() {
            None => return Ok(None),
            Some(top) => {
                if top.is_complete() {
                    (true, false)
                } else if top.pc == top.method.instrs.len() {
                    // Running past the last instruction completes the frame
                    // with no return values.
                    let segment = ops.len() - top.op_base;
                    if top.method.returns_len != 0 || segment != 0 {
                        return Err(ExecutionError::InvalidMethodArity {
                            expected: top.method.returns_len as usize,
                            actual: segment,
                        }
                        .into());
                    }
                    top.set_complete();
                    (true, true)
                } else {
                    (false, false)
                }
            }
        };

        if complete {
            if !implicit {
                frames.pop()?;
            }
            continue;
        }

        let top = current(frames)?;
        let instr = top.method.instrs[top.pc].clone();
        top.pc += 1;
        return Ok(Some(instr));
    }
}

/// Pops `n` values from the active frame's segment, restoring push order.
fn pop_values(
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
    n: usize,
) -> ExeResult<Vec<Val>> {
    let base = current(frames)?.op_base;
    let mut values = Vec::with_capacity(n);
    for _ in 0..n {
        values.push(ops.pop_above(base)?);
    }
    values.reverse();
    Ok(values)
}

/// Pops a single value from the active frame's segment.
fn pop_value(frames: &mut Stack<Frame>, ops: &mut Stack<Val>) -> ExeResult<Val> {
    let base = current(frames)?.op_base;
    Ok(ops.pop_above(base)?)
}

/// Executes `Return` on the active frame.
///
/// Pops the declared return values, enforces that the frame's segment is
/// otherwise empty, and hands the values to the frame's continuation.
fn return_frame(
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
    collected: &mut Vec<Val>,
) -> ExeResult<()> {
    let returns = {
        let top = current(frames)?;
        top.method.returns_len as usize
    };
    let values = pop_values(frames, ops, returns)?;

    let continuation = {
        let top = current(frames)?;
        let leftover = ops.len() - top.op_base;
        if leftover != 0 {
            return Err(ExecutionError::InvalidMethodArity {
                expected: returns,
                actual: returns + leftover,
            }
            .into());
        }
        top.set_complete();
        top.returns
    };

    match continuation {
        ReturnTo::Parent => {
            for value in values {
                ops.push(value)?;
            }
        }
        ReturnTo::Collector => collected.extend(values),
    }
    Ok(())
}

/// Pops the callee's arguments and pushes its frame.
fn call_frame(
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
    method: Method,
    contract: Option<ContractId>,
) -> ExeResult<()> {
    let args = pop_values(frames, ops, method.args_len as usize)?;
    frames.push(Frame::new(method, args, ops.len(), ReturnTo::Parent, contract))?;
    Ok(())
}

/// Pops two U256 operands in evaluation order.
fn pop_u256_pair(
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
) -> ExeResult<(U256, U256)> {
    let rhs = pop_value(frames, ops)?.into_u256()?;
    let lhs = pop_value(frames, ops)?.into_u256()?;
    Ok((lhs, rhs))
}

/// Executes one pure instruction; returns false when the instruction is not
/// part of the shared pure set (calls, returns and stateful instructions).
fn exec_pure<C: RunEnv>(
    ctx: &mut C,
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
    instr: &Instr,
) -> ExeResult<bool> {
    match instr {
        Instr::ConstTrue => ops.push(Val::Bool(true))?,
        Instr::ConstFalse => ops.push(Val::Bool(false))?,
        Instr::U256Const(v) => ops.push(Val::U256(*v))?,
        Instr::I256Const(v) => ops.push(Val::I256(*v))?,
        Instr::BytesConst(bytes) => {
            ctx.charge_gas(gas::bytes_surcharge(bytes.len()))?;
            ops.push(Val::ByteVec(bytes.clone()))?;
        }
        Instr::AddressConst(lockup) => ops.push(Val::Address(*lockup))?,
        Instr::LoadLocal(index) => {
            let value = current(frames)?.get_local(*index)?;
            ops.push(value)?;
        }
        Instr::StoreLocal(index) => {
            let value = pop_value(frames, ops)?;
            current(frames)?.set_local(*index, value)?;
        }
        Instr::Pop => {
            pop_value(frames, ops)?;
        }

        Instr::AddU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            let sum = lhs
                .checked_add(rhs)
                .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::U256(sum))?;
        }
        Instr::SubU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            let diff = lhs
                .checked_sub(rhs)
                .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::U256(diff))?;
        }
        Instr::MulU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            let product = lhs
                .checked_mul(rhs)
                .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::U256(product))?;
        }
        Instr::DivU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            let quotient = lhs
                .checked_div(rhs)
                .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::U256(quotient))?;
        }
        Instr::ModU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            let rem = lhs
                .checked_rem(rhs)
                .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::U256(rem))?;
        }
        Instr::AddI256 | Instr::SubI256 | Instr::MulI256 | Instr::DivI256 | Instr::ModI256 => {
            let rhs = pop_value(frames, ops)?.into_i256()?;
            let lhs = pop_value(frames, ops)?.into_i256()?;
            let result = match instr {
                Instr::AddI256 => lhs.checked_add(rhs),
                Instr::SubI256 => lhs.checked_sub(rhs),
                Instr::MulI256 => lhs.checked_mul(rhs),
                Instr::DivI256 => lhs.checked_div(rhs),
                _ => lhs.checked_rem(rhs),
            }
            .ok_or(ExecutionError::ArithmeticError)?;
            ops.push(Val::I256(result))?;
        }

        Instr::EqVal | Instr::NeVal => {
            let rhs = pop_value(frames, ops)?;
            let lhs = pop_value(frames, ops)?;
            if lhs.ty() != rhs.ty() {
                return Err(ExecutionError::TypeMismatch {
                    expected: lhs.type_name(),
                    actual: rhs.type_name(),
                }
                .into());
            }
            let equal = lhs == rhs;
            ops.push(Val::Bool(if matches!(instr, Instr::EqVal) {
                equal
            } else {
                !equal
            }))?;
        }
        Instr::LtU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            ops.push(Val::Bool(lhs < rhs))?;
        }
        Instr::LeU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            ops.push(Val::Bool(lhs <= rhs))?;
        }
        Instr::GtU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            ops.push(Val::Bool(lhs > rhs))?;
        }
        Instr::GeU256 => {
            let (lhs, rhs) = pop_u256_pair(frames, ops)?;
            ops.push(Val::Bool(lhs >= rhs))?;
        }
        Instr::NotBool => {
            let value = pop_value(frames, ops)?.into_bool()?;
            ops.push(Val::Bool(!value))?;
        }
        Instr::AndBool => {
            let rhs = pop_value(frames, ops)?.into_bool()?;
            let lhs = pop_value(frames, ops)?.into_bool()?;
            ops.push(Val::Bool(lhs && rhs))?;
        }
        Instr::OrBool => {
            let rhs = pop_value(frames, ops)?.into_bool()?;
            let lhs = pop_value(frames, ops)?.into_bool()?;
            ops.push(Val::Bool(lhs || rhs))?;
        }

        Instr::ByteVecConcat => {
            let rhs = pop_value(frames, ops)?.into_bytes()?;
            let lhs = pop_value(frames, ops)?.into_bytes()?;
            ctx.charge_gas(gas::bytes_surcharge(lhs.len() + rhs.len()))?;
            ops.push(Val::ByteVec(lhs.concat(&rhs)))?;
        }
        Instr::ByteVecSize => {
            let bytes = pop_value(frames, ops)?.into_bytes()?;
            ops.push(Val::U256(U256::from(bytes.len())))?;
        }

        Instr::Jump(offset) => current(frames)?.jump(*offset)?,
        Instr::IfTrue(offset) => {
            let condition = pop_value(frames, ops)?.into_bool()?;
            if condition {
                current(frames)?.jump(*offset)?;
            }
        }
        Instr::IfFalse(offset) => {
            let condition = pop_value(frames, ops)?.into_bool()?;
            if !condition {
                current(frames)?.jump(*offset)?;
            }
        }

        Instr::Blake2b => {
            let input = pop_value(frames, ops)?.into_bytes()?;
            ctx.charge_gas(gas::hash_surcharge(input.len()))?;
            let digest = crate::types::hash::Hash::of(&input);
            ops.push(Val::ByteVec(Bytes::from(digest.0)))?;
        }
        Instr::Keccak256 => {
            let input = pop_value(frames, ops)?.into_bytes()?;
            ctx.charge_gas(gas::hash_surcharge(input.len()))?;
            let digest = crypto::keccak256(&input);
            ops.push(Val::ByteVec(Bytes::from(digest)))?;
        }
        Instr::VerifyTxSignature => {
            let pubkey = pop_value(frames, ops)?.into_bytes()?;
            let signature = ctx.tx_env_mut().pop_signature()?;
            let tx_id = ctx.tx_env().tx_id;
            if !crypto::verify_signature(&tx_id, &pubkey, &signature) {
                return Err(ExecutionError::SignatureVerificationFailed.into());
            }
        }
        Instr::EthEcRecover => {
            let signature = pop_value(frames, ops)?.into_bytes()?;
            let message = pop_value(frames, ops)?.into_bytes()?;
            let message: [u8; 32] = message
                .as_slice()
                .try_into()
                .map_err(|_| ExecutionError::InvalidConversion)?;
            let address = crypto::eth_ecrecover(&message, &signature)
                .ok_or(ExecutionError::SignatureVerificationFailed)?;
            ops.push(Val::ByteVec(Bytes::from(address)))?;
        }

        _ => return Ok(false),
    }
    Ok(true)
}

/// Executes the stateful-only instructions plus calls and returns.
fn exec_stateful_instr(
    script: &StatefulScript,
    ctx: &mut StatefulContext<'_>,
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
    collected: &mut Vec<Val>,
    instr: Instr,
) -> ExeResult<()> {
    match instr {
        Instr::Return => return_frame(frames, ops, collected)?,

        Instr::CallLocal(index) => {
            let contract = current(frames)?.contract;
            let method = match contract {
                None => script
                    .methods()
                    .get(index as usize)
                    .cloned()
                    .ok_or(ExecutionError::InvalidMethodIndex(index))?,
                Some(id) => contract_method(ctx, id, index, false)?,
            };
            call_frame(frames, ops, method, contract)?;
        }
        Instr::CallExternal(index) => {
            let id = pop_contract_id(frames, ops)?;
            let method = contract_method(ctx, id, index, true)?;
            call_frame(frames, ops, method, Some(id))?;
        }

        Instr::LoadField(index) => {
            let id = current(frames)?
                .contract
                .ok_or(ExecutionError::InvalidFieldIndex(index))?;
            let value = ctx.load_field(id, index)?;
            ops.push(value)?;
        }
        Instr::StoreField(index) => {
            let id = current(frames)?
                .contract
                .ok_or(ExecutionError::InvalidFieldIndex(index))?;
            let value = pop_value(frames, ops)?;
            ctx.store_field(id, index, value)?;
        }

        Instr::Log(count) => {
            let event_id = pop_value(frames, ops)?.into_bytes()?;
            let fields = pop_values(frames, ops, count as usize)?;
            let contract = current(frames)?.contract;
            ctx.logs.push(LogRecord {
                contract,
                event_id,
                fields,
            });
        }

        Instr::ApproveAlf => {
            require_payable(frames)?;
            let amount = pop_value(frames, ops)?.into_u256()?;
            let address = pop_value(frames, ops)?.into_address()?;
            ctx.approve_alf(address, amount)?;
        }
        Instr::TransferAlf => {
            require_payable(frames)?;
            let amount = pop_value(frames, ops)?.into_u256()?;
            let to = pop_value(frames, ops)?.into_address()?;
            let from = pop_value(frames, ops)?.into_address()?;
            ctx.transfer_alf(from, to, amount)?;
        }
        Instr::UseContractAssets => {
            require_payable(frames)?;
            let id = pop_contract_id(frames, ops)?;
            ctx.use_contract_assets(id)?;
        }
        Instr::GenerateOutput => {
            require_payable(frames)?;
            let address = pop_value(frames, ops)?.into_address()?;
            ctx.generate_output(address)?;
        }
        Instr::DestroyContract => {
            require_payable(frames)?;
            let refund = pop_value(frames, ops)?.into_address()?;
            let id = current(frames)?
                .contract
                .ok_or(ExecutionError::DestroyOutsideContract)?;
            ctx.destroy_contract(id, refund)?;
            // The destroyed contract's remaining frames must not run on.
            complete_contract_frames(frames, id);
        }

        other => {
            // Pure instructions were already tried; anything left over is an
            // opcode the stateful machine does not know.
            return Err(ExecutionError::InvalidOpcode(other.opcode()).into());
        }
    }
    Ok(())
}

/// Marks every frame of a destroyed contract complete.
fn complete_contract_frames(frames: &mut Stack<Frame>, id: ContractId) {
    // Only the top frame can belong to the destroyed contract mid-call; a
    // deeper frame would mean the contract called out and back in, which the
    // asset state machine already rejects. Completing the top frame is
    // enough.
    if let Some(top) = frames.top_mut() {
        if top.contract == Some(id) {
            top.set_complete();
        }
    }
}

/// Asset instructions are only legal in payable frames.
fn require_payable(frames: &mut Stack<Frame>) -> Result<(), ExecutionError> {
    if !current(frames)?.method.is_payable {
        return Err(ExecutionError::ExpectPayableMethod);
    }
    Ok(())
}

/// Pops a 32-byte ByteVec contract id.
fn pop_contract_id(
    frames: &mut Stack<Frame>,
    ops: &mut Stack<Val>,
) -> ExeResult<ContractId> {
    let bytes = pop_value(frames, ops)?.into_bytes()?;
    ContractId::from_slice(&bytes).ok_or_else(|| ExecutionError::InvalidConversion.into())
}

/// Resolves a contract method through the pool.
fn contract_method(
    ctx: &mut StatefulContext<'_>,
    id: ContractId,
    index: u8,
    external: bool,
) -> ExeResult<Method> {
    let code: Arc<_> = ctx.load_contract(id)?;
    let method = code
        .method(index)
        .ok_or(ExecutionError::InvalidMethodIndex(index))?;
    if external && !method.is_public {
        return Err(ExecutionError::ExternalPrivateMethodCall(index).into());
    }
    Ok(method.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consensus::Target;
    use crate::core::lockup::LockupScript;
    use crate::core::output::{AssetOutput, ContractOutput, TxOutputRef};
    use crate::core::transaction::{TransactionTemplate, TxInput, UnsignedTransaction};
    use crate::lang::compiler::{
        compile_asset_script, compile_contract, compile_tx_script, CompilerConfig,
    };
    use crate::state::world::PersistedWorldState;
    use crate::types::hash::Hash;
    use crate::vm::context::{BlockEnv, HardFork, TxEnv};
    use crate::vm::errors::VmError;
    use crate::vm::gas::GasBox;
    use crate::vm::script::StatefulContract;

    const INITIAL_GAS: u64 = 100_000;

    fn payer() -> LockupScript {
        LockupScript::asset(Hash::of(b"payer"))
    }

    fn template() -> TransactionTemplate {
        TransactionTemplate {
            unsigned: UnsignedTransaction {
                inputs: vec![TxInput {
                    output_ref: TxOutputRef::asset(&Hash::of(b"funding"), 0),
                }],
                fixed_outputs: vec![],
                gas_limit: gas::MINIMAL_GAS,
                gas_price: U256::one(),
                script_bytes: None,
            },
            input_signatures: vec![],
            script_signatures: vec![],
        }
    }

    fn block_env() -> BlockEnv {
        BlockEnv {
            chain_id: 0,
            timestamp_ms: 1_000,
            target: Target::max(),
            hard_fork: HardFork::GENESIS,
        }
    }

    fn stateless_ctx() -> StatelessContext {
        let tx_env = TxEnv::new(template(), vec![]);
        StatelessContext::new(block_env(), tx_env, GasBox::new(INITIAL_GAS))
    }

    fn stateful_ctx(world: &PersistedWorldState) -> StatefulContext<'_> {
        let prev = vec![AssetOutput::alf(U256::from(10_000_000u64), payer())];
        let tx_env = TxEnv::new(template(), prev);
        StatefulContext::new(block_env(), tx_env, world.staging(), GasBox::new(INITIAL_GAS))
    }

    fn run_stateless(source: &str, args: Vec<Val>) -> (ExeResult<Vec<Val>>, u64) {
        let script = compile_asset_script(source, CompilerConfig::default()).unwrap();
        let mut ctx = stateless_ctx();
        let result = execute_stateless(&script, &mut ctx, args);
        (result, INITIAL_GAS - ctx.gas_remaining())
    }

    #[test]
    fn add_two_returns_seven_with_exact_gas() {
        let source = r#"
            AssetScript Add {
                pub fn add(a: U256, b: U256) -> (U256) {
                    return a + b
                }
            }
        "#;
        let (result, gas_used) = run_stateless(
            source,
            vec![Val::U256(U256::from(3u64)), Val::U256(U256::from(4u64))],
        );
        assert_eq!(result.unwrap(), vec![Val::U256(U256::from(7u64))]);

        // Entry call + two local loads + the add + the return.
        let expected = gas::CALL_BASE_GAS
            + 2 * Instr::LoadLocal(0).base_gas()
            + Instr::AddU256.base_gas()
            + Instr::Return.base_gas();
        assert_eq!(gas_used, expected);
    }

    #[test]
    fn overflow_fails_with_gas_charged_through_the_add() {
        let source = r#"
            AssetScript Overflow {
                pub fn main(a: U256) -> (U256) {
                    return a + 1
                }
            }
        "#;
        let (result, gas_used) = run_stateless(source, vec![Val::U256(U256::MAX)]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::ArithmeticError)
        );
        let expected = gas::CALL_BASE_GAS
            + Instr::LoadLocal(0).base_gas()
            + Instr::U256Const(U256::one()).base_gas()
            + Instr::AddU256.base_gas();
        assert_eq!(gas_used, expected);
    }

    #[test]
    fn division_by_zero_is_an_arithmetic_error() {
        let source = r#"
            AssetScript Div {
                pub fn main() -> (U256) {
                    return 10 / 0
                }
            }
        "#;
        let (result, _) = run_stateless(source, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::ArithmeticError)
        );
    }

    #[test]
    fn unrolled_loop_sums_counters() {
        let source = r#"
            AssetScript Sum {
                pub fn main() -> (U256) {
                    let mut x = 0
                    loop (0, 4, 1) {
                        x = x + ?
                    }
                    return x
                }
            }
        "#;
        let (result, _) = run_stateless(source, vec![]);
        assert_eq!(result.unwrap(), vec![Val::U256(U256::from(6u64))]);
    }

    #[test]
    fn execution_is_deterministic() {
        let source = r#"
            AssetScript Mixed {
                pub fn main(a: U256) -> (U256, Bool) {
                    let mut total = a
                    while total < 100 {
                        total = total * 2
                    }
                    return total, total == 128
                }
            }
        "#;
        let (first, first_gas) = run_stateless(source, vec![Val::U256(U256::from(2u64))]);
        let (second, second_gas) = run_stateless(source, vec![Val::U256(U256::from(2u64))]);
        assert_eq!(first.unwrap(), second.unwrap());
        assert_eq!(first_gas, second_gas);
    }

    #[test]
    fn out_of_gas_stops_execution() {
        let source = r#"
            AssetScript Spin {
                pub fn main() {
                    let mut i = 0
                    while i < 1000000 {
                        i = i + 1
                    }
                }
            }
        "#;
        let (result, gas_used) = run_stateless(source, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::OutOfGas)
        );
        assert_eq!(gas_used, INITIAL_GAS);
    }

    #[test]
    fn call_depth_is_bounded_by_the_frame_stack() {
        let source = r#"
            AssetScript Recurse {
                pub fn main() {
                    deeper()
                }

                fn deeper() {
                    deeper()
                }
            }
        "#;
        let (result, _) = run_stateless(source, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::StackOverflow)
        );
    }

    #[test]
    fn backward_jump_outside_method_is_invalid_pc() {
        let script = crate::vm::script::StatelessScript::from_methods(vec![Method {
            is_public: true,
            is_payable: false,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs: vec![Instr::Jump(-2)],
        }])
        .unwrap();
        let mut ctx = stateless_ctx();
        let result = execute_stateless(&script, &mut ctx, vec![]);
        assert!(matches!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::InvalidPc { target: -1, .. })
        ));
    }

    #[test]
    fn leftover_operands_on_return_break_stack_discipline() {
        // Pushes two values but declares a single return: the frame's
        // segment must hold exactly the declared values at return.
        let script = crate::vm::script::StatelessScript::from_methods(vec![Method {
            is_public: true,
            is_payable: false,
            args_len: 0,
            locals_len: 0,
            returns_len: 1,
            instrs: vec![Instr::ConstTrue, Instr::ConstFalse, Instr::Return],
        }])
        .unwrap();
        let mut ctx = stateless_ctx();
        let result = execute_stateless(&script, &mut ctx, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::InvalidMethodArity {
                expected: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn stateful_instructions_are_rejected_statelessly() {
        let script = crate::vm::script::StatelessScript::from_methods(vec![Method {
            is_public: true,
            is_payable: true,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs: vec![Instr::AddressConst(payer()), Instr::GenerateOutput],
        }])
        .unwrap();
        let mut ctx = stateless_ctx();
        let result = execute_stateless(&script, &mut ctx, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::ExpectStatefulContext)
        );
    }

    // ----- stateful scenarios -----

    fn counter_contract() -> StatefulContract {
        let source = r#"
            TxContract Counter(mut total: U256) {
                pub fn add(amount: U256) -> (U256) {
                    total = total + amount
                    return total
                }
            }
        "#;
        compile_contract(source, "Counter", CompilerConfig::default()).unwrap()
    }

    fn deploy_counter(world: &mut PersistedWorldState) -> ContractId {
        let id = ContractId(Hash::of(b"counter"));
        let output_ref = TxOutputRef::asset(&Hash::of(b"deploy"), 0);
        world
            .deploy_contract(
                id,
                &counter_contract(),
                vec![Val::U256(U256::zero())],
                ContractOutput {
                    amount: U256::from(1_000u64),
                    id,
                    tokens: vec![],
                },
                output_ref,
            )
            .unwrap();
        id
    }

    #[test]
    fn external_call_updates_contract_fields_in_staging() {
        let mut world = PersistedWorldState::new();
        let id = deploy_counter(&mut world);

        let source = r#"
            TxContract Counter(mut total: U256) {
                pub fn add(amount: U256) -> (U256) {
                    total = total + amount
                    return total
                }
            }

            TxScript Bump {
                pub fn main(id: ByteVec) -> (U256) {
                    let counter = Counter(id)
                    counter.add(5)
                    return counter.add(2)
                }
            }
        "#;
        let script = compile_tx_script(source, CompilerConfig::default()).unwrap();

        let mut ctx = stateful_ctx(&world);
        let returns = execute_stateful(
            &script,
            &mut ctx,
            vec![Val::ByteVec(crate::types::bytes::Bytes::from(id.0 .0))],
        )
        .unwrap();
        assert_eq!(returns, vec![Val::U256(U256::from(7u64))]);

        // The staged field value is visible through the overlay.
        let (_, record) = ctx.world.get_contract(&id).unwrap();
        assert_eq!(record.fields, vec![Val::U256(U256::from(7u64))]);

        // And the persisted state still holds the original value.
        let (_, record) = world.staging().get_contract(&id).unwrap();
        assert_eq!(record.fields, vec![Val::U256(U256::zero())]);
    }

    fn use_assets_script(generate: bool) -> crate::vm::script::StatefulScript {
        let id = ContractId(Hash::of(b"counter"));
        let contract_lockup = LockupScript::contract(id);
        let mut instrs = vec![
            Instr::BytesConst(crate::types::bytes::Bytes::from(id.0 .0)),
            Instr::UseContractAssets,
        ];
        if generate {
            instrs.extend([
                Instr::AddressConst(contract_lockup),
                Instr::U256Const(U256::from(1_000u64)),
                Instr::ApproveAlf,
                Instr::AddressConst(contract_lockup),
                Instr::AddressConst(contract_lockup),
                Instr::U256Const(U256::from(1_000u64)),
                Instr::TransferAlf,
                Instr::AddressConst(contract_lockup),
                Instr::GenerateOutput,
            ]);
        }
        instrs.push(Instr::Return);
        crate::vm::script::StatefulScript::from_methods(vec![Method {
            is_public: true,
            is_payable: true,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs,
        }])
        .unwrap()
    }

    #[test]
    fn unflushed_contract_asset_fails_the_transaction() {
        let mut world = PersistedWorldState::new();
        deploy_counter(&mut world);

        let mut ctx = stateful_ctx(&world);
        let result = execute_stateful(&use_assets_script(false), &mut ctx, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::ContractAssetUnflushed)
        );
    }

    #[test]
    fn used_and_flushed_contract_asset_passes() {
        let mut world = PersistedWorldState::new();
        let id = deploy_counter(&mut world);

        let mut ctx = stateful_ctx(&world);
        execute_stateful(&use_assets_script(true), &mut ctx, vec![]).unwrap();

        assert_eq!(ctx.generated_outputs.len(), 1);
        assert_eq!(ctx.generated_outputs[0].amount, U256::from(1_000u64));
        assert_eq!(ctx.contract_inputs.len(), 1);

        // The contract's asset reference moved to the regenerated output.
        let (_, record) = ctx.world.get_contract(&id).unwrap();
        assert_ne!(record.asset_ref, TxOutputRef::asset(&Hash::of(b"deploy"), 0));
    }

    #[test]
    fn double_use_of_contract_assets_fails() {
        let mut world = PersistedWorldState::new();
        let id = deploy_counter(&mut world);

        let bytes = crate::types::bytes::Bytes::from(id.0 .0);
        let script = crate::vm::script::StatefulScript::from_methods(vec![Method {
            is_public: true,
            is_payable: true,
            args_len: 0,
            locals_len: 0,
            returns_len: 0,
            instrs: vec![
                Instr::BytesConst(bytes.clone()),
                Instr::UseContractAssets,
                Instr::BytesConst(bytes),
                Instr::UseContractAssets,
                Instr::Return,
            ],
        }])
        .unwrap();

        let mut ctx = stateful_ctx(&world);
        let result = execute_stateful(&script, &mut ctx, vec![]);
        assert_eq!(
            result.unwrap_err(),
            VmError::Execution(ExecutionError::ContractAssetAlreadyInUsing)
        );
    }

    #[test]
    fn logs_record_contract_and_fields() {
        let mut world = PersistedWorldState::new();
        let id = ContractId(Hash::of(b"counter"));
        let source = r#"
            TxContract Counter(mut total: U256) {
                event Added(amount: U256)

                pub fn add(amount: U256) {
                    total = total + amount
                    emit Added(amount)
                }
            }

            TxScript Bump {
                pub fn main(id: ByteVec) {
                    Counter(id).add(9)
                }
            }
        "#;
        let contract = compile_contract(source, "Counter", CompilerConfig::default()).unwrap();
        world
            .deploy_contract(
                id,
                &contract,
                vec![Val::U256(U256::zero())],
                ContractOutput {
                    amount: U256::one(),
                    id,
                    tokens: vec![],
                },
                TxOutputRef::asset(&Hash::of(b"deploy"), 0),
            )
            .unwrap();

        let script = compile_tx_script(source, CompilerConfig::default()).unwrap();
        let mut ctx = stateful_ctx(&world);
        execute_stateful(
            &script,
            &mut ctx,
            vec![Val::ByteVec(crate::types::bytes::Bytes::from(id.0 .0))],
        )
        .unwrap();

        assert_eq!(ctx.logs.len(), 1);
        assert_eq!(ctx.logs[0].contract, Some(id));
        assert_eq!(ctx.logs[0].event_id.as_slice(), b"Counter.Added");
        assert_eq!(ctx.logs[0].fields, vec![Val::U256(U256::from(9u64))]);
    }
}
