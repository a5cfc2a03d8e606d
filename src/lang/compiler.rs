//! Type checking and code generation.
//!
//! One pass per definition after parsing: build the symbol tables, then for
//! each function infer expression types (memoized in a side table keyed by
//! `ExprId`), flatten arrays onto contiguous value slots, unroll `loop`
//! statements, and lower statements to instruction sequences by post-order
//! traversal. Branch offsets are a single signed byte; a branch that does
//! not fit fails compilation rather than widening the encoding.

use crate::lang::ast::*;
use crate::lang::parser::parse;
use crate::lang::CompileError;
use crate::types::bytes::Bytes;
use crate::types::numeric::U256;
use crate::vm::instr::Instr;
use crate::vm::script::{Method, StatefulContract, StatefulScript, StatelessScript};
use crate::vm::value::Val;
use std::collections::HashMap;

/// Compiler options.
#[derive(Clone, Debug)]
pub struct CompilerConfig {
    /// Maximum number of statements a `loop` may expand to.
    pub loop_unrolling_limit: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            loop_unrolling_limit: 1000,
        }
    }
}

/// Everything one source file compiles to.
#[derive(Debug)]
pub struct CompiledUnit {
    pub asset_scripts: Vec<(String, StatelessScript)>,
    pub tx_scripts: Vec<(String, StatefulScript)>,
    pub contracts: Vec<(String, StatefulContract)>,
}

impl CompiledUnit {
    /// Looks up a compiled transaction script by name.
    pub fn tx_script(&self, name: &str) -> Option<&StatefulScript> {
        self.tx_scripts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Looks up a compiled asset script by name.
    pub fn asset_script(&self, name: &str) -> Option<&StatelessScript> {
        self.asset_scripts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Looks up a compiled contract by name.
    pub fn contract(&self, name: &str) -> Option<&StatefulContract> {
        self.contracts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }
}

/// Compiles a source file.
pub fn compile_source(source: &str, config: CompilerConfig) -> Result<CompiledUnit, CompileError> {
    let unit = parse(source)?;
    Compiler::new(&unit, config).compile()
}

/// Compiles the first `TxScript` in the source.
pub fn compile_tx_script(
    source: &str,
    config: CompilerConfig,
) -> Result<StatefulScript, CompileError> {
    let compiled = compile_source(source, config)?;
    compiled
        .tx_scripts
        .into_iter()
        .next()
        .map(|(_, s)| s)
        .ok_or_else(|| CompileError::new("source contains no TxScript"))
}

/// Compiles the first `AssetScript` in the source.
pub fn compile_asset_script(
    source: &str,
    config: CompilerConfig,
) -> Result<StatelessScript, CompileError> {
    let compiled = compile_source(source, config)?;
    compiled
        .asset_scripts
        .into_iter()
        .next()
        .map(|(_, s)| s)
        .ok_or_else(|| CompileError::new("source contains no AssetScript"))
}

/// Compiles the named `TxContract` in the source.
pub fn compile_contract(
    source: &str,
    name: &str,
    config: CompilerConfig,
) -> Result<StatefulContract, CompileError> {
    let compiled = compile_source(source, config)?;
    compiled
        .contracts
        .into_iter()
        .find(|(n, _)| n == name)
        .map(|(_, c)| c)
        .ok_or_else(|| CompileError::new(format!("source contains no contract {}", name)))
}

// ----- symbol tables -----

#[derive(Clone)]
struct FuncSig {
    index: u8,
    is_public: bool,
    args: Vec<Type>,
    returns: Vec<Type>,
}

#[derive(Clone)]
struct EventSig {
    fields: Vec<Type>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum PlaceKind {
    Local,
    Field,
}

#[derive(Clone)]
struct VarInfo {
    kind: PlaceKind,
    offset: u16,
    ty: Type,
    is_mut: bool,
}

/// Per-function scope: locals over the field tables of the definition.
struct Scope {
    vars: HashMap<String, VarInfo>,
    next_local: u16,
}

/// Maximum local slots addressable by the single-byte local index.
const MAX_LOCALS: u16 = 256;

impl Scope {
    fn new() -> Scope {
        Scope {
            vars: HashMap::new(),
            next_local: 0,
        }
    }

    fn define(&mut self, name: &str, ty: Type, is_mut: bool) -> Result<VarInfo, CompileError> {
        if self.vars.contains_key(name) {
            return Err(CompileError::new(format!(
                "variable {} is already defined",
                name
            )));
        }
        let len = ty.flattened_len() as u16;
        if self.next_local + len > MAX_LOCALS {
            return Err(CompileError::new("too many local variables"));
        }
        let info = VarInfo {
            kind: PlaceKind::Local,
            offset: self.next_local,
            ty,
            is_mut,
        };
        self.next_local += len;
        self.vars.insert(name.to_string(), info.clone());
        Ok(info)
    }
}

/// Symbol context of the definition currently being compiled.
struct DefContext {
    contract_name: String,
    funcs: HashMap<String, FuncSig>,
    events: HashMap<String, EventSig>,
    fields: HashMap<String, VarInfo>,
    stateful: bool,
}

/// Built-in functions lowered to a single instruction.
struct Builtin {
    args: &'static [Type],
    returns: &'static [Type],
    instr: Instr,
    stateful: bool,
}

fn builtin(name: &str) -> Option<Builtin> {
    use Type::*;
    Some(match name {
        "approve_alf" => Builtin {
            args: &[Address, U256],
            returns: &[],
            instr: Instr::ApproveAlf,
            stateful: true,
        },
        "transfer_alf" => Builtin {
            args: &[Address, Address, U256],
            returns: &[],
            instr: Instr::TransferAlf,
            stateful: true,
        },
        "use_contract_assets" => Builtin {
            args: &[ByteVec],
            returns: &[],
            instr: Instr::UseContractAssets,
            stateful: true,
        },
        "generate_output" => Builtin {
            args: &[Address],
            returns: &[],
            instr: Instr::GenerateOutput,
            stateful: true,
        },
        "destroy_contract" => Builtin {
            args: &[Address],
            returns: &[],
            instr: Instr::DestroyContract,
            stateful: true,
        },
        "blake2b" => Builtin {
            args: &[ByteVec],
            returns: &[ByteVec],
            instr: Instr::Blake2b,
            stateful: false,
        },
        "keccak256" => Builtin {
            args: &[ByteVec],
            returns: &[ByteVec],
            instr: Instr::Keccak256,
            stateful: false,
        },
        "size" => Builtin {
            args: &[ByteVec],
            returns: &[U256],
            instr: Instr::ByteVecSize,
            stateful: false,
        },
        "verify_tx_signature" => Builtin {
            args: &[ByteVec],
            returns: &[],
            instr: Instr::VerifyTxSignature,
            stateful: false,
        },
        "eth_ecrecover" => Builtin {
            args: &[ByteVec, ByteVec],
            returns: &[ByteVec],
            instr: Instr::EthEcRecover,
            stateful: false,
        },
        _ => return None,
    })
}

// ----- the compiler -----

struct Compiler<'a> {
    unit: &'a SourceUnit,
    config: CompilerConfig,
    /// Callable surfaces of every contract in the unit, for external calls.
    interfaces: HashMap<String, HashMap<String, FuncSig>>,
    /// Memoized expression types, keyed by `ExprId`; AST stays immutable.
    types: HashMap<ExprId, Vec<Type>>,
    next_expr_id: ExprId,
}

impl<'a> Compiler<'a> {
    fn new(unit: &'a SourceUnit, config: CompilerConfig) -> Compiler<'a> {
        Compiler {
            unit,
            config,
            interfaces: HashMap::new(),
            types: HashMap::new(),
            next_expr_id: unit.next_expr_id,
        }
    }

    fn compile(mut self) -> Result<CompiledUnit, CompileError> {
        // Interfaces first so contracts can call each other in any order.
        for definition in &self.unit.definitions {
            if let Definition::Contract(contract) = definition {
                let funcs = build_func_table(&contract.funcs)?;
                self.interfaces.insert(contract.name.clone(), funcs);
            }
        }

        let mut compiled = CompiledUnit {
            asset_scripts: Vec::new(),
            tx_scripts: Vec::new(),
            contracts: Vec::new(),
        };

        for definition in &self.unit.definitions {
            match definition {
                Definition::AssetScript(script) => {
                    let methods = self.compile_def(
                        &script.name,
                        &script.funcs,
                        &[],
                        &[],
                        false,
                    )?;
                    let script_artifact = StatelessScript::from_methods(methods)
                        .map_err(|e| CompileError::new(format!("{}: {}", script.name, e)))?;
                    compiled
                        .asset_scripts
                        .push((script.name.clone(), script_artifact));
                }
                Definition::TxScript(script) => {
                    let methods = self.compile_def(
                        &script.name,
                        &script.funcs,
                        &[],
                        &[],
                        true,
                    )?;
                    let script_artifact = StatefulScript::from_methods(methods)
                        .map_err(|e| CompileError::new(format!("{}: {}", script.name, e)))?;
                    compiled
                        .tx_scripts
                        .push((script.name.clone(), script_artifact));
                }
                Definition::Contract(contract) => {
                    let methods = self.compile_def(
                        &contract.name,
                        &contract.funcs,
                        &contract.fields,
                        &contract.events,
                        true,
                    )?;
                    let field_len: usize = contract
                        .fields
                        .iter()
                        .map(|f| f.ty.flattened_len())
                        .sum();
                    let artifact = StatefulContract::from_methods(field_len as u16, methods)
                        .map_err(|e| CompileError::new(format!("{}: {}", contract.name, e)))?;
                    compiled.contracts.push((contract.name.clone(), artifact));
                }
            }
        }
        Ok(compiled)
    }

    fn compile_def(
        &mut self,
        name: &str,
        funcs: &[FuncDef],
        fields: &[FieldDef],
        events: &[EventDef],
        stateful: bool,
    ) -> Result<Vec<Method>, CompileError> {
        let func_table = build_func_table(funcs)?;

        let mut event_table = HashMap::new();
        for event in events {
            let sig = EventSig {
                fields: event.fields.iter().map(|a| a.ty.clone()).collect(),
            };
            if event_table.insert(event.name.clone(), sig).is_some() {
                return Err(CompileError::new(format!(
                    "event {} is defined multiple times",
                    event.name
                )));
            }
        }

        let mut field_table = HashMap::new();
        let mut field_offset: usize = 0;
        for field in fields {
            let len = field.ty.flattened_len();
            if field_offset + len > u16::MAX as usize {
                return Err(CompileError::new("too many contract fields"));
            }
            if field_table.contains_key(&field.name) {
                return Err(CompileError::new(format!(
                    "field {} is defined multiple times",
                    field.name
                )));
            }
            field_table.insert(
                field.name.clone(),
                VarInfo {
                    kind: PlaceKind::Field,
                    offset: field_offset as u16,
                    ty: field.ty.clone(),
                    is_mut: field.is_mut,
                },
            );
            field_offset += len;
        }

        let ctx = DefContext {
            contract_name: name.to_string(),
            funcs: func_table,
            events: event_table,
            fields: field_table,
            stateful,
        };

        funcs
            .iter()
            .map(|func| self.compile_func(&ctx, func))
            .collect()
    }

    fn compile_func(&mut self, ctx: &DefContext, func: &FuncDef) -> Result<Method, CompileError> {
        let mut scope = Scope::new();
        for arg in &func.args {
            scope.define(&arg.name, arg.ty.clone(), false)?;
        }
        let args_len = scope.next_local;
        if args_len > u8::MAX as u16 {
            return Err(CompileError::new(format!(
                "function {} has too many arguments",
                func.name
            )));
        }

        let returns_len: usize = func.returns.iter().map(|t| t.flattened_len()).sum();
        if returns_len > u8::MAX as usize {
            return Err(CompileError::new(format!(
                "function {} returns too many values",
                func.name
            )));
        }

        let mut instrs = Vec::new();
        for stmt in &func.body {
            self.emit_stmt(ctx, &mut scope, func, stmt, &mut instrs)?;
        }

        match func.body.last() {
            Some(Stmt::Return { .. }) => {}
            _ if func.returns.is_empty() => instrs.push(Instr::Return),
            _ => {
                return Err(CompileError::new(format!(
                    "function {} must end with a return statement",
                    func.name
                )))
            }
        }

        Ok(Method {
            is_public: func.is_public,
            is_payable: func.is_payable,
            args_len: args_len as u8,
            locals_len: scope.next_local,
            returns_len: returns_len as u8,
            instrs,
        })
    }

    // ----- statements -----

    fn emit_stmt(
        &mut self,
        ctx: &DefContext,
        scope: &mut Scope,
        func: &FuncDef,
        stmt: &Stmt,
        out: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        match stmt {
            Stmt::VarDef { bindings, value } => {
                let value_types = self.infer(ctx, scope, value)?;
                if value_types.len() != bindings.len() {
                    return Err(CompileError::new(format!(
                        "let binds {} names but the expression produces {} values",
                        bindings.len(),
                        value_types.len()
                    )));
                }
                let mut slots = Vec::new();
                for ((is_mut, name), ty) in bindings.iter().zip(value_types.iter()) {
                    let info = scope.define(name, ty.clone(), *is_mut)?;
                    for i in 0..ty.flattened_len() as u16 {
                        slots.push(info.offset + i);
                    }
                }
                self.emit_expr(ctx, scope, value, out)?;
                for slot in slots.into_iter().rev() {
                    out.push(Instr::StoreLocal(slot as u8));
                }
                Ok(())
            }

            Stmt::Assign { target, value } => {
                let (kind, offset, ty, is_mut, name) = self.resolve_target(ctx, scope, target)?;
                if !is_mut {
                    return Err(CompileError::new(format!(
                        "cannot assign to immutable {}",
                        name
                    )));
                }
                let value_types = self.infer(ctx, scope, value)?;
                if value_types.len() != 1 || value_types[0] != ty {
                    return Err(CompileError::new(format!(
                        "cannot assign {} to {} (type {})",
                        describe_types(&value_types),
                        name,
                        ty
                    )));
                }
                self.emit_expr(ctx, scope, value, out)?;
                emit_stores(kind, offset, ty.flattened_len(), out)?;
                Ok(())
            }

            Stmt::FuncCall { name, args } => {
                let returns = self.check_call(ctx, scope, name, args)?;
                self.emit_call(ctx, scope, name, args, out)?;
                let discard: usize = returns.iter().map(|t| t.flattened_len()).sum();
                for _ in 0..discard {
                    out.push(Instr::Pop);
                }
                Ok(())
            }

            Stmt::ContractCallStmt {
                object,
                method,
                args,
            } => {
                let returns = self.check_contract_call(ctx, scope, object, method, args)?;
                self.emit_contract_call(ctx, scope, object, method, args, out)?;
                let discard: usize = returns.iter().map(|t| t.flattened_len()).sum();
                for _ in 0..discard {
                    out.push(Instr::Pop);
                }
                Ok(())
            }

            Stmt::IfElse {
                cond,
                then_body,
                else_body,
            } => {
                self.check_condition(ctx, scope, cond)?;
                self.emit_expr(ctx, scope, cond, out)?;

                let mut then_instrs = Vec::new();
                for stmt in then_body {
                    self.emit_stmt(ctx, scope, func, stmt, &mut then_instrs)?;
                }
                let mut else_instrs = Vec::new();
                for stmt in else_body {
                    self.emit_stmt(ctx, scope, func, stmt, &mut else_instrs)?;
                }

                if else_instrs.is_empty() {
                    out.push(Instr::IfFalse(branch_offset(then_instrs.len())?));
                    out.extend(then_instrs);
                } else {
                    out.push(Instr::IfFalse(branch_offset(then_instrs.len() + 1)?));
                    out.extend(then_instrs);
                    out.push(Instr::Jump(branch_offset(else_instrs.len())?));
                    out.extend(else_instrs);
                }
                Ok(())
            }

            Stmt::While { cond, body } => {
                self.check_condition(ctx, scope, cond)?;
                let mut cond_instrs = Vec::new();
                self.emit_expr(ctx, scope, cond, &mut cond_instrs)?;

                let mut body_instrs = Vec::new();
                for stmt in body {
                    self.emit_stmt(ctx, scope, func, stmt, &mut body_instrs)?;
                }

                let back = cond_instrs.len() + body_instrs.len() + 2;
                let back_offset = i8::try_from(-(back as i64))
                    .map_err(|_| CompileError::new("Too many instrs for branch"))?;

                out.extend(cond_instrs);
                out.push(Instr::IfFalse(branch_offset(body_instrs.len() + 1)?));
                out.extend(body_instrs);
                out.push(Instr::Jump(back_offset));
                Ok(())
            }

            Stmt::Return { values } => {
                let mut types = Vec::new();
                for value in values {
                    types.extend(self.infer_single_or_multi(ctx, scope, value)?);
                }
                if types != func.returns {
                    return Err(CompileError::new(format!(
                        "return type mismatch: expected {}, got {}",
                        describe_types(&func.returns),
                        describe_types(&types)
                    )));
                }
                for value in values {
                    self.emit_expr(ctx, scope, value, out)?;
                }
                out.push(Instr::Return);
                Ok(())
            }

            Stmt::EmitEvent { name, args } => {
                let sig = ctx
                    .events
                    .get(name)
                    .cloned()
                    .ok_or_else(|| CompileError::new(format!("unknown event {}", name)))?;
                let arg_types = self.infer_args(ctx, scope, args)?;
                if arg_types != sig.fields {
                    return Err(CompileError::new(format!(
                        "event {} expects {}, got {}",
                        name,
                        describe_types(&sig.fields),
                        describe_types(&arg_types)
                    )));
                }
                let count: usize = sig.fields.iter().map(|t| t.flattened_len()).sum();
                if count > u8::MAX as usize {
                    return Err(CompileError::new(format!("event {} has too many fields", name)));
                }
                for arg in args {
                    self.emit_expr(ctx, scope, arg, out)?;
                }
                let event_id = format!("{}.{}", ctx.contract_name, name);
                out.push(Instr::BytesConst(Bytes::from(event_id.as_str())));
                out.push(Instr::Log(count as u8));
                Ok(())
            }

            Stmt::Loop {
                start,
                end,
                step,
                body,
            } => {
                let expanded = self.unroll_loop(*start, *end, *step, body)?;
                for stmt in &expanded {
                    self.emit_stmt(ctx, scope, func, stmt, out)?;
                }
                Ok(())
            }
        }
    }

    fn check_condition(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        cond: &Expr,
    ) -> Result<(), CompileError> {
        let types = self.infer(ctx, scope, cond)?;
        if types.len() != 1 || types[0] != Type::Bool {
            return Err(CompileError::new(format!(
                "condition must be Bool, got {}",
                describe_types(&types)
            )));
        }
        Ok(())
    }

    // ----- loop unrolling -----

    /// Expands a `loop` into copies of its body with `?` substituted.
    fn unroll_loop(
        &mut self,
        start: U256,
        end: U256,
        step: U256,
        body: &[Stmt],
    ) -> Result<Vec<Stmt>, CompileError> {
        if step.is_zero() {
            return Err(CompileError::new("loop step cannot be zero"));
        }
        for stmt in body {
            validate_loop_stmt(stmt)?;
        }

        let mut expanded = Vec::new();
        let mut counter = start;
        while counter < end {
            for stmt in body {
                expanded.push(self.substitute_stmt(stmt, counter));
                if expanded.len() > self.config.loop_unrolling_limit {
                    return Err(CompileError::new(format!(
                        "loop unrolling limit exceeded ({} statements)",
                        self.config.loop_unrolling_limit
                    )));
                }
            }
            counter = match counter.checked_add(step) {
                Some(next) => next,
                None => break,
            };
        }
        Ok(expanded)
    }

    /// Clones a statement with the placeholder replaced by `counter`.
    ///
    /// Every cloned expression gets a fresh id so the type side-table never
    /// aliases nodes across iterations.
    fn substitute_stmt(&mut self, stmt: &Stmt, counter: U256) -> Stmt {
        match stmt {
            Stmt::VarDef { bindings, value } => Stmt::VarDef {
                bindings: bindings.clone(),
                value: self.substitute_expr(value, counter),
            },
            Stmt::Assign { target, value } => Stmt::Assign {
                target: self.substitute_target(target, counter),
                value: self.substitute_expr(value, counter),
            },
            Stmt::FuncCall { name, args } => Stmt::FuncCall {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.substitute_expr(a, counter))
                    .collect(),
            },
            Stmt::ContractCallStmt {
                object,
                method,
                args,
            } => Stmt::ContractCallStmt {
                object: self.substitute_expr(object, counter),
                method: method.clone(),
                args: args
                    .iter()
                    .map(|a| self.substitute_expr(a, counter))
                    .collect(),
            },
            Stmt::IfElse {
                cond,
                then_body,
                else_body,
            } => Stmt::IfElse {
                cond: self.substitute_expr(cond, counter),
                then_body: then_body
                    .iter()
                    .map(|s| self.substitute_stmt(s, counter))
                    .collect(),
                else_body: else_body
                    .iter()
                    .map(|s| self.substitute_stmt(s, counter))
                    .collect(),
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: self.substitute_expr(cond, counter),
                body: body
                    .iter()
                    .map(|s| self.substitute_stmt(s, counter))
                    .collect(),
            },
            Stmt::EmitEvent { name, args } => Stmt::EmitEvent {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.substitute_expr(a, counter))
                    .collect(),
            },
            // Nested loops and returns were rejected by validation.
            Stmt::Return { .. } | Stmt::Loop { .. } => stmt.clone(),
        }
    }

    fn substitute_target(&mut self, target: &AssignTarget, counter: U256) -> AssignTarget {
        match target {
            AssignTarget::Var(name) => AssignTarget::Var(name.clone()),
            AssignTarget::ArrayElem { name, indices } => AssignTarget::ArrayElem {
                name: name.clone(),
                indices: indices
                    .iter()
                    .map(|i| self.substitute_expr(i, counter))
                    .collect(),
            },
        }
    }

    fn substitute_expr(&mut self, expr: &Expr, counter: U256) -> Expr {
        let id = self.fresh_id();
        match expr {
            Expr::Placeholder { .. } => Expr::Const {
                id,
                val: Val::U256(counter),
            },
            Expr::Const { val, .. } => Expr::Const {
                id,
                val: val.clone(),
            },
            Expr::CreateArray { elements, .. } => Expr::CreateArray {
                id,
                elements: elements
                    .iter()
                    .map(|e| self.substitute_expr(e, counter))
                    .collect(),
            },
            Expr::ArrayElement { array, index, .. } => Expr::ArrayElement {
                id,
                array: Box::new(self.substitute_expr(array, counter)),
                index: Box::new(self.substitute_expr(index, counter)),
            },
            Expr::Variable { name, .. } => Expr::Variable {
                id,
                name: name.clone(),
            },
            Expr::Unary { op, expr, .. } => Expr::Unary {
                id,
                op: *op,
                expr: Box::new(self.substitute_expr(expr, counter)),
            },
            Expr::Binary { op, lhs, rhs, .. } => Expr::Binary {
                id,
                op: *op,
                lhs: Box::new(self.substitute_expr(lhs, counter)),
                rhs: Box::new(self.substitute_expr(rhs, counter)),
            },
            Expr::ContractConv {
                contract, address, ..
            } => Expr::ContractConv {
                id,
                contract: contract.clone(),
                address: Box::new(self.substitute_expr(address, counter)),
            },
            Expr::Call { name, args, .. } => Expr::Call {
                id,
                name: name.clone(),
                args: args
                    .iter()
                    .map(|a| self.substitute_expr(a, counter))
                    .collect(),
            },
            Expr::ContractCall {
                object,
                method,
                args,
                ..
            } => Expr::ContractCall {
                id,
                object: Box::new(self.substitute_expr(object, counter)),
                method: method.clone(),
                args: args
                    .iter()
                    .map(|a| self.substitute_expr(a, counter))
                    .collect(),
            },
            Expr::Paren { inner, .. } => Expr::Paren {
                id,
                inner: Box::new(self.substitute_expr(inner, counter)),
            },
        }
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = self.next_expr_id;
        self.next_expr_id += 1;
        id
    }

    // ----- typing -----

    /// Infers the type sequence of an expression, memoized by node id.
    fn infer(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<Vec<Type>, CompileError> {
        if let Some(types) = self.types.get(&expr.id()) {
            return Ok(types.clone());
        }
        let types = self.infer_uncached(ctx, scope, expr)?;
        self.types.insert(expr.id(), types.clone());
        Ok(types)
    }

    fn infer_uncached(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<Vec<Type>, CompileError> {
        match expr {
            Expr::Const { val, .. } => Ok(vec![val_type(val)]),

            Expr::CreateArray { elements, .. } => {
                if elements.is_empty() {
                    return Err(CompileError::new("array literals cannot be empty"));
                }
                let elem_ty = self.infer_single(ctx, scope, &elements[0])?;
                for element in &elements[1..] {
                    let ty = self.infer_single(ctx, scope, element)?;
                    if ty != elem_ty {
                        return Err(CompileError::new(format!(
                            "array elements must all have type {}, got {}",
                            elem_ty, ty
                        )));
                    }
                }
                Ok(vec![Type::FixedSizeArray(
                    Box::new(elem_ty),
                    elements.len(),
                )])
            }

            Expr::ArrayElement { array, index, .. } => {
                let array_ty = self.infer_single(ctx, scope, array)?;
                let Type::FixedSizeArray(elem, _) = array_ty else {
                    return Err(CompileError::new(format!(
                        "cannot index non-array type {}",
                        array_ty
                    )));
                };
                let index_ty = self.infer_single(ctx, scope, index)?;
                if index_ty != Type::U256 {
                    return Err(CompileError::new("array index must be U256"));
                }
                Ok(vec![*elem])
            }

            Expr::Variable { name, .. } => {
                let info = lookup_var(ctx, scope, name)?;
                Ok(vec![info.ty])
            }

            Expr::Placeholder { .. } => Err(CompileError::new(
                "placeholder `?` is only legal inside a loop body",
            )),

            Expr::Unary { op, expr, .. } => match op {
                UnaryOp::Not => {
                    let ty = self.infer_single(ctx, scope, expr)?;
                    if ty != Type::Bool {
                        return Err(CompileError::new(format!("! expects Bool, got {}", ty)));
                    }
                    Ok(vec![Type::Bool])
                }
            },

            Expr::Binary { op, lhs, rhs, .. } => {
                let lhs_ty = self.infer_single(ctx, scope, lhs)?;
                let rhs_ty = self.infer_single(ctx, scope, rhs)?;
                if lhs_ty != rhs_ty {
                    return Err(CompileError::new(format!(
                        "operator {:?} applied to mismatched types {} and {}",
                        op, lhs_ty, rhs_ty
                    )));
                }
                binary_result_type(*op, &lhs_ty).map(|t| vec![t])
            }

            Expr::ContractConv {
                contract, address, ..
            } => {
                if !self.interfaces.contains_key(contract) {
                    return Err(CompileError::new(format!(
                        "unknown contract type {}",
                        contract
                    )));
                }
                let ty = self.infer_single(ctx, scope, address)?;
                if ty != Type::ByteVec {
                    return Err(CompileError::new(format!(
                        "contract conversion expects a ByteVec id, got {}",
                        ty
                    )));
                }
                Ok(vec![Type::Contract(contract.clone())])
            }

            Expr::Call { name, args, .. } => self.check_call(ctx, scope, name, args),

            Expr::ContractCall {
                object,
                method,
                args,
                ..
            } => self.check_contract_call(ctx, scope, object, method, args),

            Expr::Paren { inner, .. } => self.infer(ctx, scope, inner),
        }
    }

    /// Infers an expression that must produce exactly one value.
    fn infer_single(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<Type, CompileError> {
        let types = self.infer(ctx, scope, expr)?;
        if types.len() != 1 {
            return Err(CompileError::new(format!(
                "expected a single value, got {}",
                describe_types(&types)
            )));
        }
        Ok(types.into_iter().next().expect("one type"))
    }

    /// Infers an expression allowed to produce several values (returns).
    fn infer_single_or_multi(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<Vec<Type>, CompileError> {
        self.infer(ctx, scope, expr)
    }

    fn infer_args(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        args: &[Expr],
    ) -> Result<Vec<Type>, CompileError> {
        args.iter()
            .map(|arg| self.infer_single(ctx, scope, arg))
            .collect()
    }

    fn check_call(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        name: &str,
        args: &[Expr],
    ) -> Result<Vec<Type>, CompileError> {
        let arg_types = self.infer_args(ctx, scope, args)?;
        if let Some(sig) = ctx.funcs.get(name) {
            if arg_types != sig.args {
                return Err(CompileError::new(format!(
                    "function {} expects {}, got {}",
                    name,
                    describe_types(&sig.args),
                    describe_types(&arg_types)
                )));
            }
            return Ok(sig.returns.clone());
        }
        if let Some(builtin) = builtin(name) {
            if builtin.stateful && !ctx.stateful {
                return Err(CompileError::new(format!(
                    "{} is not available in asset scripts",
                    name
                )));
            }
            if arg_types != builtin.args {
                return Err(CompileError::new(format!(
                    "builtin {} expects {}, got {}",
                    name,
                    describe_types(builtin.args),
                    describe_types(&arg_types)
                )));
            }
            return Ok(builtin.returns.to_vec());
        }
        Err(CompileError::new(format!("unknown function {}", name)))
    }

    fn check_contract_call(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        object: &Expr,
        method: &str,
        args: &[Expr],
    ) -> Result<Vec<Type>, CompileError> {
        let object_ty = self.infer_single(ctx, scope, object)?;
        let Type::Contract(contract) = object_ty else {
            return Err(CompileError::new(format!(
                "method calls need a contract handle, got {}",
                object_ty
            )));
        };
        let interface = self
            .interfaces
            .get(&contract)
            .ok_or_else(|| CompileError::new(format!("unknown contract type {}", contract)))?;
        let sig = interface
            .get(method)
            .cloned()
            .ok_or_else(|| {
                CompileError::new(format!("contract {} has no method {}", contract, method))
            })?;
        if !sig.is_public {
            return Err(CompileError::new(format!(
                "method {}.{} is private",
                contract, method
            )));
        }
        let arg_types = self.infer_args(ctx, scope, args)?;
        if arg_types != sig.args {
            return Err(CompileError::new(format!(
                "method {}.{} expects {}, got {}",
                contract,
                method,
                describe_types(&sig.args),
                describe_types(&arg_types)
            )));
        }
        Ok(sig.returns)
    }

    // ----- emission -----

    fn emit_expr(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
        out: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        match expr {
            Expr::Const { val, .. } => {
                out.push(const_instr(val));
                Ok(())
            }

            Expr::CreateArray { elements, .. } => {
                for element in elements {
                    self.emit_expr(ctx, scope, element, out)?;
                }
                Ok(())
            }

            Expr::ArrayElement { .. } | Expr::Variable { .. } => {
                let (kind, offset, ty) = self.resolve_place(ctx, scope, expr)?;
                emit_loads(kind, offset, ty.flattened_len(), out)?;
                Ok(())
            }

            Expr::Placeholder { .. } => Err(CompileError::new(
                "placeholder `?` is only legal inside a loop body",
            )),

            Expr::Unary { op, expr, .. } => {
                self.emit_expr(ctx, scope, expr, out)?;
                match op {
                    UnaryOp::Not => out.push(Instr::NotBool),
                }
                Ok(())
            }

            Expr::Binary { op, lhs, rhs, .. } => {
                let operand_ty = self
                    .types
                    .get(&lhs.id())
                    .and_then(|t| t.first().cloned())
                    .ok_or_else(|| CompileError::new("expression was not type-checked"))?;
                self.emit_expr(ctx, scope, lhs, out)?;
                self.emit_expr(ctx, scope, rhs, out)?;
                out.push(binary_instr(*op, &operand_ty)?);
                Ok(())
            }

            Expr::ContractConv { address, .. } => self.emit_expr(ctx, scope, address, out),

            Expr::Call { name, args, .. } => self.emit_call(ctx, scope, name, args, out),

            Expr::ContractCall {
                object,
                method,
                args,
                ..
            } => self.emit_contract_call(ctx, scope, object, method, args, out),

            Expr::Paren { inner, .. } => self.emit_expr(ctx, scope, inner, out),
        }
    }

    fn emit_call(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        name: &str,
        args: &[Expr],
        out: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        for arg in args {
            self.emit_expr(ctx, scope, arg, out)?;
        }
        if let Some(sig) = ctx.funcs.get(name) {
            out.push(Instr::CallLocal(sig.index));
            return Ok(());
        }
        let builtin = builtin(name)
            .ok_or_else(|| CompileError::new(format!("unknown function {}", name)))?;
        out.push(builtin.instr);
        Ok(())
    }

    fn emit_contract_call(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        object: &Expr,
        method: &str,
        args: &[Expr],
        out: &mut Vec<Instr>,
    ) -> Result<(), CompileError> {
        let object_types = self
            .types
            .get(&object.id())
            .cloned()
            .ok_or_else(|| CompileError::new("expression was not type-checked"))?;
        let Some(Type::Contract(contract)) = object_types.first() else {
            return Err(CompileError::new("method calls need a contract handle"));
        };
        let index = self.interfaces[contract.as_str()][method].index;

        for arg in args {
            self.emit_expr(ctx, scope, arg, out)?;
        }
        self.emit_expr(ctx, scope, object, out)?;
        out.push(Instr::CallExternal(index));
        Ok(())
    }

    /// Resolves a variable or constant-index element chain to its slots.
    fn resolve_place(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<(PlaceKind, u16, Type), CompileError> {
        let (kind, offset, ty, _) = self.resolve_place_mut(ctx, scope, expr)?;
        Ok((kind, offset, ty))
    }

    fn resolve_place_mut(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        expr: &Expr,
    ) -> Result<(PlaceKind, u16, Type, bool), CompileError> {
        match expr {
            Expr::Variable { name, .. } => {
                let info = lookup_var(ctx, scope, name)?;
                Ok((info.kind, info.offset, info.ty, info.is_mut))
            }
            Expr::Paren { inner, .. } => self.resolve_place_mut(ctx, scope, inner),
            Expr::ArrayElement { array, index, .. } => {
                let (kind, offset, ty, is_mut) = self.resolve_place_mut(ctx, scope, array)?;
                let Type::FixedSizeArray(elem, len) = ty else {
                    return Err(CompileError::new(format!(
                        "cannot index non-array type {}",
                        ty
                    )));
                };
                let index_value = eval_const_index(index).ok_or_else(|| {
                    CompileError::new("array index must be a compile-time constant")
                })?;
                if index_value >= U256::from(len) {
                    return Err(CompileError::new(format!(
                        "array index {} out of bounds (length {})",
                        index_value, len
                    )));
                }
                let stride = elem.flattened_len();
                let element_offset = offset as usize + index_value.as_usize() * stride;
                if element_offset > u16::MAX as usize {
                    return Err(CompileError::new("flattened array offset too large"));
                }
                Ok((kind, element_offset as u16, *elem, is_mut))
            }
            _ => Err(CompileError::new(
                "can only index variables and contract fields",
            )),
        }
    }

    fn resolve_target(
        &mut self,
        ctx: &DefContext,
        scope: &Scope,
        target: &AssignTarget,
    ) -> Result<(PlaceKind, u16, Type, bool, String), CompileError> {
        match target {
            AssignTarget::Var(name) => {
                let info = lookup_var(ctx, scope, name)?;
                Ok((info.kind, info.offset, info.ty, info.is_mut, name.clone()))
            }
            AssignTarget::ArrayElem { name, indices } => {
                let info = lookup_var(ctx, scope, name)?;
                let kind = info.kind;
                let mut offset = info.offset;
                let mut ty = info.ty;
                for index in indices {
                    let Type::FixedSizeArray(elem, len) = ty else {
                        return Err(CompileError::new(format!(
                            "cannot index non-array type {}",
                            ty
                        )));
                    };
                    let index_value = eval_const_index(index).ok_or_else(|| {
                        CompileError::new("array index must be a compile-time constant")
                    })?;
                    if index_value >= U256::from(len) {
                        return Err(CompileError::new(format!(
                            "array index {} out of bounds (length {})",
                            index_value, len
                        )));
                    }
                    offset += (index_value.as_usize() * elem.flattened_len()) as u16;
                    ty = *elem;
                }
                Ok((kind, offset, ty, info.is_mut, name.clone()))
            }
        }
    }
}

// ----- free helpers -----

fn build_func_table(funcs: &[FuncDef]) -> Result<HashMap<String, FuncSig>, CompileError> {
    if funcs.len() > u8::MAX as usize + 1 {
        return Err(CompileError::new("too many functions"));
    }
    let mut table = HashMap::new();
    for (index, func) in funcs.iter().enumerate() {
        let sig = FuncSig {
            index: index as u8,
            is_public: func.is_public,
            args: func.args.iter().map(|a| a.ty.clone()).collect(),
            returns: func.returns.clone(),
        };
        if table.insert(func.name.clone(), sig).is_some() {
            return Err(CompileError::new(format!(
                "function {} is defined multiple times",
                func.name
            )));
        }
    }
    Ok(table)
}

fn lookup_var(ctx: &DefContext, scope: &Scope, name: &str) -> Result<VarInfo, CompileError> {
    scope
        .vars
        .get(name)
        .or_else(|| ctx.fields.get(name))
        .cloned()
        .ok_or_else(|| CompileError::new(format!("unknown variable {}", name)))
}

fn validate_loop_stmt(stmt: &Stmt) -> Result<(), CompileError> {
    match stmt {
        Stmt::Loop { .. } => Err(CompileError::new("nested loops are not supported")),
        Stmt::VarDef { .. } => Err(CompileError::new("let is not allowed in a loop body")),
        Stmt::Return { .. } => Err(CompileError::new("return is not allowed in a loop body")),
        Stmt::IfElse {
            then_body,
            else_body,
            ..
        } => {
            for stmt in then_body.iter().chain(else_body) {
                validate_loop_stmt(stmt)?;
            }
            Ok(())
        }
        Stmt::While { body, .. } => {
            for stmt in body {
                validate_loop_stmt(stmt)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Evaluates a compile-time constant array index.
fn eval_const_index(expr: &Expr) -> Option<U256> {
    match expr {
        Expr::Const {
            val: Val::U256(value),
            ..
        } => Some(*value),
        Expr::Paren { inner, .. } => eval_const_index(inner),
        _ => None,
    }
}

fn val_type(val: &Val) -> Type {
    match val {
        Val::Bool(_) => Type::Bool,
        Val::U256(_) => Type::U256,
        Val::I256(_) => Type::I256,
        Val::ByteVec(_) => Type::ByteVec,
        Val::Address(_) => Type::Address,
    }
}

fn const_instr(val: &Val) -> Instr {
    match val {
        Val::Bool(true) => Instr::ConstTrue,
        Val::Bool(false) => Instr::ConstFalse,
        Val::U256(value) => Instr::U256Const(*value),
        Val::I256(value) => Instr::I256Const(*value),
        Val::ByteVec(bytes) => Instr::BytesConst(bytes.clone()),
        Val::Address(lockup) => Instr::AddressConst(*lockup),
    }
}

fn binary_result_type(op: BinaryOp, operand: &Type) -> Result<Type, CompileError> {
    use BinaryOp::*;
    let ok = match op {
        Add | Sub | Mul | Div | Mod => match operand {
            Type::U256 => Some(Type::U256),
            Type::I256 => Some(Type::I256),
            _ => None,
        },
        Lt | Le | Gt | Ge => match operand {
            Type::U256 => Some(Type::Bool),
            _ => None,
        },
        Eq | Ne => match operand {
            Type::Bool | Type::U256 | Type::I256 | Type::ByteVec | Type::Address => {
                Some(Type::Bool)
            }
            _ => None,
        },
        And | Or => match operand {
            Type::Bool => Some(Type::Bool),
            _ => None,
        },
    };
    ok.ok_or_else(|| {
        CompileError::new(format!("operator {:?} not defined for {}", op, operand))
    })
}

fn binary_instr(op: BinaryOp, operand: &Type) -> Result<Instr, CompileError> {
    use BinaryOp::*;
    let instr = match (op, operand) {
        (Add, Type::U256) => Instr::AddU256,
        (Sub, Type::U256) => Instr::SubU256,
        (Mul, Type::U256) => Instr::MulU256,
        (Div, Type::U256) => Instr::DivU256,
        (Mod, Type::U256) => Instr::ModU256,
        (Add, Type::I256) => Instr::AddI256,
        (Sub, Type::I256) => Instr::SubI256,
        (Mul, Type::I256) => Instr::MulI256,
        (Div, Type::I256) => Instr::DivI256,
        (Mod, Type::I256) => Instr::ModI256,
        (Lt, Type::U256) => Instr::LtU256,
        (Le, Type::U256) => Instr::LeU256,
        (Gt, Type::U256) => Instr::GtU256,
        (Ge, Type::U256) => Instr::GeU256,
        (Eq, _) => Instr::EqVal,
        (Ne, _) => Instr::NeVal,
        (And, Type::Bool) => Instr::AndBool,
        (Or, Type::Bool) => Instr::OrBool,
        _ => {
            return Err(CompileError::new(format!(
                "operator {:?} not defined for {}",
                op, operand
            )))
        }
    };
    Ok(instr)
}

fn emit_loads(
    kind: PlaceKind,
    offset: u16,
    len: usize,
    out: &mut Vec<Instr>,
) -> Result<(), CompileError> {
    for i in 0..len as u16 {
        match kind {
            PlaceKind::Local => out.push(Instr::LoadLocal((offset + i) as u8)),
            PlaceKind::Field => out.push(Instr::LoadField(offset + i)),
        }
    }
    Ok(())
}

fn emit_stores(
    kind: PlaceKind,
    offset: u16,
    len: usize,
    out: &mut Vec<Instr>,
) -> Result<(), CompileError> {
    for i in (0..len as u16).rev() {
        match kind {
            PlaceKind::Local => out.push(Instr::StoreLocal((offset + i) as u8)),
            PlaceKind::Field => out.push(Instr::StoreField(offset + i)),
        }
    }
    Ok(())
}

fn branch_offset(len: usize) -> Result<i8, CompileError> {
    i8::try_from(len).map_err(|_| CompileError::new("Too many instrs for branch"))
}

fn describe_types(types: &[Type]) -> String {
    let inner: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    format!("({})", inner.join(", "))
}
