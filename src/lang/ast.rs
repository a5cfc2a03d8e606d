//! Abstract syntax tree for the contract language.
//!
//! Nodes are immutable after parsing. Every expression carries a unique
//! [`ExprId`]; the compiler memoizes inferred types in a side table keyed by
//! these ids instead of mutating the tree.

use crate::types::numeric::U256;
use crate::vm::value::Val;

/// Unique id of one expression node within a source unit.
pub type ExprId = u32;

/// A source-level type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    Bool,
    U256,
    I256,
    ByteVec,
    Address,
    /// Fixed-size array; the length is part of the type.
    FixedSizeArray(Box<Type>, usize),
    /// Handle to a contract of the named contract type.
    Contract(String),
}

impl Type {
    /// Number of flattened value slots this type occupies.
    pub fn flattened_len(&self) -> usize {
        match self {
            Type::FixedSizeArray(elem, len) => elem.flattened_len() * len,
            _ => 1,
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Bool => write!(f, "Bool"),
            Type::U256 => write!(f, "U256"),
            Type::I256 => write!(f, "I256"),
            Type::ByteVec => write!(f, "ByteVec"),
            Type::Address => write!(f, "Address"),
            Type::FixedSizeArray(elem, len) => write!(f, "[{}; {}]", elem, len),
            Type::Contract(name) => write!(f, "{}", name),
        }
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// An expression node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Literal constant.
    Const { id: ExprId, val: Val },
    /// Array literal: `[a, b, c]`.
    CreateArray { id: ExprId, elements: Vec<Expr> },
    /// Constant-index element access: `xs[0]`.
    ArrayElement {
        id: ExprId,
        array: Box<Expr>,
        index: Box<Expr>,
    },
    /// Variable reference.
    Variable { id: ExprId, name: String },
    /// The loop counter `?`; only legal inside a `loop` body.
    Placeholder { id: ExprId },
    /// Unary operation.
    Unary {
        id: ExprId,
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// Binary operation.
    Binary {
        id: ExprId,
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Conversion of a ByteVec id into a contract handle: `Token(x)`.
    ContractConv {
        id: ExprId,
        contract: String,
        address: Box<Expr>,
    },
    /// Call of a function in the current script/contract.
    Call {
        id: ExprId,
        name: String,
        args: Vec<Expr>,
    },
    /// Call of a method on a contract handle: `token.transfer(...)`.
    ContractCall {
        id: ExprId,
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Parenthesized expression.
    Paren { id: ExprId, inner: Box<Expr> },
}

impl Expr {
    /// The node's unique id.
    pub fn id(&self) -> ExprId {
        match self {
            Expr::Const { id, .. }
            | Expr::CreateArray { id, .. }
            | Expr::ArrayElement { id, .. }
            | Expr::Variable { id, .. }
            | Expr::Placeholder { id }
            | Expr::Unary { id, .. }
            | Expr::Binary { id, .. }
            | Expr::ContractConv { id, .. }
            | Expr::Call { id, .. }
            | Expr::ContractCall { id, .. }
            | Expr::Paren { id, .. } => *id,
        }
    }
}

/// An assignment target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignTarget {
    /// Plain variable.
    Var(String),
    /// Array element with constant indices: `xs[1][2] = e`.
    ArrayElem { name: String, indices: Vec<Expr> },
}

/// A statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    /// `let (mut)? a, b = expr` — one binding per returned value.
    VarDef {
        bindings: Vec<(bool, String)>,
        value: Expr,
    },
    /// `target = expr`.
    Assign { target: AssignTarget, value: Expr },
    /// Function call whose results are discarded.
    FuncCall { name: String, args: Vec<Expr> },
    /// Contract method call whose results are discarded.
    ContractCallStmt {
        object: Expr,
        method: String,
        args: Vec<Expr>,
    },
    /// `if cond { } else { }`.
    IfElse {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },
    /// `while cond { }`.
    While { cond: Expr, body: Vec<Stmt> },
    /// `return e, e`.
    Return { values: Vec<Expr> },
    /// `emit Name(args)`.
    EmitEvent { name: String, args: Vec<Expr> },
    /// `loop (start, end, step) { body-with-? }`, unrolled at compile time.
    Loop {
        start: U256,
        end: U256,
        step: U256,
        body: Vec<Stmt>,
    },
}

/// A function argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub ty: Type,
}

/// A function definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FuncDef {
    pub is_public: bool,
    pub is_payable: bool,
    pub name: String,
    pub args: Vec<Argument>,
    pub returns: Vec<Type>,
    pub body: Vec<Stmt>,
}

/// A contract field definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub is_mut: bool,
    pub name: String,
    pub ty: Type,
}

/// An event definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventDef {
    pub name: String,
    pub fields: Vec<Argument>,
}

/// A script definition (`AssetScript` or `TxScript`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptDef {
    pub name: String,
    pub funcs: Vec<FuncDef>,
}

/// A contract definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContractDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub events: Vec<EventDef>,
    pub funcs: Vec<FuncDef>,
}

/// A top-level definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Definition {
    AssetScript(ScriptDef),
    TxScript(ScriptDef),
    Contract(ContractDef),
}

impl Definition {
    /// The definition's name.
    pub fn name(&self) -> &str {
        match self {
            Definition::AssetScript(s) | Definition::TxScript(s) => &s.name,
            Definition::Contract(c) => &c.name,
        }
    }
}

/// A parsed source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceUnit {
    pub definitions: Vec<Definition>,
    /// First id not used by the parser; the compiler continues from here
    /// when loop unrolling clones expressions.
    pub next_expr_id: ExprId,
}
