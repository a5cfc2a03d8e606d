//! The contract-language front end.
//!
//! Source text flows through [`lexer`] and [`parser`] into the AST in
//! [`ast`], and [`compiler`] type-checks and lowers it to the VM artifacts
//! in [`crate::vm::script`].

pub mod ast;
pub mod compiler;
pub mod lexer;
pub mod parser;

use chainvm_derive::Error;

/// A compilation failure with a human-readable message.
///
/// Raised synchronously by the lexer, parser and compiler; the first error
/// halts compilation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct CompileError(pub String);

impl CompileError {
    /// Builds an error from any message.
    pub fn new(message: impl Into<String>) -> CompileError {
        CompileError(message.into())
    }

    /// Builds an error tagged with a source line.
    pub fn at(line: usize, message: impl std::fmt::Display) -> CompileError {
        CompileError(format!("line {}: {}", line, message))
    }
}
