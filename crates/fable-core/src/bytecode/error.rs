//! Errors raised while compiling or decoding bytecode

use thiserror::Error;

/// Errors from deserializing a bytecode stream
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bytecode stream ended unexpectedly")]
    UnexpectedEnd,

    #[error("invalid opcode byte {0:#04x}")]
    InvalidOpcode(u8),

    #[error("invalid operand byte {0:#04x}")]
    InvalidOperand(u8),
}

/// Errors from lowering a syntax tree to bytecode
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("string table overflow: module uses more than {limit} distinct strings")]
    TooManyStrings { limit: usize },

    #[error("too many subroutines in one module (limit {limit})")]
    TooManySubroutines { limit: usize },

    #[error("subroutine '{name}' is too long to address")]
    SubroutineTooLong { name: String },

    #[error("call passes {count} arguments; the limit is 255")]
    TooManyArguments { count: usize },
}
