//! Bytecode for the Fable virtual machine
//!
//! This module provides:
//! - `Instruction`: the stack-based instruction set and its wire form
//! - `Subroutine`: one compiled subroutine body
//! - `Value`: runtime value representation
//! - `Compiler`: syntax tree to bytecode lowering
//! - `disassemble`: debugging output

mod compiler;
mod debug;
mod error;
mod instruction;
mod value;

pub use compiler::{CompiledSubroutine, CompiledUnit, Compiler};
pub use debug::disassemble;
pub use error::{CompileError, DecodeError};
pub use instruction::{Const, Instruction, StrId, Subroutine, Symbol};
pub use value::{CurvePointValue, Value, ValueError};
