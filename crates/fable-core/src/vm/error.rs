//! Runtime errors

use thiserror::Error;

use crate::bytecode::ValueError;
use crate::module::ModuleError;

/// Errors raised while executing bytecode. A runtime error faults the
/// thread that raised it; other threads keep running.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("operand stack underflow executing {op}")]
    StackUnderflow { op: &'static str },

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Module(#[from] ModuleError),

    #[error("no subroutine named '{symbol}' in module '{module}'")]
    UnknownSubroutine { module: String, symbol: String },

    #[error("jump target {target} is outside the subroutine")]
    BadJump { target: u32 },

    #[error("call depth limit of {limit} exceeded")]
    CallDepthExceeded { limit: usize },

    #[error("curve point is not numeric (found {found})")]
    CurvePointNotNumeric { found: &'static str },
}
