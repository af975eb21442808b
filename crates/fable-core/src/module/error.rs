//! Errors raised while reading or writing module containers

use thiserror::Error;

use crate::bytecode::DecodeError;

/// Errors from the module reader and writer
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a module file (bad magic)")]
    BadMagic,

    #[error("malformed module: expected section {expected:?}, found {found:?}")]
    BadMarker { expected: [u8; 4], found: [u8; 4] },

    #[error("malformed module: section data is truncated")]
    Truncated,

    #[error("malformed module: {0}")]
    Decode(#[from] DecodeError),

    #[error("malformed module: string data is not valid UTF-8")]
    InvalidUtf8,

    #[error("malformed module: invalid subroutine kind byte {0:#04x}")]
    InvalidKind(u8),

    #[error("index {index} out of range for {what} table of length {len}")]
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("section {marker} exceeds the 64 KiB section limit")]
    SectionTooLarge { marker: &'static str },

    #[error("string of {len} bytes exceeds the length prefix limit")]
    StringTooLong { len: usize },

    #[error("too many parameters to encode ({count})")]
    TooManyParams { count: usize },
}
