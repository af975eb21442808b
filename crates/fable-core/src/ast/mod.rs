//! Abstract Syntax Tree for the Fable script language
//!
//! These structures represent parsed script source. The tree is
//! immutable after parsing and is the single source of truth until a
//! subroutine is compiled. All nodes carry [`Span`]s for diagnostics.

mod expr;
mod item;
mod stmt;

pub use expr::*;
pub use item::*;
pub use stmt::*;

// Re-export Span from lexer for convenience
pub use crate::lexer::Span;

/// A trait for AST nodes that have associated source location information
pub trait Spanned {
    /// Returns the source span of this node
    fn span(&self) -> Span;
}

/// An identifier with its source location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    /// The identifier name (including any `$` sigil)
    pub name: String,
    /// Source location
    pub span: Span,
}

impl Ident {
    /// Create a new identifier
    #[must_use]
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self {
            name: name.into(),
            span,
        }
    }

    /// Whether the name carries the `$` variable sigil
    #[must_use]
    pub fn has_sigil(&self) -> bool {
        self.name.starts_with('$')
    }
}

impl Spanned for Ident {
    fn span(&self) -> Span {
        self.span
    }
}

/// A block of statements
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// The statements in the block
    pub stmts: Vec<Stmt>,
    /// Source location of the entire block (including braces)
    pub span: Span,
}

impl Block {
    /// Create a new block
    #[must_use]
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Self {
        Self { stmts, span }
    }

    /// Create an empty block (used as a placeholder during recovery)
    #[must_use]
    pub fn empty(span: Span) -> Self {
        Self {
            stmts: Vec::new(),
            span,
        }
    }
}

impl Spanned for Block {
    fn span(&self) -> Span {
        self.span
    }
}
