//! Parse diagnostics for the Fable script language
//!
//! Diagnostics are accumulated, never thrown: the parser reports and
//! keeps going, so a single malformed construct never aborts a parse.

use crate::lexer::{Span, TokenKind};
use thiserror::Error;

/// A diagnostic with location information
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The kind of problem
    pub kind: DiagnosticKind,
    /// Source location where the problem occurred
    pub span: Span,
}

impl Diagnostic {
    /// Create a new diagnostic
    #[must_use]
    pub fn new(kind: DiagnosticKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// The formatted message for this diagnostic
    #[must_use]
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.span)
    }
}

impl std::error::Error for Diagnostic {}

/// The kind of parse diagnostic
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    #[error("unexpected token: found {found}, expected {expected}")]
    UnexpectedToken {
        found: TokenKind,
        expected: Expected,
    },

    #[error("expected expression")]
    ExpectedExpression,

    #[error("expected identifier")]
    ExpectedIdentifier,

    #[error("missing statement terminator")]
    MissingTerminator,

    #[error("invalid assignment target")]
    InvalidAssignmentTarget,

    #[error("invalid number literal: {0}")]
    InvalidNumber(String),

    #[error("break outside of loop")]
    BreakOutsideLoop,

    #[error("stray markup does not close on its line")]
    StrayMarkup,

    #[error("<wait> outside of a dialogue block")]
    MisplacedWait,

    #[error("<end> without an open dialogue block")]
    UnmatchedEndTag,

    #[error("dialogue block is missing its <end> tag")]
    UnterminatedDialogue,

    #[error("empty markup tag")]
    EmptyTag,

    #[error("unknown include alias: {0}")]
    UnknownAlias(String),

    #[error("lexical error: {0}")]
    Lex(String),
}

/// What the parser expected at the point of an unexpected token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expected {
    /// A specific token kind
    Token(TokenKind),
    /// A description of what was expected
    Description(&'static str),
}

impl std::fmt::Display for Expected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expected::Token(kind) => write!(f, "{kind}"),
            Expected::Description(desc) => write!(f, "{desc}"),
        }
    }
}
