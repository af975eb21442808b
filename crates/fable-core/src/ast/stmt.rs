//! Statement nodes

use super::{Block, Expr, Span, Spanned};

/// A statement
#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// What kind of statement this is
    pub kind: StmtKind,
    /// Source location
    pub span: Span,
}

impl Stmt {
    /// Create a new statement
    #[must_use]
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl Spanned for Stmt {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of statement
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// An expression used as a statement (assignments, calls)
    Expr(Expr),
    /// Conditional
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
    },
    /// Loop
    While { cond: Expr, body: Block },
    /// Break out of the innermost loop
    Break,
    /// A `select { case "Label": ... }` menu
    Select { cases: Vec<SelectCase> },
    /// A dialogue block: `<box name>` ... `<end>`
    Dialogue(DialogueBlock),
    /// A literal dialogue line inside a dialogue block
    Say(String),
    /// A `<wait>` input pause inside a dialogue block
    Wait,
}

/// One labelled section of a select statement
#[derive(Debug, Clone, PartialEq)]
pub struct SelectCase {
    /// The choice label presented to the player
    pub label: String,
    /// Statements executed when this label is chosen
    pub body: Block,
    /// Source location of the case
    pub span: Span,
}

/// A dialogue block with its presentation box and block name
#[derive(Debug, Clone, PartialEq)]
pub struct DialogueBlock {
    /// Name of the presentation box the block renders into
    pub box_name: String,
    /// Name of the block (generated when the start tag omits it)
    pub name: String,
    /// The block's statements
    pub body: Block,
    /// Span covering start tag through end tag
    pub span: Span,
}

impl Spanned for DialogueBlock {
    fn span(&self) -> Span {
        self.span
    }
}
