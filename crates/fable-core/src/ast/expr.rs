//! Expression nodes

use super::{Span, Spanned};

/// An expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// What kind of expression this is
    pub kind: ExprKind,
    /// Source location
    pub span: Span,
}

impl Expr {
    /// Create a new expression
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// A placeholder expression synthesized during error recovery
    #[must_use]
    pub fn placeholder(span: Span) -> Self {
        Self::new(ExprKind::Literal(Literal::Null), span)
    }
}

impl Spanned for Expr {
    fn span(&self) -> Span {
        self.span
    }
}

/// The kind of expression
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal value
    Literal(Literal),
    /// A variable or parameter reference; the name keeps its `$` sigil
    /// when written with one. Whether this resolves to a local or a
    /// global is decided at compile time against the parameter list.
    Variable(String),
    /// Assignment; `value` is None for the increment/decrement forms,
    /// where the right operand becomes the target's current value
    Assign {
        target: String,
        op: AssignOp,
        value: Option<Box<Expr>>,
    },
    /// Binary operation
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Unary operation
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Delta marker: `@expr`
    Delta(Box<Expr>),
    /// A call to a subroutine or built-in in the current module
    Call { callee: String, args: Vec<Expr> },
    /// A call into another module via an include alias
    FarCall {
        /// Include path the alias resolved to
        module_path: String,
        callee: String,
        args: Vec<Expr>,
    },
    /// A Bezier curve literal: alternating parenthesized endpoints and
    /// braced interior control points
    Bezier(Vec<CurvePoint>),
}

/// A literal value
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

/// One control point of a Bezier curve literal
#[derive(Debug, Clone, PartialEq)]
pub struct CurvePoint {
    pub x: Expr,
    pub y: Expr,
    /// Parenthesized points are curve endpoints; braced points are
    /// interior control points
    pub kind: CurvePointKind,
}

/// Whether a curve point is an endpoint or an interior control point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurvePointKind {
    Endpoint,
    Interior,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BinOp {
    Add = 0,
    Sub = 1,
    Mul = 2,
    Div = 3,
    Mod = 4,
    Eq = 5,
    Ne = 6,
    Lt = 7,
    Le = 8,
    Gt = 9,
    Ge = 10,
    And = 11,
    Or = 12,
}

impl BinOp {
    /// Operator spelling
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

impl TryFrom<u8> for BinOp {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Add),
            1 => Ok(Self::Sub),
            2 => Ok(Self::Mul),
            3 => Ok(Self::Div),
            4 => Ok(Self::Mod),
            5 => Ok(Self::Eq),
            6 => Ok(Self::Ne),
            7 => Ok(Self::Lt),
            8 => Ok(Self::Le),
            9 => Ok(Self::Gt),
            10 => Ok(Self::Ge),
            11 => Ok(Self::And),
            12 => Ok(Self::Or),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for BinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum UnaryOp {
    Neg = 0,
    Not = 1,
}

impl TryFrom<u8> for UnaryOp {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Neg),
            1 => Ok(Self::Not),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neg => write!(f, "-"),
            Self::Not => write!(f, "!"),
        }
    }
}

/// Assignment operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AssignOp {
    /// Plain `=`
    Set = 0,
    /// `+=` (also `++`)
    Add = 1,
    /// `-=` (also `--`)
    Sub = 2,
    /// `*=`
    Mul = 3,
    /// `/=`
    Div = 4,
}

impl AssignOp {
    /// The binary operator used to combine the prior value with the
    /// popped value; None for plain `=`
    #[must_use]
    pub const fn combine_op(self) -> Option<BinOp> {
        match self {
            Self::Set => None,
            Self::Add => Some(BinOp::Add),
            Self::Sub => Some(BinOp::Sub),
            Self::Mul => Some(BinOp::Mul),
            Self::Div => Some(BinOp::Div),
        }
    }
}

impl TryFrom<u8> for AssignOp {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Set),
            1 => Ok(Self::Add),
            2 => Ok(Self::Sub),
            3 => Ok(Self::Mul),
            4 => Ok(Self::Div),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for AssignOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Set => "=",
            Self::Add => "+=",
            Self::Sub => "-=",
            Self::Mul => "*=",
            Self::Div => "/=",
        };
        write!(f, "{text}")
    }
}
