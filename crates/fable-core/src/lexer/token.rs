//! Token types for the Fable script lexer

use logos::Logos;

/// The kind of token produced by the lexer
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r]+")]
pub enum TokenKind {
    // ========== Keywords ==========
    #[token("chapter")]
    Chapter,
    #[token("scene")]
    Scene,
    #[token("function")]
    Function,
    #[token("include")]
    Include,
    #[token("as")]
    As,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("break")]
    Break,
    #[token("select")]
    Select,
    #[token("case")]
    Case,

    // ========== Literals ==========
    /// Integer literal
    #[regex(r"[0-9][0-9_]*")]
    Int,

    /// Float literal
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*")]
    Float,

    /// Hex colour triplet: #RRGGBB
    #[regex(r"#[0-9a-fA-F][0-9a-fA-F][0-9a-fA-F][0-9a-fA-F][0-9a-fA-F][0-9a-fA-F]")]
    HexTriplet,

    /// Boolean true
    #[token("true")]
    True,

    /// Boolean false
    #[token("false")]
    False,

    /// Null literal
    #[token("null")]
    Null,

    /// Quoted token: either a string literal or a sigil-free identifier
    /// reference, depending on the parameter scope at the point of use.
    /// The parser decides; the lexer only records the text.
    #[regex(r#""[^"\n]*""#)]
    Quoted,

    // ========== Identifiers ==========
    /// Sigil-prefixed variable name: $gold
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*")]
    Variable,

    /// Bare identifier (command names, declared subroutines, aliases)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ========== Operators ==========
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    #[token("=")]
    Eq,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,

    #[token("&&")]
    And,
    #[token("||")]
    Or,
    #[token("!")]
    Not,

    /// Delta marker: @expr tags a number as relative-to-current
    #[token("@")]
    At,

    // ========== Delimiters ==========
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,

    // ========== Produced by the wrapper, not logos ==========
    /// Relational less-than. `<` is context-sensitive (it also opens a
    /// markup tag), so the wrapper resolves it instead of logos.
    Lt,

    /// A `<...>` markup run that closed on its source line.
    /// The lexeme includes the angle brackets.
    Tag,

    /// A `<...` markup run that reached end-of-line without closing.
    StrayTag,

    // ========== Special ==========
    #[token("\n")]
    Newline,

    /// End of file (added by the wrapper, not matched by logos)
    Eof,

    /// Lexer error - invalid character
    Error,
}

impl TokenKind {
    /// Returns true if this token is a keyword
    #[must_use]
    pub const fn is_keyword(&self) -> bool {
        matches!(
            self,
            Self::Chapter
                | Self::Scene
                | Self::Function
                | Self::Include
                | Self::As
                | Self::If
                | Self::Else
                | Self::While
                | Self::Break
                | Self::Select
                | Self::Case
                | Self::True
                | Self::False
                | Self::Null
        )
    }

    /// Returns true if this token is a statement terminator
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(self, Self::Semicolon | Self::Colon)
    }

    /// Returns true if this token is an assignment operator
    #[must_use]
    pub const fn is_assignment(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::PlusEq
                | Self::MinusEq
                | Self::StarEq
                | Self::SlashEq
                | Self::PlusPlus
                | Self::MinusMinus
        )
    }

    /// Returns true if this token should typically be skipped
    #[must_use]
    pub const fn is_trivia(&self) -> bool {
        matches!(self, Self::Newline)
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Chapter => "chapter",
            Self::Scene => "scene",
            Self::Function => "function",
            Self::Include => "include",
            Self::As => "as",
            Self::If => "if",
            Self::Else => "else",
            Self::While => "while",
            Self::Break => "break",
            Self::Select => "select",
            Self::Case => "case",
            Self::Int => "integer",
            Self::Float => "float",
            Self::HexTriplet => "hex triplet",
            Self::True => "true",
            Self::False => "false",
            Self::Null => "null",
            Self::Quoted => "quoted text",
            Self::Variable => "variable",
            Self::Ident => "identifier",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Slash => "/",
            Self::Percent => "%",
            Self::Eq => "=",
            Self::PlusEq => "+=",
            Self::MinusEq => "-=",
            Self::StarEq => "*=",
            Self::SlashEq => "/=",
            Self::PlusPlus => "++",
            Self::MinusMinus => "--",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "&&",
            Self::Or => "||",
            Self::Not => "!",
            Self::At => "@",
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::Tag => "markup tag",
            Self::StrayTag => "unterminated markup",
            Self::Newline => "newline",
            Self::Eof => "end of file",
            Self::Error => "error",
        };
        write!(f, "{text}")
    }
}
