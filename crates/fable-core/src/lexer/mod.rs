//! Lexer for the Fable script language
//!
//! The lexer converts raw script text into a token stream. Most tokens
//! come straight out of a logos automaton; a thin modal wrapper handles
//! the pieces that need line context:
//! - lines whose first non-blank character is `.` are comment lines
//! - `<` opens a markup tag when followed by a name, and is the
//!   relational operator otherwise; a tag that does not close on its
//!   source line becomes a stray-markup token
//! - quoted text is tagged so the parser can later decide whether it is
//!   a string literal or an identifier reference

#![allow(clippy::cast_possible_truncation)] // Spans use u32; scripts > 4GB are unsupported

mod span;
mod token;

pub use span::{LineIndex, Location, Span};
pub use token::TokenKind;

use logos::Logos;
use thiserror::Error;

/// Per-token flags recorded by the lexer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenFlags {
    /// The token text carries a `$` variable sigil (directly, or inside
    /// the quotes of a quoted token)
    pub sigil: bool,
    /// Numeric literal with a fractional part
    pub float: bool,
    /// Numeric literal written as a `#RRGGBB` hex triplet
    pub hex_triplet: bool,
}

/// A token with its kind, span, source text, and flags
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The span in the source code
    pub span: Span,
    /// The source text of the token
    pub lexeme: String,
    /// Lexer-recorded flags
    pub flags: TokenFlags,
}

impl Token {
    /// Create a new token, deriving flags from the kind and lexeme
    #[must_use]
    pub fn new(kind: TokenKind, span: Span, lexeme: impl Into<String>) -> Self {
        let lexeme = lexeme.into();
        let flags = TokenFlags {
            sigil: match kind {
                TokenKind::Variable => true,
                TokenKind::Quoted => lexeme.len() > 2 && lexeme.as_bytes()[1] == b'$',
                _ => false,
            },
            float: kind == TokenKind::Float,
            hex_triplet: kind == TokenKind::HexTriplet,
        };
        Self {
            kind,
            span,
            lexeme,
            flags,
        }
    }

    /// The text between the quotes of a quoted token (the lexeme
    /// otherwise)
    #[must_use]
    pub fn unquoted(&self) -> &str {
        if self.kind == TokenKind::Quoted && self.lexeme.len() >= 2 {
            &self.lexeme[1..self.lexeme.len() - 1]
        } else {
            &self.lexeme
        }
    }
}

/// Lexer error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character")]
    UnexpectedChar,
    #[error("unterminated quoted text")]
    UnterminatedQuote,
}

/// A lexer error with location information
#[derive(Debug, Clone)]
pub struct SpannedError {
    pub error: LexError,
    pub span: Span,
}

impl SpannedError {
    #[must_use]
    pub fn new(error: LexError, span: Span) -> Self {
        Self { error, span }
    }
}

impl std::fmt::Display for SpannedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.error, self.span)
    }
}

impl std::error::Error for SpannedError {}

/// The Fable lexer
pub struct Lexer<'source> {
    source: &'source str,
    /// Current position in the source (byte offset)
    position: usize,
    /// True when nothing but blanks has been seen on the current line
    at_line_start: bool,
    /// Collected errors during lexing
    errors: Vec<SpannedError>,
}

impl<'source> Lexer<'source> {
    /// Create a new lexer for the given source code
    #[must_use]
    pub fn new(source: &'source str) -> Self {
        Self {
            source,
            position: 0,
            at_line_start: true,
            errors: Vec::new(),
        }
    }

    /// Tokenize the entire source, returning all tokens and any errors
    #[must_use]
    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<SpannedError>) {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token();
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        (tokens, lexer.errors)
    }

    /// Get the next token
    pub fn next_token(&mut self) -> Token {
        loop {
            if self.at_line_start {
                self.skip_comment_lines();
            }

            if self.position >= self.source.len() {
                return Token::new(
                    TokenKind::Eof,
                    Span::new(self.position as u32, self.position as u32),
                    "",
                );
            }

            // Markup tags and relational `<` need line context that the
            // automaton cannot see.
            if let Some(token) = self.try_markup() {
                self.at_line_start = false;
                return token;
            }

            match self.lex_with_logos() {
                Some(token) => {
                    self.at_line_start = token.kind == TokenKind::Newline;
                    return token;
                }
                // Whitespace only; loop so comment-line detection reruns
                None => continue,
            }
        }
    }

    /// Skip a comment line (first non-blank character is `.`). The
    /// newline itself is lexed normally so trivia handling stays
    /// uniform.
    fn skip_comment_lines(&mut self) {
        let rest = &self.source[self.position..];
        let blanks = rest.len() - rest.trim_start_matches([' ', '\t', '\r']).len();
        let after = &rest[blanks..];
        if after.starts_with('.') {
            let line_len = after.find('\n').unwrap_or(after.len());
            self.position += blanks + line_len;
        }
    }

    /// Resolve a leading `<` into a tag, stray tag, or the relational
    /// operator. Returns None when the next character is not `<` or when
    /// logos should handle it (`<=`).
    fn try_markup(&mut self) -> Option<Token> {
        let rest = &self.source[self.position..];
        if !rest.starts_with('<') {
            return None;
        }
        let mut chars = rest.chars();
        chars.next();
        match chars.next() {
            // `<=` belongs to logos
            Some('=') => None,
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                let start = self.position;
                let line_len = rest.find('\n').unwrap_or(rest.len());
                let line = &rest[..line_len];
                if let Some(close) = line.find('>') {
                    self.position += close + 1;
                    Some(Token::new(
                        TokenKind::Tag,
                        Span::new(start as u32, self.position as u32),
                        &line[..=close],
                    ))
                } else {
                    self.position += line_len;
                    Some(Token::new(
                        TokenKind::StrayTag,
                        Span::new(start as u32, self.position as u32),
                        line,
                    ))
                }
            }
            _ => {
                let start = self.position;
                self.position += 1;
                Some(Token::new(
                    TokenKind::Lt,
                    Span::new(start as u32, self.position as u32),
                    "<",
                ))
            }
        }
    }

    /// Lex one token with the logos automaton
    fn lex_with_logos(&mut self) -> Option<Token> {
        let remaining = &self.source[self.position..];
        let mut logos_lexer = TokenKind::lexer(remaining);

        match logos_lexer.next() {
            Some(Ok(kind)) => {
                let span_range = logos_lexer.span();
                let lexeme = logos_lexer.slice();
                // span_range is relative to the remaining slice,
                // accounting for skipped whitespace
                let start = self.position + span_range.start;
                let end = self.position + span_range.end;
                self.position = end;
                Some(Token::new(
                    kind,
                    Span::new(start as u32, end as u32),
                    lexeme,
                ))
            }
            Some(Err(())) => {
                // Error recovery: skip the invalid character
                let span_range = logos_lexer.span();
                let start = self.position + span_range.start;
                let invalid = remaining[span_range.start..].chars().next()?;
                let end = start + invalid.len_utf8();
                self.position = end;

                let error = if invalid == '"' {
                    LexError::UnterminatedQuote
                } else {
                    LexError::UnexpectedChar
                };
                self.errors.push(SpannedError::new(
                    error,
                    Span::new(start as u32, end as u32),
                ));

                Some(Token::new(
                    TokenKind::Error,
                    Span::new(start as u32, end as u32),
                    &self.source[start..end],
                ))
            }
            None => {
                self.position = self.source.len();
                None
            }
        }
    }

    /// Get all errors collected during lexing
    #[must_use]
    pub fn errors(&self) -> &[SpannedError] {
        &self.errors
    }
}
