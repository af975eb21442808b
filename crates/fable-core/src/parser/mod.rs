//! Parser for the Fable script language
//!
//! A recursive-descent parser with precedence climbing for expressions.
//! The contract is `parse(source) -> (ScriptUnit, Vec<Diagnostic>)`:
//! the parser never fails hard. Every problem becomes a diagnostic and
//! a placeholder token or node is synthesized so the rest of the file
//! still parses.
//!
//! Quoted tokens are ambiguous: `"gold"` is an identifier reference
//! when its text matches a parameter of the subroutine being parsed (or
//! carries the `$` sigil) and a string literal otherwise. The active
//! parameter set is replaced on entering a subroutine declaration and
//! is never restored - only one subroutine's parameters are visible at
//! a time.

mod diagnostics;

pub use diagnostics::{Diagnostic, DiagnosticKind, Expected};

use crate::ast::{
    AssignOp, BinOp, Block, CurvePoint, CurvePointKind, DialogueBlock, Expr, ExprKind, Ident,
    Include, Item, ItemKind, Literal, Parameter, ScriptUnit, SelectCase, Stmt, StmtKind,
    SubroutineDecl, SubroutineKind, UnaryOp,
};
use crate::lexer::{Lexer, Span, Token, TokenKind};

/// Result type for parsing operations
type ParseResult<T> = Result<T, Diagnostic>;

/// The Fable parser
pub struct Parser {
    /// All tokens from the source
    tokens: Vec<Token>,
    /// Current position in the token stream
    position: usize,
    /// Accumulated diagnostics (lexical and syntactic)
    diagnostics: Vec<Diagnostic>,
    /// Active disambiguation scope: the current subroutine's parameter
    /// names, exactly as declared
    params: Vec<String>,
    /// Includes seen so far (for alias resolution in far calls)
    includes: Vec<Include>,
    /// Nesting depth for loops (break validation)
    loop_depth: u32,
    /// Nesting depth for dialogue blocks (say/wait validation)
    dialogue_depth: u32,
    /// Counter for generated dialogue-block names within a subroutine
    block_counter: u32,
    /// Dialogue blocks collected for the subroutine being parsed
    current_blocks: Vec<(String, String, Span)>,
}

impl Parser {
    /// Create a new parser from source code
    #[must_use]
    pub fn new(source: &str) -> Self {
        let (tokens, lex_errors) = Lexer::tokenize(source);
        let diagnostics = lex_errors
            .into_iter()
            .map(|e| Diagnostic::new(DiagnosticKind::Lex(e.error.to_string()), e.span))
            .collect();
        Self {
            tokens,
            position: 0,
            diagnostics,
            params: Vec::new(),
            includes: Vec::new(),
            loop_depth: 0,
            dialogue_depth: 0,
            block_counter: 0,
            current_blocks: Vec::new(),
        }
    }

    /// Parse an entire script unit. Always produces a tree; problems
    /// are reported through the returned diagnostics.
    #[must_use]
    pub fn parse(source: &str) -> (ScriptUnit, Vec<Diagnostic>) {
        let mut parser = Parser::new(source);
        let unit = parser.script_unit();
        (unit, parser.diagnostics)
    }

    /// Parse a single expression (used by tests and tooling)
    #[must_use]
    pub fn parse_expression(source: &str) -> (Expr, Vec<Diagnostic>) {
        let mut parser = Parser::new(source);
        parser.skip_trivia();
        let expr = match parser.expression() {
            Ok(expr) => expr,
            Err(diag) => {
                let span = diag.span;
                parser.report(diag);
                Expr::placeholder(span)
            }
        };
        (expr, parser.diagnostics)
    }

    // ==================== Token Management ====================

    /// Get the current token
    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or_else(|| {
            self.tokens
                .last()
                .expect("token stream always ends with EOF")
        })
    }

    /// Get the current token kind
    fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    /// Check if we're at end of file
    fn is_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    /// Advance to the next token, skipping trivia
    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        self.position += 1;
        self.skip_trivia();
        token
    }

    /// Skip trivia tokens (newlines)
    fn skip_trivia(&mut self) {
        while self.position < self.tokens.len() && self.current().kind.is_trivia() {
            self.position += 1;
        }
    }

    /// Check if the current token matches a kind
    fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    /// Consume a token if it matches, returning it
    fn eat(&mut self, kind: TokenKind) -> Option<Token> {
        if self.check(kind) {
            Some(self.advance())
        } else {
            None
        }
    }

    /// Expect and consume a specific token, or error
    fn expect(&mut self, kind: TokenKind) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(Diagnostic::new(
                DiagnosticKind::UnexpectedToken {
                    found: self.current_kind(),
                    expected: Expected::Token(kind),
                },
                self.current().span,
            ))
        }
    }

    /// Peek at the next non-trivia token
    fn peek(&self) -> Option<&Token> {
        let mut pos = self.position + 1;
        while pos < self.tokens.len() {
            let token = &self.tokens[pos];
            if !token.kind.is_trivia() {
                return Some(token);
            }
            pos += 1;
        }
        None
    }

    /// Record a diagnostic and continue parsing
    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// Skip tokens until a plausible statement boundary
    fn synchronize(&mut self) {
        while !self.is_eof() {
            if self.current_kind().is_terminator() {
                self.advance();
                return;
            }
            match self.current_kind() {
                TokenKind::RBrace
                | TokenKind::Chapter
                | TokenKind::Scene
                | TokenKind::Function
                | TokenKind::Include
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Select
                | TokenKind::Break
                | TokenKind::Tag => return,
                _ => {
                    self.advance();
                }
            }
        }
    }

    /// Consume a statement terminator, tolerating repeats. A missing
    /// terminator is a recoverable diagnostic, not a hard failure.
    fn terminator(&mut self) {
        if self.current_kind().is_terminator() {
            while self.current_kind().is_terminator() {
                self.advance();
            }
        } else if !matches!(self.current_kind(), TokenKind::RBrace | TokenKind::Eof) {
            let span = self.current().span;
            self.report(Diagnostic::new(DiagnosticKind::MissingTerminator, span));
        }
    }

    /// Whether a quoted token disambiguates to an identifier reference
    fn quoted_is_ident(&self, token: &Token) -> bool {
        token.flags.sigil || self.params.iter().any(|p| p == token.unquoted())
    }

    // ==================== Items ====================

    /// Parse the whole unit
    fn script_unit(&mut self) -> ScriptUnit {
        self.skip_trivia();
        let start = if self.is_eof() { 0 } else { self.current().span.start };

        let mut items = Vec::new();
        while !self.is_eof() {
            match self.item() {
                Ok(item) => items.push(item),
                Err(diag) => {
                    self.report(diag);
                    self.synchronize();
                }
            }
        }

        let end = self.current().span.end;
        ScriptUnit::new(items, Span::new(start, end.max(start)))
    }

    /// Parse a top-level item
    fn item(&mut self) -> ParseResult<Item> {
        let start = self.current().span.start;
        let kind = match self.current_kind() {
            TokenKind::Include => ItemKind::Include(self.include_item()?),
            TokenKind::Chapter => ItemKind::Subroutine(self.subroutine_item(SubroutineKind::Chapter)?),
            TokenKind::Scene => ItemKind::Subroutine(self.subroutine_item(SubroutineKind::Scene)?),
            TokenKind::Function => {
                ItemKind::Subroutine(self.subroutine_item(SubroutineKind::Function)?)
            }
            _ => {
                return Err(Diagnostic::new(
                    DiagnosticKind::UnexpectedToken {
                        found: self.current_kind(),
                        expected: Expected::Description("top-level declaration"),
                    },
                    self.current().span,
                ));
            }
        };
        let end = self
            .tokens
            .get(self.position.saturating_sub(1))
            .map_or(start, |t| t.span.end);
        Ok(Item::new(kind, Span::new(start, end)))
    }

    /// Parse `include "path" [as alias];`
    fn include_item(&mut self) -> ParseResult<Include> {
        let kw = self.expect(TokenKind::Include)?;
        let path_token = self.expect(TokenKind::Quoted)?;
        let alias = if self.eat(TokenKind::As).is_some() {
            Some(self.expect(TokenKind::Ident)?.lexeme)
        } else {
            None
        };
        let span = kw.span.merge(path_token.span);
        self.terminator();
        let include = Include::new(path_token.unquoted(), alias, span);
        self.includes.push(include.clone());
        Ok(include)
    }

    /// Parse a chapter, scene, or function declaration
    fn subroutine_item(&mut self, kind: SubroutineKind) -> ParseResult<SubroutineDecl> {
        let kw = self.advance();
        let name = self.subroutine_name()?;

        let params = if kind == SubroutineKind::Function {
            self.parameter_list()?
        } else {
            Vec::new()
        };

        // Entering a declaration replaces the disambiguation scope.
        self.params = params.iter().map(|p| p.name.name.clone()).collect();
        self.block_counter = 0;
        self.current_blocks.clear();

        let body = self.block()?;
        let span = kw.span.merge(body.span);
        Ok(SubroutineDecl {
            kind,
            name,
            params,
            body,
            dialogue_blocks: std::mem::take(&mut self.current_blocks),
            span,
        })
    }

    /// Parse a subroutine name: quoted for chapters/scenes, bare for
    /// functions; both forms are accepted everywhere
    fn subroutine_name(&mut self) -> ParseResult<Ident> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Quoted => {
                self.advance();
                Ok(Ident::new(token.unquoted(), token.span))
            }
            TokenKind::Ident => {
                self.advance();
                Ok(Ident::new(token.lexeme, token.span))
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::ExpectedIdentifier,
                token.span,
            )),
        }
    }

    /// Parse a parenthesized parameter list
    fn parameter_list(&mut self) -> ParseResult<Vec<Parameter>> {
        let mut params = Vec::new();
        self.expect(TokenKind::LParen)?;
        while !self.check(TokenKind::RParen) && !self.is_eof() {
            let token = self.current().clone();
            match token.kind {
                TokenKind::Ident | TokenKind::Variable => {
                    self.advance();
                    params.push(Parameter::new(Ident::new(token.lexeme, token.span)));
                }
                TokenKind::Quoted => {
                    self.advance();
                    params.push(Parameter::new(Ident::new(token.unquoted(), token.span)));
                }
                _ => {
                    return Err(Diagnostic::new(
                        DiagnosticKind::ExpectedIdentifier,
                        token.span,
                    ))
                }
            }
            if self.eat(TokenKind::Comma).is_none() {
                break;
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(params)
    }

    // ==================== Statements ====================

    /// Parse a braced block of statements
    fn block(&mut self) -> ParseResult<Block> {
        let open = self.expect(TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(TokenKind::RBrace) && !self.is_eof() {
            match self.statement() {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => {}
                Err(diag) => {
                    self.report(diag);
                    self.synchronize();
                }
            }
        }
        let close_span = match self.expect(TokenKind::RBrace) {
            Ok(token) => token.span,
            Err(diag) => {
                let span = diag.span;
                self.report(diag);
                span
            }
        };
        Ok(Block::new(stmts, open.span.merge(close_span)))
    }

    /// Parse one statement. Returns `None` when tokens were consumed
    /// without producing a statement (stray markup, bare terminators).
    fn statement(&mut self) -> ParseResult<Option<Stmt>> {
        match self.current_kind() {
            TokenKind::Semicolon | TokenKind::Colon => {
                self.advance();
                Ok(None)
            }
            TokenKind::StrayTag => {
                let token = self.advance();
                self.report(Diagnostic::new(DiagnosticKind::StrayMarkup, token.span));
                Ok(None)
            }
            TokenKind::Tag => self.tag_statement(),
            TokenKind::If => self.if_statement().map(Some),
            TokenKind::While => self.while_statement().map(Some),
            TokenKind::Select => self.select_statement().map(Some),
            TokenKind::Break => {
                let token = self.advance();
                if self.loop_depth == 0 {
                    self.report(Diagnostic::new(
                        DiagnosticKind::BreakOutsideLoop,
                        token.span,
                    ));
                }
                self.terminator();
                Ok(Some(Stmt::new(StmtKind::Break, token.span)))
            }
            TokenKind::Quoted
                if self.dialogue_depth > 0 && !self.quoted_is_ident(self.current()) =>
            {
                let token = self.advance();
                // Dialogue lines may omit the terminator
                while self.current_kind().is_terminator() {
                    self.advance();
                }
                Ok(Some(Stmt::new(
                    StmtKind::Say(token.unquoted().to_string()),
                    token.span,
                )))
            }
            _ => self.expr_or_command_statement().map(Some),
        }
    }

    /// Split a tag lexeme into its whitespace-separated words
    fn tag_words(lexeme: &str) -> Vec<&str> {
        lexeme
            .trim_start_matches('<')
            .trim_end_matches('>')
            .split_whitespace()
            .collect()
    }

    /// Dispatch a markup tag at statement position
    fn tag_statement(&mut self) -> ParseResult<Option<Stmt>> {
        let token = self.current().clone();
        let words: Vec<String> = Self::tag_words(&token.lexeme)
            .into_iter()
            .map(str::to_string)
            .collect();
        match words.first().map(String::as_str) {
            None => {
                self.advance();
                self.report(Diagnostic::new(DiagnosticKind::EmptyTag, token.span));
                Ok(None)
            }
            Some("end") => {
                self.advance();
                self.report(Diagnostic::new(DiagnosticKind::UnmatchedEndTag, token.span));
                Ok(None)
            }
            Some("wait") => {
                self.advance();
                if self.dialogue_depth == 0 {
                    self.report(Diagnostic::new(DiagnosticKind::MisplacedWait, token.span));
                    Ok(None)
                } else {
                    Ok(Some(Stmt::new(StmtKind::Wait, token.span)))
                }
            }
            Some(_) => self.dialogue_statement(&words).map(Some),
        }
    }

    /// Parse a dialogue block opened by the current tag
    fn dialogue_statement(&mut self, words: &[String]) -> ParseResult<Stmt> {
        let open = self.advance();
        let box_name = words[0].clone();
        let name = words.get(1).cloned().unwrap_or_else(|| {
            let generated = format!("block_{}", self.block_counter);
            generated
        });
        self.block_counter += 1;

        self.dialogue_depth += 1;
        let mut stmts = Vec::new();
        let mut closed = false;
        let mut end_span = open.span;
        while !self.is_eof() && !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Tag) {
                let tag_words = Self::tag_words(&self.current().lexeme);
                if tag_words.first() == Some(&"end") {
                    let end = self.advance();
                    end_span = end.span;
                    closed = true;
                    break;
                }
            }
            match self.statement() {
                Ok(Some(stmt)) => stmts.push(stmt),
                Ok(None) => {}
                Err(diag) => {
                    self.report(diag);
                    self.synchronize();
                }
            }
        }
        self.dialogue_depth -= 1;

        if !closed {
            self.report(Diagnostic::new(
                DiagnosticKind::UnterminatedDialogue,
                open.span,
            ));
        }

        let span = open.span.merge(end_span);
        self.current_blocks
            .push((box_name.clone(), name.clone(), open.span));
        let body_span = span;
        Ok(Stmt::new(
            StmtKind::Dialogue(DialogueBlock {
                box_name,
                name,
                body: Block::new(stmts, body_span),
                span,
            }),
            span,
        ))
    }

    /// Parse `if (cond) { ... } [else { ... } | else if ...]`
    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::If)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        let then_block = self.block()?;
        let else_block = if self.eat(TokenKind::Else).is_some() {
            if self.check(TokenKind::If) {
                let nested = self.if_statement()?;
                let span = nested.span;
                Some(Block::new(vec![nested], span))
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };
        let end = else_block
            .as_ref()
            .map_or(then_block.span, |b| b.span);
        Ok(Stmt::new(
            StmtKind::If {
                cond,
                then_block,
                else_block,
            },
            kw.span.merge(end),
        ))
    }

    /// Parse `while (cond) { ... }`
    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::While)?;
        self.expect(TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(TokenKind::RParen)?;
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        let body = body?;
        let span = kw.span.merge(body.span);
        Ok(Stmt::new(StmtKind::While { cond, body }, span))
    }

    /// Parse `select { case "Label": ... case "Other": ... }`
    fn select_statement(&mut self) -> ParseResult<Stmt> {
        let kw = self.expect(TokenKind::Select)?;
        self.expect(TokenKind::LBrace)?;

        let mut cases = Vec::new();
        while self.check(TokenKind::Case) {
            let case_kw = self.advance();
            let label_token = self.expect(TokenKind::Quoted)?;
            self.expect(TokenKind::Colon)?;

            let mut stmts = Vec::new();
            while !self.check(TokenKind::Case)
                && !self.check(TokenKind::RBrace)
                && !self.is_eof()
            {
                match self.statement() {
                    Ok(Some(stmt)) => stmts.push(stmt),
                    Ok(None) => {}
                    Err(diag) => {
                        self.report(diag);
                        self.synchronize();
                    }
                }
            }
            let body_span = stmts
                .last()
                .map_or(label_token.span, |s| label_token.span.merge(s.span));
            cases.push(SelectCase {
                label: label_token.unquoted().to_string(),
                body: Block::new(stmts, body_span),
                span: case_kw.span.merge(body_span),
            });
        }

        let close = self.expect(TokenKind::RBrace)?;
        Ok(Stmt::new(
            StmtKind::Select { cases },
            kw.span.merge(close.span),
        ))
    }

    /// Parse an expression statement, including bare command calls:
    /// an identifier (or quoted identifier) followed by what looks like
    /// an argument list or a terminator is a call without parentheses.
    fn expr_or_command_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.current().clone();
        let is_callee = matches!(token.kind, TokenKind::Ident)
            || (token.kind == TokenKind::Quoted && self.quoted_is_ident(&token));

        if is_callee {
            // Bounded lookahead: one token decides the statement form.
            let next = self.peek().map(|t| t.kind);
            match next {
                // Qualified call through an include alias
                Some(TokenKind::Dot) if token.kind == TokenKind::Ident => {
                    let expr = self.far_call_statement()?;
                    let span = expr.span;
                    self.terminator();
                    return Ok(Stmt::new(StmtKind::Expr(expr), span));
                }
                // Bare zero-argument command: `fadeout;`
                Some(kind) if kind.is_terminator() => {
                    self.advance();
                    self.terminator();
                    let callee = if token.kind == TokenKind::Quoted {
                        token.unquoted().to_string()
                    } else {
                        token.lexeme.clone()
                    };
                    return Ok(Stmt::new(
                        StmtKind::Expr(Expr::new(
                            ExprKind::Call {
                                callee,
                                args: Vec::new(),
                            },
                            token.span,
                        )),
                        token.span,
                    ));
                }
                // Bare command with unparenthesized arguments:
                // `bg "forest.png", 300;`
                Some(
                    TokenKind::Int
                    | TokenKind::Float
                    | TokenKind::HexTriplet
                    | TokenKind::True
                    | TokenKind::False
                    | TokenKind::Null
                    | TokenKind::Quoted
                    | TokenKind::Variable
                    | TokenKind::Ident
                    | TokenKind::At
                    | TokenKind::Minus
                    | TokenKind::Not,
                ) => {
                    self.advance();
                    let callee = if token.kind == TokenKind::Quoted {
                        token.unquoted().to_string()
                    } else {
                        token.lexeme.clone()
                    };
                    let args = self.argument_list_until_terminator()?;
                    let span = token.span.merge(self.current().span);
                    self.terminator();
                    return Ok(Stmt::new(
                        StmtKind::Expr(Expr::new(ExprKind::Call { callee, args }, span)),
                        span,
                    ));
                }
                _ => {}
            }
        }

        let expr = self.expression()?;
        let span = expr.span;
        self.terminator();
        Ok(Stmt::new(StmtKind::Expr(expr), span))
    }

    /// Parse a far call statement: `alias.symbol(args...)` or
    /// `alias.symbol arg, arg;`
    fn far_call_statement(&mut self) -> ParseResult<Expr> {
        let alias = self.advance();
        self.expect(TokenKind::Dot)?;
        let callee = self.expect(TokenKind::Ident)?;
        let args = if self.check(TokenKind::LParen) {
            self.paren_arguments()?
        } else if self.current_kind().is_terminator()
            || self.check(TokenKind::RBrace)
            || self.is_eof()
        {
            Vec::new()
        } else {
            self.argument_list_until_terminator()?
        };
        let span = alias.span.merge(callee.span);
        Ok(self.make_far_call(&alias, callee.lexeme, args, span))
    }

    /// Build a far-call expression, resolving the alias against the
    /// includes seen so far. An unknown alias degrades to a same-module
    /// call and reports a diagnostic.
    fn make_far_call(
        &mut self,
        alias: &Token,
        callee: String,
        args: Vec<Expr>,
        span: Span,
    ) -> Expr {
        match self
            .includes
            .iter()
            .find(|include| include.alias == alias.lexeme)
        {
            Some(include) => Expr::new(
                ExprKind::FarCall {
                    module_path: include.path.clone(),
                    callee,
                    args,
                },
                span,
            ),
            None => {
                self.report(Diagnostic::new(
                    DiagnosticKind::UnknownAlias(alias.lexeme.clone()),
                    alias.span,
                ));
                Expr::new(ExprKind::Call { callee, args }, span)
            }
        }
    }

    /// Parse comma-separated expressions up to a terminator or block end
    fn argument_list_until_terminator(&mut self) -> ParseResult<Vec<Expr>> {
        let mut args = vec![self.expression()?];
        while self.eat(TokenKind::Comma).is_some() {
            args.push(self.expression()?);
        }
        Ok(args)
    }

    /// Parse a parenthesized argument list
    fn paren_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            args.push(self.expression()?);
            while self.eat(TokenKind::Comma).is_some() {
                args.push(self.expression()?);
            }
        }
        self.expect(TokenKind::RParen)?;
        Ok(args)
    }

    // ==================== Expressions ====================

    /// Parse an expression (lowest precedence level)
    fn expression(&mut self) -> ParseResult<Expr> {
        self.assignment()
    }

    /// Assignment level: right-associative; `++`/`--` omit the right
    /// operand
    fn assignment(&mut self) -> ParseResult<Expr> {
        let lhs = self.logical()?;
        let kind = self.current_kind();
        if !kind.is_assignment() {
            return Ok(lhs);
        }
        let op_token = self.advance();
        let op = match kind {
            TokenKind::Eq => AssignOp::Set,
            TokenKind::PlusEq | TokenKind::PlusPlus => AssignOp::Add,
            TokenKind::MinusEq | TokenKind::MinusMinus => AssignOp::Sub,
            TokenKind::StarEq => AssignOp::Mul,
            _ => AssignOp::Div,
        };
        let value = if matches!(kind, TokenKind::PlusPlus | TokenKind::MinusMinus) {
            None
        } else {
            Some(Box::new(self.assignment()?))
        };

        let ExprKind::Variable(target) = lhs.kind else {
            self.report(Diagnostic::new(
                DiagnosticKind::InvalidAssignmentTarget,
                lhs.span,
            ));
            return Ok(Expr::placeholder(lhs.span.merge(op_token.span)));
        };
        let end = value.as_ref().map_or(op_token.span, |v| v.span);
        Ok(Expr::new(
            ExprKind::Assign { target, op, value },
            lhs.span.merge(end),
        ))
    }

    /// Logical level: `&&`, `||`
    fn logical(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.equality()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::And => BinOp::And,
                TokenKind::Or => BinOp::Or,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.equality()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    /// Equality level: `==`, `!=`
    fn equality(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.relational()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.relational()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    /// Relational level: `<`, `<=`, `>`, `>=`
    fn relational(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.additive()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    /// Additive level: `+`, `-`
    fn additive(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.multiplicative()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    /// Multiplicative level: `*`, `/`, `%`
    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.current_kind() {
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.unary()?;
            let span = lhs.span.merge(rhs.span);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
    }

    /// Unary level: `-`, `!`, `@` (delta marker)
    fn unary(&mut self) -> ParseResult<Expr> {
        match self.current_kind() {
            TokenKind::Minus => {
                let op_token = self.advance();
                let operand = self.unary()?;
                let span = op_token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Not => {
                let op_token = self.advance();
                let operand = self.unary()?;
                let span = op_token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::At => {
                let op_token = self.advance();
                let operand = self.unary()?;
                let span = op_token.span.merge(operand.span);
                Ok(Expr::new(ExprKind::Delta(Box::new(operand)), span))
            }
            _ => self.primary(),
        }
    }

    /// Primary level: literals, names, calls, parenthesized and Bezier
    /// expressions
    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        match token.kind {
            TokenKind::Int => {
                self.advance();
                let text = token.lexeme.replace('_', "");
                match text.parse::<i64>() {
                    Ok(value) => Ok(Expr::new(ExprKind::Literal(Literal::Int(value)), token.span)),
                    Err(_) => {
                        self.report(Diagnostic::new(
                            DiagnosticKind::InvalidNumber(token.lexeme.clone()),
                            token.span,
                        ));
                        Ok(Expr::placeholder(token.span))
                    }
                }
            }
            TokenKind::Float => {
                self.advance();
                let text = token.lexeme.replace('_', "");
                match text.parse::<f64>() {
                    Ok(value) => Ok(Expr::new(
                        ExprKind::Literal(Literal::Float(value)),
                        token.span,
                    )),
                    Err(_) => {
                        self.report(Diagnostic::new(
                            DiagnosticKind::InvalidNumber(token.lexeme.clone()),
                            token.span,
                        ));
                        Ok(Expr::placeholder(token.span))
                    }
                }
            }
            TokenKind::HexTriplet => {
                self.advance();
                match i64::from_str_radix(&token.lexeme[1..], 16) {
                    Ok(value) => Ok(Expr::new(ExprKind::Literal(Literal::Int(value)), token.span)),
                    Err(_) => {
                        self.report(Diagnostic::new(
                            DiagnosticKind::InvalidNumber(token.lexeme.clone()),
                            token.span,
                        ));
                        Ok(Expr::placeholder(token.span))
                    }
                }
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Bool(true)), token.span))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(Literal::Bool(false)),
                    token.span,
                ))
            }
            TokenKind::Null => {
                self.advance();
                Ok(Expr::new(ExprKind::Literal(Literal::Null), token.span))
            }
            TokenKind::Quoted => {
                self.advance();
                if self.quoted_is_ident(&token) {
                    Ok(Expr::new(
                        ExprKind::Variable(token.unquoted().to_string()),
                        token.span,
                    ))
                } else {
                    Ok(Expr::new(
                        ExprKind::Literal(Literal::Str(token.unquoted().to_string())),
                        token.span,
                    ))
                }
            }
            TokenKind::Variable => {
                self.advance();
                Ok(Expr::new(ExprKind::Variable(token.lexeme), token.span))
            }
            TokenKind::Ident => {
                self.advance();
                if self.params.iter().any(|p| *p == token.lexeme) {
                    // A parameter of the enclosing subroutine
                    return Ok(Expr::new(ExprKind::Variable(token.lexeme), token.span));
                }
                if self.check(TokenKind::Dot) {
                    self.advance();
                    let callee = self.expect(TokenKind::Ident)?;
                    let args = if self.check(TokenKind::LParen) {
                        self.paren_arguments()?
                    } else {
                        Vec::new()
                    };
                    let span = token.span.merge(callee.span);
                    Ok(self.make_far_call(&token, callee.lexeme, args, span))
                } else if self.check(TokenKind::LParen) {
                    self.call_with_parens(token)
                } else {
                    // A bare identifier in expression position is a
                    // zero-argument call (commands and built-ins)
                    Ok(Expr::new(
                        ExprKind::Call {
                            callee: token.lexeme,
                            args: Vec::new(),
                        },
                        token.span,
                    ))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.expression()?;
                if self.check(TokenKind::Comma) {
                    return self.bezier_literal(token.span, first);
                }
                self.expect(TokenKind::RParen)?;
                Ok(first)
            }
            _ => Err(Diagnostic::new(
                DiagnosticKind::ExpectedExpression,
                token.span,
            )),
        }
    }

    /// Parse the remainder of a Bezier curve literal. The opening
    /// parenthesis and the first x coordinate are already consumed and
    /// the current token is the comma after it. Further points follow
    /// as `, (x, y)` or `, {x, y}` and are consumed greedily.
    fn bezier_literal(&mut self, start: Span, first_x: Expr) -> ParseResult<Expr> {
        self.expect(TokenKind::Comma)?;
        let first_y = self.expression()?;
        let close = self.expect(TokenKind::RParen)?;
        let mut points = vec![CurvePoint {
            x: first_x,
            y: first_y,
            kind: CurvePointKind::Endpoint,
        }];
        let mut end = close.span;
        if self.curve_continues() {
            end = self.curve_tail(&mut points)?;
        }
        Ok(Expr::new(ExprKind::Bezier(points), start.merge(end)))
    }

    /// Whether the upcoming tokens continue a curve: a comma followed
    /// by a parenthesized or braced point
    fn curve_continues(&self) -> bool {
        self.check(TokenKind::Comma)
            && matches!(
                self.peek().map(|t| t.kind),
                Some(TokenKind::LParen | TokenKind::LBrace)
            )
    }

    /// Consume `, (x, y)` and `, {x, y}` points while they keep coming
    fn curve_tail(&mut self, points: &mut Vec<CurvePoint>) -> ParseResult<Span> {
        let mut end = self.current().span;
        while self.curve_continues() {
            let kind = match self.peek().map(|t| t.kind) {
                Some(TokenKind::LBrace) => CurvePointKind::Interior,
                _ => CurvePointKind::Endpoint,
            };
            let closer = if kind == CurvePointKind::Interior {
                TokenKind::RBrace
            } else {
                TokenKind::RParen
            };
            self.advance();
            self.advance();
            let x = self.expression()?;
            self.expect(TokenKind::Comma)?;
            let y = self.expression()?;
            let close = self.expect(closer)?;
            end = close.span;
            points.push(CurvePoint { x, y, kind });
        }
        Ok(end)
    }

    /// Parse a parenthesized call after an identifier. The opening
    /// group is ambiguous with a curve point: `f(1, 2)` is a two
    /// argument call, but `move (0, 0), {50, 100}, (100, 0)` passes a
    /// single curve argument. A closed two-element group followed by
    /// `, (` or `, {` resolves as a curve.
    fn call_with_parens(&mut self, callee: Token) -> ParseResult<Expr> {
        let open = self.advance();
        let mut args = Vec::new();
        if self.eat(TokenKind::RParen).is_none() {
            let first = self.expression()?;
            if self.eat(TokenKind::Comma).is_some() {
                let second = self.expression()?;
                if self.check(TokenKind::Comma) {
                    // Three or more comma-separated values: arguments
                    args.push(first);
                    args.push(second);
                    while self.eat(TokenKind::Comma).is_some() {
                        args.push(self.expression()?);
                    }
                    self.expect(TokenKind::RParen)?;
                } else {
                    self.expect(TokenKind::RParen)?;
                    if self.curve_continues() {
                        let mut points = vec![CurvePoint {
                            x: first,
                            y: second,
                            kind: CurvePointKind::Endpoint,
                        }];
                        let end = self.curve_tail(&mut points)?;
                        args.push(Expr::new(
                            ExprKind::Bezier(points),
                            open.span.merge(end),
                        ));
                        while self.eat(TokenKind::Comma).is_some() {
                            args.push(self.expression()?);
                        }
                    } else {
                        args.push(first);
                        args.push(second);
                    }
                }
            } else {
                self.expect(TokenKind::RParen)?;
                args.push(first);
            }
        }
        let end = args.last().map_or(open.span, |a| a.span);
        Ok(Expr::new(
            ExprKind::Call {
                callee: callee.lexeme,
                args,
            },
            callee.span.merge(end),
        ))
    }
}
