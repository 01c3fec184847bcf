//! Template tokenizer implementation.

use crate::error::CompileError;

use super::token::{ContextOp, LogicalOp, SectionKeyword, Word};
use super::{Span, Token, TokenKind};

/// A lexer that tokenizes a SQL template.
pub struct Lexer<'a> {
    /// The template source.
    input: &'a str,
    /// The current byte position.
    pos: usize,
    /// The byte position of the start of the current token.
    start: usize,
    /// The variable prefix character (default `@`).
    prefix: char,
    /// Kind of the previous non-whitespace token, for operator context.
    prev: Option<TokenKind>,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given template and variable prefix.
    #[must_use]
    pub const fn new(input: &'a str, prefix: char) -> Self {
        Self {
            input,
            pos: 0,
            start: 0,
            prefix,
            prev: None,
        }
    }

    /// Returns the current character without advancing.
    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Returns the next character without advancing.
    fn peek_next(&self) -> Option<char> {
        let mut chars = self.input[self.pos..].chars();
        chars.next();
        chars.next()
    }

    /// Advances to the next character and returns it.
    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Creates a span from start to current position.
    fn make_span(&self) -> Span {
        Span::new(self.start, self.pos)
    }

    /// Creates a token with the current span.
    fn make_token(&self, kind: TokenKind) -> Token {
        Token::new(kind, self.make_span())
    }

    fn syntax_error(&self, message: impl Into<String>) -> CompileError {
        CompileError::Syntax {
            message: message.into(),
            offset: self.start,
        }
    }

    /// Scans a maximal identifier run starting at the current position.
    fn scan_ident(&mut self) -> &'a str {
        let from = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            self.advance();
        }
        &self.input[from..self.pos]
    }

    /// Looks ahead over whitespace for the given upper-case word; on match
    /// the cursor is left after it, otherwise restored.
    fn take_following_word(&mut self, expected: &str) -> bool {
        let saved = self.pos;
        let mut saw_ws = false;
        while self.peek().is_some_and(char::is_whitespace) {
            saw_ws = true;
            self.advance();
        }
        if !saw_ws {
            self.pos = saved;
            return false;
        }
        let word = self.scan_ident();
        if word.eq_ignore_ascii_case(expected) {
            true
        } else {
            self.pos = saved;
            false
        }
    }

    /// True when the previous token allows an operator-position keyword.
    fn in_operator_context(&self) -> bool {
        matches!(
            self.prev,
            None | Some(TokenKind::Logical(LogicalOp::And | LogicalOp::Or))
                | Some(TokenKind::ParenOpen)
                | Some(TokenKind::Section(_))
                | Some(TokenKind::Separator)
        )
    }

    /// Scans an identifier and classifies it.
    fn scan_word(&mut self) -> Token {
        let word = self.scan_ident();
        let upper = word.to_ascii_uppercase();

        let kind = match upper.as_str() {
            "GROUP" if self.take_following_word("BY") => {
                TokenKind::Section(SectionKeyword::GroupBy)
            }
            "ORDER" if self.take_following_word("BY") => {
                TokenKind::Section(SectionKeyword::OrderBy)
            }
            "UNION" => {
                if self.take_following_word("ALL") {
                    TokenKind::Section(SectionKeyword::UnionAll)
                } else {
                    TokenKind::Section(SectionKeyword::Union)
                }
            }
            "INNER" if self.take_following_word("JOIN") => {
                TokenKind::Section(SectionKeyword::InnerJoin)
            }
            "LEFT" if self.take_following_word("JOIN") => {
                TokenKind::Section(SectionKeyword::LeftJoin)
            }
            "RIGHT" if self.take_following_word("JOIN") => {
                TokenKind::Section(SectionKeyword::RightJoin)
            }
            "FULL" if self.take_following_word("JOIN") => {
                TokenKind::Section(SectionKeyword::FullJoin)
            }
            "CROSS" if self.take_following_word("JOIN") => {
                TokenKind::Section(SectionKeyword::CrossJoin)
            }
            "SELECT" => TokenKind::Section(SectionKeyword::Select),
            "FROM" => TokenKind::Section(SectionKeyword::From),
            "WHERE" => TokenKind::Section(SectionKeyword::Where),
            "HAVING" => TokenKind::Section(SectionKeyword::Having),
            "WITH" => TokenKind::Section(SectionKeyword::With),
            "INTERSECT" => TokenKind::Section(SectionKeyword::Intersect),
            "EXCEPT" => TokenKind::Section(SectionKeyword::Except),
            "JOIN" => TokenKind::Section(SectionKeyword::Join),
            "ON" => TokenKind::Section(SectionKeyword::On),
            "INSERT" => TokenKind::Section(SectionKeyword::Insert),
            "INTO" => TokenKind::Section(SectionKeyword::Into),
            "VALUES" => TokenKind::Section(SectionKeyword::Values),
            "UPDATE" => TokenKind::Section(SectionKeyword::Update),
            "SET" => TokenKind::Section(SectionKeyword::Set),
            "DELETE" => TokenKind::Section(SectionKeyword::Delete),
            "CASE" => TokenKind::Section(SectionKeyword::Case),
            "WHEN" => TokenKind::Section(SectionKeyword::When),
            "THEN" => TokenKind::Section(SectionKeyword::Then),
            "ELSE" => TokenKind::Section(SectionKeyword::Else),
            "END" => TokenKind::Section(SectionKeyword::End),
            "OFFSET" => TokenKind::Section(SectionKeyword::Offset),
            "AND" => TokenKind::Logical(LogicalOp::And),
            "OR" => TokenKind::Logical(LogicalOp::Or),
            "NOT" if self.in_operator_context() => TokenKind::Logical(LogicalOp::Not),
            other => match Word::from_upper(other) {
                Some(w) => TokenKind::Word(w),
                None => TokenKind::Text,
            },
        };
        self.make_token(kind)
    }

    /// Scans a variable after the prefix character has been consumed.
    ///
    /// A trailing `_L` with a single ASCII letter designates a handler; the
    /// letter is normalised to upper case.
    fn scan_variable(&mut self, optional: bool) -> Result<Token, CompileError> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(c) if c.is_ascii_digit() => {
                return Err(self.syntax_error("malformed variable: expected identifier"));
            }
            // A bare prefix character (`::` casts, `@@` server variables)
            // stays plain text.
            _ => return Ok(self.make_token(TokenKind::Text)),
        }
        let ident = self.scan_ident();

        let bytes = ident.as_bytes();
        let (name, handler) = if bytes.len() >= 3
            && bytes[bytes.len() - 2] == b'_'
            && bytes[bytes.len() - 1].is_ascii_alphabetic()
        {
            (
                &ident[..ident.len() - 2],
                Some(bytes[bytes.len() - 1].to_ascii_uppercase() as char),
            )
        } else {
            (ident, None)
        };

        Ok(self.make_token(TokenKind::Variable {
            name: String::from(name),
            optional,
            handler,
        }))
    }

    /// Scans a `'…'` string literal with doubled-quote escapes.
    fn scan_string(&mut self, quote: char) -> Result<Token, CompileError> {
        self.advance(); // consume opening quote
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    if self.peek_next() == Some(quote) {
                        self.advance();
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(_) => {
                    self.advance();
                }
                None => return Err(self.syntax_error("unterminated string literal")),
            }
        }
        self.advance(); // consume closing quote
        Ok(self.make_token(TokenKind::StringLit))
    }

    /// Scans a quoted identifier (`"…"` or `` `…` ``) as an atomic text run.
    fn scan_quoted_identifier(&mut self, quote: char) -> Result<Token, CompileError> {
        self.advance(); // consume opening quote
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    if self.peek_next() == Some(quote) {
                        self.advance();
                        self.advance();
                    } else {
                        break;
                    }
                }
                Some(_) => {
                    self.advance();
                }
                None => return Err(self.syntax_error("unterminated quoted identifier")),
            }
        }
        self.advance(); // consume closing quote
        Ok(self.make_token(TokenKind::Text))
    }

    /// Scans a `/*…*/` comment: a condition marker, or a literal hint when
    /// the body starts with `~`.
    fn scan_comment(&mut self) -> Result<Token, CompileError> {
        self.advance(); // /
        self.advance(); // *
        let body_start = self.pos;
        loop {
            match self.peek() {
                Some('*') if self.peek_next() == Some('/') => break,
                Some(_) => {
                    self.advance();
                }
                None => return Err(self.syntax_error("unterminated comment")),
            }
        }
        let body_end = self.pos;
        self.advance(); // *
        self.advance(); // /

        let body = &self.input[body_start..body_end];
        let kind = if body.starts_with('~') {
            TokenKind::LiteralText {
                inner: Span::new(body_start + 1, body_end),
            }
        } else {
            TokenKind::Marker {
                body: Span::new(body_start, body_end),
            }
        };
        Ok(self.make_token(kind))
    }

    /// Scans a `--` line comment as plain text (passed through verbatim).
    fn scan_line_comment(&mut self) -> Token {
        while self.peek().is_some_and(|c| c != '\n') {
            self.advance();
        }
        self.make_token(TokenKind::Text)
    }

    /// Scans tokens starting with `?`: `???`, `?SELECT`, `?@Var`, or text.
    fn scan_question(&mut self) -> Result<Token, CompileError> {
        self.advance(); // ?
        if self.peek() == Some('?') && self.peek_next() == Some('?') {
            self.advance();
            self.advance();
            return Ok(self.make_token(TokenKind::ForcedBoundary));
        }
        if self.peek() == Some(self.prefix) {
            self.advance(); // prefix
            return self.scan_variable(true);
        }
        if self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            let saved = self.pos;
            let word = self.scan_ident();
            if word.eq_ignore_ascii_case("SELECT") {
                return Ok(self.make_token(TokenKind::DynamicSelect));
            }
            self.pos = saved;
        }
        Ok(self.make_token(TokenKind::Text))
    }

    /// Scans tokens starting with `&`: a context join, or plain text.
    fn scan_ampersand(&mut self) -> Result<Token, CompileError> {
        self.advance(); // &
        match self.peek() {
            Some(',') => {
                self.advance();
                Ok(self.make_token(TokenKind::ContextJoin(ContextOp::Comma)))
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let word = self.scan_ident();
                if word.eq_ignore_ascii_case("AND") {
                    Ok(self.make_token(TokenKind::ContextJoin(ContextOp::And)))
                } else if word.eq_ignore_ascii_case("OR") {
                    Ok(self.make_token(TokenKind::ContextJoin(ContextOp::Or)))
                } else {
                    Err(self.syntax_error("dangling '&': expected AND, OR or ','"))
                }
            }
            _ => Ok(self.make_token(TokenKind::Text)),
        }
    }

    /// Scans the next token.
    ///
    /// # Errors
    ///
    /// Returns a syntax error for unterminated strings, comments or quoted
    /// identifiers, malformed variables, and dangling `&`.
    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        self.start = self.pos;

        let c = match self.peek() {
            Some(c) => c,
            None => return Ok(self.make_token(TokenKind::Eof)),
        };

        if c == self.prefix {
            self.advance();
            let tok = self.scan_variable(false)?;
            self.prev = Some(tok.kind.clone());
            return Ok(tok);
        }

        let tok = match c {
            c if c.is_whitespace() => {
                while self.peek().is_some_and(char::is_whitespace) {
                    self.advance();
                }
                self.make_token(TokenKind::Whitespace)
            }
            '(' => {
                self.advance();
                self.make_token(TokenKind::ParenOpen)
            }
            ')' => {
                self.advance();
                self.make_token(TokenKind::ParenClose)
            }
            ',' => {
                self.advance();
                self.make_token(TokenKind::Separator)
            }
            '\'' => self.scan_string('\'')?,
            '"' => self.scan_quoted_identifier('"')?,
            '`' => self.scan_quoted_identifier('`')?,
            '/' => {
                if self.peek_next() == Some('*') {
                    self.scan_comment()?
                } else {
                    self.advance();
                    self.make_token(TokenKind::Text)
                }
            }
            '-' => {
                if self.peek_next() == Some('-') {
                    self.scan_line_comment()
                } else {
                    self.advance();
                    self.make_token(TokenKind::Text)
                }
            }
            '?' => self.scan_question()?,
            '&' => self.scan_ampersand()?,
            '=' => {
                self.advance();
                self.make_token(TokenKind::Relational)
            }
            '<' => {
                self.advance();
                if matches!(self.peek(), Some('=' | '>')) {
                    self.advance();
                }
                self.make_token(TokenKind::Relational)
            }
            '>' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                }
                self.make_token(TokenKind::Relational)
            }
            '!' => {
                self.advance();
                if self.peek() == Some('=') {
                    self.advance();
                    self.make_token(TokenKind::Relational)
                } else {
                    self.make_token(TokenKind::Text)
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => self.scan_word(),
            c if c.is_ascii_digit() => {
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.')
                {
                    self.advance();
                }
                self.make_token(TokenKind::Text)
            }
            _ => {
                self.advance();
                self.make_token(TokenKind::Text)
            }
        };

        if !tok.is_whitespace() {
            self.prev = Some(tok.kind.clone());
        }
        Ok(tok)
    }

    /// Tokenizes the entire template and returns all tokens.
    ///
    /// # Errors
    ///
    /// Propagates the first lexical error with its byte offset.
    pub fn tokenize(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let is_eof = token.is_eof();
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }
}
