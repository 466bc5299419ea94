//! Tokenizer for the SQL understood by the memory engine.

use crate::engine::EngineError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Unquoted identifier or keyword, as written.
    Word(String),
    /// Double-quoted identifier.
    Quoted(String),
    /// Numeric literal, kept as text so no precision is lost.
    Number(String),
    /// Single-quoted string literal.
    Str(String),
    /// `$n`, zero-based.
    Param(usize),
    DoubleColon,
    Symbol(char),
}

impl Token {
    /// How the token appears in a syntax error.
    pub fn describe(&self) -> String {
        match self {
            Token::Word(w) | Token::Number(w) => w.clone(),
            Token::Quoted(q) => format!("\"{q}\""),
            Token::Str(s) => format!("'{s}'"),
            Token::Param(n) => format!("${}", n + 1),
            Token::DoubleColon => "::".to_string(),
            Token::Symbol(c) => c.to_string(),
        }
    }
}

pub struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, EngineError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let Some(ch) = self.peek(0) else {
                return Ok(tokens);
            };
            let token = match ch {
                '\'' => Token::Str(self.scan_quoted('\'', "unterminated quoted string")?),
                '"' => Token::Quoted(self.scan_quoted('"', "unterminated quoted identifier")?),
                '$' => self.scan_parameter()?,
                c if c.is_ascii_digit() => self.scan_number(),
                '.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.scan_number(),
                c if is_ident_start(c) => self.scan_word(),
                ':' if self.peek(1) == Some(':') => {
                    self.advance(2);
                    Token::DoubleColon
                }
                '(' | ')' | ',' | ';' | '*' | '=' | '.' | '[' | ']' | '-' | '+' => {
                    self.advance(1);
                    Token::Symbol(ch)
                }
                other => {
                    return Err(EngineError::Syntax(format!(
                        "syntax error at or near \"{other}\""
                    )));
                }
            };
            tokens.push(token);
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(offset)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.input[self.pos..].starts_with(prefix)
    }

    fn advance(&mut self, n: usize) {
        for _ in 0..n {
            if let Some(ch) = self.peek(0) {
                self.pos += ch.len_utf8();
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), EngineError> {
        loop {
            while self.peek(0).is_some_and(char::is_whitespace) {
                self.advance(1);
            }
            if self.starts_with("--") {
                while let Some(ch) = self.peek(0) {
                    self.advance(1);
                    if ch == '\n' {
                        break;
                    }
                }
            } else if self.starts_with("/*") {
                self.advance(2);
                let mut depth = 1;
                while depth > 0 {
                    if self.pos >= self.input.len() {
                        return Err(EngineError::Syntax(
                            "unterminated /* comment".to_string(),
                        ));
                    }
                    if self.starts_with("/*") {
                        depth += 1;
                        self.advance(2);
                    } else if self.starts_with("*/") {
                        depth -= 1;
                        self.advance(2);
                    } else {
                        self.advance(1);
                    }
                }
            } else {
                return Ok(());
            }
        }
    }

    /// Scans a literal delimited by `quote`, where a doubled quote stands for itself.
    fn scan_quoted(&mut self, quote: char, unterminated: &str) -> Result<String, EngineError> {
        self.advance(1);
        let mut value = String::new();
        loop {
            match self.peek(0) {
                None => return Err(EngineError::Syntax(unterminated.to_string())),
                Some(c) if c == quote => {
                    self.advance(1);
                    if self.peek(0) == Some(quote) {
                        value.push(quote);
                        self.advance(1);
                    } else {
                        return Ok(value);
                    }
                }
                Some(c) => {
                    value.push(c);
                    self.advance(1);
                }
            }
        }
    }

    fn scan_parameter(&mut self) -> Result<Token, EngineError> {
        self.advance(1);
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
        }
        match self.input[start..self.pos].parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Token::Param(n - 1)),
            _ => Err(EngineError::Syntax(format!(
                "syntax error at or near \"${}\"",
                &self.input[start..self.pos]
            ))),
        }
    }

    fn scan_number(&mut self) -> Token {
        let start = self.pos;
        while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
            self.advance(1);
        }
        if self.peek(0) == Some('.') {
            self.advance(1);
            while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                self.advance(1);
            }
        }
        if matches!(self.peek(0), Some('e' | 'E')) {
            let digits_at = match self.peek(1) {
                Some('+' | '-') => 2,
                _ => 1,
            };
            if self.peek(digits_at).is_some_and(|c| c.is_ascii_digit()) {
                self.advance(digits_at);
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.advance(1);
                }
            }
        }
        Token::Number(self.input[start..self.pos].to_string())
    }

    fn scan_word(&mut self) -> Token {
        let start = self.pos;
        while self.peek(0).is_some_and(is_ident_continue) {
            self.advance(1);
        }
        Token::Word(self.input[start..self.pos].to_string())
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}
