//! Recursive-descent parser for the memory engine's SQL.

use std::path::PathBuf;

use rust_decimal::Decimal;

use crate::copy::{CopyFormat, CopyFromStatement, CopyOptions, CopySource};
use crate::engine::memory::lexer::{Lexer, Token};
use crate::engine::{ConvertedQuery, EngineError, ParsedStatement};
use crate::wire::{BaseType, PgType};

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Integer(i64),
    Decimal(Decimal),
    /// A quoted literal; its type comes from context.
    String(String),
    /// Zero-based placeholder index.
    Param(usize),
    Cast(Box<Expr>, PgType),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: Expr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: PgType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Vec<SelectItem>),
    SelectAll {
        table: String,
    },
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDef>,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Delete {
        table: String,
    },
    Begin,
    Commit,
    Rollback,
    Set {
        name: String,
        value: String,
    },
    Show {
        name: String,
    },
}

/// Parses `sql` into the form handed to the connection.
pub fn convert(sql: &str) -> Result<ConvertedQuery<Statement>, EngineError> {
    let tokens = Lexer::new(sql).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    if parser.is_eof() || parser.tokens == [Token::Symbol(';')] {
        return Ok(ConvertedQuery::empty(sql));
    }
    let (statement_tag, statement) = parser.parse_statement()?;
    parser.consume_symbol(';');
    if let Some(token) = parser.peek() {
        return Err(syntax_error_at(token));
    }
    Ok(ConvertedQuery {
        text: sql.to_string(),
        statement_tag: statement_tag.to_string(),
        statement: Some(statement),
    })
}

fn syntax_error_at(token: &Token) -> EngineError {
    EngineError::Syntax(format!("syntax error at or near \"{}\"", token.describe()))
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type Parsed = (&'static str, ParsedStatement<Statement>);

impl Parser {
    fn parse_statement(&mut self) -> Result<Parsed, EngineError> {
        let engine = |tag: &'static str, stmt: Statement| -> Result<Parsed, EngineError> {
            Ok((tag, ParsedStatement::Engine(stmt)))
        };

        if self.consume_word("SELECT") {
            return engine("SELECT", self.parse_select()?);
        }
        if self.consume_word("INSERT") {
            return engine("INSERT", self.parse_insert()?);
        }
        if self.consume_word("DELETE") {
            self.expect_word("FROM")?;
            let table = self.expect_identifier()?;
            return engine("DELETE", Statement::Delete { table });
        }
        if self.consume_word("CREATE") {
            self.expect_word("TABLE")?;
            return engine("CREATE TABLE", self.parse_create_table()?);
        }
        if self.consume_word("BEGIN") || self.consume_words(&["START", "TRANSACTION"]) {
            let _ = self.consume_word("TRANSACTION") || self.consume_word("WORK");
            return engine("BEGIN", Statement::Begin);
        }
        if self.consume_word("COMMIT") || self.consume_word("END") {
            let _ = self.consume_word("TRANSACTION") || self.consume_word("WORK");
            return engine("COMMIT", Statement::Commit);
        }
        if self.consume_word("ROLLBACK") || self.consume_word("ABORT") {
            let _ = self.consume_word("TRANSACTION") || self.consume_word("WORK");
            return engine("ROLLBACK", Statement::Rollback);
        }
        if self.consume_word("SET") {
            return engine("SET", self.parse_set()?);
        }
        if self.consume_word("SHOW") {
            let name = self.expect_identifier()?;
            return engine("SHOW", Statement::Show { name });
        }
        if self.consume_word("DEALLOCATE") {
            self.consume_word("PREPARE");
            if self.consume_word("ALL") {
                return Ok(("DEALLOCATE ALL", ParsedStatement::Deallocate { name: None }));
            }
            let name = self.expect_identifier()?;
            return Ok(("DEALLOCATE", ParsedStatement::Deallocate { name: Some(name) }));
        }
        if self.consume_word("DISCARD") {
            self.expect_word("ALL")?;
            return Ok(("DISCARD ALL", ParsedStatement::DiscardAll));
        }
        if self.consume_word("COPY") {
            return Ok(("COPY", ParsedStatement::CopyFrom(self.parse_copy()?)));
        }
        Err(self.unexpected())
    }

    fn parse_select(&mut self) -> Result<Statement, EngineError> {
        if self.consume_symbol('*') {
            self.expect_word("FROM")?;
            let table = self.expect_identifier()?;
            return Ok(Statement::SelectAll { table });
        }
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let alias = if self.consume_word("AS") {
                Some(self.expect_identifier()?)
            } else {
                match self.peek() {
                    Some(Token::Word(w)) if !is_reserved(w) => Some(self.expect_identifier()?),
                    Some(Token::Quoted(_)) => Some(self.expect_identifier()?),
                    _ => None,
                }
            };
            items.push(SelectItem { expr, alias });
            if !self.consume_symbol(',') {
                break;
            }
        }
        if self.check_word("FROM") {
            return Err(EngineError::Unsupported(
                "only SELECT * is supported with FROM".to_string(),
            ));
        }
        Ok(Statement::Select(items))
    }

    fn parse_insert(&mut self) -> Result<Statement, EngineError> {
        self.expect_word("INTO")?;
        let table = self.expect_identifier()?;
        let columns = if self.check_symbol('(') {
            Some(self.parse_identifier_list()?)
        } else {
            None
        };
        self.expect_word("VALUES")?;
        let mut rows = Vec::new();
        loop {
            self.expect_symbol('(')?;
            let mut row = vec![self.parse_expr()?];
            while self.consume_symbol(',') {
                row.push(self.parse_expr()?);
            }
            self.expect_symbol(')')?;
            rows.push(row);
            if !self.consume_symbol(',') {
                break;
            }
        }
        Ok(Statement::Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_create_table(&mut self) -> Result<Statement, EngineError> {
        let if_not_exists = self.consume_words(&["IF", "NOT", "EXISTS"]);
        let name = self.expect_identifier()?;
        self.expect_symbol('(')?;
        let mut columns = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let ty = self.parse_data_type()?;
            // Constraints are accepted and ignored.
            let _ = self.consume_words(&["PRIMARY", "KEY"])
                || self.consume_words(&["NOT", "NULL"])
                || self.consume_word("NULL");
            columns.push(ColumnDef { name, ty });
            if !self.consume_symbol(',') {
                break;
            }
        }
        self.expect_symbol(')')?;
        Ok(Statement::CreateTable {
            name,
            if_not_exists,
            columns,
        })
    }

    fn parse_set(&mut self) -> Result<Statement, EngineError> {
        let _ = self.consume_word("SESSION") || self.consume_word("LOCAL");
        let name = self.expect_identifier()?;
        if !self.consume_word("TO") {
            self.expect_symbol('=')?;
        }
        let mut parts = Vec::new();
        loop {
            let part = match self.next() {
                Some(Token::Word(w)) => w,
                Some(Token::Quoted(s) | Token::Str(s) | Token::Number(s)) => s,
                Some(token) => return Err(syntax_error_at(&token)),
                None => return Err(self.unexpected()),
            };
            parts.push(part);
            if !self.consume_symbol(',') {
                break;
            }
        }
        Ok(Statement::Set {
            name,
            value: parts.join(", "),
        })
    }

    fn parse_copy(&mut self) -> Result<CopyFromStatement, EngineError> {
        let table = self.expect_identifier()?;
        let columns = if self.check_symbol('(') {
            Some(self.parse_identifier_list()?)
        } else {
            None
        };
        if self.check_word("TO") {
            return Err(EngineError::Unsupported("COPY TO is not supported".to_string()));
        }
        self.expect_word("FROM")?;
        let source = if self.consume_word("STDIN") {
            CopySource::Stdin
        } else {
            match self.next() {
                Some(Token::Str(path)) => CopySource::File(PathBuf::from(path)),
                Some(token) => return Err(syntax_error_at(&token)),
                None => return Err(self.unexpected()),
            }
        };
        self.consume_word("WITH");
        let options = if self.consume_symbol('(') {
            let options = self.parse_copy_options()?;
            self.expect_symbol(')')?;
            options
        } else {
            CopyOptions::default()
        };
        Ok(CopyFromStatement {
            table,
            columns,
            source,
            options,
        })
    }

    fn parse_copy_options(&mut self) -> Result<CopyOptions, EngineError> {
        let mut format = CopyFormat::Text;
        let mut delimiter = None;
        let mut null = None;
        let mut header = false;
        loop {
            let option = self.expect_identifier()?;
            match option.as_str() {
                "format" => {
                    format = match self.expect_identifier()?.as_str() {
                        "text" => CopyFormat::Text,
                        "csv" => CopyFormat::Csv,
                        other => {
                            return Err(EngineError::Unsupported(format!(
                                "COPY format \"{other}\" not recognized"
                            )));
                        }
                    }
                }
                "header" => {
                    header = match self.peek() {
                        Some(Token::Word(w)) => {
                            let value = w.to_ascii_lowercase();
                            self.pos += 1;
                            matches!(value.as_str(), "true" | "on" | "match")
                        }
                        _ => true,
                    }
                }
                "delimiter" => {
                    let value = self.expect_string()?;
                    match value.as_bytes() {
                        [b] if b.is_ascii() => delimiter = Some(*b),
                        _ => {
                            return Err(EngineError::Unsupported(
                                "COPY delimiter must be a single one-byte character".to_string(),
                            ));
                        }
                    }
                }
                "null" => null = Some(self.expect_string()?),
                other => {
                    return Err(EngineError::Syntax(format!(
                        "option \"{other}\" not recognized"
                    )));
                }
            }
            if !self.consume_symbol(',') {
                break;
            }
        }
        let mut options = CopyOptions::for_format(format);
        options.header = header;
        if let Some(delimiter) = delimiter {
            options.delimiter = delimiter;
        }
        if let Some(null) = null {
            options.null = null;
        }
        Ok(options)
    }

    fn parse_expr(&mut self) -> Result<Expr, EngineError> {
        let mut expr = if self.check_word("CAST") {
            self.pos += 1;
            self.expect_symbol('(')?;
            let inner = self.parse_expr()?;
            self.expect_word("AS")?;
            let ty = self.parse_data_type()?;
            self.expect_symbol(')')?;
            Expr::Cast(Box::new(inner), ty)
        } else {
            self.parse_primary()?
        };
        while self.check(&Token::DoubleColon) {
            self.pos += 1;
            let ty = self.parse_data_type()?;
            expr = Expr::Cast(Box::new(expr), ty);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, EngineError> {
        let negate = self.consume_symbol('-');
        if !negate {
            self.consume_symbol('+');
        }
        let expr = match self.next() {
            Some(Token::Number(text)) => {
                let text = if negate { format!("-{text}") } else { text };
                match text.parse::<i64>() {
                    Ok(n) => Expr::Integer(n),
                    Err(_) => Expr::Decimal(
                        text.parse::<Decimal>()
                            .or_else(|_| Decimal::from_scientific(&text))
                            .map_err(|_| {
                                EngineError::Syntax(format!("invalid number literal \"{text}\""))
                            })?,
                    ),
                }
            }
            Some(token) if negate => return Err(syntax_error_at(&token)),
            Some(Token::Str(s)) => Expr::String(s),
            Some(Token::Param(n)) => Expr::Param(n),
            Some(Token::Symbol('(')) => {
                let inner = self.parse_expr()?;
                self.expect_symbol(')')?;
                inner
            }
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("NULL") => Expr::Null,
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("TRUE") => Expr::Bool(true),
            Some(Token::Word(w)) if w.eq_ignore_ascii_case("FALSE") => Expr::Bool(false),
            Some(token) => return Err(syntax_error_at(&token)),
            None => return Err(self.unexpected()),
        };
        Ok(expr)
    }

    /// Parses a type name with its optional modifiers and array suffix.
    fn parse_data_type(&mut self) -> Result<PgType, EngineError> {
        let words: Vec<String> = self.tokens[self.pos..]
            .iter()
            .take(4)
            .map_while(|t| match t {
                Token::Word(w) => Some(w.to_ascii_lowercase()),
                Token::Quoted(q) => Some(q.clone()),
                _ => None,
            })
            .collect();
        let (taken, base) = (1..=words.len())
            .rev()
            .find_map(|n| BaseType::from_name(&words[..n].join(" ")).map(|b| (n, b)))
            .ok_or_else(|| match words.first() {
                Some(name) => EngineError::TypeNotFound(name.clone()),
                None => self.unexpected(),
            })?;
        self.pos += taken;

        let mut ty = PgType::base(base);
        if self.consume_symbol('(') {
            let first = self.expect_u16()?;
            let second = if self.consume_symbol(',') {
                Some(self.expect_u16()?)
            } else {
                None
            };
            self.expect_symbol(')')?;
            ty = match base {
                BaseType::Numeric => PgType::numeric(first, second.unwrap_or(0)),
                BaseType::VarChar | BaseType::BpChar => ty.with_typmod(i32::from(first) + 4),
                _ => ty.with_typmod(i32::from(first)),
            };
        }
        if self.consume_symbol('[') {
            self.expect_symbol(']')?;
            ty = PgType::array_of(base);
        }
        Ok(ty)
    }

    fn parse_identifier_list(&mut self) -> Result<Vec<String>, EngineError> {
        self.expect_symbol('(')?;
        let mut names = vec![self.expect_identifier()?];
        while self.consume_symbol(',') {
            names.push(self.expect_identifier()?);
        }
        self.expect_symbol(')')?;
        Ok(names)
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn unexpected(&self) -> EngineError {
        match self.peek() {
            Some(token) => syntax_error_at(token),
            None => EngineError::Syntax("syntax error at end of input".to_string()),
        }
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == Some(token)
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
    }

    fn consume_word(&mut self, word: &str) -> bool {
        let found = self.check_word(word);
        if found {
            self.pos += 1;
        }
        found
    }

    /// Consumes a keyword sequence only if all of it is present.
    fn consume_words(&mut self, words: &[&str]) -> bool {
        let matched = words.iter().enumerate().all(|(i, word)| {
            matches!(self.tokens.get(self.pos + i), Some(Token::Word(w)) if w.eq_ignore_ascii_case(word))
        });
        if matched {
            self.pos += words.len();
        }
        matched
    }

    fn expect_word(&mut self, word: &str) -> Result<(), EngineError> {
        if self.consume_word(word) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn check_symbol(&self, symbol: char) -> bool {
        self.check(&Token::Symbol(symbol))
    }

    fn consume_symbol(&mut self, symbol: char) -> bool {
        let found = self.check_symbol(symbol);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect_symbol(&mut self, symbol: char) -> Result<(), EngineError> {
        if self.consume_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// Unquoted identifiers fold to lower case.
    fn expect_identifier(&mut self) -> Result<String, EngineError> {
        match self.peek() {
            Some(Token::Word(w)) => {
                let name = w.to_ascii_lowercase();
                self.pos += 1;
                Ok(name)
            }
            Some(Token::Quoted(q)) => {
                let name = q.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn expect_string(&mut self) -> Result<String, EngineError> {
        match self.peek() {
            Some(Token::Str(s)) => {
                let value = s.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn expect_u16(&mut self) -> Result<u16, EngineError> {
        match self.peek() {
            Some(Token::Number(n)) => {
                let value = n.parse().map_err(|_| self.unexpected())?;
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.unexpected()),
        }
    }
}

/// Words that end a select item instead of naming it.
fn is_reserved(word: &str) -> bool {
    ["FROM", "WHERE", "AS", "ORDER", "GROUP", "LIMIT"]
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}
