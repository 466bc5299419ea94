//! The contract between the connection and the SQL engine behind it.
//!
//! The connection never looks inside a statement or plan. It asks the
//! engine to translate SQL text, prepare, bind and run plans, and gets back
//! result schemas and row streams to put on the wire.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                       Connection                            |
//! |  Parse ──► convert ──► prepare ──► placeholders             |
//! |  Bind  ──────────────► bind                                 |
//! |  Execute ────────────► execute ──► QueryResult ──► spool    |
//! |  Query ──► convert ──► query   ──► QueryResult ──► spool    |
//! +-------------------------------+-----------------------------+
//!                                 | Engine trait
//!                                 v
//!                     +-----------------------+
//!                     |  MemoryEngine / ...   |
//!                     +-----------------------+
//! ```
//!
//! ## Terminology
//!
//! - **ConvertedQuery**: SQL text plus its statement tag and parsed form
//! - **Plan**: a prepared statement as the engine keeps it
//! - **BoundPlan**: a plan with its parameter values, ready to run
//! - **QueryResult**: what running a statement produced

pub mod error;
pub mod memory;
pub mod tag;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use error::EngineError;
pub use memory::MemoryEngine;
pub use tag::{StatementKind, command_complete_tag};

use crate::copy::{CopyFromStatement, DataLoader};
use crate::protocol::{FieldDescription, FormatCode, TransactionStatus};
use crate::wire::{Oid, PgType, Value};

/// SQL text translated by [`Engine::convert`].
#[derive(Debug, Clone)]
pub struct ConvertedQuery<S> {
    pub text: String,
    pub statement_tag: String,
    /// `None` for a query with no statement in it (blank or comments only).
    pub statement: Option<ParsedStatement<S>>,
}

impl<S> ConvertedQuery<S> {
    pub fn empty(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            statement_tag: String::new(),
            statement: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statement.is_none()
    }

    pub fn kind(&self) -> StatementKind {
        StatementKind::from_tag(&self.statement_tag)
    }
}

/// A parsed statement. The connection handles every variant except
/// `Engine` itself because they act on connection state.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedStatement<S> {
    /// `DEALLOCATE name`; `None` is `DEALLOCATE ALL`.
    Deallocate { name: Option<String> },
    DiscardAll,
    CopyFrom(CopyFromStatement),
    Engine(S),
}

/// A placeholder occurrence inside a prepared plan.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaceholderExpr {
    /// A bare `$n`; `ty` is set when the engine inferred a type from context.
    BindVar { index: usize, ty: Option<PgType> },
    /// `$n::target` or `CAST($n AS target)`.
    Cast { index: usize, target: PgType },
}

impl PlaceholderExpr {
    /// Zero-based parameter index.
    pub fn index(&self) -> usize {
        match self {
            PlaceholderExpr::BindVar { index, .. } | PlaceholderExpr::Cast { index, .. } => *index,
        }
    }

    /// The OID this occurrence implies, if any.
    pub fn type_oid(&self) -> Option<Oid> {
        match self {
            PlaceholderExpr::BindVar { ty, .. } => ty.as_ref().map(|t| t.oid),
            PlaceholderExpr::Cast { target, .. } => Some(target.oid),
        }
    }
}

/// One column of a result schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: PgType,
    /// OID of the source table, or 0.
    pub table_oid: u32,
    /// Attribute number within the source table, or 0.
    pub column_attr: i16,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: PgType) -> Self {
        Self {
            name: name.into(),
            ty,
            table_oid: 0,
            column_attr: 0,
        }
    }

    pub fn field_description(&self, format: FormatCode) -> FieldDescription {
        FieldDescription {
            name: self.name.clone(),
            table_oid: self.table_oid,
            column_attr: self.column_attr,
            type_oid: self.ty.oid,
            type_size: self.ty.type_size(),
            type_modifier: self.ty.typmod,
            format,
        }
    }
}

/// Maps a schema to RowDescription fields, one format per column.
pub fn field_descriptions(schema: &[Column], formats: &[FormatCode]) -> Vec<FieldDescription> {
    schema
        .iter()
        .enumerate()
        .map(|(i, col)| col.field_description(formats.get(i).copied().unwrap_or_default()))
        .collect()
}

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OkResult {
    pub rows_affected: u64,
}

/// One item of a row stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultRow {
    Values(Vec<Value>),
    Ok(OkResult),
}

pub type RowStream = BoxStream<'static, Result<ResultRow, EngineError>>;

/// What running a statement produced.
pub enum QueryResult {
    Ok(OkResult),
    /// No schema and no rows (`BEGIN`, `SET`, DDL).
    Empty,
    Rows {
        schema: Vec<Column>,
        rows: RowStream,
        /// At most one row will ever be produced.
        max_one_row: bool,
    },
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Ok(ok) => f.debug_tuple("Ok").field(ok).finish(),
            QueryResult::Empty => f.write_str("Empty"),
            QueryResult::Rows {
                schema,
                max_one_row,
                ..
            } => f
                .debug_struct("Rows")
                .field("schema", schema)
                .field("max_one_row", max_one_row)
                .finish_non_exhaustive(),
        }
    }
}

/// The SQL engine a connection delegates to.
///
/// One engine is shared by every connection; each connection owns one
/// `Session` created by [`Engine::new_session`].
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    type Statement: Clone + fmt::Debug + Send + Sync;
    type Plan: Send + Sync;
    type BoundPlan: Send + Sync;
    type Session: Send;

    /// Translates SQL text. Must not depend on session state.
    fn convert(&self, sql: &str) -> Result<ConvertedQuery<Self::Statement>, EngineError>;

    fn new_session(&self, user: &str) -> Self::Session;

    async fn set_database(
        &self,
        session: &mut Self::Session,
        database: &str,
    ) -> Result<(), EngineError>;

    /// Returns the session to its freshly connected state (`DISCARD ALL`).
    async fn reset_session(&self, session: &mut Self::Session) -> Result<(), EngineError>;

    fn transaction_status(&self, session: &Self::Session) -> TransactionStatus;

    /// Plans a statement for later binding, returning its result schema.
    async fn prepare(
        &self,
        session: &mut Self::Session,
        sql: &str,
        statement: &Self::Statement,
    ) -> Result<(Self::Plan, Vec<Column>), EngineError>;

    /// Every placeholder occurrence in a plan, for parameter type inference.
    fn placeholders(&self, plan: &Self::Plan) -> Vec<PlaceholderExpr>;

    /// Binds parameter values to a plan. The bound plan does not borrow
    /// from the source plan.
    async fn bind(
        &self,
        session: &mut Self::Session,
        plan: &Self::Plan,
        params: Vec<Value>,
    ) -> Result<(Self::BoundPlan, Vec<Column>), EngineError>;

    async fn execute(
        &self,
        session: &mut Self::Session,
        plan: &Self::BoundPlan,
    ) -> Result<QueryResult, EngineError>;

    /// Runs a statement from the simple query protocol.
    async fn query(
        &self,
        session: &mut Self::Session,
        sql: &str,
        statement: &Self::Statement,
    ) -> Result<QueryResult, EngineError>;

    /// Starts a `COPY ... FROM`, returning the loader that will receive the data.
    async fn copy_from(
        &self,
        session: &mut Self::Session,
        statement: &CopyFromStatement,
    ) -> Result<Box<dyn DataLoader>, EngineError>;
}
