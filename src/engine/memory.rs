//! A small in-memory SQL engine.
//!
//! Tables live in process memory and are shared by every connection to the
//! same database. Writes are applied immediately; a transaction block only
//! tracks its status, and `ROLLBACK` does not undo earlier statements.

pub mod lexer;
pub mod parser;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::RwLock;

use crate::copy::{CopyFromStatement, DataLoader, DelimitedLoader, RowSink};
use crate::engine::{
    Column, ConvertedQuery, Engine, EngineError, OkResult, PlaceholderExpr, QueryResult,
    ResultRow,
};
use crate::protocol::TransactionStatus;
use crate::wire::oid_cache::FIRST_NORMAL_OID;
use crate::wire::{BaseType, OidCache, PgType, Value, cast::cast};

pub use parser::{Expr, Statement};

/// The database every engine serves.
pub const DEFAULT_DATABASE: &str = "postgres";

const UNDEFINED_PARAMETER: &str = "42P02";

#[derive(Debug, Clone)]
struct Table {
    oid: u32,
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

/// Tables of every database, keyed by database then table name.
type Catalogs = HashMap<String, HashMap<String, Table>>;

pub struct MemoryEngine {
    databases: HashSet<String>,
    tables: Arc<RwLock<Catalogs>>,
    next_table_oid: AtomicU32,
    oids: Arc<OidCache>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(Arc::new(OidCache::new()))
    }
}

impl MemoryEngine {
    pub fn new(oids: Arc<OidCache>) -> Self {
        Self {
            databases: HashSet::from([DEFAULT_DATABASE.to_string()]),
            tables: Arc::new(RwLock::new(HashMap::new())),
            next_table_oid: AtomicU32::new(FIRST_NORMAL_OID + 1_000_000),
            oids,
        }
    }

    /// Adds databases clients may connect to besides [`DEFAULT_DATABASE`].
    pub fn with_databases<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.databases.extend(names.into_iter().map(Into::into));
        self
    }

    fn table_columns(&self, database: &str, table: &str) -> Result<Vec<Column>, EngineError> {
        self.tables
            .read()
            .get(database)
            .and_then(|tables| tables.get(table))
            .map(|t| t.columns.clone())
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    fn schema(&self, database: &str, statement: &Statement) -> Result<Vec<Column>, EngineError> {
        Ok(match statement {
            Statement::Select(items) => items
                .iter()
                .map(|item| {
                    let name = item
                        .alias
                        .clone()
                        .unwrap_or_else(|| default_column_name(&item.expr));
                    Column::new(name, expr_type(&item.expr))
                })
                .collect(),
            Statement::SelectAll { table } => self.table_columns(database, table)?,
            Statement::Show { name } => vec![Column::new(name, PgType::base(BaseType::Text))],
            _ => Vec::new(),
        })
    }

    fn placeholders_of(
        &self,
        database: &str,
        statement: &Statement,
    ) -> Result<Vec<PlaceholderExpr>, EngineError> {
        let mut out = Vec::new();
        match statement {
            Statement::Select(items) => {
                for item in items {
                    collect_placeholders(&item.expr, None, &mut out);
                }
            }
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let table_columns = self.table_columns(database, table)?;
                let positions = resolve_positions(&table_columns, columns.as_deref())?;
                for row in rows {
                    for (expr, pos) in row.iter().zip(&positions) {
                        collect_placeholders(expr, Some(&table_columns[*pos].ty), &mut out);
                    }
                }
            }
            _ => {}
        }
        Ok(out)
    }

    fn eval(&self, expr: &Expr, params: &[Value]) -> Result<Value, EngineError> {
        Ok(match expr {
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Integer(n) => match i32::try_from(*n) {
                Ok(n) => Value::Int32(n),
                Err(_) => Value::Int64(*n),
            },
            Expr::Decimal(d) => Value::Numeric(*d),
            Expr::String(s) => Value::Text(s.clone()),
            Expr::Param(i) => params.get(*i).cloned().ok_or_else(|| {
                EngineError::with_code(
                    UNDEFINED_PARAMETER,
                    format!("there is no parameter ${}", i + 1),
                )
            })?,
            Expr::Cast(inner, ty) => cast(&self.oids, &self.eval(inner, params)?, ty)?,
        })
    }

    /// Runs a statement, tracking the session's transaction block.
    fn run(
        &self,
        session: &mut MemorySession,
        statement: &Statement,
        params: &[Value],
    ) -> Result<QueryResult, EngineError> {
        let ends_block = matches!(statement, Statement::Commit | Statement::Rollback);
        if session.transaction == TransactionStatus::Failed && !ends_block {
            return Err(EngineError::TransactionAborted);
        }
        let result = self.run_statement(session, statement, params);
        if result.is_err() && session.transaction == TransactionStatus::InTransaction {
            session.transaction = TransactionStatus::Failed;
        }
        result
    }

    fn run_statement(
        &self,
        session: &mut MemorySession,
        statement: &Statement,
        params: &[Value],
    ) -> Result<QueryResult, EngineError> {
        match statement {
            Statement::Select(items) => {
                let schema = self.schema(&session.database, statement)?;
                let mut row = Vec::with_capacity(items.len());
                for (item, column) in items.iter().zip(&schema) {
                    row.push(cast(&self.oids, &self.eval(&item.expr, params)?, &column.ty)?);
                }
                Ok(rows_result(schema, vec![row], true))
            }
            Statement::SelectAll { table } => {
                let tables = self.tables.read();
                let table = tables
                    .get(&session.database)
                    .and_then(|tables| tables.get(table))
                    .ok_or_else(|| EngineError::TableNotFound(table.clone()))?;
                Ok(rows_result(table.columns.clone(), table.rows.clone(), false))
            }
            Statement::CreateTable {
                name,
                if_not_exists,
                columns,
            } => {
                let mut tables = self.tables.write();
                let catalog = tables.entry(session.database.clone()).or_default();
                if catalog.contains_key(name) {
                    if *if_not_exists {
                        return Ok(QueryResult::Empty);
                    }
                    return Err(EngineError::TableAlreadyExists(name.clone()));
                }
                let oid = self.next_table_oid.fetch_add(1, Ordering::Relaxed);
                let columns = columns
                    .iter()
                    .enumerate()
                    .map(|(i, def)| Column {
                        name: def.name.clone(),
                        ty: def.ty.clone(),
                        table_oid: oid,
                        column_attr: i as i16 + 1,
                    })
                    .collect();
                catalog.insert(
                    name.clone(),
                    Table {
                        oid,
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(QueryResult::Empty)
            }
            Statement::Insert {
                table,
                columns,
                rows,
            } => {
                let mut tables = self.tables.write();
                let target = tables
                    .get_mut(&session.database)
                    .and_then(|tables| tables.get_mut(table))
                    .ok_or_else(|| EngineError::TableNotFound(table.clone()))?;
                let positions = resolve_positions(&target.columns, columns.as_deref())?;
                let mut new_rows = Vec::with_capacity(rows.len());
                for exprs in rows {
                    if exprs.len() > positions.len() {
                        return Err(EngineError::Syntax(
                            "INSERT has more expressions than target columns".to_string(),
                        ));
                    }
                    if exprs.len() < positions.len() {
                        return Err(EngineError::Syntax(
                            "INSERT has more target columns than expressions".to_string(),
                        ));
                    }
                    let mut row = vec![Value::Null; target.columns.len()];
                    for (expr, pos) in exprs.iter().zip(&positions) {
                        let value = self.eval(expr, params)?;
                        row[*pos] = cast(&self.oids, &value, &target.columns[*pos].ty)?;
                    }
                    new_rows.push(row);
                }
                let rows_affected = new_rows.len() as u64;
                target.rows.append(&mut new_rows);
                Ok(QueryResult::Ok(OkResult { rows_affected }))
            }
            Statement::Delete { table } => {
                let mut tables = self.tables.write();
                let target = tables
                    .get_mut(&session.database)
                    .and_then(|tables| tables.get_mut(table))
                    .ok_or_else(|| EngineError::TableNotFound(table.clone()))?;
                let rows_affected = target.rows.len() as u64;
                target.rows.clear();
                Ok(QueryResult::Ok(OkResult { rows_affected }))
            }
            Statement::Begin => {
                session.transaction = TransactionStatus::InTransaction;
                Ok(QueryResult::Empty)
            }
            Statement::Commit | Statement::Rollback => {
                session.transaction = TransactionStatus::Idle;
                Ok(QueryResult::Empty)
            }
            Statement::Set { name, value } => {
                session.settings.insert(name.clone(), value.clone());
                Ok(QueryResult::Empty)
            }
            Statement::Show { name } => {
                let value = session
                    .settings
                    .get(name)
                    .cloned()
                    .or_else(|| default_setting(name).map(str::to_string))
                    .ok_or_else(|| EngineError::UnknownParameter(name.clone()))?;
                let schema = self.schema(&session.database, statement)?;
                Ok(rows_result(schema, vec![vec![Value::Text(value)]], true))
            }
        }
    }
}

fn rows_result(schema: Vec<Column>, rows: Vec<Vec<Value>>, max_one_row: bool) -> QueryResult {
    let rows = stream::iter(rows.into_iter().map(|row| Ok(ResultRow::Values(row)))).boxed();
    QueryResult::Rows {
        schema,
        rows,
        max_one_row,
    }
}

fn default_column_name(expr: &Expr) -> String {
    match expr {
        Expr::Cast(_, ty) => ty.name.clone(),
        Expr::Bool(_) => "bool".to_string(),
        _ => "?column?".to_string(),
    }
}

fn expr_type(expr: &Expr) -> PgType {
    match expr {
        Expr::Bool(_) => PgType::base(BaseType::Bool),
        Expr::Integer(n) if i32::try_from(*n).is_ok() => PgType::base(BaseType::Int4),
        Expr::Integer(_) => PgType::base(BaseType::Int8),
        Expr::Decimal(_) => PgType::base(BaseType::Numeric),
        Expr::Cast(_, ty) => ty.clone(),
        Expr::Null | Expr::String(_) | Expr::Param(_) => PgType::base(BaseType::Text),
    }
}

fn collect_placeholders(expr: &Expr, hint: Option<&PgType>, out: &mut Vec<PlaceholderExpr>) {
    match expr {
        Expr::Param(index) => out.push(PlaceholderExpr::BindVar {
            index: *index,
            ty: hint.cloned(),
        }),
        Expr::Cast(inner, target) => match inner.as_ref() {
            Expr::Param(index) => out.push(PlaceholderExpr::Cast {
                index: *index,
                target: target.clone(),
            }),
            other => collect_placeholders(other, None, out),
        },
        _ => {}
    }
}

/// Positions of the named columns within the table, or every column in order.
fn resolve_positions(
    table_columns: &[Column],
    names: Option<&[String]>,
) -> Result<Vec<usize>, EngineError> {
    match names {
        None => Ok((0..table_columns.len()).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                table_columns
                    .iter()
                    .position(|c| &c.name == name)
                    .ok_or_else(|| EngineError::ColumnNotFound(name.clone()))
            })
            .collect(),
    }
}

fn default_setting(name: &str) -> Option<&'static str> {
    Some(match name {
        "server_version" => "15.0",
        "server_encoding" | "client_encoding" => "UTF8",
        "datestyle" => "ISO, MDY",
        "timezone" => "UTC",
        "intervalstyle" => "postgres",
        "standard_conforming_strings" | "integer_datetimes" => "on",
        "search_path" => "\"$user\", public",
        "transaction_isolation" => "read committed",
        "application_name" => "",
        _ => return None,
    })
}

/// Per-connection state of the memory engine.
#[derive(Debug, Clone)]
pub struct MemorySession {
    user: String,
    database: String,
    transaction: TransactionStatus,
    settings: HashMap<String, String>,
}

impl MemorySession {
    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }
}

/// A statement checked against the catalog.
#[derive(Debug, Clone)]
pub struct MemoryPlan {
    statement: Statement,
    schema: Vec<Column>,
    placeholders: Vec<PlaceholderExpr>,
}

/// A plan together with its parameter values.
#[derive(Debug, Clone)]
pub struct BoundStatement {
    statement: Statement,
    params: Vec<Value>,
}

/// Buffers loaded rows and appends them to the table on commit.
struct TableSink {
    tables: Arc<RwLock<Catalogs>>,
    database: String,
    table: String,
    positions: Vec<usize>,
    width: usize,
    pending: Vec<Vec<Value>>,
}

impl RowSink for TableSink {
    fn append(&mut self, row: Vec<Value>) -> Result<(), EngineError> {
        let mut full = vec![Value::Null; self.width];
        for (value, pos) in row.into_iter().zip(&self.positions) {
            full[*pos] = value;
        }
        self.pending.push(full);
        Ok(())
    }

    fn commit(&mut self) -> Result<u64, EngineError> {
        let mut tables = self.tables.write();
        let target = tables
            .get_mut(&self.database)
            .and_then(|tables| tables.get_mut(&self.table))
            .ok_or_else(|| EngineError::TableNotFound(self.table.clone()))?;
        let loaded = self.pending.len() as u64;
        target.rows.append(&mut self.pending);
        Ok(loaded)
    }

    fn rollback(&mut self) {
        self.pending.clear();
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    type Statement = Statement;
    type Plan = MemoryPlan;
    type BoundPlan = BoundStatement;
    type Session = MemorySession;

    fn convert(&self, sql: &str) -> Result<ConvertedQuery<Statement>, EngineError> {
        parser::convert(sql)
    }

    fn new_session(&self, user: &str) -> MemorySession {
        MemorySession {
            user: user.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            transaction: TransactionStatus::Idle,
            settings: HashMap::new(),
        }
    }

    async fn set_database(
        &self,
        session: &mut MemorySession,
        database: &str,
    ) -> Result<(), EngineError> {
        if !self.databases.contains(database) {
            return Err(EngineError::UnknownDatabase(database.to_string()));
        }
        session.database = database.to_string();
        Ok(())
    }

    async fn reset_session(&self, session: &mut MemorySession) -> Result<(), EngineError> {
        session.settings.clear();
        session.transaction = TransactionStatus::Idle;
        Ok(())
    }

    fn transaction_status(&self, session: &MemorySession) -> TransactionStatus {
        session.transaction
    }

    async fn prepare(
        &self,
        session: &mut MemorySession,
        _sql: &str,
        statement: &Statement,
    ) -> Result<(MemoryPlan, Vec<Column>), EngineError> {
        let schema = self.schema(&session.database, statement)?;
        let placeholders = self.placeholders_of(&session.database, statement)?;
        let plan = MemoryPlan {
            statement: statement.clone(),
            schema: schema.clone(),
            placeholders,
        };
        Ok((plan, schema))
    }

    fn placeholders(&self, plan: &MemoryPlan) -> Vec<PlaceholderExpr> {
        plan.placeholders.clone()
    }

    async fn bind(
        &self,
        _session: &mut MemorySession,
        plan: &MemoryPlan,
        params: Vec<Value>,
    ) -> Result<(BoundStatement, Vec<Column>), EngineError> {
        let bound = BoundStatement {
            statement: plan.statement.clone(),
            params,
        };
        Ok((bound, plan.schema.clone()))
    }

    async fn execute(
        &self,
        session: &mut MemorySession,
        plan: &BoundStatement,
    ) -> Result<QueryResult, EngineError> {
        self.run(session, &plan.statement, &plan.params)
    }

    async fn query(
        &self,
        session: &mut MemorySession,
        _sql: &str,
        statement: &Statement,
    ) -> Result<QueryResult, EngineError> {
        self.run(session, statement, &[])
    }

    async fn copy_from(
        &self,
        session: &mut MemorySession,
        statement: &CopyFromStatement,
    ) -> Result<Box<dyn DataLoader>, EngineError> {
        if session.transaction == TransactionStatus::Failed {
            return Err(EngineError::TransactionAborted);
        }
        let table_columns = self.table_columns(&session.database, &statement.table)?;
        let positions = resolve_positions(&table_columns, statement.columns.as_deref())?;
        let columns = positions.iter().map(|p| table_columns[*p].clone()).collect();
        let sink = TableSink {
            tables: Arc::clone(&self.tables),
            database: session.database.clone(),
            table: statement.table.clone(),
            positions,
            width: table_columns.len(),
            pending: Vec::new(),
        };
        Ok(Box::new(DelimitedLoader::new(
            statement.options.clone(),
            columns,
            Arc::clone(&self.oids),
            sink,
        )))
    }
}
