use std::collections::HashMap;

use crate::copy::{CopyFromStatement, DataLoader};
use crate::engine::{Column, ConvertedQuery, Engine};
use crate::protocol::{ErrorInfo, FormatCode};
use crate::wire::Oid;

/// Per-connection state for the Extended Query Protocol.
///
/// NOTE: No synchronization needed - this state is owned by a single connection.
#[derive(Debug)]
pub struct ConnectionState<S, P> {
    /// Named prepared statements. Key "" is the unnamed statement.
    statements: HashMap<String, S>,
    /// Named portals. Key "" is the unnamed portal.
    portals: HashMap<String, P>,
    /// Set by every extended query message, cleared by Sync. While set, an
    /// error discards input up to the next Sync.
    pub wait_for_sync: bool,
}

impl<S, P> Default for ConnectionState<S, P> {
    fn default() -> Self {
        Self {
            statements: HashMap::new(),
            portals: HashMap::new(),
            wait_for_sync: false,
        }
    }
}

impl<S, P> ConnectionState<S, P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a prepared statement, replacing any statement with the same name.
    /// Portals already bound from the old statement are left alone.
    pub fn upsert_statement(&mut self, name: String, stmt: S) {
        self.statements.insert(name, stmt);
    }

    pub fn get_statement(&self, name: &str) -> Option<&S> {
        self.statements.get(name)
    }

    /// Returns whether a statement by that name existed.
    pub fn close_statement(&mut self, name: &str) -> bool {
        self.statements.remove(name).is_some()
    }

    pub fn close_all_statements(&mut self) {
        self.statements.clear();
    }

    /// Stores a portal, replacing any portal with the same name.
    pub fn upsert_portal(&mut self, name: String, portal: P) {
        self.portals.insert(name, portal);
    }

    pub fn get_portal(&self, name: &str) -> Option<&P> {
        self.portals.get(name)
    }

    pub fn close_portal(&mut self, name: &str) -> bool {
        self.portals.remove(name).is_some()
    }

    /// Drops the unnamed statement and portal; named ones persist.
    pub fn clear_unnamed(&mut self) {
        self.close_statement("");
        self.close_portal("");
    }

    /// Drops every statement and portal.
    pub fn clear(&mut self) {
        self.statements.clear();
        self.portals.clear();
    }
}

/// A prepared statement stored on the connection.
pub struct PreparedStatement<E: Engine> {
    pub query: ConvertedQuery<E::Statement>,
    pub fields: Vec<Column>,
    pub param_types: Vec<Oid>,
    /// `None` for empty queries and statements the connection runs itself.
    pub plan: Option<E::Plan>,
}

/// A portal (bound prepared statement) stored on the connection.
pub struct Portal<E: Engine> {
    pub query: ConvertedQuery<E::Statement>,
    pub fields: Vec<Column>,
    /// One format per result column.
    pub result_formats: Vec<FormatCode>,
    /// `None` for empty queries and statements the connection runs itself.
    pub bound: Option<E::BoundPlan>,
}

/// A `COPY ... FROM STDIN` waiting for its data.
pub struct CopyState {
    pub statement: CopyFromStatement,
    pub loader: Box<dyn DataLoader>,
    /// Set when a chunk failed; the rest of the data is ignored.
    pub pending_error: Option<ErrorInfo>,
}
