mod error;
mod spool;
mod state;

pub use error::ConnectionError;
pub use spool::{RowEncoder, SpoolOutcome, spool, spool_single};
pub use state::{ConnectionState, CopyState, Portal, PreparedStatement};

use std::ffi::OsStr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::config::UntypedParamPolicy;
use crate::copy::{CopyFromStatement, CopySource};
use crate::engine::{
    Engine, ParsedStatement, PlaceholderExpr, QueryResult, StatementKind,
    command_complete_tag, field_descriptions,
};
use crate::protocol::{
    BackendMessage, BindMessage, CloseMessage, DescribeMessage, ErrorInfo, ExecuteMessage,
    FormatCode, FrontendMessage, ParseMessage, PostgresCodec, Target, sql_state,
};
use crate::server::connection::error::panic_message;
use crate::server::handshake::Startup;
use crate::server::listener::ServerContext;
use crate::server::stream::Stream;
use crate::wire::{Oid, OidCache, PgType, Value, WireError, decode_value, oid};

/// Setting this variable to any non-empty value lets panics in message
/// handlers unwind instead of turning into an ErrorResponse.
const PANIC_ENV: &str = "MASQUE_PANIC";

/// What the message loop does after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Read the next message.
    Continue,
    /// The batch is over; send ReadyForQuery.
    EndOfBatch,
    /// Close the connection.
    Stop,
}

/// A single client connection in its query phase.
///
/// Messages are handled strictly one after another. Statement errors are
/// reported and the connection carries on; fatal errors end it.
pub struct Connection<E: Engine> {
    framed: Framed<Stream, PostgresCodec>,
    engine: Arc<E>,
    context: Arc<ServerContext>,
    session: E::Session,
    state: ConnectionState<PreparedStatement<E>, Portal<E>>,
    copy: Option<CopyState>,
    user: String,
    database: Option<String>,
    catch_panics: bool,
}

impl<E: Engine> Connection<E> {
    pub fn new(startup: Startup, engine: Arc<E>, context: Arc<ServerContext>) -> Self {
        let user = startup.parameters.user;
        let session = engine.new_session(&user);
        Self {
            framed: startup.framed,
            engine,
            context,
            session,
            state: ConnectionState::new(),
            copy: None,
            user,
            database: startup.parameters.database,
            catch_panics: catch_panics(std::env::var_os(PANIC_ENV).as_deref()),
        }
    }

    pub async fn run(mut self) -> Result<(), ConnectionError> {
        if !self.select_database().await? {
            return Ok(());
        }
        self.send_ready_for_query().await?;

        loop {
            let Some(message) = self.framed.next().await.transpose()? else {
                debug!("client disconnected");
                return Ok(());
            };

            match self.dispatch(message).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::EndOfBatch) => self.send_ready_for_query().await?,
                Ok(Flow::Stop) => return Ok(()),
                Err(e) if e.is_fatal() => {
                    if let ConnectionError::Protocol(_) = e {
                        // best effort, the connection is going away anyway
                        if let Err(send_error) = self.framed.send(e.to_error_info().into()).await
                        {
                            debug!(error = %send_error, "failed to report protocol error");
                        }
                    }
                    return Err(e);
                }
                Err(e) => {
                    if self.recover(e).await? == Flow::Stop {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Selects the startup database. Returns false when the connection
    /// must close because an explicitly requested database was rejected.
    async fn select_database(&mut self) -> Result<bool, ConnectionError> {
        let (name, explicit) = match &self.database {
            Some(database) => (database.clone(), true),
            None => (self.user.clone(), false),
        };

        match self.engine.set_database(&mut self.session, &name).await {
            Ok(()) => {
                self.database = Some(name);
                Ok(true)
            }
            Err(e) if explicit => {
                warn!(database = %name, error = %e, "rejected startup database");
                let info = ErrorInfo::fatal(
                    sql_state::INVALID_CATALOG_NAME,
                    format!("database \"{name}\" does not exist"),
                );
                self.framed.send(info.into()).await?;
                Ok(false)
            }
            Err(e) => {
                debug!(database = %name, error = %e, "implicit default database not selected");
                Ok(true)
            }
        }
    }

    /// Handles a message, turning a panic into a statement error.
    async fn dispatch(&mut self, message: FrontendMessage) -> Result<Flow, ConnectionError> {
        if !self.catch_panics {
            return self.handle_message(message).await;
        }
        match AssertUnwindSafe(self.handle_message(message))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ConnectionError::Panic(panic_message(payload))),
        }
    }

    /// Reports a statement error and brings the client back in step.
    ///
    /// Inside an extended query batch every message up to the next Sync
    /// is discarded before ReadyForQuery is sent.
    async fn recover(&mut self, e: ConnectionError) -> Result<Flow, ConnectionError> {
        let info = e.to_error_info();
        warn!(code = %info.code, error = %e, "statement failed");
        self.framed.send(info.into()).await?;

        if self.state.wait_for_sync {
            loop {
                match self.framed.next().await.transpose()? {
                    None | Some(FrontendMessage::Terminate) => return Ok(Flow::Stop),
                    Some(FrontendMessage::Sync) => break,
                    Some(message) => debug!(message = message_name(&message), "discarded"),
                }
            }
            self.state.wait_for_sync = false;
        }

        self.send_ready_for_query().await?;
        Ok(Flow::Continue)
    }

    async fn handle_message(&mut self, message: FrontendMessage) -> Result<Flow, ConnectionError> {
        debug!(message = message_name(&message), "received");

        if self.copy.is_some() {
            match message {
                FrontendMessage::CopyData(_)
                | FrontendMessage::CopyDone
                | FrontendMessage::CopyFail(_)
                | FrontendMessage::Terminate => {}
                FrontendMessage::Flush | FrontendMessage::Sync => return Ok(Flow::Continue),
                other => {
                    if let Some(mut copy) = self.copy.take() {
                        copy.loader.abort();
                    }
                    return Err(ConnectionError::statement(
                        sql_state::PROTOCOL_VIOLATION,
                        format!(
                            "unexpected message type {} during COPY from stdin",
                            message_name(&other)
                        ),
                    ));
                }
            }
        }

        match message {
            FrontendMessage::Query(sql) => self.handle_query(sql).await,
            FrontendMessage::Parse(msg) => {
                self.state.wait_for_sync = true;
                self.handle_parse(msg).await
            }
            FrontendMessage::Bind(msg) => {
                self.state.wait_for_sync = true;
                self.handle_bind(msg).await
            }
            FrontendMessage::Describe(msg) => {
                self.state.wait_for_sync = true;
                self.handle_describe(msg).await
            }
            FrontendMessage::Execute(msg) => {
                self.state.wait_for_sync = true;
                self.handle_execute(msg).await
            }
            FrontendMessage::Close(msg) => self.handle_close(msg).await,
            FrontendMessage::Sync => {
                self.state.wait_for_sync = false;
                Ok(Flow::EndOfBatch)
            }
            FrontendMessage::Flush => {
                self.framed.flush().await?;
                Ok(Flow::Continue)
            }
            FrontendMessage::Terminate => Ok(Flow::Stop),
            FrontendMessage::CopyData(data) => self.handle_copy_data(data).await,
            FrontendMessage::CopyDone => self.handle_copy_done().await,
            FrontendMessage::CopyFail(message) => self.handle_copy_fail(message).await,
            FrontendMessage::Password(_) => Err(ConnectionError::statement(
                sql_state::PROTOCOL_VIOLATION,
                "unexpected password message",
            )),
        }
    }

    /// Handle a query from the client (Simple Query Protocol).
    async fn handle_query(&mut self, sql: String) -> Result<Flow, ConnectionError> {
        self.state.clear_unnamed();

        let query = self.engine.convert(&sql)?;
        let Some(statement) = &query.statement else {
            self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
            return Ok(Flow::EndOfBatch);
        };

        match statement {
            ParsedStatement::Engine(stmt) => {
                let result = self
                    .engine
                    .query(&mut self.session, &query.text, stmt)
                    .await?;
                self.send_result(&query.statement_tag, result, &[], true)
                    .await?;
                Ok(Flow::EndOfBatch)
            }
            intercepted => {
                let copy_in = matches!(
                    intercepted,
                    ParsedStatement::CopyFrom(copy) if copy.source == CopySource::Stdin
                );
                let intercepted = intercepted.clone();
                self.run_intercepted(intercepted, &query.statement_tag)
                    .await?;
                // COPY FROM STDIN ends the batch once its data has arrived
                Ok(if copy_in {
                    Flow::Continue
                } else {
                    Flow::EndOfBatch
                })
            }
        }
    }

    /// Handle a Parse message - create a prepared statement.
    async fn handle_parse(&mut self, msg: ParseMessage) -> Result<Flow, ConnectionError> {
        debug!(statement = %msg.statement_name, query = %msg.query, "parse");

        let query = self.engine.convert(&msg.query)?;
        let (fields, param_types, plan) = match &query.statement {
            Some(ParsedStatement::Engine(stmt)) => {
                let (plan, fields) = self
                    .engine
                    .prepare(&mut self.session, &query.text, stmt)
                    .await?;
                let placeholders = self.engine.placeholders(&plan);
                let param_types = resolve_param_types(
                    &msg.param_types,
                    &placeholders,
                    self.context.untyped_params,
                )?;
                (fields, param_types, Some(plan))
            }
            _ => (Vec::new(), msg.param_types, None),
        };

        self.state.upsert_statement(
            msg.statement_name,
            PreparedStatement {
                query,
                fields,
                param_types,
                plan,
            },
        );
        self.framed.feed(BackendMessage::ParseComplete).await?;
        Ok(Flow::Continue)
    }

    /// Handle a Bind message - bind parameters to create a portal.
    async fn handle_bind(&mut self, msg: BindMessage) -> Result<Flow, ConnectionError> {
        debug!(portal = %msg.portal_name, statement = %msg.statement_name, "bind");

        // A Bind to the unnamed portal drops the old one even if it fails.
        if msg.portal_name.is_empty() {
            self.state.close_portal("");
        }
        let Some(stmt) = self.state.get_statement(&msg.statement_name) else {
            return Err(statement_not_found(&msg.statement_name));
        };

        let portal = match (&stmt.query.statement, &stmt.plan) {
            (Some(ParsedStatement::Engine(_)), Some(plan)) => {
                let params = decode_params(&self.context.oids, &stmt.param_types, &msg)?;
                let (bound, fields) = self.engine.bind(&mut self.session, plan, params).await?;
                let result_formats = FormatCode::expand(&msg.result_formats, fields.len())
                    .ok_or_else(|| {
                        ConnectionError::statement(
                            sql_state::PROTOCOL_VIOLATION,
                            format!(
                                "bind message has {} result formats but query has {} columns",
                                msg.result_formats.len(),
                                fields.len()
                            ),
                        )
                    })?;
                Portal {
                    query: stmt.query.clone(),
                    fields,
                    result_formats,
                    bound: Some(bound),
                }
            }
            _ => Portal {
                query: stmt.query.clone(),
                fields: stmt.fields.clone(),
                result_formats: Vec::new(),
                bound: None,
            },
        };

        self.state.upsert_portal(msg.portal_name, portal);
        self.framed.feed(BackendMessage::BindComplete).await?;
        Ok(Flow::Continue)
    }

    /// Handle a Describe message - get metadata about a statement or portal.
    async fn handle_describe(&mut self, msg: DescribeMessage) -> Result<Flow, ConnectionError> {
        debug!(target = ?msg.target, name = %msg.name, "describe");

        let row_description = match msg.target {
            Target::Statement => {
                let Some(stmt) = self.state.get_statement(&msg.name) else {
                    return Err(statement_not_found(&msg.name));
                };
                self.framed
                    .feed(BackendMessage::ParameterDescription {
                        param_types: stmt.param_types.clone(),
                    })
                    .await?;
                (stmt.query.kind().returns_rows() && !stmt.fields.is_empty())
                    .then(|| field_descriptions(&stmt.fields, &[]))
            }
            Target::Portal => {
                let Some(portal) = self.state.get_portal(&msg.name) else {
                    return Err(portal_not_found(&msg.name));
                };
                (portal.query.kind().returns_rows() && !portal.fields.is_empty())
                    .then(|| field_descriptions(&portal.fields, &portal.result_formats))
            }
        };

        let message = match row_description {
            Some(fields) => BackendMessage::RowDescription { fields },
            None => BackendMessage::NoData,
        };
        self.framed.feed(message).await?;
        Ok(Flow::Continue)
    }

    /// Handle an Execute message - execute a portal.
    async fn handle_execute(&mut self, msg: ExecuteMessage) -> Result<Flow, ConnectionError> {
        debug!(portal = %msg.portal_name, max_rows = msg.max_rows, "execute");

        let Some(portal) = self.state.get_portal(&msg.portal_name) else {
            return Err(portal_not_found(&msg.portal_name));
        };
        let tag = portal.query.statement_tag.clone();

        match (&portal.query.statement, &portal.bound) {
            (None, _) => {
                self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
            }
            (Some(ParsedStatement::Engine(_)), Some(bound)) => {
                let formats = portal.result_formats.clone();
                let result = self.engine.execute(&mut self.session, bound).await?;
                self.send_result(&tag, result, &formats, false).await?;
            }
            (Some(ParsedStatement::Engine(_)), None) => {
                return Err(ConnectionError::ProtocolInvariantViolation(format!(
                    "portal \"{}\" has no bound plan",
                    msg.portal_name
                )));
            }
            (Some(intercepted), _) => {
                let intercepted = intercepted.clone();
                self.run_intercepted(intercepted, &tag).await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Handle a Close message - close a statement or portal.
    async fn handle_close(&mut self, msg: CloseMessage) -> Result<Flow, ConnectionError> {
        debug!(target = ?msg.target, name = %msg.name, "close");

        match msg.target {
            Target::Statement => self.state.close_statement(&msg.name),
            Target::Portal => self.state.close_portal(&msg.name),
        };
        self.framed.feed(BackendMessage::CloseComplete).await?;
        Ok(Flow::Continue)
    }

    /// Runs a statement that acts on the connection rather than the engine.
    async fn run_intercepted(
        &mut self,
        statement: ParsedStatement<E::Statement>,
        tag: &str,
    ) -> Result<(), ConnectionError> {
        match statement {
            ParsedStatement::Deallocate { name: Some(name) } => {
                if !self.state.close_statement(&name) {
                    return Err(statement_not_found(&name));
                }
            }
            ParsedStatement::Deallocate { name: None } => self.state.close_all_statements(),
            ParsedStatement::DiscardAll => {
                self.engine.reset_session(&mut self.session).await?;
                self.state.clear();
            }
            ParsedStatement::CopyFrom(copy) => return self.start_copy(copy).await,
            ParsedStatement::Engine(_) => {
                return Err(ConnectionError::ProtocolInvariantViolation(
                    "engine statement routed to the connection".to_string(),
                ));
            }
        }
        self.framed
            .feed(BackendMessage::CommandComplete {
                tag: command_complete_tag(tag, 0),
            })
            .await?;
        Ok(())
    }

    /// Sends an engine result: optional RowDescription, DataRows, CommandComplete.
    async fn send_result(
        &mut self,
        tag: &str,
        result: QueryResult,
        formats: &[FormatCode],
        describe: bool,
    ) -> Result<(), ConnectionError> {
        let returns_rows = StatementKind::from_tag(tag).returns_rows();
        let rows = match result {
            QueryResult::Ok(ok) => ok.rows_affected,
            QueryResult::Empty => 0,
            QueryResult::Rows {
                schema,
                rows,
                max_one_row,
            } => {
                if describe && returns_rows {
                    self.framed
                        .feed(BackendMessage::RowDescription {
                            fields: field_descriptions(&schema, formats),
                        })
                        .await?;
                }
                let encoder = RowEncoder::new(&schema, formats, &self.context.oids);
                let encoder = returns_rows.then_some(&encoder);
                let outcome = if max_one_row {
                    spool_single(&mut self.framed, rows, encoder).await?
                } else {
                    spool(&mut self.framed, rows, encoder, self.context.read_timeout).await?
                };
                outcome.row_count(returns_rows)
            }
        };

        self.framed
            .feed(BackendMessage::CommandComplete {
                tag: command_complete_tag(tag, rows),
            })
            .await?;
        Ok(())
    }

    async fn start_copy(&mut self, copy: CopyFromStatement) -> Result<(), ConnectionError> {
        match &copy.source {
            CopySource::Stdin => {
                let loader = self.engine.copy_from(&mut self.session, &copy).await?;
                debug!(table = %copy.table, "waiting for COPY data");
                self.copy = Some(CopyState {
                    statement: copy,
                    loader,
                    pending_error: None,
                });
                self.framed
                    .send(BackendMessage::CopyInResponse {
                        format: FormatCode::Text,
                        column_formats: Vec::new(),
                    })
                    .await?;
            }
            CopySource::File(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    ConnectionError::statement(
                        sql_state::UNDEFINED_FILE,
                        format!(
                            "could not open file \"{}\" for reading: {e}",
                            path.display()
                        ),
                    )
                })?;
                let mut loader = self.engine.copy_from(&mut self.session, &copy).await?;
                let loaded = loader.load_chunk(&data).and_then(|()| loader.finish());
                let results = match loaded {
                    Ok(results) => results,
                    Err(e) => {
                        loader.abort();
                        return Err(e.into());
                    }
                };
                debug!(table = %copy.table, rows = results.rows_loaded, "COPY from file done");
                self.framed
                    .feed(BackendMessage::CommandComplete {
                        tag: command_complete_tag("COPY", results.rows_loaded),
                    })
                    .await?;
            }
        }
        Ok(())
    }

    async fn handle_copy_data(&mut self, data: Bytes) -> Result<Flow, ConnectionError> {
        let Some(copy) = &mut self.copy else {
            return Err(no_copy_in_progress("CopyData"));
        };
        if copy.pending_error.is_some() {
            return Ok(Flow::Continue);
        }
        if let Err(e) = copy.loader.load_chunk(&data) {
            copy.loader.abort();
            if self.state.wait_for_sync {
                self.copy = None;
                return Err(e.into());
            }
            // Report now; the rest of the data and its CopyDone are dropped.
            let info = e.to_error_info();
            warn!(code = %info.code, error = %e, "COPY failed");
            copy.pending_error = Some(info.clone());
            self.framed.send(info.into()).await?;
            return Ok(Flow::EndOfBatch);
        }
        Ok(Flow::Continue)
    }

    async fn handle_copy_done(&mut self) -> Result<Flow, ConnectionError> {
        let Some(mut copy) = self.copy.take() else {
            return Err(no_copy_in_progress("CopyDone"));
        };
        if let Some(info) = copy.pending_error {
            debug!(error = %info.message, "dropping COPY after earlier error");
            return Ok(Flow::Continue);
        }

        let results = match copy.loader.finish() {
            Ok(results) => results,
            Err(e) => {
                copy.loader.abort();
                return Err(e.into());
            }
        };
        debug!(table = %copy.statement.table, rows = results.rows_loaded, "COPY done");
        self.framed
            .feed(BackendMessage::CommandComplete {
                tag: command_complete_tag("COPY", results.rows_loaded),
            })
            .await?;
        Ok(if self.state.wait_for_sync {
            Flow::Continue
        } else {
            Flow::EndOfBatch
        })
    }

    async fn handle_copy_fail(&mut self, message: String) -> Result<Flow, ConnectionError> {
        let Some(mut copy) = self.copy.take() else {
            return Err(no_copy_in_progress("CopyFail"));
        };
        copy.loader.abort();
        if copy.pending_error.is_some() {
            return Ok(Flow::Continue);
        }
        Err(ConnectionError::statement(
            sql_state::QUERY_CANCELED,
            format!("COPY from stdin failed: {message}"),
        ))
    }

    async fn send_ready_for_query(&mut self) -> Result<(), ConnectionError> {
        let status = self.engine.transaction_status(&self.session);
        self.framed
            .send(BackendMessage::ReadyForQuery { status })
            .await?;
        Ok(())
    }
}

/// Fills in the parameter types of a prepared statement.
///
/// Client-supplied OIDs win; a zero OID is taken from the first placeholder
/// occurrence that implies a type. Whatever is still unknown is handled by
/// `policy`.
fn resolve_param_types(
    client: &[Oid],
    placeholders: &[PlaceholderExpr],
    policy: UntypedParamPolicy,
) -> Result<Vec<Oid>, ConnectionError> {
    let count = placeholders
        .iter()
        .map(|p| p.index() + 1)
        .max()
        .unwrap_or(0)
        .max(client.len());

    let mut types = vec![0; count];
    types[..client.len()].copy_from_slice(client);
    for placeholder in placeholders {
        let slot = &mut types[placeholder.index()];
        if *slot == 0 {
            if let Some(oid) = placeholder.type_oid() {
                *slot = oid;
            }
        }
    }

    for (i, ty) in types.iter_mut().enumerate() {
        if *ty != 0 {
            continue;
        }
        match policy {
            UntypedParamPolicy::Text => *ty = oid::TEXT,
            UntypedParamPolicy::Reject => {
                return Err(ConnectionError::statement(
                    sql_state::INDETERMINATE_DATATYPE,
                    format!("could not determine data type of parameter ${}", i + 1),
                ));
            }
        }
    }
    Ok(types)
}

/// Decodes Bind parameter values using the statement's parameter types.
fn decode_params(
    oids: &OidCache,
    param_types: &[Oid],
    msg: &BindMessage,
) -> Result<Vec<Value>, ConnectionError> {
    if msg.params.len() != param_types.len() {
        return Err(ConnectionError::statement(
            sql_state::PROTOCOL_VIOLATION,
            format!(
                "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                msg.params.len(),
                msg.statement_name,
                param_types.len()
            ),
        ));
    }
    let formats = FormatCode::expand(&msg.param_formats, msg.params.len()).ok_or_else(|| {
        ConnectionError::statement(
            sql_state::PROTOCOL_VIOLATION,
            format!(
                "bind message has {} parameter formats but {} parameters",
                msg.param_formats.len(),
                msg.params.len()
            ),
        )
    })?;

    param_types
        .iter()
        .zip(&msg.params)
        .zip(formats)
        .map(|((&type_oid, raw), format)| -> Result<Value, ConnectionError> {
            let ty = PgType::from_oid(type_oid).ok_or(WireError::UnhandledOid(type_oid))?;
            Ok(decode_value(oids, &ty, format, raw.as_deref())?)
        })
        .collect()
}

/// Panics are caught unless the opt-out variable holds a non-empty value.
fn catch_panics(setting: Option<&OsStr>) -> bool {
    setting.is_none_or(|v| v.is_empty())
}

fn statement_not_found(name: &str) -> ConnectionError {
    ConnectionError::statement(
        sql_state::INVALID_SQL_STATEMENT_NAME,
        format!("prepared statement \"{name}\" does not exist"),
    )
}

fn portal_not_found(name: &str) -> ConnectionError {
    ConnectionError::statement(
        sql_state::INVALID_CURSOR_NAME,
        format!("portal \"{name}\" does not exist"),
    )
}

fn no_copy_in_progress(message: &str) -> ConnectionError {
    ConnectionError::statement(
        sql_state::PROTOCOL_VIOLATION,
        format!("{message} received with no COPY in progress"),
    )
}

fn message_name(message: &FrontendMessage) -> &'static str {
    match message {
        FrontendMessage::Query(_) => "Query",
        FrontendMessage::Parse(_) => "Parse",
        FrontendMessage::Bind(_) => "Bind",
        FrontendMessage::Describe(_) => "Describe",
        FrontendMessage::Execute(_) => "Execute",
        FrontendMessage::Close(_) => "Close",
        FrontendMessage::Sync => "Sync",
        FrontendMessage::Flush => "Flush",
        FrontendMessage::Terminate => "Terminate",
        FrontendMessage::CopyData(_) => "CopyData",
        FrontendMessage::CopyDone => "CopyDone",
        FrontendMessage::CopyFail(_) => "CopyFail",
        FrontendMessage::Password(_) => "Password",
    }
}
