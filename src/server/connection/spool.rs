//! Writes a result stream to the client as DataRow messages.
//!
//! Rows are pulled from the engine on a separate task and handed over
//! through a bounded channel, so a slow engine and a slow client do not
//! block each other beyond the channel capacity.

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::{Column, EngineError, ResultRow, RowStream};
use crate::protocol::{BackendMessage, FormatCode, ProtocolError};
use crate::server::connection::error::{ConnectionError, panic_message};
use crate::wire::{OidCache, Value, encode_value};

const ROW_CHANNEL_CAPACITY: usize = 512;
const FLUSH_BATCH: usize = 128;
/// How often an unbounded wait wakes up to log that it is still waiting.
const WATCHDOG_TICK: Duration = Duration::from_secs(60);

/// What a result stream produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpoolOutcome {
    pub data_rows: u64,
    /// Set when the stream yielded an OK result instead of values.
    pub ok_affected: Option<u64>,
}

impl SpoolOutcome {
    /// The count reported in CommandComplete.
    pub fn row_count(&self, returns_rows: bool) -> u64 {
        if returns_rows {
            self.data_rows
        } else {
            self.ok_affected.unwrap_or(self.data_rows)
        }
    }
}

/// Turns result values into DataRow messages.
pub struct RowEncoder<'a> {
    schema: &'a [Column],
    formats: &'a [FormatCode],
    oids: &'a OidCache,
}

impl<'a> RowEncoder<'a> {
    pub fn new(schema: &'a [Column], formats: &'a [FormatCode], oids: &'a OidCache) -> Self {
        Self {
            schema,
            formats,
            oids,
        }
    }

    pub fn data_row(&self, values: &[Value]) -> Result<BackendMessage, ConnectionError> {
        if values.len() != self.schema.len() {
            return Err(ConnectionError::ProtocolInvariantViolation(format!(
                "row has {} values but the result has {} columns",
                values.len(),
                self.schema.len()
            )));
        }
        let values = self
            .schema
            .iter()
            .zip(values)
            .enumerate()
            .map(|(i, (column, value))| {
                let format = self.formats.get(i).copied().unwrap_or_default();
                encode_value(self.oids, &column.ty, format, value)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BackendMessage::DataRow { values })
    }
}

/// Accumulates one result, feeding DataRows to the sink as they arrive.
struct Spooler<'a, 'e, S> {
    sink: &'a mut S,
    /// `None` drains the stream without sending rows.
    encoder: Option<&'a RowEncoder<'e>>,
    outcome: SpoolOutcome,
    unflushed: usize,
}

impl<S> Spooler<'_, '_, S>
where
    S: Sink<BackendMessage, Error = ProtocolError> + Unpin,
{
    async fn accept(&mut self, row: ResultRow) -> Result<(), ConnectionError> {
        match row {
            ResultRow::Values(values) => {
                if self.outcome.ok_affected.is_some() {
                    return Err(mixed_result());
                }
                self.outcome.data_rows += 1;
                if let Some(encoder) = self.encoder {
                    self.sink.feed(encoder.data_row(&values)?).await?;
                    self.unflushed += 1;
                    if self.unflushed >= FLUSH_BATCH {
                        self.flush().await?;
                    }
                }
            }
            ResultRow::Ok(ok) => {
                if self.outcome.data_rows > 0 || self.outcome.ok_affected.is_some() {
                    return Err(mixed_result());
                }
                self.outcome.ok_affected = Some(ok.rows_affected);
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.unflushed > 0 {
            self.sink.flush().await?;
            self.unflushed = 0;
        }
        Ok(())
    }
}

fn mixed_result() -> ConnectionError {
    ConnectionError::ProtocolInvariantViolation(
        "result stream mixed an OK result with row values".to_string(),
    )
}

/// Streams every row of `rows` to the sink.
///
/// A producer task drains the engine stream into a channel while this
/// task encodes and flushes. With `read_timeout` set, waiting longer than
/// that for the next row fails the query.
pub async fn spool<S>(
    sink: &mut S,
    rows: RowStream,
    encoder: Option<&RowEncoder<'_>>,
    read_timeout: Option<Duration>,
) -> Result<SpoolOutcome, ConnectionError>
where
    S: Sink<BackendMessage, Error = ProtocolError> + Unpin,
{
    let (tx, mut rx) = mpsc::channel::<Result<ResultRow, EngineError>>(ROW_CHANNEL_CAPACITY);
    let producer = tokio::spawn(async move {
        let mut rows = rows;
        while let Some(item) = rows.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    });

    let mut spooler = Spooler {
        sink,
        encoder,
        outcome: SpoolOutcome::default(),
        unflushed: 0,
    };
    let consumed = consume(&mut spooler, &mut rx, read_timeout).await;
    if let Err(e) = consumed {
        producer.abort();
        return Err(e);
    }

    match producer.await {
        Ok(()) => Ok(spooler.outcome),
        Err(e) if e.is_panic() => Err(ConnectionError::Panic(panic_message(e.into_panic()))),
        Err(e) => Err(ConnectionError::Panic(e.to_string())),
    }
}

async fn consume<S>(
    spooler: &mut Spooler<'_, '_, S>,
    rx: &mut mpsc::Receiver<Result<ResultRow, EngineError>>,
    read_timeout: Option<Duration>,
) -> Result<(), ConnectionError>
where
    S: Sink<BackendMessage, Error = ProtocolError> + Unpin,
{
    let tick = read_timeout.unwrap_or(WATCHDOG_TICK);
    loop {
        // Rows already encoded reach the client before we block.
        if rx.is_empty() {
            spooler.flush().await?;
        }
        let item = match tokio::time::timeout(tick, rx.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(_) if read_timeout.is_some() => return Err(ConnectionError::RowReadTimeout),
            Err(_) => {
                debug!(rows = spooler.outcome.data_rows, "still waiting for the next row");
                continue;
            }
        };
        spooler.accept(item?).await?;
    }
    spooler.flush().await
}

/// Reads a result that promises at most one row, without a producer task.
pub async fn spool_single<S>(
    sink: &mut S,
    mut rows: RowStream,
    encoder: Option<&RowEncoder<'_>>,
) -> Result<SpoolOutcome, ConnectionError>
where
    S: Sink<BackendMessage, Error = ProtocolError> + Unpin,
{
    let mut spooler = Spooler {
        sink,
        encoder,
        outcome: SpoolOutcome::default(),
        unflushed: 0,
    };
    if let Some(first) = rows.next().await {
        let first = first?;
        if rows.next().await.is_some() {
            return Err(ConnectionError::ProtocolInvariantViolation(
                "result max1Row iterator returned more than one row".to_string(),
            ));
        }
        spooler.accept(first).await?;
    }
    spooler.flush().await?;
    Ok(spooler.outcome)
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use bytes::Bytes;
    use futures_util::stream;

    use super::*;
    use crate::engine::OkResult;
    use crate::wire::{BaseType, PgType};

    fn collecting_sink() -> impl Sink<BackendMessage, Error = ProtocolError> + Unpin {
        Vec::new().sink_map_err(|e: Infallible| -> ProtocolError { match e {} })
    }

    fn int_rows(n: i32) -> RowStream {
        stream::iter((0..n).map(|i| Ok(ResultRow::Values(vec![Value::Int32(i)])))).boxed()
    }

    fn schema() -> Vec<Column> {
        vec![Column::new("n", PgType::base(BaseType::Int4))]
    }

    #[tokio::test]
    async fn test_spool_streams_all_rows() {
        let oids = OidCache::new();
        let schema = schema();
        let encoder = RowEncoder::new(&schema, &[FormatCode::Text], &oids);
        let mut sink = Vec::new().sink_map_err(|e: Infallible| -> ProtocolError { match e {} });

        let outcome = spool(&mut sink, int_rows(300), Some(&encoder), None)
            .await
            .unwrap();
        assert_eq!(outcome.data_rows, 300);
        assert_eq!(outcome.row_count(true), 300);

        let sent = sink.get_ref();
        assert_eq!(sent.len(), 300);
        match &sent[299] {
            BackendMessage::DataRow { values } => {
                assert_eq!(values, &vec![Some(Bytes::from_static(b"299"))]);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spool_without_encoder_only_counts() {
        let mut sink = Vec::new().sink_map_err(|e: Infallible| -> ProtocolError { match e {} });
        let outcome = spool(&mut sink, int_rows(5), None, None).await.unwrap();
        assert_eq!(outcome.data_rows, 5);
        assert!(sink.get_ref().is_empty());
    }

    #[tokio::test]
    async fn test_spool_ok_result() {
        let rows = stream::iter([Ok(ResultRow::Ok(OkResult { rows_affected: 3 }))]).boxed();
        let outcome = spool(&mut collecting_sink(), rows, None, None).await.unwrap();
        assert_eq!(outcome.ok_affected, Some(3));
        assert_eq!(outcome.row_count(false), 3);
        assert_eq!(outcome.row_count(true), 0);
    }

    #[tokio::test]
    async fn test_spool_rejects_mixed_results() {
        let rows = stream::iter([
            Ok(ResultRow::Values(vec![Value::Int32(1)])),
            Ok(ResultRow::Ok(OkResult { rows_affected: 1 })),
        ])
        .boxed();
        let err = spool(&mut collecting_sink(), rows, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::ProtocolInvariantViolation(_)));
    }

    #[tokio::test]
    async fn test_spool_propagates_engine_error() {
        let rows = stream::iter([
            Ok(ResultRow::Values(vec![Value::Int32(1)])),
            Err(EngineError::new("disk on fire")),
        ])
        .boxed();
        let err = spool(&mut collecting_sink(), rows, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_error_info().message, "disk on fire");
    }

    #[tokio::test]
    async fn test_spool_read_timeout() {
        let rows = stream::pending().boxed();
        let err = spool(
            &mut collecting_sink(),
            rows,
            None,
            Some(Duration::from_millis(20)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ConnectionError::RowReadTimeout));
    }

    #[tokio::test]
    async fn test_spool_reports_producer_panic() {
        let rows = stream::poll_fn(|_| -> std::task::Poll<Option<Result<ResultRow, EngineError>>> {
            panic!("engine exploded")
        })
        .boxed();
        let err = spool(&mut collecting_sink(), rows, None, None)
            .await
            .unwrap_err();
        match err {
            ConnectionError::Panic(message) => assert_eq!(message, "engine exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spool_single() {
        let oids = OidCache::new();
        let schema = schema();
        let encoder = RowEncoder::new(&schema, &[FormatCode::Binary], &oids);
        let mut sink = Vec::new().sink_map_err(|e: Infallible| -> ProtocolError { match e {} });

        let outcome = spool_single(&mut sink, int_rows(1), Some(&encoder))
            .await
            .unwrap();
        assert_eq!(outcome.data_rows, 1);
        assert_eq!(sink.get_ref().len(), 1);

        let err = spool_single(&mut collecting_sink(), int_rows(2), None)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "result max1Row iterator returned more than one row"
        );
    }

    #[test]
    fn test_row_encoder_checks_width() {
        let oids = OidCache::new();
        let schema = schema();
        let encoder = RowEncoder::new(&schema, &[], &oids);
        assert!(encoder.data_row(&[Value::Int32(1), Value::Int32(2)]).is_err());
        assert!(matches!(
            encoder.data_row(&[Value::Null]).unwrap(),
            BackendMessage::DataRow { values } if values == vec![None]
        ));
    }
}
