//! Engine-level errors.

use thiserror::Error;

use crate::protocol::{ErrorInfo, sql_state};
use crate::wire::WireError;

/// Errors that can occur during engine operations.
///
/// Every variant is a statement error: the connection reports it and
/// carries on.
#[derive(Debug, Error, PartialEq)]
pub enum EngineError {
    /// SQL the engine cannot parse.
    #[error("{0}")]
    Syntax(String),

    #[error("relation \"{0}\" does not exist")]
    TableNotFound(String),

    #[error("relation \"{0}\" already exists")]
    TableAlreadyExists(String),

    #[error("column \"{0}\" does not exist")]
    ColumnNotFound(String),

    #[error("type \"{0}\" does not exist")]
    TypeNotFound(String),

    #[error("database \"{0}\" does not exist")]
    UnknownDatabase(String),

    #[error("unrecognized configuration parameter \"{0}\"")]
    UnknownParameter(String),

    /// The current transaction is aborted; commands are ignored until ROLLBACK.
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    TransactionAborted,

    #[error("{0}")]
    Unsupported(String),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// Any other failure, optionally tagged with the SQLSTATE to report.
    #[error("{message}")]
    Other {
        code: Option<String>,
        message: String,
    },
}

impl EngineError {
    /// An error reported with the internal-error SQLSTATE.
    pub fn new(message: impl Into<String>) -> Self {
        EngineError::Other {
            code: None,
            message: message.into(),
        }
    }

    /// An error reported with an explicit SQLSTATE.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Other {
            code: Some(code.into()),
            message: message.into(),
        }
    }

    /// Converts this error into a protocol [`ErrorInfo`] with an appropriate SQL state code.
    pub fn to_error_info(&self) -> ErrorInfo {
        let code = match self {
            EngineError::Syntax(_) => sql_state::SYNTAX_ERROR,
            EngineError::TableNotFound(_) => sql_state::UNDEFINED_TABLE,
            EngineError::TableAlreadyExists(_) => sql_state::DUPLICATE_TABLE,
            EngineError::ColumnNotFound(_) => sql_state::UNDEFINED_COLUMN,
            EngineError::TypeNotFound(_) | EngineError::UnknownParameter(_) => {
                sql_state::UNDEFINED_OBJECT
            }
            EngineError::UnknownDatabase(_) => sql_state::INVALID_CATALOG_NAME,
            EngineError::TransactionAborted => sql_state::IN_FAILED_SQL_TRANSACTION,
            EngineError::Unsupported(_) => sql_state::FEATURE_NOT_SUPPORTED,
            EngineError::Wire(e) => return wire_error_info(e),
            EngineError::Other {
                code: Some(code), ..
            } => return ErrorInfo::new(code, self.to_string()),
            EngineError::Other { code: None, .. } => sql_state::INTERNAL_ERROR,
        };
        ErrorInfo::new(code, self.to_string())
    }
}

/// SQLSTATE for a value that failed to encode, decode or convert.
pub(crate) fn wire_error_info(err: &WireError) -> ErrorInfo {
    let code = match err {
        WireError::InvalidText { .. } => sql_state::INVALID_TEXT_REPRESENTATION,
        WireError::OutOfRange(_) => sql_state::NUMERIC_VALUE_OUT_OF_RANGE,
        WireError::FieldOutOfRange { .. } => sql_state::DATETIME_FIELD_OVERFLOW,
        WireError::TypeMismatch { .. } => sql_state::DATATYPE_MISMATCH,
        _ => sql_state::INTERNAL_ERROR,
    };
    ErrorInfo::new(code, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_error_info_table_not_found() {
        let info = EngineError::TableNotFound("foo".to_string()).to_error_info();
        assert_eq!(info.code, sql_state::UNDEFINED_TABLE);
        assert_eq!(info.message, "relation \"foo\" does not exist");
    }

    #[test]
    fn test_to_error_info_transaction_aborted() {
        let info = EngineError::TransactionAborted.to_error_info();
        assert_eq!(info.code, sql_state::IN_FAILED_SQL_TRANSACTION);
    }

    #[test]
    fn test_to_error_info_carried_code() {
        let info = EngineError::with_code("23505", "duplicate key").to_error_info();
        assert_eq!(info.code, "23505");
        assert_eq!(info.message, "duplicate key");

        let info = EngineError::new("boom").to_error_info();
        assert_eq!(info.code, sql_state::INTERNAL_ERROR);
    }

    #[test]
    fn test_wire_error_info_field_overflow() {
        let info = wire_error_info(&WireError::FieldOutOfRange {
            type_name: "interval".to_string(),
            input: "2147483647 days 1 day".to_string(),
        });
        assert_eq!(info.code, sql_state::DATETIME_FIELD_OVERFLOW);
        assert_eq!(
            info.message,
            "interval field value out of range: \"2147483647 days 1 day\""
        );
    }

    #[test]
    fn test_to_error_info_wire_error() {
        let err = EngineError::from(WireError::text("integer", "abc"));
        let info = err.to_error_info();
        assert_eq!(info.code, sql_state::INVALID_TEXT_REPRESENTATION);
        assert_eq!(info.message, "invalid input syntax for type integer: \"abc\"");
    }
}
