use std::any::Any;

use thiserror::Error;

use crate::auth::AuthError;
use crate::copy::CopyError;
use crate::engine::EngineError;
use crate::engine::error::wire_error_info;
use crate::protocol::{ErrorInfo, ProtocolError, sql_state};
use crate::wire::WireError;

/// Connection error types.
///
/// Fatal variants end the connection; every other variant is reported to
/// the client as an ErrorResponse and the connection carries on.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("TLS handshake failed: {0}")]
    Tls(std::io::Error),

    /// A statement error with a ready-made response.
    #[error("{}", .0.message)]
    Statement(ErrorInfo),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Copy(#[from] CopyError),

    /// The engine broke the result stream contract.
    #[error("{0}")]
    ProtocolInvariantViolation(String),

    #[error("row read wait bigger than connection timeout")]
    RowReadTimeout,

    #[error("panic while handling message: {0}")]
    Panic(String),
}

impl ConnectionError {
    /// Builds a statement error with an explicit SQLSTATE.
    pub fn statement(code: &str, message: impl Into<String>) -> Self {
        ConnectionError::Statement(ErrorInfo::new(code, message))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Io(_)
                | ConnectionError::Protocol(_)
                | ConnectionError::Auth(_)
                | ConnectionError::Tls(_)
        )
    }

    /// Converts this error into a protocol [`ErrorInfo`] with an appropriate SQL state code.
    pub fn to_error_info(&self) -> ErrorInfo {
        match self {
            ConnectionError::Statement(info) => info.clone(),
            ConnectionError::Engine(e) => e.to_error_info(),
            ConnectionError::Wire(e) => wire_error_info(e),
            ConnectionError::Copy(e) => e.to_error_info(),
            ConnectionError::Auth(e) => e.to_error_info(),
            ConnectionError::Protocol(_) => {
                ErrorInfo::fatal(sql_state::PROTOCOL_VIOLATION, self.to_string())
            }
            _ => ErrorInfo::internal(self.to_string()),
        }
    }
}

/// Extracts the message of a caught panic.
pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Severity;

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(format!("code {}", 7))), "code 7");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic");
    }

    #[test]
    fn test_fatal_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert!(ConnectionError::Io(io).is_fatal());
        assert!(ConnectionError::Protocol(ProtocolError::UnknownMessageType(b'?')).is_fatal());
        assert!(!ConnectionError::RowReadTimeout.is_fatal());
        assert!(!ConnectionError::Engine(EngineError::new("boom")).is_fatal());
    }

    #[test]
    fn test_statement_errors_keep_their_code() {
        let err = ConnectionError::statement(
            sql_state::INVALID_SQL_STATEMENT_NAME,
            "prepared statement \"s\" does not exist",
        );
        let info = err.to_error_info();
        assert_eq!(info.code, "26000");
        assert_eq!(info.severity, Severity::Error);

        let info = ConnectionError::Engine(EngineError::TableNotFound("t".to_string()))
            .to_error_info();
        assert_eq!(info.code, sql_state::UNDEFINED_TABLE);
    }

    #[test]
    fn test_default_code_is_internal_error() {
        let info = ConnectionError::RowReadTimeout.to_error_info();
        assert_eq!(info.code, sql_state::INTERNAL_ERROR);
        assert_eq!(info.message, "row read wait bigger than connection timeout");

        let info = ConnectionError::ProtocolInvariantViolation("mixed".to_string()).to_error_info();
        assert_eq!(info.code, sql_state::INTERNAL_ERROR);
    }
}
