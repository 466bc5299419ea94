use thiserror::Error;

use crate::protocol::{ErrorInfo, sql_state};

/// Authentication failures. Every variant ends the connection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("SASL mechanism not supported: {0}")]
    UnsupportedMechanism(String),
    #[error("invalid SCRAM client-first message: {0}")]
    MalformedClientFirst(&'static str),
    #[error("invalid SCRAM client-final message: {0}")]
    MalformedClientFinal(&'static str),
    #[error("password authentication failed for user \"{0}\"")]
    Failed(String),
    #[error("unexpected message during authentication")]
    UnexpectedMessage,
    #[error("HMAC key initialization failed")]
    Crypto,
}

impl AuthError {
    /// The FATAL response sent before the connection is closed.
    pub fn to_error_info(&self) -> ErrorInfo {
        let code = match self {
            AuthError::Failed(_) => sql_state::INVALID_PASSWORD,
            AuthError::UnexpectedMessage => sql_state::PROTOCOL_VIOLATION,
            _ => sql_state::INTERNAL_ERROR,
        };
        ErrorInfo::fatal(code, self.to_string())
    }
}
