use std::string::FromUtf8Error;

use thiserror::Error;

/// Protocol parsing errors. All of them are fatal to the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message")]
    InvalidMessage,
    #[error("message length {0} exceeds the maximum allowed size")]
    MessageTooLarge(usize),
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(i32),
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid UTF-8")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),
    #[error("invalid format code: {0}")]
    InvalidFormatCode(i16),
    #[error("invalid describe/close target: 0x{0:02x}")]
    InvalidTarget(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
