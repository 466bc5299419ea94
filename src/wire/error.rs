//! Wire codec errors.

use thiserror::Error;

use crate::wire::types::Oid;

#[derive(Debug, Error, PartialEq)]
pub enum WireError {
    #[error("insufficient data left in message: need {needed} bytes, {remaining} remaining")]
    ShortBuffer { needed: usize, remaining: usize },

    #[error("invalid length {0} in binary value")]
    InvalidLength(i32),

    #[error("arrays with {0} dimensions are not yet supported using the binary format")]
    UnsupportedDimensions(i32),

    #[error("value of kind {value} cannot be encoded as type \"{type_name}\"")]
    TypeMismatch {
        type_name: String,
        value: &'static str,
    },

    #[error("invalid {type_name} value: {message}")]
    InvalidValue { type_name: String, message: String },

    #[error("invalid input syntax for type {type_name}: \"{input}\"")]
    InvalidText { type_name: String, input: String },

    #[error("unhandled oid type: {0}")]
    UnhandledOid(Oid),

    #[error("value out of range for type {0}")]
    OutOfRange(String),

    #[error("{type_name} field value out of range: \"{input}\"")]
    FieldOutOfRange { type_name: String, input: String },
}

impl WireError {
    pub(crate) fn invalid(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        WireError::InvalidValue {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn text(type_name: impl Into<String>, input: impl Into<String>) -> Self {
        WireError::InvalidText {
            type_name: type_name.into(),
            input: input.into(),
        }
    }
}
