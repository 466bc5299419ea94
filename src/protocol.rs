//! PostgreSQL wire protocol implementation.
//!
//! This module implements the framing layer of the PostgreSQL v3.0 wire
//! protocol: startup packets, the simple and extended query message sets,
//! COPY FROM STDIN and the SASL authentication exchange.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                           +----------+
//! |  Client  |  --- FrontendMessage -->  |  Server  |
//! |  (psql)  |  <-- BackendMessage  ---  | (masque) |
//! +----------+                           +----------+
//!               ^                   ^
//!               | StartupCodec ->   |
//!               |   PostgresCodec   |
//!               +-------------------+
//! ```
//!
//! ## Terminology
//!
//! - **FrontendMessage**: Messages from client to server (Query, Parse, Bind, etc.)
//! - **StartupMessage**: Special frontend messages for connection handshake (SSL, Startup, Cancel)
//! - **BackendMessage**: Messages from server to client (RowDescription, DataRow, etc.)
//! - **Codec**: Framing and serialization for the wire protocol

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod types;

pub use backend::{
    BackendMessage, ErrorField, ErrorInfo, FieldDescription, Severity, TransactionStatus,
};
pub use codec::{DEFAULT_MAX_MESSAGE_SIZE, PostgresCodec, StartupCodec};
pub use error::ProtocolError;
pub use frontend::{
    BindMessage, CloseMessage, DescribeMessage, ExecuteMessage, FrontendMessage, ParseMessage,
    StartupMessage, StartupParameters, Target,
};
pub use types::{ErrorFieldCode, FormatCode, sql_state};
