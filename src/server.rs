//! TCP server for PostgreSQL-compatible connections.
//!
//! This module provides the network layer that accepts client connections
//! and manages their lifecycle using the PostgreSQL wire protocol.
//!
//! ## Architecture
//!
//! ```text
//! +--------+
//! | Server |  <- Accepts TCP connections, one task each
//! +--------+
//!      |
//!      v
//! +-----------+
//! | Handshake |  <- SSL negotiation, startup packet, authentication
//! +-----------+
//!      |
//!      v
//! +------------+     +--------+
//! | Connection | --> | Engine |  <- Simple and extended query, COPY
//! +------------+     +--------+
//! ```
//!
//! ## Terminology
//!
//! - **Server**: TCP listener that spawns connections
//! - **ServerContext**: Configuration and counters shared by all connections
//! - **Handshake**: SSL negotiation and startup parameter exchange
//! - **Connection**: Per-client session handling query execution
//! - **Portal**: A prepared statement bound to parameter values

pub mod connection;
pub mod handshake;
pub mod listener;
pub mod stream;

pub use connection::{Connection, ConnectionError};
pub use listener::{Server, ServerContext};
