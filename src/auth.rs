//! Password authentication run once per connection, between the startup
//! packet and the first ReadyForQuery.
//!
//! ## Terminology
//!
//! - **CredentialStore**: users allowed to log in and their SCRAM secrets
//! - **ScramExchange**: the server side of one SCRAM-SHA-256 conversation

pub mod credentials;
pub mod error;
pub mod scram;

use serde::Deserialize;

pub use credentials::{CredentialStore, ScramSecret};
pub use error::AuthError;
pub use scram::{SCRAM_SHA_256, ScramExchange};

/// How clients prove who they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMethod {
    /// Every user is accepted without a password.
    Trust,
    #[serde(rename = "scram-sha-256")]
    ScramSha256,
}
