//! SCRAM-SHA-256 (RFC 5802, RFC 7677) server side.
//!
//! ```text
//!   client                                   server
//!     | SASLInitialResponse  n,,n=,r=<c>       |
//!     | -------------------------------------> |  AwaitInitialResponse
//!     |        SASLContinue  r=<c><s>,s=,i=    |
//!     | <------------------------------------- |
//!     | SASLResponse  c=biws,r=<c><s>,p=proof  |
//!     | -------------------------------------> |  AwaitResponse
//!     |           SASLFinal  v=signature       |
//!     | <------------------------------------- |  Done
//! ```

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::BytesMut;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::auth::credentials::{SCRAM_ITERATIONS, ScramSecret, decoy_salt, hmac_sha256};
use crate::auth::error::AuthError;
use crate::protocol::frontend::{read_cstring, read_value};

/// The only mechanism offered.
pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

const SERVER_NONCE_LEN: usize = 16;

/// The gs2-cbind-flag of the client-first-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelBinding {
    /// `n`: the client does not support channel binding.
    NotSupported,
    /// `y`: the client supports it but thinks the server does not.
    ServerNotSupported,
    /// `p=<name>`: the client requires the named binding type.
    Required(String),
}

/// A parsed client-first-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFirst {
    pub binding: ChannelBinding,
    pub authzid: Option<String>,
    /// The `n=` attribute. Postgres ignores it in favor of the startup user.
    pub username: String,
    pub nonce: String,
    gs2_header: String,
    bare: String,
}

/// Splits `k=value` and returns the key byte, rejecting attributes shorter than `min_len`.
fn split_attribute(attr: &str, min_len: usize) -> Option<(u8, &str)> {
    let bytes = attr.as_bytes();
    if bytes.len() < min_len.max(2) || bytes[1] != b'=' {
        return None;
    }
    attr.get(2..).map(|value| (bytes[0], value))
}

impl ClientFirst {
    pub fn parse(data: &str) -> Result<Self, AuthError> {
        let malformed = AuthError::MalformedClientFirst;
        let sections: Vec<&str> = data.split(',').collect();
        if sections.len() < 3 {
            return Err(malformed("too few sections"));
        }

        let flag = sections[0];
        let binding = match flag.as_bytes().first() {
            Some(b'n') if flag.len() == 1 => ChannelBinding::NotSupported,
            Some(b'y') if flag.len() == 1 => ChannelBinding::ServerNotSupported,
            Some(b'p') => match split_attribute(flag, 3) {
                Some((_, name)) => ChannelBinding::Required(name.to_string()),
                None => return Err(malformed("malformed channel binding flag")),
            },
            _ => return Err(malformed("malformed channel binding flag")),
        };

        let authzid = match sections[1] {
            "" => None,
            raw => match split_attribute(raw, 3) {
                Some((b'a', id)) => Some(id.to_string()),
                _ => return Err(malformed("malformed authzid")),
            },
        };

        let mut username = String::new();
        let mut nonce = String::new();
        for attr in &sections[2..] {
            let Some((key, value)) = split_attribute(attr, 2) else {
                return Err(malformed("malformed attribute"));
            };
            match key {
                b'c' => {}
                b'n' => username = value.to_string(),
                b'r' => nonce = value.to_string(),
                _ => return Err(malformed("unknown attribute")),
            }
        }
        if nonce.is_empty() {
            return Err(malformed("missing nonce"));
        }

        let gs2_header = format!("{},{},", sections[0], sections[1]);
        let bare = data[gs2_header.len()..].to_string();
        Ok(Self {
            binding,
            authzid,
            username,
            nonce,
            gs2_header,
            bare,
        })
    }

    /// The value the client must echo back in the `c=` attribute.
    pub fn encoded_gs2_header(&self) -> String {
        BASE64.encode(&self.gs2_header)
    }

    /// client-first-message-bare: the message without its GS2 header.
    pub fn bare(&self) -> &str {
        &self.bare
    }
}

/// The server-first-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFirst {
    /// Client nonce followed by the server's own nonce.
    pub nonce: String,
    /// Base64 encoded salt.
    pub salt: String,
    pub iterations: u32,
}

impl fmt::Display for ServerFirst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r={},s={},i={}", self.nonce, self.salt, self.iterations)
    }
}

/// A parsed client-final-message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFinal {
    /// Base64 encoded ClientProof.
    pub proof: String,
    without_proof: String,
}

impl ClientFinal {
    /// Parses the message, checking `c=` and `r=` against what the exchange
    /// expects as soon as each attribute is seen.
    pub fn parse(data: &str, expected_binding: &str, expected_nonce: &str) -> Result<Self, AuthError> {
        let malformed = AuthError::MalformedClientFinal;
        let mut binding = None;
        let mut nonce = None;
        let mut proof = None;

        for attr in data.split(',') {
            let Some((key, value)) = split_attribute(attr, 3) else {
                return Err(malformed("attribute too short"));
            };
            match key {
                b'c' => {
                    if value != expected_binding {
                        return Err(malformed("inconsistent channel binding"));
                    }
                    binding = Some(value);
                }
                b'r' => {
                    if value != expected_nonce {
                        return Err(malformed("nonce does not match authentication session"));
                    }
                    nonce = Some(value);
                }
                b'p' => proof = Some(value),
                _ => return Err(malformed("unknown attribute")),
            }
        }

        if binding.is_none() {
            return Err(malformed("missing channel binding"));
        }
        if nonce.is_none() {
            return Err(malformed("missing nonce"));
        }
        let Some(proof) = proof else {
            return Err(malformed("missing proof"));
        };

        let without_proof = data.rfind(",p=").map_or(data, |i| &data[..i]);
        Ok(Self {
            proof: proof.to_string(),
            without_proof: without_proof.to_string(),
        })
    }

    /// client-final-message-without-proof.
    pub fn without_proof(&self) -> &str {
        &self.without_proof
    }
}

#[derive(Debug)]
enum State {
    AwaitInitialResponse,
    AwaitResponse {
        client_first: ClientFirst,
        server_first: ServerFirst,
    },
    Done,
}

/// One SCRAM-SHA-256 exchange for a single login attempt.
///
/// Users without a secret still get a full exchange with a decoy salt;
/// the proof check then fails like a wrong password would.
#[derive(Debug)]
pub struct ScramExchange {
    user: String,
    secret: Option<ScramSecret>,
    state: State,
}

impl ScramExchange {
    pub fn new(user: impl Into<String>, secret: Option<ScramSecret>) -> Self {
        Self {
            user: user.into(),
            secret,
            state: State::AwaitInitialResponse,
        }
    }

    /// Mechanisms for the AuthenticationSASL message.
    pub fn mechanisms() -> Vec<String> {
        vec![SCRAM_SHA_256.to_string()]
    }

    /// Handles the SASLInitialResponse payload and returns the server-first-message.
    pub fn initial_response(&mut self, payload: &[u8]) -> Result<String, AuthError> {
        let server_nonce: [u8; SERVER_NONCE_LEN] = rand::random();
        self.start(payload, &BASE64.encode(server_nonce))
    }

    fn start(&mut self, payload: &[u8], server_nonce: &str) -> Result<String, AuthError> {
        if !matches!(self.state, State::AwaitInitialResponse) {
            return Err(AuthError::UnexpectedMessage);
        }
        self.state = State::Done;

        let data = parse_initial_response(payload)?;
        let client_first = ClientFirst::parse(&data)?;
        debug!(
            user = %self.user,
            binding = ?client_first.binding,
            authzid = ?client_first.authzid,
            "SCRAM client-first"
        );
        if !client_first.username.is_empty() && client_first.username != self.user {
            // The startup user is the one authenticated.
            debug!(scram_user = %client_first.username, "ignoring SCRAM user name");
        }

        let (salt, iterations) = match &self.secret {
            Some(secret) => (secret.salt.clone(), secret.iterations),
            None => (decoy_salt(&self.user), SCRAM_ITERATIONS),
        };
        let server_first = ServerFirst {
            nonce: format!("{}{}", client_first.nonce, server_nonce),
            salt: BASE64.encode(salt),
            iterations,
        };
        let message = server_first.to_string();
        self.state = State::AwaitResponse {
            client_first,
            server_first,
        };
        Ok(message)
    }

    /// Handles the SASLResponse payload and returns the server-final-message.
    pub fn response(&mut self, payload: &[u8]) -> Result<String, AuthError> {
        let State::AwaitResponse {
            client_first,
            server_first,
        } = std::mem::replace(&mut self.state, State::Done)
        else {
            return Err(AuthError::UnexpectedMessage);
        };

        let data = std::str::from_utf8(payload)
            .map_err(|_| AuthError::MalformedClientFinal("invalid UTF-8"))?;
        let client_final = ClientFinal::parse(
            data,
            &client_first.encoded_gs2_header(),
            &server_first.nonce,
        )?;

        let auth_message = format!(
            "{},{},{}",
            client_first.bare(),
            server_first,
            client_final.without_proof()
        );
        let signature = self.verify_proof(&auth_message, &client_final.proof)?;
        Ok(format!("v={}", BASE64.encode(signature)))
    }

    /// Checks the client proof and returns the ServerSignature.
    fn verify_proof(&self, auth_message: &str, proof: &str) -> Result<[u8; 32], AuthError> {
        let failed = || AuthError::Failed(self.user.clone());
        let Some(secret) = &self.secret else {
            return Err(failed());
        };
        let proof = BASE64.decode(proof).map_err(|_| failed())?;

        let client_signature = hmac_sha256(&secret.stored_key, auth_message.as_bytes())?;
        if proof.len() != client_signature.len() {
            return Err(failed());
        }
        let client_key: Vec<u8> = client_signature
            .iter()
            .zip(&proof)
            .map(|(a, b)| a ^ b)
            .collect();
        if !constant_time_eq(Sha256::digest(&client_key).as_slice(), &secret.stored_key) {
            return Err(failed());
        }

        hmac_sha256(&secret.server_key, auth_message.as_bytes())
    }
}

/// Compares two byte strings without stopping at the first difference.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Splits a SASLInitialResponse into its mechanism check and message text.
fn parse_initial_response(payload: &[u8]) -> Result<String, AuthError> {
    let malformed = AuthError::MalformedClientFirst;
    let mut buf = BytesMut::from(payload);
    let mechanism = read_cstring(&mut buf).map_err(|_| malformed("missing mechanism"))?;
    if mechanism != SCRAM_SHA_256 {
        return Err(AuthError::UnsupportedMechanism(mechanism));
    }
    let data = read_value(&mut buf)
        .map_err(|_| malformed("truncated message"))?
        .unwrap_or_default();
    String::from_utf8(data.to_vec()).map_err(|_| malformed("invalid UTF-8"))
}
