use std::collections::HashMap;

use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac_array;
use sha2::{Digest, Sha256};

use crate::auth::error::AuthError;

/// Iteration count used for every derived secret.
pub const SCRAM_ITERATIONS: u32 = 4096;

const SALT_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

pub(crate) fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], AuthError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| AuthError::Crypto)?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// The server-side half of a SCRAM-SHA-256 password: what is needed to
/// verify a client proof without keeping the password itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ScramSecret {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub stored_key: [u8; 32],
    pub server_key: [u8; 32],
}

impl std::fmt::Debug for ScramSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramSecret")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl ScramSecret {
    /// Derives the secret with PBKDF2-HMAC-SHA-256.
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Result<Self, AuthError> {
        let salted_password =
            pbkdf2_hmac_array::<Sha256, 32>(password.as_bytes(), salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        let mut stored_key = [0u8; 32];
        stored_key.copy_from_slice(&Sha256::digest(client_key));
        Ok(Self {
            salt: salt.to_vec(),
            iterations,
            stored_key,
            server_key,
        })
    }

    /// Derives the secret under a fresh random salt.
    pub fn generate(password: &str) -> Result<Self, AuthError> {
        let salt: [u8; SALT_LEN] = rand::random();
        Self::derive(password, &salt, SCRAM_ITERATIONS)
    }
}

/// Stable salt handed out for users that do not exist, so that the
/// exchange looks the same whether or not the user is known.
pub fn decoy_salt(user: &str) -> Vec<u8> {
    Sha256::digest(user.as_bytes())[..SALT_LEN].to_vec()
}

/// Users allowed to log in, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    users: HashMap<String, ScramSecret>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from plain `(user, password)` pairs.
    pub fn from_passwords<'a>(
        passwords: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, AuthError> {
        let mut store = Self::new();
        for (user, password) in passwords {
            store.insert(user, ScramSecret::generate(password)?);
        }
        Ok(store)
    }

    pub fn insert(&mut self, user: impl Into<String>, secret: ScramSecret) {
        self.users.insert(user.into(), secret);
    }

    pub fn get(&self, user: &str) -> Option<&ScramSecret> {
        self.users.get(user)
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
