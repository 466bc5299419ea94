//! Mapping between engine identifiers and the OIDs clients see.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::wire::types::Oid;
use crate::wire::value::Id;

/// First OID handed out to engine objects; lower values belong to built-ins.
pub const FIRST_NORMAL_OID: Oid = 16384;

/// Assigns stable public OIDs to internal identifiers.
///
/// Shared by every connection of a server; an identifier keeps its OID for
/// the lifetime of the process.
#[derive(Debug)]
pub struct OidCache {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    by_id: HashMap<String, Oid>,
    by_oid: HashMap<Oid, String>,
    next: Oid,
}

impl OidCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_id: HashMap::new(),
                by_oid: HashMap::new(),
                next: FIRST_NORMAL_OID,
            }),
        }
    }

    /// Returns the public OID of `id`, assigning one on first use.
    pub fn to_oid(&self, id: &Id) -> Oid {
        let key = match id {
            Id::Oid(oid) => return *oid,
            Id::Internal(key) => key,
        };

        if let Some(oid) = self.inner.read().by_id.get(key) {
            return *oid;
        }

        let mut inner = self.inner.write();
        // Another connection may have won the race between the two locks.
        if let Some(oid) = inner.by_id.get(key) {
            return *oid;
        }
        let oid = inner.next;
        inner.next += 1;
        inner.by_id.insert(key.clone(), oid);
        inner.by_oid.insert(oid, key.clone());
        oid
    }

    /// Resolves an OID received from a client back to an identifier.
    pub fn to_id(&self, oid: Oid) -> Id {
        match self.inner.read().by_oid.get(&oid) {
            Some(key) => Id::Internal(key.clone()),
            None => Id::Oid(oid),
        }
    }
}

impl Default for OidCache {
    fn default() -> Self {
        Self::new()
    }
}
