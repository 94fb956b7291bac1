//! Credentials and the repository lookup contract.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use zeroize::Zeroizing;
use zkw_crypto::srp::hash_credentials;
use zkw_crypto::CredentialHash;

/// Client-side identity and shared secret.
///
/// The secret is zeroed on drop and never printed.
#[derive(Clone)]
pub struct Credentials {
    identity: String,
    secret: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Create credentials from an identity and a shared secret.
    pub fn new(identity: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            identity: identity.into(),
            secret: Zeroizing::new(secret.as_ref().to_vec()),
        }
    }

    /// Identity presented to the host.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Shared secret.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Synchronous identity lookup supplied by the embedding application.
///
/// `None` is the normal "unknown identity" outcome, not an error.
pub trait CredentialRepository: Send + Sync {
    /// Look up the credential record for `identity`.
    fn lookup(&self, identity: &str) -> Option<CredentialHash>;
}

impl<T: CredentialRepository + ?Sized> CredentialRepository for Arc<T> {
    fn lookup(&self, identity: &str) -> Option<CredentialHash> {
        (**self).lookup(identity)
    }
}

/// In-memory repository.
///
/// Each identity's credential record is derived once, with a fresh salt, when
/// the identity is inserted; lookups return the cached record.
#[derive(Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<String, CredentialHash>>,
}

impl MemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive and store the record for `identity`, replacing any previous one.
    pub fn insert(&self, identity: &str, secret: impl AsRef<[u8]>) {
        let record = hash_credentials(identity, secret.as_ref());
        match self.records.write() {
            Ok(mut records) => {
                records.insert(identity.to_string(), record);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(identity.to_string(), record);
            }
        }
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(self, identity: &str, secret: impl AsRef<[u8]>) -> Self {
        self.insert(identity, secret);
        self
    }

    /// Forget `identity`. Returns whether a record existed.
    pub fn remove(&self, identity: &str) -> bool {
        match self.records.write() {
            Ok(mut records) => records.remove(identity).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(identity).is_some(),
        }
    }

    /// Number of stored identities.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialRepository for MemoryRepository {
    fn lookup(&self, identity: &str) -> Option<CredentialHash> {
        match self.records.read() {
            Ok(records) => records.get(identity).cloned(),
            Err(poisoned) => poisoned.into_inner().get(identity).cloned(),
        }
    }
}
