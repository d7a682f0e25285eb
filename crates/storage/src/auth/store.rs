//! Storage traits for session and signing-key records.
//!
//! The lifecycle managers depend only on [`SessionStore`] and
//! [`SigningKeyStore`]; persistence mechanics stay behind these traits.
//! [`MemorySessionStore`] and [`MemorySigningKeyStore`] are the in-process
//! implementations used for tests and single-node deployments.
//!
//! # Usage
//!
//! ```no_run
//! use identity_storage::auth::{KeyAlgorithm, SigningKeyRecord, SigningKeyStore};
//! use identity_storage::StorageError;
//!
//! async fn latest<S: SigningKeyStore>(
//!     store: &S,
//! ) -> Result<Option<SigningKeyRecord>, StorageError> {
//!     store.get_most_recent_key(KeyAlgorithm::Ed25519).await
//! }
//! ```

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::{
    auth::{KeyAlgorithm, KeyId, SessionRecord, SigningKeyRecord},
    error::{StorageError, StorageResult},
};

/// Persistence for session records, keyed by token.
///
/// # Error Handling
///
/// Classification of a session as expired or logged out is left to the
/// caller. Stores only report whether a record exists.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Retrieves a session by token.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))` if the session exists
    /// - `Ok(None)` if no session was ever stored under `token`
    /// - `Err(...)` on storage errors
    async fn get_session(&self, token: &str) -> StorageResult<Option<SessionRecord>>;

    /// Stores a session, replacing any record with the same token.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage backend is unavailable or the record
    /// cannot be serialized.
    async fn put_session(&self, session: &SessionRecord) -> StorageResult<()>;

    /// Sets the `revoked` flag on a session.
    ///
    /// Setting the flag on an already-revoked session succeeds; callers that
    /// need to distinguish a second logout must read the record first.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if no session exists for `token`.
    async fn mark_revoked(&self, token: &str) -> StorageResult<()>;
}

/// Persistence for signing-key records.
///
/// # Sequencing
///
/// Sequence numbers are derived from [`get_highest_sequence`], which must
/// consider every record ever stored for the algorithm, including expired
/// and invalidated ones. Otherwise a sequence could be handed out twice.
///
/// [`get_highest_sequence`]: SigningKeyStore::get_highest_sequence
#[async_trait]
pub trait SigningKeyStore: Send + Sync {
    /// Returns the usable key with the highest sequence for `algorithm`.
    ///
    /// A key is usable if it is neither invalidated nor past `expires_at`.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(key))` for the qualifying key with the strictly highest sequence
    /// - `Ok(None)` if no key qualifies
    /// - `Err(...)` on storage errors
    async fn get_most_recent_key(
        &self,
        algorithm: KeyAlgorithm,
    ) -> StorageResult<Option<SigningKeyRecord>>;

    /// Returns the highest sequence ever stored for `algorithm`.
    ///
    /// Expired and invalidated keys count. Returns `Ok(None)` if no key was
    /// ever stored for the algorithm.
    async fn get_highest_sequence(&self, algorithm: KeyAlgorithm) -> StorageResult<Option<u64>>;

    /// Stores a new signing key.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - A key with the same id already exists ([`StorageError::AlreadyExists`])
    /// - The storage backend is unavailable
    /// - Serialization fails
    async fn put_key(&self, key: &SigningKeyRecord) -> StorageResult<()>;

    /// Retrieves a key by identifier regardless of its state.
    async fn get_key(&self, id: &KeyId) -> StorageResult<Option<SigningKeyRecord>>;

    /// Retrieves a key by its encoded public key.
    async fn get_key_by_public_key(
        &self,
        public_key: &str,
    ) -> StorageResult<Option<SigningKeyRecord>>;

    /// Sets the `invalidated` flag on a key.
    ///
    /// Idempotent: invalidating an already-invalidated key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the key doesn't exist.
    async fn invalidate_key(&self, id: &KeyId) -> StorageResult<()>;
}

/// In-memory implementation of [`SessionStore`].
///
/// Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// use identity_storage::auth::{
///     FederationProof, MemorySessionStore, SessionRecord, SessionStore,
/// };
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = MemorySessionStore::new();
///     let session = SessionRecord::builder()
///         .token("tok-1")
///         .user_id("@user:server.com")
///         .federation_proof(
///             FederationProof::builder()
///                 .access_token("abc".to_owned())
///                 .expires_in(3600)
///                 .server_name("server.com")
///                 .build(),
///         )
///         .build();
///
///     store.put_session(&session).await?;
///     assert!(store.get_session("tok-1").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
}

impl MemorySessionStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns `true` if no session has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    #[tracing::instrument(skip_all)]
    async fn get_session(&self, token: &str) -> StorageResult<Option<SessionRecord>> {
        Ok(self.sessions.read().get(token).cloned())
    }

    #[tracing::instrument(skip_all, fields(user_id = %session.user_id))]
    async fn put_session(&self, session: &SessionRecord) -> StorageResult<()> {
        self.sessions.write().insert(session.token.clone(), session.clone());
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn mark_revoked(&self, token: &str) -> StorageResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(token).ok_or_else(|| StorageError::not_found("session"))?;
        session.revoked = true;
        Ok(())
    }
}

/// In-memory implementation of [`SigningKeyStore`].
///
/// # Thread Safety
///
/// Uses [`parking_lot::RwLock`] for efficient concurrent access with
/// reader-writer semantics. `put_key` checks for an existing id and inserts
/// under the same write lock.
#[derive(Debug, Default, Clone)]
pub struct MemorySigningKeyStore {
    pub(crate) keys: Arc<RwLock<HashMap<KeyId, SigningKeyRecord>>>,
}

impl MemorySigningKeyStore {
    /// Creates a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored keys for `algorithm`, ordered by sequence.
    #[must_use]
    pub fn keys_for(&self, algorithm: KeyAlgorithm) -> Vec<SigningKeyRecord> {
        let mut keys: Vec<SigningKeyRecord> = self
            .keys
            .read()
            .values()
            .filter(|key| key.algorithm() == algorithm)
            .cloned()
            .collect();
        keys.sort_by_key(SigningKeyRecord::sequence);
        keys
    }

    /// Number of stored keys across all algorithms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Returns `true` if no key has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

#[async_trait]
impl SigningKeyStore for MemorySigningKeyStore {
    #[tracing::instrument(skip(self))]
    async fn get_most_recent_key(
        &self,
        algorithm: KeyAlgorithm,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        let now = Utc::now();
        let keys = self.keys.read();

        Ok(keys
            .values()
            .filter(|key| key.algorithm() == algorithm && key.is_usable_at(now))
            .max_by_key(|key| key.sequence())
            .cloned())
    }

    #[tracing::instrument(skip(self))]
    async fn get_highest_sequence(&self, algorithm: KeyAlgorithm) -> StorageResult<Option<u64>> {
        let keys = self.keys.read();
        Ok(keys.keys().filter(|id| id.algorithm() == algorithm).map(KeyId::sequence).max())
    }

    #[tracing::instrument(skip(self, key), fields(kid = %key.id))]
    async fn put_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        let mut keys = self.keys.write();

        if keys.contains_key(&key.id) {
            return Err(StorageError::already_exists(key.id.to_string()));
        }

        keys.insert(key.id, key.clone());
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(kid = %id))]
    async fn get_key(&self, id: &KeyId) -> StorageResult<Option<SigningKeyRecord>> {
        Ok(self.keys.read().get(id).cloned())
    }

    #[tracing::instrument(skip_all)]
    async fn get_key_by_public_key(
        &self,
        public_key: &str,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        let keys = self.keys.read();
        Ok(keys.values().find(|key| key.public_key == public_key).cloned())
    }

    #[tracing::instrument(skip(self), fields(kid = %id))]
    async fn invalidate_key(&self, id: &KeyId) -> StorageResult<()> {
        let mut keys = self.keys.write();
        let key = keys.get_mut(id).ok_or_else(|| StorageError::not_found(id.to_string()))?;
        key.invalidated = true;
        Ok(())
    }
}
