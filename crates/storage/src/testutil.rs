//! Shared test utilities for store testing.
//!
//! This module provides record factories, failure-injecting store wrappers,
//! and assertion macros for [`StorageResult`] values. It is feature-gated
//! behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! identity-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use identity_storage::testutil::{FailingKeyStore, KeyStoreOp, make_signing_key};
//! ```

use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use crate::{
    auth::{
        FederationProof, KeyAlgorithm, KeyId, MemorySessionStore, MemorySigningKeyStore,
        SessionRecord, SessionStore, SigningKeyRecord, SigningKeyStore,
    },
    error::{StorageError, StorageResult},
};

/// Creates a usable signing-key record with placeholder key material.
#[must_use]
pub fn make_signing_key(algorithm: KeyAlgorithm, sequence: u64) -> SigningKeyRecord {
    SigningKeyRecord::builder()
        .id(KeyId::new(algorithm, sequence))
        .public_key(format!("test-public-{algorithm}-{sequence}"))
        .private_key(format!("test-sealed-{algorithm}-{sequence}"))
        .build()
}

/// Creates a signing-key record whose expiry passed an hour ago.
#[must_use]
pub fn make_expired_signing_key(algorithm: KeyAlgorithm, sequence: u64) -> SigningKeyRecord {
    let mut key = make_signing_key(algorithm, sequence);
    key.created_at = Utc::now() - Duration::days(200);
    key.expires_at = Utc::now() - Duration::hours(1);
    key
}

/// Creates a federation proof for `server.com`.
#[must_use]
pub fn make_federation_proof() -> FederationProof {
    FederationProof::builder()
        .access_token("test-federation-access-token".to_owned())
        .expires_in(3600)
        .server_name("server.com")
        .build()
}

/// Creates an active session for `user_id` stored under `token`.
#[must_use]
pub fn make_session(token: &str, user_id: &str) -> SessionRecord {
    SessionRecord::builder()
        .token(token)
        .user_id(user_id)
        .federation_proof(make_federation_proof())
        .build()
}

/// Moves the expiry of a stored key into the past.
///
/// Returns `false` if `store` holds no key with `id`.
pub fn expire_key(store: &MemorySigningKeyStore, id: &KeyId) -> bool {
    match store.keys.write().get_mut(id) {
        Some(key) => {
            key.expires_at = Utc::now() - Duration::seconds(1);
            true
        },
        None => false,
    }
}

fn injected(op: impl std::fmt::Debug) -> StorageError {
    StorageError::connection(format!("injected failure: {op:?}"))
}

/// Operations of [`SigningKeyStore`] that [`FailingKeyStore`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStoreOp {
    /// [`SigningKeyStore::get_most_recent_key`]
    MostRecent,
    /// [`SigningKeyStore::get_highest_sequence`]
    HighestSequence,
    /// [`SigningKeyStore::put_key`]
    Put,
    /// [`SigningKeyStore::get_key`] and [`SigningKeyStore::get_key_by_public_key`]
    Get,
    /// [`SigningKeyStore::invalidate_key`]
    Invalidate,
}

/// A [`SigningKeyStore`] wrapping [`MemorySigningKeyStore`] that fails
/// selected operations with a connection error and counts writes.
#[derive(Debug, Default)]
pub struct FailingKeyStore {
    inner: MemorySigningKeyStore,
    failing: Mutex<HashSet<KeyStoreOp>>,
    put_attempts: AtomicUsize,
}

impl FailingKeyStore {
    /// Creates a store with no failures configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail until [`recover`](Self::recover) is called.
    pub fn fail(&self, op: KeyStoreOp) {
        self.failing.lock().insert(op);
    }

    /// Clears all configured failures.
    pub fn recover(&self) {
        self.failing.lock().clear();
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemorySigningKeyStore {
        &self.inner
    }

    /// Number of `put_key` calls, including failed ones.
    #[must_use]
    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn check(&self, op: KeyStoreOp) -> StorageResult<()> {
        if self.failing.lock().contains(&op) { Err(injected(op)) } else { Ok(()) }
    }
}

#[async_trait]
impl SigningKeyStore for FailingKeyStore {
    async fn get_most_recent_key(
        &self,
        algorithm: KeyAlgorithm,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        self.check(KeyStoreOp::MostRecent)?;
        self.inner.get_most_recent_key(algorithm).await
    }

    async fn get_highest_sequence(&self, algorithm: KeyAlgorithm) -> StorageResult<Option<u64>> {
        self.check(KeyStoreOp::HighestSequence)?;
        self.inner.get_highest_sequence(algorithm).await
    }

    async fn put_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);
        self.check(KeyStoreOp::Put)?;
        self.inner.put_key(key).await
    }

    async fn get_key(&self, id: &KeyId) -> StorageResult<Option<SigningKeyRecord>> {
        self.check(KeyStoreOp::Get)?;
        self.inner.get_key(id).await
    }

    async fn get_key_by_public_key(
        &self,
        public_key: &str,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        self.check(KeyStoreOp::Get)?;
        self.inner.get_key_by_public_key(public_key).await
    }

    async fn invalidate_key(&self, id: &KeyId) -> StorageResult<()> {
        self.check(KeyStoreOp::Invalidate)?;
        self.inner.invalidate_key(id).await
    }
}

/// Operations of [`SessionStore`] that [`FailingSessionStore`] can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionStoreOp {
    /// [`SessionStore::get_session`]
    Get,
    /// [`SessionStore::put_session`]
    Put,
    /// [`SessionStore::mark_revoked`]
    MarkRevoked,
}

/// A [`SessionStore`] wrapping [`MemorySessionStore`] that fails selected
/// operations with a connection error.
#[derive(Debug, Default)]
pub struct FailingSessionStore {
    inner: MemorySessionStore,
    failing: Mutex<HashSet<SessionStoreOp>>,
}

impl FailingSessionStore {
    /// Creates a store with no failures configured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `op` fail until [`recover`](Self::recover) is called.
    pub fn fail(&self, op: SessionStoreOp) {
        self.failing.lock().insert(op);
    }

    /// Clears all configured failures.
    pub fn recover(&self) {
        self.failing.lock().clear();
    }

    /// The wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemorySessionStore {
        &self.inner
    }

    fn check(&self, op: SessionStoreOp) -> StorageResult<()> {
        if self.failing.lock().contains(&op) { Err(injected(op)) } else { Ok(()) }
    }
}

#[async_trait]
impl SessionStore for FailingSessionStore {
    async fn get_session(&self, token: &str) -> StorageResult<Option<SessionRecord>> {
        self.check(SessionStoreOp::Get)?;
        self.inner.get_session(token).await
    }

    async fn put_session(&self, session: &SessionRecord) -> StorageResult<()> {
        self.check(SessionStoreOp::Put)?;
        self.inner.put_session(session).await
    }

    async fn mark_revoked(&self, token: &str) -> StorageResult<()> {
        self.check(SessionStoreOp::MarkRevoked)?;
        self.inner.mark_revoked(token).await
    }
}

/// Assert that a [`StorageResult`] is an `Err` of the given [`StorageError`] variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use identity_storage::assert_storage_error;
/// use identity_storage::error::{StorageError, StorageResult};
///
/// let result: StorageResult<()> = Err(StorageError::already_exists("rsa:0"));
/// assert_storage_error!(result, AlreadyExists);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "expected StorageError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "{}: expected StorageError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        $crate::assert_storage_error!($result, NotFound)
    };
    ($result:expr, $msg:expr) => {
        $crate::assert_storage_error!($result, NotFound, $msg)
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Helper to verify that a result is a `NotFound` error.
pub fn is_not_found<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::NotFound { .. }))
}
