//! Audit-logging decorator for [`SigningKeyStore`] and [`SessionStore`].
//!
//! Wraps any store to emit an [`AuditEvent`] for every mutation, without
//! modifying the underlying store. Reads pass straight through.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use super::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, key_resource, session_resource},
    session::SessionRecord,
    signing_key::{KeyAlgorithm, KeyId, SigningKeyRecord},
    store::{SessionStore, SigningKeyStore},
};
use crate::error::StorageResult;

/// Decorator that adds audit logging to a key or session store.
///
/// # Usage
///
/// ```no_run
/// use identity_storage::auth::audited_store::AuditedStore;
/// use identity_storage::auth::audit::TracingAuditLogger;
/// use identity_storage::auth::MemorySigningKeyStore;
///
/// let store = MemorySigningKeyStore::new();
/// let audited = AuditedStore::new(store, TracingAuditLogger, "identity");
/// ```
pub struct AuditedStore<S, L> {
    inner: S,
    logger: L,
    actor: Arc<str>,
}

impl<S, L> AuditedStore<S, L>
where
    L: AuditLogger,
{
    /// Creates a new audited store wrapping the given store and logger.
    pub fn new(inner: S, logger: L, actor: impl Into<Arc<str>>) -> Self {
        Self { inner, logger, actor: actor.into() }
    }

    /// Returns a reference to the inner store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn emit(
        &self,
        action: AuditAction,
        resource: String,
        result: AuditResult,
        metadata: HashMap<String, String>,
    ) {
        let event = AuditEvent::builder()
            .actor(self.actor.to_string())
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata)
            .build();
        self.logger.log(&event).await;
    }

    fn result_from<T>(res: &StorageResult<T>) -> AuditResult {
        match res {
            Ok(_) => AuditResult::Success,
            Err(e) => AuditResult::Failure(e.to_string()),
        }
    }
}

#[async_trait]
impl<S, L> SigningKeyStore for AuditedStore<S, L>
where
    S: SigningKeyStore,
    L: AuditLogger,
{
    async fn get_most_recent_key(
        &self,
        algorithm: KeyAlgorithm,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        self.inner.get_most_recent_key(algorithm).await
    }

    async fn get_highest_sequence(&self, algorithm: KeyAlgorithm) -> StorageResult<Option<u64>> {
        self.inner.get_highest_sequence(algorithm).await
    }

    async fn put_key(&self, key: &SigningKeyRecord) -> StorageResult<()> {
        let res = self.inner.put_key(key).await;
        let mut metadata = HashMap::new();
        metadata.insert("expires_at".to_owned(), key.expires_at.to_rfc3339());
        self.emit(AuditAction::StoreKey, key_resource(key.id), Self::result_from(&res), metadata)
            .await;
        res
    }

    async fn get_key(&self, id: &KeyId) -> StorageResult<Option<SigningKeyRecord>> {
        self.inner.get_key(id).await
    }

    async fn get_key_by_public_key(
        &self,
        public_key: &str,
    ) -> StorageResult<Option<SigningKeyRecord>> {
        self.inner.get_key_by_public_key(public_key).await
    }

    async fn invalidate_key(&self, id: &KeyId) -> StorageResult<()> {
        let res = self.inner.invalidate_key(id).await;
        self.emit(
            AuditAction::InvalidateKey,
            key_resource(id),
            Self::result_from(&res),
            HashMap::new(),
        )
        .await;
        res
    }
}

#[async_trait]
impl<S, L> SessionStore for AuditedStore<S, L>
where
    S: SessionStore,
    L: AuditLogger,
{
    async fn get_session(&self, token: &str) -> StorageResult<Option<SessionRecord>> {
        self.inner.get_session(token).await
    }

    async fn put_session(&self, session: &SessionRecord) -> StorageResult<()> {
        let res = self.inner.put_session(session).await;
        let mut metadata = HashMap::new();
        metadata.insert("user_id".to_owned(), session.user_id.clone());
        metadata.insert("server_name".to_owned(), session.federation_proof.server_name.clone());
        self.emit(
            AuditAction::StoreSession,
            session_resource(&session.token),
            Self::result_from(&res),
            metadata,
        )
        .await;
        res
    }

    async fn mark_revoked(&self, token: &str) -> StorageResult<()> {
        let res = self.inner.mark_revoked(token).await;
        self.emit(
            AuditAction::RevokeSession,
            session_resource(token),
            Self::result_from(&res),
            HashMap::new(),
        )
        .await;
        res
    }
}
