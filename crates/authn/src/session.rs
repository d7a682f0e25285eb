//! Session lifecycle: issue, resolve and revoke bearer credentials.
//!
//! Every issued credential is backed by a [`SessionRecord`] keyed by the
//! signed token. A session is `Active` until it expires or is logged out;
//! neither transition can be undone.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use identity_authn::{IdentityConfig, SessionManager};
//! use identity_storage::auth::{FederationProof, MemorySessionStore, MemorySigningKeyStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SessionManager::with_stores(
//!     Arc::new(MemorySessionStore::new()),
//!     Arc::new(MemorySigningKeyStore::new()),
//!     IdentityConfig::default(),
//! )?;
//!
//! let proof = FederationProof::builder()
//!     .access_token("opaque".to_owned())
//!     .expires_in(3600)
//!     .server_name("server.com")
//!     .build();
//! let issued = manager.issue("@user:server.com", proof).await?;
//!
//! assert_eq!(manager.resolve(issued.token()).await?, "@user:server.com");
//! manager.revoke(issued.token()).await?;
//! # Ok(())
//! # }
//! ```

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, Utc};
use identity_storage::{
    StorageError,
    auth::{
        FederationProof, KeyId, SessionRecord, SessionState, SessionStore, SigningKeyRecord,
        SigningKeyStore,
    },
};
use jsonwebtoken::EncodingKey;
use parking_lot::Mutex;
use tracing::Instrument;

use crate::{
    config::{ConfigError, IdentityConfig},
    crypto::{GenerationOptions, NativeKeyGenerator, PassphraseCipher},
    error::AuthError,
    jwt::{self, CredentialClaims},
    key_manager::SigningKeyManager,
    verifier::{IdentityVerifier, VerificationOutcome},
};

/// A freshly issued credential.
#[derive(Clone)]
pub struct IssuedCredential {
    token: String,
    user_id: String,
    key_id: KeyId,
    expires_at: DateTime<Utc>,
}

impl IssuedCredential {
    /// The signed token, as stored on the session.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The token wrapped for delivery to the caller.
    #[must_use]
    pub fn envelope(&self) -> String {
        jwt::wrap_envelope(&self.token)
    }

    /// The user the credential was issued to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The key that signed the credential.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        self.key_id
    }

    /// When the backing session stops resolving.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .field("key_id", &self.key_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

fn add_ttl(at: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn validate_proof(proof: &FederationProof) -> Result<(), AuthError> {
    if proof.access_token.is_empty() {
        return Err(AuthError::InvalidParam("access_token must not be empty".into()));
    }
    if proof.expires_in == 0 {
        return Err(AuthError::InvalidParam("expires_in must be positive".into()));
    }
    if proof.server_name.is_empty() {
        return Err(AuthError::InvalidParam("server_name must not be empty".into()));
    }
    Ok(())
}

/// Issues, resolves and revokes sessions.
///
/// Cloning is cheap; clones share stores, key manager and configuration.
/// The private key last used for signing is kept opened, so only the first
/// credential signed with a key pays for unsealing it.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    keys: SigningKeyManager,
    cipher: PassphraseCipher,
    config: Arc<IdentityConfig>,
    opened_key: Arc<Mutex<Option<OpenedKey>>>,
}

type OpenedKey = (KeyId, EncodingKey);

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("keys", &self.keys)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager from its parts.
    ///
    /// `cipher` must open keys sealed by the generator behind `keys`.
    #[must_use]
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        keys: SigningKeyManager,
        cipher: PassphraseCipher,
        config: IdentityConfig,
    ) -> Self {
        Self { sessions, keys, cipher, config: Arc::new(config), opened_key: Arc::default() }
    }

    /// Creates a manager that generates keys natively, sealed under the
    /// configured passphrase.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn with_stores(
        sessions: Arc<dyn SessionStore>,
        key_store: Arc<dyn SigningKeyStore>,
        config: IdentityConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let cipher = PassphraseCipher::from_config(&config)?;
        let keys = SigningKeyManager::builder()
            .store(key_store)
            .generator(Arc::new(NativeKeyGenerator::new(cipher.clone())))
            .key_lifetime_months(config.key_lifetime_months())
            .build();
        Ok(Self::new(sessions, keys, cipher, config))
    }

    /// The key manager backing issuance.
    #[must_use]
    pub fn key_manager(&self) -> &SigningKeyManager {
        &self.keys
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Issues a credential for an already-verified `user_id`.
    ///
    /// Runs on its own task: a caller that stops waiting does not cancel key
    /// acquisition or session persistence.
    ///
    /// # Errors
    ///
    /// - [`AuthError::KeyAcquisition`] if no signing key could be obtained
    /// - [`AuthError::InvalidKeyMaterial`] or [`AuthError::Signing`] if signing fails
    /// - [`AuthError::SessionPersistence`] if the session could not be stored;
    ///   the credential is then discarded
    #[tracing::instrument(skip(self, proof), fields(server_name = %proof.server_name))]
    pub async fn issue(
        &self,
        user_id: &str,
        proof: FederationProof,
    ) -> Result<IssuedCredential, AuthError> {
        let manager = self.clone();
        let user_id = user_id.to_owned();
        tokio::spawn(async move { manager.issue_detached(user_id, proof).await }.in_current_span())
            .await
            .map_err(|e| AuthError::Internal(format!("issue task failed: {e}")))?
    }

    async fn issue_detached(
        &self,
        user_id: String,
        proof: FederationProof,
    ) -> Result<IssuedCredential, AuthError> {
        let algorithm = self.config.default_algorithm();
        let key = self
            .keys
            .acquire_key(algorithm, GenerationOptions::from(&*self.config))
            .await
            .map_err(|source| AuthError::key_acquisition(algorithm, source))?;

        let issued_at = Utc::now();
        let claims = CredentialClaims::new(&user_id, issued_at, self.config.credential_ttl());
        let token = self.sign(claims, &key).await?;

        let session = SessionRecord::builder()
            .token(token.clone())
            .user_id(user_id.clone())
            .federation_proof(proof)
            .issued_at(issued_at)
            .expires_at(add_ttl(issued_at, self.config.session_ttl()))
            .build();
        self.sessions.put_session(&session).await.map_err(|e| {
            tracing::error!(error = %e, "failed to persist session");
            AuthError::SessionPersistence(e)
        })?;

        tracing::info!(kid = %key.id, expires_at = %session.expires_at, "issued credential");
        Ok(IssuedCredential { token, user_id, key_id: key.id, expires_at: session.expires_at })
    }

    /// Verifies `proof` with `verifier` and issues a credential for the
    /// verified user.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidParam`] if the proof is malformed
    /// - [`AuthError::VerificationFailed`] if the verifier rejects it
    /// - any error of [`issue`](Self::issue)
    #[tracing::instrument(skip(self, verifier, proof), fields(server_name = %proof.server_name))]
    pub async fn register(
        &self,
        verifier: &dyn IdentityVerifier,
        proof: FederationProof,
    ) -> Result<IssuedCredential, AuthError> {
        validate_proof(&proof)?;
        match verifier.verify(&proof).await {
            VerificationOutcome::Verified(user_id) => self.issue(&user_id, proof).await,
            VerificationOutcome::Unverified(reason) => {
                tracing::warn!(reason = %reason, "federation proof rejected");
                Err(AuthError::VerificationFailed(reason))
            },
        }
    }

    /// Signs on the blocking pool, reusing the opened key when `key` is
    /// the one signed with last.
    async fn sign(
        &self,
        claims: CredentialClaims,
        key: &SigningKeyRecord,
    ) -> Result<String, AuthError> {
        let opened = self
            .opened_key
            .lock()
            .as_ref()
            .filter(|(id, _)| *id == key.id)
            .map(|(_, encoding_key)| encoding_key.clone());
        let cipher = self.cipher.clone();
        let record = key.clone();

        let (token, encoding_key) = tokio::task::spawn_blocking(move || {
            let encoding_key = match opened {
                Some(encoding_key) => encoding_key,
                None => jwt::encoding_key(&record, &cipher)?,
            };
            let token = jwt::sign_with(&claims, record.id, &encoding_key)?;
            Ok::<_, AuthError>((token, encoding_key))
        })
        .await
        .map_err(|e| AuthError::Internal(format!("signing task failed: {e}")))??;

        *self.opened_key.lock() = Some((key.id, encoding_key));
        Ok(token)
    }

    async fn load(&self, token: &str) -> Result<SessionRecord, AuthError> {
        self.sessions
            .get_session(token)
            .await
            .map_err(AuthError::SessionStorage)?
            .ok_or(AuthError::UnknownToken)
    }

    /// Returns the user id bound to an active session.
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownToken`], [`AuthError::TokenExpired`] or
    /// [`AuthError::TokenLoggedOut`]; expiry is reported ahead of logout.
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, token: &str) -> Result<String, AuthError> {
        let session = self.load(token).await?;
        match session.state_at(Utc::now()) {
            SessionState::Active => Ok(session.user_id),
            SessionState::Expired => Err(AuthError::TokenExpired),
            SessionState::LoggedOut => Err(AuthError::TokenLoggedOut),
        }
    }

    /// Logs a session out.
    ///
    /// # Errors
    ///
    /// [`AuthError::UnknownToken`], [`AuthError::TokenExpired`],
    /// [`AuthError::TokenAlreadyLoggedOut`] on a second logout, or
    /// [`AuthError::SessionPersistence`] if the flag could not be written.
    #[tracing::instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let session = self.load(token).await?;
        match session.state_at(Utc::now()) {
            SessionState::Active => {},
            SessionState::Expired => return Err(AuthError::TokenExpired),
            SessionState::LoggedOut => return Err(AuthError::TokenAlreadyLoggedOut),
        }

        match self.sessions.mark_revoked(token).await {
            Ok(()) => {
                tracing::info!(user_id = %session.user_id, "session logged out");
                Ok(())
            },
            Err(StorageError::NotFound { .. }) => Err(AuthError::UnknownToken),
            Err(e) => Err(AuthError::SessionPersistence(e)),
        }
    }

    /// [`resolve`](Self::resolve) for a token presented in a request.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCredentials`] if no token was presented, otherwise
    /// as [`resolve`](Self::resolve).
    pub async fn resolve_presented(
        &self,
        authorization: Option<&str>,
        access_token_query: Option<&str>,
    ) -> Result<String, AuthError> {
        let token = jwt::presented_token(authorization, access_token_query)?;
        self.resolve(&token).await
    }

    /// [`revoke`](Self::revoke) for a token presented in a request.
    ///
    /// # Errors
    ///
    /// [`AuthError::MissingCredentials`] if no token was presented, otherwise
    /// as [`revoke`](Self::revoke).
    pub async fn revoke_presented(
        &self,
        authorization: Option<&str>,
        access_token_query: Option<&str>,
    ) -> Result<(), AuthError> {
        let token = jwt::presented_token(authorization, access_token_query)?;
        self.revoke(&token).await
    }

    /// Verifies a credential's signature against the key named by its `kid`.
    ///
    /// Independent of session state: a logged-out credential still carries a
    /// valid signature.
    ///
    /// # Errors
    ///
    /// See [`jwt::verify_credential`].
    pub async fn verify_credential(&self, token: &str) -> Result<CredentialClaims, AuthError> {
        jwt::verify_credential(token, self.keys.store().as_ref()).await
    }
}
