//! Authentication error types.
//!
//! This module defines errors raised while acquiring signing keys, minting
//! credentials, and resolving or revoking sessions, together with their
//! caller-visible mapping onto [`ErrorCode`] and an HTTP-style status.

use std::sync::Arc;

use identity_storage::{StorageError, auth::KeyAlgorithm};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of the key-pair generation primitive.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyGenerationError {
    /// The underlying cryptographic library rejected the request.
    #[error("{algorithm} key generation failed: {message}")]
    Primitive {
        /// Algorithm that was being generated.
        algorithm: KeyAlgorithm,
        /// Library error message.
        message: String,
    },

    /// Key material could not be encoded as PEM.
    #[error("key encoding failed: {0}")]
    Encoding(String),

    /// The generated key was rejected by the signing backend.
    #[error("{algorithm} key cannot sign credentials: {message}")]
    Unusable {
        /// Algorithm of the rejected key.
        algorithm: KeyAlgorithm,
        /// Signing backend error message.
        message: String,
    },

    /// The private key could not be sealed under the passphrase.
    #[error("key sealing failed: {0}")]
    Seal(String),

    /// The blocking generation task panicked or was cancelled.
    #[error("key generation task failed: {0}")]
    Task(String),
}

/// Why a key acquisition did not yield a key.
///
/// Shared between every caller coalesced onto the same acquisition, hence
/// it is handed out behind an [`Arc`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyAcquisitionError {
    /// Key-pair generation failed.
    #[error("key generation failed: {0}")]
    Generation(#[source] KeyGenerationError),

    /// Looking up an existing key or the highest sequence failed.
    #[error("key storage read failed: {0}")]
    StorageRead(#[source] StorageError),

    /// The generated key could not be persisted and was discarded.
    #[error("key persistence failed: {0}")]
    Persistence(#[source] StorageError),

    /// The acquisition task ended without publishing an outcome.
    #[error("key acquisition abandoned before completion")]
    Abandoned,
}

/// Authentication and session lifecycle errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. New variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    // ========== Session lifecycle ==========
    /// No session exists for the presented token.
    #[error("Unknown token")]
    UnknownToken,

    /// The session exists but has passed its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// The session was logged out.
    #[error("Token logged out")]
    TokenLoggedOut,

    /// Logout was requested for a session that is already logged out.
    #[error("Token already logged out")]
    TokenAlreadyLoggedOut,

    /// No credential was presented.
    #[error("Missing credentials")]
    MissingCredentials,

    /// A request parameter failed validation.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// A background task failed before producing a result.
    #[error("Internal error: {0}")]
    Internal(String),

    /// The federated identity check rejected the presented proof.
    #[error("Identity verification failed: {0}")]
    VerificationFailed(String),

    /// No usable signing key could be acquired.
    #[error("Key acquisition failed for {algorithm}: {source}")]
    KeyAcquisition {
        /// Algorithm that was requested.
        algorithm: KeyAlgorithm,
        /// Shared acquisition failure.
        #[source]
        source: Arc<KeyAcquisitionError>,
    },

    /// Signing the credential failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// The issued session could not be persisted.
    #[error("Session persistence failed: {0}")]
    SessionPersistence(#[source] StorageError),

    /// Reading or updating an existing session failed.
    #[error("Session storage error: {0}")]
    SessionStorage(#[source] StorageError),

    // ========== Credential verification ==========
    /// Malformed credential or envelope.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The credential's own `exp` claim has passed.
    #[error("Credential expired")]
    CredentialExpired,

    /// Algorithm not in allowed list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signing key not found.
    #[error("Signing key not found: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// Signing key was manually invalidated.
    #[error("Signing key invalidated: {kid}")]
    KeyInvalidated {
        /// Key ID that was invalidated.
        kid: String,
    },

    /// Signing key has expired.
    #[error("Signing key expired: {kid}")]
    KeyExpired {
        /// Key ID that expired.
        kid: String,
    },

    /// Stored key material could not be parsed or opened.
    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Storage backend error during key lookup.
    #[error("Key storage error: {0}")]
    KeyStorageError(
        /// The underlying storage error that caused the key lookup to fail.
        #[source]
        StorageError,
    ),
}

impl AuthError {
    /// Creates an `InvalidTokenFormat` error.
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates a `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a `KeyInvalidated` error.
    #[must_use]
    pub fn key_invalidated(kid: impl Into<String>) -> Self {
        Self::KeyInvalidated { kid: kid.into() }
    }

    /// Creates a `KeyExpired` error.
    #[must_use]
    pub fn key_expired(kid: impl Into<String>) -> Self {
        Self::KeyExpired { kid: kid.into() }
    }

    /// Creates an `InvalidKeyMaterial` error.
    #[must_use]
    pub fn invalid_key_material(message: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial(message.into())
    }

    /// Creates a `KeyAcquisition` error.
    #[must_use]
    pub fn key_acquisition(algorithm: KeyAlgorithm, source: Arc<KeyAcquisitionError>) -> Self {
        Self::KeyAcquisition { algorithm, source }
    }

    /// The caller-visible error code.
    #[must_use]
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::UnknownToken => ErrorCode::UnknownToken,
            Self::InvalidParam(_) => ErrorCode::InvalidParam,
            Self::KeyAcquisition { .. }
            | Self::Signing(_)
            | Self::Internal(_)
            | Self::SessionPersistence(_)
            | Self::SessionStorage(_)
            | Self::KeyStorageError(_)
            | Self::InvalidKeyMaterial(_) => ErrorCode::Unknown,
            _ => ErrorCode::Unauthorized,
        }
    }

    /// The HTTP status a transport layer should report.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownToken | Self::MissingCredentials => 401,
            Self::KeyAcquisition { .. }
            | Self::Signing(_)
            | Self::Internal(_)
            | Self::SessionPersistence(_)
            | Self::SessionStorage(_)
            | Self::KeyStorageError(_)
            | Self::InvalidKeyMaterial(_) => 500,
            _ => 403,
        }
    }

    /// The caller-visible message. Internal details are never exposed.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::UnknownToken => "Token unknown.",
            Self::MissingCredentials => "credentials are required but missing or invalid.",
            Self::VerificationFailed(_) => "Failed to verify the access token.",
            Self::InvalidParam(_) => "Invalid parameter.",
            Self::KeyAcquisition { .. }
            | Self::Signing(_)
            | Self::Internal(_)
            | Self::SessionPersistence(_)
            | Self::SessionStorage(_)
            | Self::KeyStorageError(_)
            | Self::InvalidKeyMaterial(_) => "Unknown internal error",
            _ => "Token invalid.",
        }
    }

    /// Builds the structured error body for this error.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { errcode: self.error_code(), error: self.public_message().to_owned() }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidToken => {
                AuthError::InvalidTokenFormat("Invalid JWT structure".into())
            },
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::CredentialExpired,
            ErrorKind::InvalidAlgorithm => {
                AuthError::UnsupportedAlgorithm("Algorithm not supported".into())
            },
            ErrorKind::InvalidKeyFormat | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidEcdsaKey => {
                AuthError::InvalidKeyMaterial(err.to_string())
            },
            _ => AuthError::InvalidTokenFormat(format!("JWT error: {}", err)),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::KeyStorageError(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Caller-visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The presented token is not known.
    #[serde(rename = "M_UNKNOWN_TOKEN")]
    UnknownToken,
    /// Credentials are missing, invalid, expired or logged out.
    #[serde(rename = "M_UNAUTHORIZED")]
    Unauthorized,
    /// A request parameter was rejected.
    #[serde(rename = "M_INVALID_PARAM")]
    InvalidParam,
    /// An internal failure occurred.
    #[serde(rename = "M_UNKNOWN")]
    Unknown,
}

/// Structured error body: `{"errcode": "...", "error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub errcode: ErrorCode,
    /// Human-readable message.
    pub error: String,
}
