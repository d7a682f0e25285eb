//! Credential signing, verification and the wire envelope.
//!
//! A credential is a JWS whose header carries the signing key's id as `kid`
//! and whose payload is [`CredentialClaims`]. Before it leaves the service
//! it is wrapped in a base64 envelope; session records are keyed by the
//! unwrapped token.
//!
//! # Example
//!
//! ```no_run
//! use identity_authn::jwt::{bearer_token, decode_credential_header};
//!
//! # fn example(authorization: &str) -> Result<(), Box<dyn std::error::Error>> {
//! if let Some(token) = bearer_token(authorization) {
//!     let header = decode_credential_header(&token)?;
//!     println!("kid: {:?}", header.kid);
//! }
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use identity_storage::auth::{KeyAlgorithm, KeyId, SigningKeyRecord, SigningKeyStore};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};

use crate::{
    crypto::PassphraseCipher,
    error::AuthError,
    validation::{ensure_algorithm_matches_key, jws_algorithm, validate_algorithm},
};

/// Payload of an issued credential.
///
/// ```json
/// {
///   "userId": "@user:server.com",
///   "iat": 1700000000,
///   "exp": 1700086400,
///   "jti": "6c0d3f4e-..."
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    /// The verified user the credential was issued to.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Unique credential id.
    pub jti: String,
}

impl CredentialClaims {
    /// Claims for `user_id`, valid for `ttl` from `issued_at`, with a fresh `jti`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.timestamp().max(0) as u64;
        Self {
            user_id: user_id.into(),
            iat,
            exp: iat.saturating_add(ttl.as_secs()),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// Signs `claims` with `key`, setting `kid` to the key's id.
///
/// The sealed private key is opened with `cipher` for the duration of the
/// call. This is CPU-bound; async callers should run it on the blocking pool.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the key cannot be opened or
/// parsed, and [`AuthError::Signing`] if encoding fails.
pub fn sign_credential(
    claims: &CredentialClaims,
    key: &SigningKeyRecord,
    cipher: &PassphraseCipher,
) -> Result<String, AuthError> {
    let encoding_key = encoding_key(key, cipher)?;
    sign_with(claims, key.id, &encoding_key)
}

/// Opens the sealed private key of `key` into a signing key.
///
/// This runs the Argon2id derivation, so callers signing repeatedly with
/// the same key should keep the result around.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the key cannot be opened or
/// is not a PEM document of the record's algorithm.
pub fn encoding_key(
    key: &SigningKeyRecord,
    cipher: &PassphraseCipher,
) -> Result<EncodingKey, AuthError> {
    let private_pem = cipher.open(&key.private_key)?;
    encoding_key_from_pem(key.algorithm(), &private_pem)
        .map_err(|e| AuthError::invalid_key_material(format!("{}: {e}", key.id)))
}

pub(crate) fn encoding_key_from_pem(
    algorithm: KeyAlgorithm,
    pem: &[u8],
) -> jsonwebtoken::errors::Result<EncodingKey> {
    match algorithm {
        KeyAlgorithm::Rsa | KeyAlgorithm::RsaPss => EncodingKey::from_rsa_pem(pem),
        KeyAlgorithm::Ec => EncodingKey::from_ec_pem(pem),
        KeyAlgorithm::Ed25519 => EncodingKey::from_ed_pem(pem),
    }
}

/// Signs `claims` with an already opened key, setting `kid` to `kid`.
///
/// # Errors
///
/// Returns [`AuthError::Signing`] if encoding fails.
pub fn sign_with(
    claims: &CredentialClaims,
    kid: KeyId,
    encoding_key: &EncodingKey,
) -> Result<String, AuthError> {
    let mut header = Header::new(jws_algorithm(kid.algorithm()));
    header.kid = Some(kid.to_string());

    jsonwebtoken::encode(&header, claims, encoding_key)
        .map_err(|e| AuthError::Signing(e.to_string()))
}

/// Decode a credential header without verification.
///
/// # Errors
///
/// Returns an error if the header cannot be decoded.
pub fn decode_credential_header(token: &str) -> Result<Header, AuthError> {
    decode_header(token)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}")))
}

/// Builds the verification key for a stored record.
///
/// # Errors
///
/// Returns [`AuthError::InvalidKeyMaterial`] if the stored public key is not
/// a PEM document of the record's algorithm.
pub fn decoding_key(key: &SigningKeyRecord) -> Result<DecodingKey, AuthError> {
    let pem = key.public_key.as_bytes();
    let decoded = match key.algorithm() {
        KeyAlgorithm::Rsa | KeyAlgorithm::RsaPss => DecodingKey::from_rsa_pem(pem),
        KeyAlgorithm::Ec => DecodingKey::from_ec_pem(pem),
        KeyAlgorithm::Ed25519 => DecodingKey::from_ed_pem(pem),
    };
    decoded.map_err(|e| AuthError::invalid_key_material(format!("{}: {e}", key.id)))
}

/// Verify a credential signature and expiry with a known key.
///
/// # Errors
///
/// Returns [`AuthError::CredentialExpired`] past `exp`,
/// [`AuthError::InvalidSignature`] on a bad signature, or a format error.
pub fn verify_signature(
    token: &str,
    key: &DecodingKey,
    algorithm: Algorithm,
) -> Result<CredentialClaims, AuthError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = true;
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    let token_data = decode::<CredentialClaims>(token, key, &validation)?;
    Ok(token_data.claims)
}

/// Verify a credential against the key named by its `kid` header.
///
/// 1. Decodes the header and requires a `kid`
/// 2. Rejects algorithms outside [`crate::validation::ACCEPTED_ALGORITHMS`]
/// 3. Loads the key from `store` and rejects it if invalidated or expired
/// 4. Checks the header algorithm matches the key's algorithm
/// 5. Verifies signature and expiry
///
/// # Errors
///
/// Returns the first failing check as an [`AuthError`].
#[tracing::instrument(skip(token, store))]
pub async fn verify_credential(
    token: &str,
    store: &dyn SigningKeyStore,
) -> Result<CredentialClaims, AuthError> {
    let header = decode_credential_header(token)?;
    let kid = header
        .kid
        .ok_or_else(|| AuthError::invalid_token_format("JWT header missing 'kid' field"))?;

    validate_algorithm(&format!("{:?}", header.alg))?;

    let id: KeyId = kid
        .parse()
        .map_err(|e| AuthError::invalid_token_format(format!("Invalid kid '{kid}': {e}")))?;

    let key = store.get_key(&id).await?.ok_or_else(|| AuthError::key_not_found(&kid))?;
    if key.invalidated {
        tracing::warn!(kid = %kid, "credential signed by invalidated key");
        return Err(AuthError::key_invalidated(kid));
    }
    if key.is_expired_at(Utc::now()) {
        return Err(AuthError::key_expired(kid));
    }
    ensure_algorithm_matches_key(header.alg, key.algorithm())?;

    let claims = verify_signature(token, &decoding_key(&key)?, header.alg)?;
    tracing::debug!(kid = %kid, "credential verified");
    Ok(claims)
}

/// Wraps a signed token in the base64 envelope handed to callers.
#[must_use]
pub fn wrap_envelope(token: &str) -> String {
    STANDARD.encode(token)
}

/// Unwraps a value produced by [`wrap_envelope`].
///
/// # Errors
///
/// Returns [`AuthError::InvalidTokenFormat`] if the envelope is not base64
/// of a UTF-8 string.
pub fn open_envelope(envelope: &str) -> Result<String, AuthError> {
    let bytes = STANDARD
        .decode(envelope)
        .map_err(|e| AuthError::invalid_token_format(format!("Invalid envelope: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|_| AuthError::invalid_token_format("Envelope is not valid UTF-8"))
}

/// Extracts the token from an `Authorization` header value.
///
/// Accepts exactly `Bearer <envelope>`; anything else yields `None`.
#[must_use]
pub fn bearer_token(authorization: &str) -> Option<String> {
    let mut parts = authorization.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(envelope), None) => open_envelope(envelope).ok(),
        _ => None,
    }
}

/// Locates the presented token, preferring the `Authorization` header over
/// an `access_token` query parameter. The query value is the raw token.
///
/// # Errors
///
/// Returns [`AuthError::MissingCredentials`] if neither source yields a token.
pub fn presented_token(
    authorization: Option<&str>,
    access_token_query: Option<&str>,
) -> Result<String, AuthError> {
    authorization
        .and_then(bearer_token)
        .or_else(|| access_token_query.map(str::to_owned))
        .ok_or(AuthError::MissingCredentials)
}
