//! Security-focused credential tests.
//!
//! These tests verify the credential pipeline's resistance to common JWT
//! attack vectors: algorithm substitution, algorithm confusion, cross-key
//! forgery, key rotation during active use, and malformed JWT structures.
#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use identity_authn::{
    AuthError, SessionManager, assert_auth_error,
    jwt::{CredentialClaims, encoding_key, sign_credential, verify_credential, wrap_envelope},
    testutil::{generate_signing_key, test_cipher, test_config},
};
use identity_storage::{
    auth::{
        KeyAlgorithm, KeyId, MemorySessionStore, MemorySigningKeyStore, SigningKeyRecord,
        SigningKeyStore,
    },
    testutil::{expire_key, make_federation_proof},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HOUR: Duration = Duration::from_secs(3600);

async fn store_with(algorithm: KeyAlgorithm) -> (MemorySigningKeyStore, SigningKeyRecord) {
    let store = MemorySigningKeyStore::new();
    let key = generate_signing_key(algorithm, 0).await;
    store.put_key(&key).await.expect("store key");
    (store, key)
}

fn sign(key: &SigningKeyRecord, claims: &CredentialClaims) -> String {
    sign_credential(claims, key, &test_cipher()).expect("sign")
}

fn claims() -> CredentialClaims {
    CredentialClaims::new("@user:server.com", Utc::now(), HOUR)
}

/// Create a raw JWT string from header and payload JSON with an empty signature.
fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

fn session_manager() -> (SessionManager, Arc<MemorySigningKeyStore>) {
    let keys = Arc::new(MemorySigningKeyStore::new());
    let manager = SessionManager::with_stores(
        Arc::new(MemorySessionStore::new()),
        keys.clone(),
        test_config(KeyAlgorithm::Ed25519),
    )
    .expect("valid config");
    (manager, keys)
}

// ===========================================================================
// 1. Algorithm substitution: `alg: "none"` must be rejected
// ===========================================================================

#[tokio::test]
async fn test_algorithm_none_rejected_end_to_end() {
    let (store, key) = store_with(KeyAlgorithm::Ed25519).await;
    let header = json!({"typ": "JWT", "alg": "none", "kid": key.id.to_string()});
    let token = craft_raw_jwt(&header, &serde_json::to_value(claims()).expect("claims json"));

    let result = verify_credential(&token, &store).await;
    // `jsonwebtoken` has no `none` variant, so header parsing fails before the
    // allow-list runs. Either rejection keeps the token away from key lookup.
    assert!(
        matches!(
            &result,
            Err(AuthError::UnsupportedAlgorithm(_)) | Err(AuthError::InvalidTokenFormat(_))
        ),
        "Security: JWT with alg:'none' must be rejected, got: {result:?}"
    );
}

// ===========================================================================
// 2. Algorithm confusion: HS256 keyed with the public key
// ===========================================================================

#[tokio::test]
async fn test_algorithm_confusion_hs256_end_to_end() {
    let (store, key) = store_with(KeyAlgorithm::Rsa).await;

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(key.id.to_string());
    let hmac_key = EncodingKey::from_secret(key.public_key.as_bytes());
    let token = jsonwebtoken::encode(&header, &claims(), &hmac_key).expect("encode HS256");

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm(msg)) if msg.contains("not allowed for security reasons")),
        "Security: HS256-signed JWT must be rejected even with valid HMAC, got: {result:?}"
    );
}

#[tokio::test]
async fn test_header_algorithm_must_match_key_algorithm() {
    // An EdDSA-signed token naming an RSA key's kid.
    let (store, rsa_key) = store_with(KeyAlgorithm::Rsa).await;
    let ed_key = generate_signing_key(KeyAlgorithm::Ed25519, 0).await;

    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(rsa_key.id.to_string());
    let signing_key = encoding_key(&ed_key, &test_cipher()).expect("open ed25519 key");
    let token = jsonwebtoken::encode(&header, &claims(), &signing_key).expect("encode EdDSA");

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::UnsupportedAlgorithm(msg)) if msg.contains("does not match")),
        "Security: alg/key mismatch must be rejected, got: {result:?}"
    );
}

// ===========================================================================
// 3. Cross-key forgery
// ===========================================================================

#[tokio::test]
async fn test_token_signed_by_other_key_with_same_kid_rejected() {
    let (store, _) = store_with(KeyAlgorithm::Ed25519).await;
    // Same id, different key material.
    let impostor = generate_signing_key(KeyAlgorithm::Ed25519, 0).await;

    let token = sign(&impostor, &claims());

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::InvalidSignature)),
        "Security: signature by another key must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let (store, key) = store_with(KeyAlgorithm::Ed25519).await;
    let token = sign(&key, &claims());

    let mut parts: Vec<&str> = token.split('.').collect();
    let forged_claims = CredentialClaims::new("@admin:server.com", Utc::now(), HOUR);
    let forged_payload =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claims).expect("claims json"));
    parts[1] = &forged_payload;
    let forged = parts.join(".");

    let result = verify_credential(&forged, &store).await;
    assert!(
        matches!(&result, Err(AuthError::InvalidSignature)),
        "Security: tampered payload must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_forged_token_has_no_session() {
    let (manager, _) = session_manager();
    let impostor = generate_signing_key(KeyAlgorithm::Ed25519, 0).await;
    let forged = sign(&impostor, &claims());
    let header = format!("Bearer {}", wrap_envelope(&forged));

    assert_auth_error!(manager.resolve_presented(Some(&header), None).await, UnknownToken);
    assert_auth_error!(manager.revoke(&forged).await, UnknownToken);
}

// ===========================================================================
// 4. Expiry of credential and key
// ===========================================================================

#[tokio::test]
async fn test_credential_expired_one_second_ago() {
    let (store, key) = store_with(KeyAlgorithm::Ed25519).await;
    let mut expired = claims();
    expired.exp = expired.iat - 1;

    let result = verify_credential(&sign(&key, &expired), &store).await;
    assert!(
        matches!(&result, Err(AuthError::CredentialExpired)),
        "Credential past exp must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_expired_key_rejects_valid_credential() {
    let (store, key) = store_with(KeyAlgorithm::Ed25519).await;
    let token = sign(&key, &claims());
    assert!(expire_key(&store, &key.id));

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::KeyExpired { .. })),
        "Credential signed by an expired key must be rejected, got: {result:?}"
    );
}

// ===========================================================================
// 5. Key rotation: invalidate key, in-flight credentials rejected
// ===========================================================================

#[tokio::test]
async fn test_key_rotation_invalidated_key_rejects_inflight_token() {
    let (manager, keys) = session_manager();
    let before = manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");
    assert!(manager.verify_credential(before.token()).await.is_ok());

    keys.invalidate_key(&before.key_id()).await.expect("invalidate");

    let result = manager.verify_credential(before.token()).await;
    assert!(
        matches!(&result, Err(AuthError::KeyInvalidated { .. })),
        "Security: credential signed with invalidated key must be rejected, got: {result:?}"
    );

    let after = manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");
    assert_eq!(after.key_id(), KeyId::new(KeyAlgorithm::Ed25519, 1));
    assert!(manager.verify_credential(after.token()).await.is_ok());
}

// ===========================================================================
// 6. Malformed structure
// ===========================================================================

#[tokio::test]
async fn test_missing_kid_rejected() {
    let (store, key) = store_with(KeyAlgorithm::Ed25519).await;
    let token = sign(&key, &claims());
    let parts: Vec<&str> = token.split('.').collect();
    let header_b64 = URL_SAFE_NO_PAD.encode(br#"{"alg":"EdDSA","typ":"JWT"}"#);
    let token = format!("{header_b64}.{}.{}", parts[1], parts[2]);

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::InvalidTokenFormat(msg)) if msg.contains("kid")),
        "Credential without kid must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unparseable_kid_rejected() {
    let store = MemorySigningKeyStore::new();
    let header = json!({"typ": "JWT", "alg": "EdDSA", "kid": "not-a-key-id"});
    let token = craft_raw_jwt(&header, &serde_json::to_value(claims()).expect("claims json"));

    let result = verify_credential(&token, &store).await;
    assert!(
        matches!(&result, Err(AuthError::InvalidTokenFormat(msg)) if msg.contains("Invalid kid")),
        "Unparseable kid must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_unknown_kid_rejected() {
    let store = MemorySigningKeyStore::new();
    let key = generate_signing_key(KeyAlgorithm::Ed25519, 7).await;

    let result = verify_credential(&sign(&key, &claims()), &store).await;
    assert!(
        matches!(&result, Err(AuthError::KeyNotFound { kid }) if kid == "ed25519:7"),
        "Credential naming an unknown key must be rejected, got: {result:?}"
    );
}

#[tokio::test]
async fn test_malformed_jwt_structures_rejected() {
    let store = MemorySigningKeyStore::new();
    for token in ["", "just-one-part", "header.payload", "not.a.jwt"] {
        let result = verify_credential(token, &store).await;
        assert!(
            matches!(&result, Err(AuthError::InvalidTokenFormat(_))),
            "Malformed token {token:?} must be rejected, got: {result:?}"
        );
    }
}

#[tokio::test]
async fn test_non_bearer_authorization_is_missing_credentials() {
    let (manager, _) = session_manager();
    for header in ["Basic abc", "Bearer", "Bearer a b", "bearer abc", "Bearer !!!"] {
        assert_auth_error!(
            manager.resolve_presented(Some(header), None).await,
            MissingCredentials,
            header
        );
    }
}
