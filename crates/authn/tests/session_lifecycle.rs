#![allow(clippy::expect_used, clippy::panic)]
//! End-to-end tests for issuing, resolving and revoking sessions.

use std::sync::Arc;

use identity_authn::{
    AuthError, ErrorCode, GenerationOptions, KeyAcquisitionError, KeyJobRegistry,
    SessionManager, SigningKeyManager, assert_auth_error,
    jwt::{bearer_token, decode_credential_header},
    testutil::{
        CountingGenerator, StaticVerifier, TEST_RSA_MODULUS_LENGTH, test_cipher, test_config,
    },
};
use async_trait::async_trait;
use identity_storage::{
    auth::{
        KeyAlgorithm, MemorySessionStore, MemorySigningKeyStore, SessionStore, SigningKeyStore,
        audit::{AuditAction, AuditEvent, AuditLogger, AuditResult},
        audited_store::AuditedStore,
    },
    testutil::{
        FailingKeyStore, FailingSessionStore, KeyStoreOp, SessionStoreOp, make_federation_proof,
        make_session,
    },
};
use parking_lot::Mutex;
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    manager: SessionManager,
    sessions: Arc<FailingSessionStore>,
    keys: Arc<FailingKeyStore>,
    generator: Arc<CountingGenerator>,
}

fn harness(algorithm: KeyAlgorithm) -> Harness {
    let sessions = Arc::new(FailingSessionStore::new());
    let keys = Arc::new(FailingKeyStore::new());
    let generator = Arc::new(CountingGenerator::new());
    let config = test_config(algorithm);
    let key_manager = SigningKeyManager::builder()
        .store(keys.clone())
        .generator(generator.clone())
        .registry(Arc::new(KeyJobRegistry::new()))
        .key_lifetime_months(config.key_lifetime_months())
        .build();
    let manager = SessionManager::new(sessions.clone(), key_manager, test_cipher(), config);
    Harness { manager, sessions, keys, generator }
}

// ---------------------------------------------------------------------------
// End-to-end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rsa_issue_resolve_revoke_resolve() {
    let h = harness(KeyAlgorithm::Rsa);

    let issued = h.manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");
    assert_eq!(issued.key_id().to_string(), "rsa:0");
    assert_eq!(
        decode_credential_header(issued.token()).expect("header").alg,
        jsonwebtoken::Algorithm::RS256
    );

    assert_eq!(h.manager.resolve(issued.token()).await.expect("resolve"), "@user:server.com");
    h.manager.revoke(issued.token()).await.expect("revoke");
    assert_auth_error!(h.manager.resolve(issued.token()).await, TokenLoggedOut);
}

#[rstest]
#[case::rsa(KeyAlgorithm::Rsa)]
#[case::rsa_pss(KeyAlgorithm::RsaPss)]
#[case::ec(KeyAlgorithm::Ec)]
#[case::ed25519(KeyAlgorithm::Ed25519)]
#[tokio::test]
async fn issued_credential_verifies_for_each_algorithm(#[case] algorithm: KeyAlgorithm) {
    let h = harness(algorithm);
    let issued = h.manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");

    let claims = h.manager.verify_credential(issued.token()).await.expect("verify");
    assert_eq!(claims.user_id, "@user:server.com");
    assert_eq!(issued.key_id().algorithm(), algorithm);
}

#[tokio::test]
async fn register_then_authenticate_with_bearer_header() {
    let h = harness(KeyAlgorithm::Ed25519);
    let verifier = StaticVerifier::verified("@user:server.com");

    let issued = h.manager.register(&verifier, make_federation_proof()).await.expect("register");
    let header = format!("Bearer {}", issued.envelope());

    assert_eq!(bearer_token(&header).as_deref(), Some(issued.token()));
    assert_eq!(
        h.manager.resolve_presented(Some(&header), None).await.expect("resolve"),
        "@user:server.com"
    );
    h.manager.revoke_presented(Some(&header), None).await.expect("logout");
    assert_auth_error!(h.manager.revoke_presented(Some(&header), None).await, TokenAlreadyLoggedOut);
}

#[tokio::test]
async fn concurrent_issues_share_one_key() {
    let h = harness(KeyAlgorithm::Ed25519);

    let results = futures::future::join_all((0..10).map(|i| {
        let manager = h.manager.clone();
        async move { manager.issue(&format!("@user{i}:server.com"), make_federation_proof()).await }
    }))
    .await;

    let key_ids: Vec<_> = results.into_iter().map(|r| r.expect("issue").key_id()).collect();
    assert!(key_ids.iter().all(|id| *id == key_ids[0]));
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(h.sessions.inner().len(), 10);
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn never_issued_token_is_unknown() {
    let h = harness(KeyAlgorithm::Ed25519);
    assert_auth_error!(h.manager.resolve("never-issued").await, UnknownToken);
    assert_auth_error!(h.manager.revoke("never-issued").await, UnknownToken);
}

#[tokio::test]
async fn expired_session_resolves_as_expired_without_revocation() {
    let h = harness(KeyAlgorithm::Ed25519);
    let mut session = make_session("old-token", "@user:server.com");
    session.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
    h.sessions.put_session(&session).await.expect("put");

    assert_auth_error!(h.manager.resolve("old-token").await, TokenExpired);
    assert_auth_error!(h.manager.revoke("old-token").await, TokenExpired);
    assert!(!h.sessions.get_session("old-token").await.expect("get").expect("exists").revoked);
}

#[tokio::test]
async fn second_revoke_is_already_logged_out() {
    let h = harness(KeyAlgorithm::Ed25519);
    h.sessions.put_session(&make_session("tok", "@user:server.com")).await.expect("put");

    assert!(h.manager.revoke("tok").await.is_ok());
    let second = h.manager.revoke("tok").await;
    assert_auth_error!(second, TokenAlreadyLoggedOut);
    assert_eq!(second.expect_err("second").error_code(), ErrorCode::Unauthorized);
}

#[tokio::test]
async fn session_expiry_follows_session_ttl_not_credential_ttl() {
    let h = harness(KeyAlgorithm::Ed25519);
    let issued = h.manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");
    let stored =
        h.sessions.get_session(issued.token()).await.expect("get").expect("session exists");

    let claims = h.manager.verify_credential(issued.token()).await.expect("verify");
    let session_ttl = (stored.expires_at - stored.issued_at).num_seconds();
    assert_eq!(session_ttl as u64, h.manager.config().session_ttl().as_secs());
    assert_eq!(claims.exp - claims.iat, h.manager.config().credential_ttl().as_secs());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn key_generation_failure_surfaces_as_internal_error() {
    let h = harness(KeyAlgorithm::Rsa);
    h.generator.set_failing(true);

    let err = h.manager.issue("@user:server.com", make_federation_proof()).await.expect_err("fails");

    match &err {
        AuthError::KeyAcquisition { algorithm, source } => {
            assert_eq!(*algorithm, KeyAlgorithm::Rsa);
            assert!(matches!(**source, KeyAcquisitionError::Generation(_)));
        },
        other => panic!("expected KeyAcquisition, got {other:?}"),
    }
    assert_eq!(err.status_code(), 500);
    assert!(h.sessions.inner().is_empty());
    assert!(h.keys.inner().is_empty());
}

#[tokio::test]
async fn key_persistence_failure_issues_nothing() {
    let h = harness(KeyAlgorithm::Ed25519);
    h.keys.fail(KeyStoreOp::Put);

    let result = h.manager.issue("@user:server.com", make_federation_proof()).await;

    assert_auth_error!(result, KeyAcquisition);
    assert!(h.sessions.inner().is_empty());
    assert!(h.keys.inner().is_empty());
}

#[tokio::test]
async fn session_persistence_failure_returns_no_credential() {
    let h = harness(KeyAlgorithm::Ed25519);
    h.sessions.fail(SessionStoreOp::Put);

    let err = h.manager.issue("@user:server.com", make_federation_proof()).await.expect_err("fails");

    assert!(matches!(err, AuthError::SessionPersistence(_)));
    assert_eq!(err.to_response().errcode, ErrorCode::Unknown);
    assert!(h.sessions.inner().is_empty());
    // The key itself was persisted before signing and stays usable.
    assert_eq!(h.keys.inner().len(), 1);
}

#[tokio::test]
async fn session_read_failure_does_not_mutate() {
    let h = harness(KeyAlgorithm::Ed25519);
    h.sessions.put_session(&make_session("tok", "@user:server.com")).await.expect("put");
    h.sessions.fail(SessionStoreOp::Get);

    assert_auth_error!(h.manager.resolve("tok").await, SessionStorage);
    assert_auth_error!(h.manager.revoke("tok").await, SessionStorage);

    h.sessions.recover();
    assert_eq!(h.manager.resolve("tok").await.expect("resolve"), "@user:server.com");
}

#[tokio::test]
async fn revoke_write_failure_leaves_session_active() {
    let h = harness(KeyAlgorithm::Ed25519);
    h.sessions.put_session(&make_session("tok", "@user:server.com")).await.expect("put");
    h.sessions.fail(SessionStoreOp::MarkRevoked);

    assert_auth_error!(h.manager.revoke("tok").await, SessionPersistence);

    h.sessions.recover();
    assert_eq!(h.manager.resolve("tok").await.expect("still active"), "@user:server.com");
}

#[tokio::test]
async fn unverified_registration_issues_nothing() {
    let h = harness(KeyAlgorithm::Ed25519);
    let verifier = StaticVerifier::unverified("userinfo returned no subject");

    let err = h.manager.register(&verifier, make_federation_proof()).await.expect_err("fails");

    assert_eq!(err.to_response().error, "Failed to verify the access token.");
    assert_eq!(err.status_code(), 403);
    assert_eq!(h.generator.calls(), 0);
    assert!(h.sessions.inner().is_empty());
}

#[tokio::test]
async fn with_stores_uses_native_generation() {
    let sessions = Arc::new(MemorySessionStore::new());
    let keys = Arc::new(MemorySigningKeyStore::new());
    let manager =
        SessionManager::with_stores(sessions, keys.clone(), test_config(KeyAlgorithm::Ed25519))
            .expect("valid config");

    let issued = manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");

    let key = keys.get_key(&issued.key_id()).await.expect("get").expect("persisted");
    assert!(key.public_key.starts_with("-----BEGIN PUBLIC KEY-----"));
    assert_eq!(GenerationOptions::from(manager.config()).rsa_modulus_length, TEST_RSA_MODULUS_LENGTH);
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingLogger {
    events: Mutex<Vec<AuditEvent>>,
}

#[async_trait]
impl AuditLogger for RecordingLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

#[tokio::test]
async fn audited_stores_record_the_lifecycle() {
    let logger = Arc::new(RecordingLogger::default());
    let sessions = Arc::new(AuditedStore::new(MemorySessionStore::new(), logger.clone(), "identity"));
    let keys = Arc::new(AuditedStore::new(MemorySigningKeyStore::new(), logger.clone(), "identity"));
    let manager = SessionManager::with_stores(sessions, keys, test_config(KeyAlgorithm::Ed25519))
        .expect("valid config");

    let issued = manager.issue("@user:server.com", make_federation_proof()).await.expect("issue");
    manager.revoke(issued.token()).await.expect("revoke");
    let _ = manager.revoke(issued.token()).await;

    let actions: Vec<_> = logger.events.lock().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::StoreKey, AuditAction::StoreSession, AuditAction::RevokeSession]
    );
    assert!(logger.events.lock().iter().all(|e| e.result == AuditResult::Success));
}
