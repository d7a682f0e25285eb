//! # Identity Authentication
//!
//! Signing-key and session lifecycle for the identity service.
//!
//! This crate provides:
//! - **Key lifecycle**: [`SigningKeyManager`] hands out a usable signing key per
//!   algorithm, generating `"<algorithm>:<sequence>"` keys on demand with
//!   single-flight coalescing
//! - **Session lifecycle**: [`SessionManager`] issues signed credentials backed
//!   by session records, and resolves or revokes them
//! - **Credential verification**: signature checks against the stored key
//!   named by `kid`, with an asymmetric-only algorithm allow-list
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use identity_authn::{AuthError, IdentityConfig, SessionManager};
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
//! println!("Authorization: Bearer {}", issued.envelope());
//!
//! manager.revoke(issued.token()).await?;
//! assert!(matches!(manager.resolve(issued.token()).await, Err(AuthError::TokenLoggedOut)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - **`testutil`**: cheap test configurations, a counting key generator, a
//!   static identity verifier and the `assert_auth_error!` macro
//! - **`failpoints`**: enables `fail` crate fail points for fault injection

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Identity service configuration.
pub mod config;
/// Key-pair generation and private-key sealing.
pub mod crypto;
/// Authentication error types.
pub mod error;
/// Credential signing, verification and envelope.
pub mod jwt;
/// Signing-key lifecycle with single-flight acquisition.
pub mod key_manager;
/// Session lifecycle.
pub mod session;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Signature algorithm policy.
pub mod validation;
/// Federated identity verification seam.
pub mod verifier;

// Re-export key types for convenience
pub use config::{ConfigError, IdentityConfig, KdfConfig};
pub use crypto::{
    GeneratedKeyPair, GenerationOptions, KeyPairGenerator, NativeKeyGenerator, PassphraseCipher,
};
pub use error::{
    AuthError, ErrorCode, ErrorResponse, KeyAcquisitionError, KeyGenerationError, Result,
};
pub use jwt::CredentialClaims;
pub use key_manager::{
    KeyAcquisitionResult, KeyJobRegistry, KeyManagerMetrics, KeyManagerMetricsSnapshot,
    SigningKeyManager,
};
pub use session::{IssuedCredential, SessionManager};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
pub use verifier::{IdentityVerifier, VerificationOutcome};
