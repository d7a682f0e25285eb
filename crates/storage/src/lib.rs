//! Session and signing-key storage for the identity service.
//!
//! This crate defines the records the credential lifecycle persists and the
//! storage traits the lifecycle managers depend on. Persistence mechanics
//! live behind [`auth::SessionStore`] and [`auth::SigningKeyStore`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 identity-authn                              │
//! │      SessionManager            SigningKeyManager            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 identity-storage                            │
//! │      SessionStore trait        SigningKeyStore trait        │
//! │        (AuditedStore decorator, optional)                   │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │ MemorySessionStore           │ MemorySigningKeyStore        │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use identity_storage::auth::{
//!     MemorySessionStore, SessionRecord, SessionStore, FederationProof,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MemorySessionStore::new();
//!     let proof = FederationProof::builder()
//!         .access_token("opaque".to_owned())
//!         .expires_in(3600)
//!         .server_name("server.com")
//!         .build();
//!
//!     store
//!         .put_session(
//!             &SessionRecord::builder()
//!                 .token("tok")
//!                 .user_id("@user:server.com")
//!                 .federation_proof(proof)
//!                 .build(),
//!         )
//!         .await?;
//!
//!     store.mark_revoked("tok").await?;
//!     assert!(store.get_session("tok").await?.map(|s| s.revoked).unwrap_or(false));
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! All operations return [`StorageResult<T>`], which wraps potential
//! [`StorageError`] variants.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with record factories, failure-injecting store
//!   wrappers and assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]

pub mod auth;
pub mod error;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;

pub use error::{BoxError, StorageError, StorageResult};
pub use zeroize::Zeroizing;
