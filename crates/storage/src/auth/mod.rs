//! Record types and storage traits for the credential and signing-key lifecycle.
//!
//! # Records
//!
//! - [`SessionRecord`]: one per issued credential, keyed by token
//! - [`SigningKeyRecord`]: one per generated key pair, keyed by [`KeyId`]
//!
//! # Storage Traits
//!
//! [`SessionStore`] and [`SigningKeyStore`] are the only persistence seams the
//! lifecycle managers see. Use [`MemorySessionStore`] and
//! [`MemorySigningKeyStore`] for testing.
//!
//! # Examples
//!
//! ```no_run
//! use identity_storage::auth::{
//!     KeyAlgorithm, KeyId, MemorySigningKeyStore, SigningKeyRecord, SigningKeyStore,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let store = MemorySigningKeyStore::new();
//!
//! let key = SigningKeyRecord::builder()
//!     .id(KeyId::new(KeyAlgorithm::Rsa, 0))
//!     .public_key("-----BEGIN PUBLIC KEY-----...")
//!     .private_key("sealed".to_owned())
//!     .build();
//!
//! store.put_key(&key).await.unwrap();
//!
//! let latest = store.get_most_recent_key(KeyAlgorithm::Rsa).await.unwrap();
//! assert_eq!(latest.map(|k| k.id), Some(key.id));
//! # });
//! ```

pub mod audit;
pub mod audited_store;
mod session;
mod signing_key;
mod store;

pub use session::{
    DEFAULT_SESSION_TTL, FederationProof, SessionRecord, SessionState, TokenType,
};
pub use signing_key::{
    DEFAULT_KEY_LIFETIME_MONTHS, KeyAlgorithm, KeyId, ParseKeyIdError, SigningKeyRecord,
    expiry_after,
};
pub use store::{MemorySessionStore, MemorySigningKeyStore, SessionStore, SigningKeyStore};
