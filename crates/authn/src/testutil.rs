//! Shared test utilities for key and session lifecycle testing.
//!
//! Provides cheap configurations (minimum RSA modulus, minimal Argon2 costs),
//! an instrumented [`KeyPairGenerator`], a canned [`IdentityVerifier`] and
//! the [`assert_auth_error!`](crate::assert_auth_error) macro. It is
//! feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! identity-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use identity_authn::testutil::{CountingGenerator, test_config};
//! ```

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use identity_storage::auth::{FederationProof, KeyAlgorithm, KeyId, SigningKeyRecord};

use crate::{
    config::{IdentityConfig, KdfConfig},
    crypto::{GeneratedKeyPair, GenerationOptions, KeyPairGenerator, NativeKeyGenerator, PassphraseCipher},
    error::KeyGenerationError,
    verifier::{IdentityVerifier, VerificationOutcome},
};

/// Smallest RSA modulus the configuration accepts; the cheapest that still signs.
pub const TEST_RSA_MODULUS_LENGTH: usize = crate::config::MIN_RSA_MODULUS_LENGTH;

/// Passphrase used by [`test_cipher`] and [`test_config`].
pub const TEST_PASSPHRASE: &str = "test-passphrase";

/// Minimal Argon2id costs.
#[must_use]
pub fn test_kdf() -> KdfConfig {
    KdfConfig::builder().memory_kib(64).iterations(1).parallelism(1).build()
}

/// Cipher matching [`test_config`].
///
/// # Panics
///
/// Never in practice; [`test_kdf`] is a valid parameter set.
#[must_use]
pub fn test_cipher() -> PassphraseCipher {
    PassphraseCipher::new(TEST_PASSPHRASE, &test_kdf()).expect("test KDF parameters are valid")
}

/// Generation options with [`TEST_RSA_MODULUS_LENGTH`].
#[must_use]
pub fn test_options() -> GenerationOptions {
    GenerationOptions::builder().rsa_modulus_length(TEST_RSA_MODULUS_LENGTH).build()
}

/// Configuration issuing with `algorithm`, using cheap key parameters.
///
/// # Panics
///
/// Never in practice; all values are within range.
#[must_use]
pub fn test_config(algorithm: KeyAlgorithm) -> IdentityConfig {
    IdentityConfig::builder()
        .default_algorithm(algorithm)
        .key_passphrase(TEST_PASSPHRASE)
        .rsa_modulus_length(TEST_RSA_MODULUS_LENGTH)
        .kdf(test_kdf())
        .build()
        .expect("test configuration is valid")
}

/// Generates real key material for `algorithm`, sealed with [`test_cipher`].
///
/// # Panics
///
/// Panics if generation fails.
pub async fn generate_signing_key(algorithm: KeyAlgorithm, sequence: u64) -> SigningKeyRecord {
    let pair = NativeKeyGenerator::new(test_cipher())
        .generate(algorithm, test_options())
        .await
        .expect("test key generation");
    SigningKeyRecord::builder()
        .id(KeyId::new(algorithm, sequence))
        .public_key(pair.public_key_pem)
        .private_key(pair.private_key_sealed)
        .build()
}

/// A [`KeyPairGenerator`] that counts calls and can be slowed down or made
/// to fail. Successful calls delegate to [`NativeKeyGenerator`] with
/// [`test_cipher`].
#[derive(Debug)]
pub struct CountingGenerator {
    inner: NativeKeyGenerator,
    calls: AtomicUsize,
    delay: Option<Duration>,
    failing: AtomicBool,
}

impl Default for CountingGenerator {
    fn default() -> Self {
        Self {
            inner: NativeKeyGenerator::new(test_cipher()),
            calls: AtomicUsize::new(0),
            delay: None,
            failing: AtomicBool::new(false),
        }
    }
}

impl CountingGenerator {
    /// A generator that succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A generator that sleeps for `delay` before generating.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::default() }
    }

    /// A generator whose every call fails.
    #[must_use]
    pub fn failing() -> Self {
        let generator = Self::default();
        generator.set_failing(true);
        generator
    }

    /// Toggles injected failures.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `generate` calls so far, failed ones included.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyPairGenerator for CountingGenerator {
    async fn generate(
        &self,
        algorithm: KeyAlgorithm,
        options: GenerationOptions,
    ) -> Result<GeneratedKeyPair, KeyGenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KeyGenerationError::Primitive {
                algorithm,
                message: "injected failure".into(),
            });
        }
        self.inner.generate(algorithm, options).await
    }
}

/// An [`IdentityVerifier`] returning a fixed outcome.
#[derive(Debug)]
pub struct StaticVerifier {
    outcome: VerificationOutcome,
    calls: AtomicUsize,
}

impl StaticVerifier {
    /// Verifies every proof as `user_id`.
    #[must_use]
    pub fn verified(user_id: &str) -> Self {
        Self { outcome: VerificationOutcome::Verified(user_id.to_owned()), calls: AtomicUsize::new(0) }
    }

    /// Rejects every proof with `reason`.
    #[must_use]
    pub fn unverified(reason: &str) -> Self {
        Self { outcome: VerificationOutcome::Unverified(reason.to_owned()), calls: AtomicUsize::new(0) }
    }

    /// Number of proofs checked so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, _proof: &FederationProof) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}

/// Assert that a result is an `Err` of the given [`AuthError`](crate::AuthError) variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use identity_authn::{AuthError, assert_auth_error};
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenLoggedOut);
/// assert_auth_error!(result, TokenLoggedOut);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}
