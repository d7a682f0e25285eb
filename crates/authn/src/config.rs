//! Configuration for the key and session lifecycle managers.
//!
//! [`IdentityConfig`] carries the signing policy (default algorithm, key
//! lifetime, RSA modulus), the credential and session windows, and the
//! passphrase that seals private keys at rest.

use std::time::Duration;

use identity_storage::auth::{DEFAULT_KEY_LIFETIME_MONTHS, KeyAlgorithm};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Default validity window embedded in signed credentials (24 hours).
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default stored lifetime of a session record (1 day).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default RSA modulus length in bits.
pub const DEFAULT_RSA_MODULUS_LENGTH: usize = 4096;

/// Smallest RSA modulus accepted by configuration.
///
/// The signing backend refuses RSA keys below 2048 bits.
pub const MIN_RSA_MODULUS_LENGTH: usize = 2048;

/// Passphrase used when none is configured.
pub const DEFAULT_KEY_PASSPHRASE: &str = "default";

/// Errors raised when a configuration fails validation.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid configuration: {field}: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid { field, reason: reason.into() }
    }
}

/// Argon2id cost parameters for sealing private keys.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KdfConfig {
    /// Memory cost in KiB.
    #[serde(default = "default_kdf_memory_kib")]
    #[builder(default = default_kdf_memory_kib())]
    pub memory_kib: u32,

    /// Iteration count.
    #[serde(default = "default_kdf_iterations")]
    #[builder(default = default_kdf_iterations())]
    pub iterations: u32,

    /// Degree of parallelism.
    #[serde(default = "default_kdf_parallelism")]
    #[builder(default = default_kdf_parallelism())]
    pub parallelism: u32,
}

fn default_kdf_memory_kib() -> u32 {
    19 * 1024
}

fn default_kdf_iterations() -> u32 {
    2
}

fn default_kdf_parallelism() -> u32 {
    1
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_kdf_memory_kib(),
            iterations: default_kdf_iterations(),
            parallelism: default_kdf_parallelism(),
        }
    }
}

/// Configuration for [`SigningKeyManager`](crate::SigningKeyManager) and
/// [`SessionManager`](crate::SessionManager).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use identity_authn::IdentityConfig;
/// use identity_storage::auth::KeyAlgorithm;
///
/// let config = IdentityConfig::builder()
///     .default_algorithm(KeyAlgorithm::Rsa)
///     .key_passphrase("correct horse battery staple")
///     .credential_ttl(Duration::from_secs(3600))
///     .build()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityConfig {
    /// Algorithm used for new credentials.
    #[serde(default = "default_algorithm")]
    pub(crate) default_algorithm: KeyAlgorithm,

    /// Passphrase sealing private keys at rest.
    #[serde(skip_serializing, default = "default_passphrase")]
    pub(crate) key_passphrase: Zeroizing<String>,

    /// RSA modulus length in bits for newly generated RSA keys.
    #[serde(default = "default_rsa_modulus_length")]
    pub(crate) rsa_modulus_length: usize,

    /// Validity window embedded in each signed credential.
    #[serde(with = "humantime_serde", default = "default_credential_ttl")]
    pub(crate) credential_ttl: Duration,

    /// Stored lifetime of each session record.
    #[serde(with = "humantime_serde", default = "default_session_ttl")]
    pub(crate) session_ttl: Duration,

    /// Lifetime of each generated signing key, in months.
    #[serde(default = "default_key_lifetime_months")]
    pub(crate) key_lifetime_months: u32,

    /// Cost parameters for deriving the sealing key.
    #[serde(default)]
    pub(crate) kdf: KdfConfig,
}

fn default_algorithm() -> KeyAlgorithm {
    KeyAlgorithm::Ed25519
}

fn default_passphrase() -> Zeroizing<String> {
    Zeroizing::new(DEFAULT_KEY_PASSPHRASE.to_owned())
}

fn default_rsa_modulus_length() -> usize {
    DEFAULT_RSA_MODULUS_LENGTH
}

fn default_credential_ttl() -> Duration {
    DEFAULT_CREDENTIAL_TTL
}

fn default_session_ttl() -> Duration {
    DEFAULT_SESSION_TTL
}

fn default_key_lifetime_months() -> u32 {
    DEFAULT_KEY_LIFETIME_MONTHS
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("default_algorithm", &self.default_algorithm)
            .field("key_passphrase", &"<redacted>")
            .field("rsa_modulus_length", &self.rsa_modulus_length)
            .field("credential_ttl", &self.credential_ttl)
            .field("session_ttl", &self.session_ttl)
            .field("key_lifetime_months", &self.key_lifetime_months)
            .field("kdf", &self.kdf)
            .finish()
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            key_passphrase: default_passphrase(),
            rsa_modulus_length: default_rsa_modulus_length(),
            credential_ttl: default_credential_ttl(),
            session_ttl: default_session_ttl(),
            key_lifetime_months: default_key_lifetime_months(),
            kdf: KdfConfig::default(),
        }
    }
}

#[bon::bon]
impl IdentityConfig {
    /// Creates a new configuration, validating all fields.
    ///
    /// # Optional Fields
    ///
    /// * `default_algorithm` - Algorithm for new credentials (default: Ed25519).
    /// * `key_passphrase` - Passphrase sealing private keys (default: `"default"`).
    /// * `rsa_modulus_length` - RSA modulus in bits (default: 4096).
    /// * `credential_ttl` - Credential validity window (default: 24 hours).
    /// * `session_ttl` - Session record lifetime (default: 1 day).
    /// * `key_lifetime_months` - Signing key lifetime (default: 6 months).
    /// * `kdf` - Argon2id cost parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The passphrase is empty
    /// - Either TTL is zero
    /// - The key lifetime is zero months
    /// - The RSA modulus is below [`MIN_RSA_MODULUS_LENGTH`]
    #[builder]
    pub fn new(
        #[builder(default = KeyAlgorithm::Ed25519)] default_algorithm: KeyAlgorithm,
        #[builder(into, default = DEFAULT_KEY_PASSPHRASE.to_owned())] key_passphrase: String,
        #[builder(default = DEFAULT_RSA_MODULUS_LENGTH)] rsa_modulus_length: usize,
        #[builder(default = DEFAULT_CREDENTIAL_TTL)] credential_ttl: Duration,
        #[builder(default = DEFAULT_SESSION_TTL)] session_ttl: Duration,
        #[builder(default = DEFAULT_KEY_LIFETIME_MONTHS)] key_lifetime_months: u32,
        #[builder(default)] kdf: KdfConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            default_algorithm,
            key_passphrase: Zeroizing::new(key_passphrase),
            rsa_modulus_length,
            credential_ttl,
            session_ttl,
            key_lifetime_months,
            kdf,
        };
        config.validate()?;
        Ok(config)
    }

    /// Re-checks invariants, e.g. after deserialization.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_passphrase.is_empty() {
            return Err(ConfigError::invalid("key_passphrase", "cannot be empty"));
        }
        if self.credential_ttl.is_zero() {
            return Err(ConfigError::invalid("credential_ttl", "must be greater than zero"));
        }
        if self.session_ttl.is_zero() {
            return Err(ConfigError::invalid("session_ttl", "must be greater than zero"));
        }
        if self.key_lifetime_months == 0 {
            return Err(ConfigError::invalid("key_lifetime_months", "must be at least one"));
        }
        if self.rsa_modulus_length < MIN_RSA_MODULUS_LENGTH {
            return Err(ConfigError::invalid(
                "rsa_modulus_length",
                format!("must be at least {MIN_RSA_MODULUS_LENGTH} bits"),
            ));
        }
        // Argon2 needs at least 8 KiB per lane.
        let memory_too_small =
            self.kdf.parallelism.checked_mul(8).is_none_or(|min| self.kdf.memory_kib < min);
        if memory_too_small || self.kdf.iterations == 0 {
            return Err(ConfigError::invalid("kdf", "cost parameters out of range"));
        }
        Ok(())
    }

    /// Algorithm used for new credentials.
    #[must_use]
    pub fn default_algorithm(&self) -> KeyAlgorithm {
        self.default_algorithm
    }

    /// Passphrase sealing private keys at rest.
    #[must_use]
    pub fn key_passphrase(&self) -> &str {
        &self.key_passphrase
    }

    /// RSA modulus length in bits.
    #[must_use]
    pub fn rsa_modulus_length(&self) -> usize {
        self.rsa_modulus_length
    }

    /// Validity window embedded in each signed credential.
    #[must_use]
    pub fn credential_ttl(&self) -> Duration {
        self.credential_ttl
    }

    /// Stored lifetime of each session record.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Lifetime of each generated signing key, in months.
    #[must_use]
    pub fn key_lifetime_months(&self) -> u32 {
        self.key_lifetime_months
    }

    /// Argon2id cost parameters.
    #[must_use]
    pub fn kdf(&self) -> &KdfConfig {
        &self.kdf
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = IdentityConfig::builder().build().unwrap();
        assert_eq!(config.default_algorithm(), KeyAlgorithm::Ed25519);
        assert_eq!(config.key_passphrase(), "default");
        assert_eq!(config.rsa_modulus_length(), 4096);
        assert_eq!(config.credential_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.session_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.key_lifetime_months(), 6);
        assert_eq!(config.kdf(), &KdfConfig::default());
    }

    #[test]
    fn test_default_matches_builder() {
        let built = IdentityConfig::builder().build().unwrap();
        let default = IdentityConfig::default();
        assert_eq!(format!("{built:?}"), format!("{default:?}"));
    }

    #[rstest]
    #[case::empty_passphrase(IdentityConfig::builder().key_passphrase("").build(), "key_passphrase")]
    #[case::zero_credential_ttl(
        IdentityConfig::builder().credential_ttl(Duration::ZERO).build(),
        "credential_ttl"
    )]
    #[case::zero_session_ttl(
        IdentityConfig::builder().session_ttl(Duration::ZERO).build(),
        "session_ttl"
    )]
    #[case::zero_key_lifetime(
        IdentityConfig::builder().key_lifetime_months(0).build(),
        "key_lifetime_months"
    )]
    #[case::small_modulus(
        IdentityConfig::builder().rsa_modulus_length(512).build(),
        "rsa_modulus_length"
    )]
    #[case::modulus_below_signing_minimum(
        IdentityConfig::builder().rsa_modulus_length(1024).build(),
        "rsa_modulus_length"
    )]
    #[case::zero_iterations(
        IdentityConfig::builder().kdf(KdfConfig::builder().iterations(0).build()).build(),
        "kdf"
    )]
    #[case::parallelism_overflow(
        IdentityConfig::builder()
            .kdf(KdfConfig::builder().parallelism(1_000_000_000).build())
            .build(),
        "kdf"
    )]
    fn test_validation_rejects(
        #[case] result: Result<IdentityConfig, ConfigError>,
        #[case] field: &str,
    ) {
        match result {
            Err(ConfigError::Invalid { field: got, .. }) => assert_eq!(got, field),
            other => panic!("expected invalid {field}, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_passphrase() {
        let config = IdentityConfig::builder().key_passphrase("hunter2").build().unwrap();
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn test_deserialization_with_defaults() {
        let json = r#"{
            "default_algorithm": "rsa",
            "credential_ttl": "12h",
            "key_passphrase": "from-env"
        }"#;

        let config: IdentityConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        assert_eq!(config.default_algorithm(), KeyAlgorithm::Rsa);
        assert_eq!(config.credential_ttl(), Duration::from_secs(12 * 3600));
        assert_eq!(config.session_ttl(), DEFAULT_SESSION_TTL);
        assert_eq!(config.key_passphrase(), "from-env");
    }

    #[test]
    fn test_passphrase_not_serialized() {
        let config = IdentityConfig::builder().key_passphrase("secret").build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"session_ttl\":\"1day\""));
    }

    #[test]
    fn test_deserialized_kdf_overflow_is_rejected() {
        let json = r#"{"kdf": {"memory_kib": 19456, "iterations": 2, "parallelism": 1000000000}}"#;
        let config: IdentityConfig = serde_json::from_str(json).unwrap();

        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field: "kdf", .. })), "{result:?}");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<IdentityConfig, _> = serde_json::from_str(r#"{"bogus": 1}"#);
        assert!(result.is_err());
    }
}
