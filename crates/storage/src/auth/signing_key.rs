//! Signing-key record types.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Default lifetime of a generated signing key.
pub const DEFAULT_KEY_LIFETIME_MONTHS: u32 = 6;

/// Asymmetric key algorithms a signing key can be generated for.
///
/// Each algorithm maps to exactly one JWS algorithm tag, so a key's
/// algorithm also fixes the `alg` header of every credential it signs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyAlgorithm {
    /// RSA PKCS#1 v1.5 signatures (RS256).
    Rsa,
    /// RSA-PSS signatures (PS256).
    RsaPss,
    /// ECDSA over P-256 (ES256).
    Ec,
    /// Ed25519 signatures (EdDSA).
    Ed25519,
}

impl KeyAlgorithm {
    /// All supported algorithms.
    pub const ALL: [KeyAlgorithm; 4] = [Self::Rsa, Self::RsaPss, Self::Ec, Self::Ed25519];

    /// Returns the canonical lowercase name used in key identifiers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::RsaPss => "rsa-pss",
            Self::Ec => "ec",
            Self::Ed25519 => "ed25519",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a [`KeyAlgorithm`] or [`KeyId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseKeyIdError {
    /// The algorithm name is not one of the supported algorithms.
    #[error("unknown key algorithm: {0}")]
    UnknownAlgorithm(String),
    /// The identifier is not of the form `<algorithm>:<sequence>`.
    #[error("malformed key id: {0}")]
    Malformed(String),
}

impl FromStr for KeyAlgorithm {
    type Err = ParseKeyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa" => Ok(Self::Rsa),
            "rsa-pss" => Ok(Self::RsaPss),
            "ec" => Ok(Self::Ec),
            "ed25519" => Ok(Self::Ed25519),
            other => Err(ParseKeyIdError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

/// Composite signing-key identifier, rendered as `"<algorithm>:<sequence>"`.
///
/// Sequence numbers start at zero and increase by one for every key
/// generated for the same algorithm.
///
/// ```
/// use identity_storage::auth::{KeyAlgorithm, KeyId};
///
/// let id = KeyId::new(KeyAlgorithm::Rsa, 3);
/// assert_eq!(id.to_string(), "rsa:3");
/// assert_eq!("rsa:3".parse::<KeyId>().unwrap(), id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyId {
    algorithm: KeyAlgorithm,
    sequence: u64,
}

impl KeyId {
    /// Creates an identifier for the given algorithm and sequence.
    #[must_use]
    pub fn new(algorithm: KeyAlgorithm, sequence: u64) -> Self {
        Self { algorithm, sequence }
    }

    /// Identifier that follows `highest`, or sequence zero when nothing was persisted.
    #[must_use]
    pub fn next_after(algorithm: KeyAlgorithm, highest: Option<u64>) -> Self {
        Self::new(algorithm, highest.map_or(0, |seq| seq.saturating_add(1)))
    }

    /// The algorithm part of the identifier.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// The per-algorithm sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.sequence)
    }
}

impl FromStr for KeyId {
    type Err = ParseKeyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, sequence) =
            s.rsplit_once(':').ok_or_else(|| ParseKeyIdError::Malformed(s.to_owned()))?;
        let algorithm = algorithm.parse()?;
        let sequence = sequence.parse().map_err(|_| ParseKeyIdError::Malformed(s.to_owned()))?;
        Ok(Self { algorithm, sequence })
    }
}

impl TryFrom<String> for KeyId {
    type Error = ParseKeyIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<KeyId> for String {
    fn from(id: KeyId) -> Self {
        id.to_string()
    }
}

/// A persisted signing key pair.
///
/// The public half is stored as an SPKI PEM document. The private half is
/// stored sealed under the process-wide passphrase and is only opened when
/// a credential is signed.
///
/// A record is written once and never deleted. It stops being usable when
/// `expires_at` passes or when `invalidated` is set.
///
/// # Example
///
/// ```
/// use identity_storage::auth::{KeyAlgorithm, KeyId, SigningKeyRecord};
///
/// let record = SigningKeyRecord::builder()
///     .id(KeyId::new(KeyAlgorithm::Ed25519, 0))
///     .public_key("-----BEGIN PUBLIC KEY-----...")
///     .private_key("sealed".to_owned())
///     .build();
///
/// assert_eq!(record.algorithm(), KeyAlgorithm::Ed25519);
/// assert!(record.is_usable_at(record.created_at));
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct SigningKeyRecord {
    /// Identifier, also used as the `kid` header of signed credentials.
    pub id: KeyId,

    /// Public key, SPKI PEM.
    #[builder(into)]
    pub public_key: String,

    /// Private key, PKCS#8 PEM sealed under the configured passphrase.
    #[builder(into)]
    pub private_key: Zeroizing<String>,

    /// When the key was generated.
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,

    /// When the key stops being handed out for signing.
    #[builder(default = default_expiry(created_at))]
    pub expires_at: DateTime<Utc>,

    /// Manual invalidation flag, independent of `expires_at`.
    #[builder(default)]
    #[serde(default)]
    pub invalidated: bool,
}

fn default_expiry(created_at: DateTime<Utc>) -> DateTime<Utc> {
    expiry_after(created_at, DEFAULT_KEY_LIFETIME_MONTHS)
}

/// Adds `months` calendar months to `created_at`, saturating at the maximum
/// representable instant.
#[must_use]
pub fn expiry_after(created_at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    created_at.checked_add_months(Months::new(months)).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl SigningKeyRecord {
    /// The algorithm this key was generated for.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.id.algorithm()
    }

    /// The per-algorithm sequence number.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.id.sequence()
    }

    /// Whether the key has passed its expiry at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the key may still sign new credentials at `now`.
    #[must_use]
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && !self.is_expired_at(now)
    }
}

impl fmt::Debug for SigningKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyRecord")
            .field("id", &self.id)
            .field("public_key", &self.public_key)
            .field("private_key", &"<sealed>")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}
