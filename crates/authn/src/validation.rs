//! Signature algorithm policy.
//!
//! Maps [`KeyAlgorithm`] onto the JWS `alg` used when signing, and checks
//! the `alg` header of presented credentials.
//!
//! # Security
//!
//! - Only the asymmetric algorithms this crate can generate keys for are accepted
//! - Symmetric algorithms and `none` are always rejected
//! - The header `alg` must also match the algorithm of the key named by `kid`

use identity_storage::auth::KeyAlgorithm;
use jsonwebtoken::Algorithm;

use crate::error::AuthError;

/// JWS algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: shared-secret algorithms
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// JWS algorithms this crate signs and verifies with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "PS256", "ES256", "EdDSA"];

/// The JWS algorithm used for keys of `algorithm`.
///
/// ```
/// use identity_authn::validation::jws_algorithm;
/// use identity_storage::auth::KeyAlgorithm;
/// use jsonwebtoken::Algorithm;
///
/// assert_eq!(jws_algorithm(KeyAlgorithm::Rsa), Algorithm::RS256);
/// assert_eq!(jws_algorithm(KeyAlgorithm::Ed25519), Algorithm::EdDSA);
/// ```
#[must_use]
pub fn jws_algorithm(algorithm: KeyAlgorithm) -> Algorithm {
    match algorithm {
        KeyAlgorithm::Rsa => Algorithm::RS256,
        KeyAlgorithm::RsaPss => Algorithm::PS256,
        KeyAlgorithm::Ec => Algorithm::ES256,
        KeyAlgorithm::Ed25519 => Algorithm::EdDSA,
    }
}

/// Validate a credential's `alg` header against policy.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if `alg` is forbidden or not
/// in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use identity_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("PS256").is_ok());
/// assert!(validate_algorithm("ES256").is_ok());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("ES384").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not in accepted list"
        )));
    }

    Ok(())
}

/// Checks that a credential signed with `header_alg` may be verified with a
/// key of `algorithm`.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] on mismatch, which blocks
/// substituting one signature scheme for another under the same `kid`.
pub fn ensure_algorithm_matches_key(
    header_alg: Algorithm,
    algorithm: KeyAlgorithm,
) -> Result<(), AuthError> {
    let expected = jws_algorithm(algorithm);
    if header_alg == expected {
        Ok(())
    } else {
        Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{header_alg:?}' does not match key algorithm '{algorithm}'"
        )))
    }
}
