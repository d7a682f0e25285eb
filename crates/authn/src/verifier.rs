//! Federated identity verification seam.
//!
//! Registration trades a federation access token for a verified user id.
//! The transport of that call is not part of this crate; callers supply an
//! [`IdentityVerifier`] that performs it.

use async_trait::async_trait;
use identity_storage::auth::FederationProof;

/// Result of checking a [`FederationProof`] with its home server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// The proof is valid for this user id.
    Verified(String),
    /// The proof was rejected, or the home server could not be reached.
    Unverified(String),
}

/// Converts a federation access token into a verified user id.
///
/// Implementations own transport, timeouts and retries. Failures of any
/// kind are reported as [`VerificationOutcome::Unverified`].
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `proof` against `proof.server_name`.
    async fn verify(&self, proof: &FederationProof) -> VerificationOutcome;
}
