//! Session record types.
//!
//! A session binds one issued bearer credential to the user identity that
//! was verified when it was minted. Records are written once and never
//! deleted; expiry and logout are logical states derived from the record.
//!
//! ```text
//!                 now >= expires_at
//!   ┌────────┐ ─────────────────────► ┌─────────┐
//!   │ Active │                        │ Expired │
//!   └────────┘ ─────────────────────► └─────────┘
//!               revoke                ┌───────────┐
//!              ─────────────────────► │ LoggedOut │
//!                                     └───────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Default stored lifetime of a session record.
pub const DEFAULT_SESSION_TTL: Duration = Duration::days(1);

/// Token kind reported by the federation server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenType {
    /// OAuth-style bearer token.
    #[default]
    Bearer,
}

/// The federation proof presented at registration.
///
/// Retained on the session for audit only. It is never re-validated.
#[derive(Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct FederationProof {
    /// Access token issued by the user's home server.
    #[builder(into)]
    pub access_token: Zeroizing<String>,

    /// Lifetime hint of the access token, in seconds.
    pub expires_in: u64,

    /// Server that issued the access token.
    #[builder(into)]
    pub server_name: String,

    /// Token kind.
    #[builder(default)]
    #[serde(default)]
    pub token_type: TokenType,
}

impl fmt::Debug for FederationProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationProof")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("server_name", &self.server_name)
            .field("token_type", &self.token_type)
            .finish()
    }
}

/// Logical state of a session at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Valid for lookups.
    Active,
    /// Past its expiry. Takes precedence over `LoggedOut`.
    Expired,
    /// Explicitly revoked.
    LoggedOut,
}

/// A persisted session, keyed by its issued token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct SessionRecord {
    /// The issued credential; the primary lookup key.
    #[builder(into)]
    pub token: String,

    /// Verified subject identifier, e.g. `@user:server.com`.
    #[builder(into)]
    pub user_id: String,

    /// Proof presented at issuance.
    pub federation_proof: FederationProof,

    /// When the session was issued.
    #[builder(default = Utc::now())]
    pub issued_at: DateTime<Utc>,

    /// When the session stops resolving.
    #[builder(default = issued_at + DEFAULT_SESSION_TTL)]
    pub expires_at: DateTime<Utc>,

    /// Set once on logout; never cleared.
    #[builder(default)]
    #[serde(default)]
    pub revoked: bool,
}

impl SessionRecord {
    /// Classifies the record at `now`.
    ///
    /// Expiry is checked before revocation, so a revoked session that has
    /// also expired reports [`SessionState::Expired`].
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if now >= self.expires_at {
            SessionState::Expired
        } else if self.revoked {
            SessionState::LoggedOut
        } else {
            SessionState::Active
        }
    }
}
