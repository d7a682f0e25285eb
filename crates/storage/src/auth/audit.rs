//! Audit logging for signing-key and session lifecycle operations.
//!
//! Every mutation of a key or session record is reported as an
//! [`AuditEvent`] naming who acted, on what, when, and with which outcome.
//!
//! # Architecture
//!
//! The [`AuditLogger`] trait enables different audit backends:
//!
//! - [`TracingAuditLogger`]: Emits structured `tracing` events at INFO level, suitable for log
//!   aggregation.
//! - [`NoopAuditLogger`]: Discards events.
//!
//! # Usage
//!
//! ```no_run
//! use identity_storage::auth::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("identity")
//!     .action(AuditAction::StoreKey)
//!     .resource("kid:rsa:0")
//!     .result(AuditResult::Success)
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Action performed on a key or session resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A new signing key was stored.
    StoreKey,
    /// A signing key was invalidated manually.
    InvalidateKey,
    /// A session was stored for a newly issued credential.
    StoreSession,
    /// A session was logged out.
    RevokeSession,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreKey => write!(f, "store_key"),
            Self::InvalidateKey => write!(f, "invalidate_key"),
            Self::StoreSession => write!(f, "store_session"),
            Self::RevokeSession => write!(f, "revoke_session"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation failed with the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Identity of the actor performing the operation.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier, see [`key_resource`] and [`session_resource`].
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Additional context (e.g. user id, expiry).
    #[builder(default)]
    pub metadata: HashMap<String, String>,
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: who performed the action
/// - `audit.action`: the operation (e.g., "store_key")
/// - `audit.resource`: what was affected
/// - `audit.result`: "success" or "failure: ..."
/// - `audit.metadata`: additional context as `k=v` pairs
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let mut pairs: Vec<String> =
            event.metadata.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        let metadata_str = pairs.join(", ");

        tracing::info!(
            audit.timestamp = %event.timestamp.to_rfc3339(),
            audit.actor = %event.actor,
            audit.action = %event.action,
            audit.resource = %event.resource,
            audit.result = %event.result,
            audit.metadata = %metadata_str,
            "audit_event"
        );
    }
}

/// No-op audit logger for testing and environments where audit is not needed.
#[derive(Debug, Clone, Copy)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}

/// Resource identifier for a signing key.
pub fn key_resource(kid: impl fmt::Display) -> String {
    format!("kid:{kid}")
}

/// Resource identifier for a session.
///
/// Tokens are bearer secrets, so only a short prefix is recorded.
pub fn session_resource(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("session:{prefix}…")
}
