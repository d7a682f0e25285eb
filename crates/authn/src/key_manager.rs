//! Signing-key lifecycle with per-algorithm single-flight acquisition.
//!
//! [`SigningKeyManager::acquire_key`] hands out the usable key with the
//! highest sequence for an algorithm, generating and persisting a new one
//! when none exists. Concurrent acquisitions for the same algorithm are
//! coalesced through a [`KeyJobRegistry`] so at most one generation runs.
//!
//! # Flow
//!
//! ```text
//! acquire_key(alg)
//!   → registry entry for alg?  yes → await its outcome
//!                              no  → register entry, spawn job:
//!        → most recent usable key in store? → settle with it
//!        → concurrently: highest sequence + generate key pair
//!        → persist "<alg>:<highest + 1>" (or "<alg>:0")
//!        → settle with the new record, remove entry
//! ```
//!
//! The job runs on its own task, so a caller that stops waiting does not
//! cancel work other waiters depend on.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::Utc;
use fail::fail_point;
use identity_storage::auth::{
    DEFAULT_KEY_LIFETIME_MONTHS, KeyAlgorithm, KeyId, SigningKeyRecord, SigningKeyStore,
    expiry_after,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::Instrument;

use crate::{
    crypto::{GenerationOptions, KeyPairGenerator},
    error::KeyAcquisitionError,
};

/// Outcome shared by every caller coalesced onto one acquisition.
pub type KeyAcquisitionResult = Result<SigningKeyRecord, Arc<KeyAcquisitionError>>;

type OutcomeReceiver = watch::Receiver<Option<KeyAcquisitionResult>>;

/// In-flight key acquisitions, one per algorithm.
///
/// Checking for an entry and inserting one happen under a single lock.
/// Entries are removed as soon as their job settles, so the next
/// acquisition after that re-reads storage.
#[derive(Debug, Default)]
pub struct KeyJobRegistry {
    jobs: Mutex<HashMap<KeyAlgorithm, OutcomeReceiver>>,
}

enum Joined {
    Leader(JobGuard, OutcomeReceiver),
    Follower(OutcomeReceiver),
}

impl KeyJobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of acquisitions currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether an acquisition for `algorithm` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, algorithm: KeyAlgorithm) -> bool {
        self.jobs.lock().contains_key(&algorithm)
    }

    fn join(self: &Arc<Self>, algorithm: KeyAlgorithm) -> Joined {
        let mut jobs = self.jobs.lock();
        if let Some(receiver) = jobs.get(&algorithm) {
            return Joined::Follower(receiver.clone());
        }
        let (sender, receiver) = watch::channel(None);
        jobs.insert(algorithm, receiver.clone());
        let guard = JobGuard { registry: Arc::clone(self), algorithm, sender: Some(sender) };
        Joined::Leader(guard, receiver)
    }
}

/// Owned by the task running an acquisition. Publishes the outcome and
/// removes the registry entry. If dropped unsettled, waiters observe
/// [`KeyAcquisitionError::Abandoned`].
struct JobGuard {
    registry: Arc<KeyJobRegistry>,
    algorithm: KeyAlgorithm,
    sender: Option<watch::Sender<Option<KeyAcquisitionResult>>>,
}

impl JobGuard {
    fn settle(mut self, outcome: KeyAcquisitionResult) {
        let mut jobs = self.registry.jobs.lock();
        jobs.remove(&self.algorithm);
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(outcome));
        }
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if self.sender.take().is_some() {
            self.registry.jobs.lock().remove(&self.algorithm);
            tracing::warn!(algorithm = %self.algorithm, "key acquisition abandoned");
        }
    }
}

async fn wait_for_outcome(mut receiver: OutcomeReceiver) -> KeyAcquisitionResult {
    let outcome = match receiver.wait_for(Option::is_some).await {
        Ok(value) => value.clone(),
        Err(_) => None,
    };
    outcome.unwrap_or_else(|| Err(Arc::new(KeyAcquisitionError::Abandoned)))
}

/// Counters for key acquisition.
///
/// All counters use `Ordering::Relaxed`; they are independent and only
/// read for reporting.
#[derive(Debug, Default)]
pub struct KeyManagerMetrics {
    acquisitions: AtomicU64,
    coalesced: AtomicU64,
    storage_hits: AtomicU64,
    generated: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`KeyManagerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyManagerMetricsSnapshot {
    /// Calls to `acquire_key`.
    pub acquisitions: u64,
    /// Calls that joined an acquisition already in flight.
    pub coalesced: u64,
    /// Jobs settled with a key already in storage.
    pub storage_hits: u64,
    /// Jobs that generated and persisted a new key.
    pub generated: u64,
    /// Jobs settled with a failure.
    pub failures: u64,
}

impl KeyManagerMetrics {
    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> KeyManagerMetricsSnapshot {
        KeyManagerMetricsSnapshot {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            storage_hits: self.storage_hits.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Hands out usable signing keys, generating them on demand.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use identity_authn::{
///     GenerationOptions, IdentityConfig, KeyJobRegistry, NativeKeyGenerator,
///     PassphraseCipher, SigningKeyManager,
/// };
/// use identity_storage::auth::{KeyAlgorithm, MemorySigningKeyStore};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IdentityConfig::default();
/// let generator = NativeKeyGenerator::new(PassphraseCipher::from_config(&config)?);
/// let manager = SigningKeyManager::builder()
///     .store(Arc::new(MemorySigningKeyStore::new()))
///     .generator(Arc::new(generator))
///     .registry(Arc::new(KeyJobRegistry::new()))
///     .key_lifetime_months(config.key_lifetime_months())
///     .build();
///
/// let key = manager
///     .acquire_key(KeyAlgorithm::Ed25519, GenerationOptions::from(&config))
///     .await?;
/// assert_eq!(key.id.to_string(), "ed25519:0");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, bon::Builder)]
pub struct SigningKeyManager {
    store: Arc<dyn SigningKeyStore>,
    generator: Arc<dyn KeyPairGenerator>,
    #[builder(default)]
    registry: Arc<KeyJobRegistry>,
    #[builder(default = DEFAULT_KEY_LIFETIME_MONTHS)]
    key_lifetime_months: u32,
    #[builder(default)]
    metrics: Arc<KeyManagerMetrics>,
}

impl std::fmt::Debug for SigningKeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyManager")
            .field("registry", &self.registry)
            .field("key_lifetime_months", &self.key_lifetime_months)
            .finish_non_exhaustive()
    }
}

impl SigningKeyManager {
    /// Returns a usable key for `algorithm`, generating one if necessary.
    ///
    /// Concurrent calls for the same algorithm share one outcome and cause
    /// at most one generation.
    ///
    /// # Errors
    ///
    /// Returns the shared [`KeyAcquisitionError`] if reading storage,
    /// generating the key pair, or persisting it fails. Nothing is persisted
    /// on failure.
    #[tracing::instrument(skip(self, options))]
    pub async fn acquire_key(
        &self,
        algorithm: KeyAlgorithm,
        options: GenerationOptions,
    ) -> KeyAcquisitionResult {
        KeyManagerMetrics::incr(&self.metrics.acquisitions);

        let receiver = match self.registry.join(algorithm) {
            Joined::Leader(guard, receiver) => {
                let job = KeyJob {
                    store: Arc::clone(&self.store),
                    generator: Arc::clone(&self.generator),
                    metrics: Arc::clone(&self.metrics),
                    key_lifetime_months: self.key_lifetime_months,
                };
                let span = tracing::info_span!("key_acquisition_job", algorithm = %algorithm);
                tokio::spawn(
                    async move {
                        let outcome = job.run(algorithm, options).await;
                        guard.settle(outcome);
                    }
                    .instrument(span),
                );
                receiver
            },
            Joined::Follower(receiver) => {
                KeyManagerMetrics::incr(&self.metrics.coalesced);
                tracing::debug!("joined in-flight key acquisition");
                receiver
            },
        };

        wait_for_outcome(receiver).await
    }

    /// Acquisition counters.
    #[must_use]
    pub fn metrics(&self) -> &KeyManagerMetrics {
        &self.metrics
    }

    /// The registry coalescing acquisitions.
    #[must_use]
    pub fn registry(&self) -> &Arc<KeyJobRegistry> {
        &self.registry
    }

    /// The underlying key store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SigningKeyStore> {
        &self.store
    }
}

struct KeyJob {
    store: Arc<dyn SigningKeyStore>,
    generator: Arc<dyn KeyPairGenerator>,
    metrics: Arc<KeyManagerMetrics>,
    key_lifetime_months: u32,
}

impl KeyJob {
    async fn run(&self, algorithm: KeyAlgorithm, options: GenerationOptions) -> KeyAcquisitionResult {
        let outcome = self.acquire(algorithm, options).await;
        if let Err(err) = &outcome {
            KeyManagerMetrics::incr(&self.metrics.failures);
            tracing::error!(error = %err, "key acquisition failed");
        }
        outcome.map_err(Arc::new)
    }

    async fn acquire(
        &self,
        algorithm: KeyAlgorithm,
        options: GenerationOptions,
    ) -> Result<SigningKeyRecord, KeyAcquisitionError> {
        if let Some(key) = self
            .store
            .get_most_recent_key(algorithm)
            .await
            .map_err(KeyAcquisitionError::StorageRead)?
        {
            KeyManagerMetrics::incr(&self.metrics.storage_hits);
            tracing::debug!(kid = %key.id, "reusing stored signing key");
            return Ok(key);
        }

        let (highest, pair) = tokio::try_join!(
            async {
                self.store
                    .get_highest_sequence(algorithm)
                    .await
                    .map_err(KeyAcquisitionError::StorageRead)
            },
            async {
                self.generator
                    .generate(algorithm, options)
                    .await
                    .map_err(KeyAcquisitionError::Generation)
            },
        )?;

        let created_at = Utc::now();
        let record = SigningKeyRecord::builder()
            .id(KeyId::next_after(algorithm, highest))
            .public_key(pair.public_key_pem)
            .private_key(pair.private_key_sealed)
            .created_at(created_at)
            .expires_at(expiry_after(created_at, self.key_lifetime_months))
            .build();

        fail_point!("key-manager-before-persist", |_| {
            Err(KeyAcquisitionError::Persistence(identity_storage::StorageError::internal(
                "injected before persist",
            )))
        });

        self.store.put_key(&record).await.map_err(KeyAcquisitionError::Persistence)?;

        KeyManagerMetrics::incr(&self.metrics.generated);
        tracing::info!(kid = %record.id, expires_at = %record.expires_at, "generated signing key");
        Ok(record)
    }
}
