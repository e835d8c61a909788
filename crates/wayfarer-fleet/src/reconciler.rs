//! Keeps the rendezvous name pointing at the gateway's current instance.
//!
//! A replaced gateway instance comes up with new public addresses, often a few
//! seconds after the fleet manager reports it. Each lifecycle event drives one
//! reconciliation attempt:
//!
//! ```text
//! Triggered -> ResolvingAddress -> Upserting -> Done
//!                     |
//!                     +-> (timeout) -> Aborted
//! ```
//!
//! Families that resolved are published even when another required family
//! never does; a stale record for the missing family is left in place.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, info, warn};
use wayfarer_wireguard::AddressFamily;

use crate::error::{FleetError, Result};
use crate::rendezvous::RendezvousPublisher;
use crate::types::{FleetEvent, Instance, RendezvousRecord};

/// Default record time to live. Bounds how long clients follow a replaced instance.
pub const DEFAULT_TTL_SECS: u32 = 60;

/// Looks up the current state of a fleet instance.
pub trait InstanceResolver: Send + Sync {
    /// Describes an instance; `None` if the fleet manager does not know it yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup itself fails.
    fn describe(&self, instance_id: &str)
    -> impl Future<Output = Result<Option<Instance>>> + Send;
}

/// Exponential backoff with an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Upper bound for a single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Total time allowed for all attempts.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Sets the overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the delay that follows `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier.max(1.0)).min(self.max_delay)
    }
}

/// Settings for one gateway's reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Rendezvous name clients connect to.
    pub rendezvous_name: String,
    /// Record time to live in seconds.
    pub ttl: u32,
    /// Families the deployment requires.
    pub families: Vec<AddressFamily>,
    /// Resolution retry policy.
    pub retry: RetryPolicy,
}

impl ReconcilerConfig {
    /// Creates a config for `rendezvous_name` requiring IPv4 only.
    #[must_use]
    pub fn new(rendezvous_name: impl Into<String>) -> Self {
        Self {
            rendezvous_name: rendezvous_name.into(),
            ttl: DEFAULT_TTL_SECS,
            families: vec![AddressFamily::V4],
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the required families. Repeats are ignored.
    #[must_use]
    pub fn with_families(mut self, families: impl IntoIterator<Item = AddressFamily>) -> Self {
        self.families.clear();
        for family in families {
            if !self.families.contains(&family) {
                self.families.push(family);
            }
        }
        self
    }

    /// Sets the record time to live.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of a reconciliation attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The event required no action.
    Skipped,
    /// These records were published.
    Published(Vec<RendezvousRecord>),
}

/// Reconciles the rendezvous name with fleet lifecycle events.
#[derive(Debug)]
pub struct EndpointReconciler<R, P> {
    resolver: R,
    publisher: P,
    config: ReconcilerConfig,
}

impl<R: InstanceResolver, P: RendezvousPublisher> EndpointReconciler<R, P> {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(resolver: R, publisher: P, config: ReconcilerConfig) -> Self {
        Self {
            resolver,
            publisher,
            config,
        }
    }

    /// The publisher records are sent to.
    #[must_use]
    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Runs one reconciliation attempt for `event`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::RendezvousUpdateFailed`] if publishing fails, or
    /// [`FleetError::AddressResolutionFailed`] if a required family never
    /// resolved. In the latter case the families that did resolve have
    /// already been published.
    pub async fn reconcile(&self, event: &FleetEvent) -> Result<ReconcileOutcome> {
        if !event.status.is_live() {
            info!(instance_id = %event.instance_id, status = %event.status, "skipping reconciliation");
            return Ok(ReconcileOutcome::Skipped);
        }

        let started = Instant::now();
        let resolved = self.resolve(&event.instance_id).await;
        let waited = started.elapsed();

        let records: Vec<RendezvousRecord> = resolved
            .iter()
            .map(|ip| RendezvousRecord::new(&self.config.rendezvous_name, *ip, self.config.ttl))
            .collect();

        let mut publish_error = None;
        for record in &records {
            match self.publisher.upsert(record).await {
                Ok(()) => info!(
                    name = %record.name,
                    record_type = %record.record_type,
                    value = %record.value,
                    ttl = record.ttl,
                    "published rendezvous record"
                ),
                Err(e) => {
                    warn!(name = %record.name, record_type = %record.record_type, error = %e, "rendezvous update failed");
                    publish_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = publish_error {
            return Err(e);
        }

        if let Some(family) = self
            .config
            .families
            .iter()
            .copied()
            .find(|f| !resolved.iter().any(|ip| AddressFamily::of(ip) == *f))
        {
            warn!(instance_id = %event.instance_id, %family, ?waited, "address resolution failed");
            return Err(FleetError::AddressResolutionFailed {
                instance_id: event.instance_id.clone(),
                family,
                waited,
            });
        }

        Ok(ReconcileOutcome::Published(records))
    }

    /// Resolves as many required families as possible before the deadline.
    async fn resolve(&self, instance_id: &str) -> Vec<std::net::IpAddr> {
        let retry = self.config.retry;
        let deadline = Instant::now() + retry.timeout;
        let mut delay = retry.initial;
        let mut found: Vec<std::net::IpAddr> = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match timeout_at(deadline, self.resolver.describe(instance_id)).await {
                Ok(Ok(Some(instance))) => {
                    for family in &self.config.families {
                        if found.iter().any(|ip| AddressFamily::of(ip) == *family) {
                            continue;
                        }
                        if let Some(ip) = instance.address(*family) {
                            found.push(ip);
                        }
                    }
                }
                Ok(Ok(None)) => debug!(instance_id, attempt, "instance not visible yet"),
                Ok(Err(e)) => warn!(instance_id, attempt, error = %e, "instance lookup failed"),
                Err(_) => warn!(instance_id, attempt, "instance lookup outlived the resolution deadline"),
            }

            if found.len() == self.config.families.len() {
                return found;
            }

            let now = Instant::now();
            if now >= deadline {
                return found;
            }
            let pause = delay.min(deadline - now);
            debug!(instance_id, attempt, ?pause, resolved = found.len(), "waiting for addresses");
            sleep(pause).await;
            delay = retry.next_delay(delay);
        }
    }
}
