//! An at-least-once delivery queue synthesized from list and key-value
//! primitives.
//!
//! The backing [crate::store::Store] has no "pop with a lease" operation, so
//! [Queue] builds one from two independent calls: an atomic pop from the
//! topic list, followed by a write of a lease record under
//! `lease/{topic}/{claim_id}` with a store-enforced expiry. A message is
//! always in exactly one of three states:
//!
//! - **pending**: an envelope in the topic list, awaiting [Queue::dequeue]
//! - **claimed**: held by a [Claim] and backed by an unexpired lease record
//! - **removed**: acknowledged via [Claim::ack], deleted from the store
//!
//! A consumer that crashes or loses its network connection never
//! acknowledges; its lease eventually exceeds [Config::lease_ttl] and a
//! [Queue::sweep] returns the payload to the pending list. Duplicates across
//! such a requeue are expected; double delivery of the same claim is not (the
//! pop is atomic).
//!
//! # Failure Policy
//!
//! Store-facing helpers return typed errors internally, but the public
//! surface converts every transient [crate::store::Error] into a benign
//! empty/zero/no-op result plus a logged warning and a metric increment. The
//! queue degrades to "temporarily empty" instead of failing its callers;
//! callers that need confirmation poll [Queue::size].
//!
//! Two windows in the split design are accepted rather than hidden:
//!
//! - If the lease write fails after the pop succeeded, the payload is out of
//!   the list with no lease to recover it. This is logged as an error and
//!   counted, not retried.
//! - A sweep requeues before it deletes the lease (a crash between the two
//!   leaves a duplicate, never a loss), so two sweeps racing on one lease can
//!   both requeue it. The conditional delete detects the race and logs it.

use std::time::Duration;
use thiserror::Error;

mod metrics;
mod storage;
pub use storage::{Claim, Queue};

/// Default maximum time a consumer may hold a claim before it is considered
/// abandoned.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Errors that can occur when interacting with [Queue].
#[derive(Debug, Error)]
pub enum Error {
    #[error("store error: {0}")]
    Store(#[from] crate::store::Error),
    #[error("envelope error: {0}")]
    Envelope(#[from] crate::envelope::Error),
}

/// Configuration for [Queue].
#[derive(Clone)]
pub struct Config {
    /// The topic this queue binds to, naming one FIFO list in the store.
    pub topic: String,

    /// Maximum time a consumer may hold a claim before a sweep treats it as
    /// abandoned and returns the payload to the pending list.
    pub lease_ttl: Duration,

    /// Store-enforced expiry for lease records, a backstop releasing store
    /// space when no sweeper ever runs.
    ///
    /// Must exceed [Config::lease_ttl]: a record that expires before a sweep
    /// observes it is lost, so the margin between the two should comfortably
    /// cover the sweep cadence. Defaults to twice the lease duration.
    pub record_ttl: Duration,
}

impl Config {
    /// Configuration for `topic` with default durations.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            lease_ttl: DEFAULT_LEASE_TTL,
            record_ttl: DEFAULT_LEASE_TTL * 2,
        }
    }

    /// Override the lease duration, keeping the record expiry at twice the
    /// lease duration.
    pub fn with_lease_ttl(mut self, lease_ttl: Duration) -> Self {
        self.lease_ttl = lease_ttl;
        self.record_ttl = lease_ttl * 2;
        self
    }
}
