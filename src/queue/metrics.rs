//! Metrics for [super::Queue].

use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Metrics for [super::Queue].
#[derive(Default)]
pub struct Metrics {
    /// Payloads enqueued (including sweep requeues).
    pub enqueued: Counter,
    /// Claims handed to consumers.
    pub dequeued: Counter,
    /// Claims acknowledged.
    pub acked: Counter,
    /// Abandoned leases returned to the pending list.
    pub requeued: Counter,
    /// Envelopes or lease records that failed to decode.
    pub decode_failures: Counter,
    /// Store operations that failed transiently.
    pub store_errors: Counter,
    /// Pending list length at last observation.
    pub pending: Gauge,
}

impl Metrics {
    /// Create and register metrics.
    pub fn init(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "enqueued",
            "Payloads enqueued (including sweep requeues)",
            metrics.enqueued.clone(),
        );
        registry.register("dequeued", "Claims handed to consumers", metrics.dequeued.clone());
        registry.register("acked", "Claims acknowledged", metrics.acked.clone());
        registry.register(
            "requeued",
            "Abandoned leases returned to the pending list",
            metrics.requeued.clone(),
        );
        registry.register(
            "decode_failures",
            "Envelopes or lease records that failed to decode",
            metrics.decode_failures.clone(),
        );
        registry.register(
            "store_errors",
            "Store operations that failed transiently",
            metrics.store_errors.clone(),
        );
        registry.register(
            "pending",
            "Pending list length at last observation",
            metrics.pending.clone(),
        );
        metrics
    }
}
