//! Lease queue implementation.

use super::{metrics, Config, Error};
use crate::{
    clock::Clock,
    envelope::Envelope,
    store::Store,
};
use bytes::Bytes;
use prometheus_client::registry::Registry;
use std::{
    fmt,
    sync::Arc,
    time::SystemTime,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A topic-scoped at-least-once delivery queue.
///
/// See the [module documentation](super) for the delivery protocol and the
/// failure policy. Cloning returns a handle to the same topic backed by the
/// same store; independent instances (in other tasks or processes) may operate
/// on one topic concurrently.
pub struct Queue<S: Store, C: Clock> {
    store: S,
    clock: C,
    topic: String,
    cfg: Config,
    metrics: Arc<metrics::Metrics>,
}

impl<S: Store, C: Clock> Clone for Queue<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            clock: self.clock.clone(),
            topic: self.topic.clone(),
            cfg: self.cfg.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: Store, C: Clock> Queue<S, C> {
    /// Create a queue over `store` bound to the topic in `cfg`.
    ///
    /// # Panics
    ///
    /// Panics if `cfg.record_ttl <= cfg.lease_ttl` (a lease record must
    /// outlive the sweep threshold or an abandoned payload can expire out of
    /// the store before any sweep observes it).
    pub fn new(store: S, clock: C, cfg: Config, registry: &mut Registry) -> Self {
        assert!(
            cfg.record_ttl > cfg.lease_ttl,
            "record_ttl must exceed lease_ttl"
        );
        let topic = cfg.topic.clone();
        Self {
            store,
            clock,
            topic,
            cfg,
            metrics: Arc::new(metrics::Metrics::init(registry)),
        }
    }

    /// The topic this queue is bound to.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn lease_key(&self, id: &str) -> String {
        format!("lease/{}/{}", self.topic, id)
    }

    fn lease_prefix(&self) -> String {
        format!("lease/{}/", self.topic)
    }

    /// Enqueue a batch of payloads in one store call.
    ///
    /// Each payload is wrapped with the current timestamp and prepended to
    /// the topic list; the batch is popped back out in the order given here.
    ///
    /// Fire-and-forget: a store failure is logged and counted, and the batch
    /// is dropped. A payload too large for the wire format is logged and
    /// skipped without affecting the rest of the batch. Callers that require
    /// durability must confirm via [Queue::size].
    pub async fn enqueue<I>(&self, payloads: I)
    where
        I: IntoIterator<Item = Bytes>,
    {
        let now = self.clock.current();
        let mut items = Vec::new();
        for payload in payloads {
            match Envelope::new(now, payload).encode() {
                Ok(raw) => items.push(raw),
                Err(err) => {
                    error!(topic = %self.topic, %err, "payload dropped");
                }
            }
        }
        if items.is_empty() {
            return;
        }
        let count = items.len() as u64;
        match self.store.push_front(&self.topic, items).await {
            Ok(()) => {
                self.metrics.enqueued.inc_by(count);
                debug!(topic = %self.topic, count, "enqueued");
            }
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(topic = %self.topic, count, %err, "enqueue dropped");
            }
        }
    }

    /// Claim the oldest pending message, if any.
    ///
    /// Pops one envelope from the tail of the topic list and writes a lease
    /// record under `lease/{topic}/{claim_id}` before returning the [Claim].
    /// An empty topic returns `None`; so does a transient store failure (the
    /// degraded-to-empty policy).
    pub async fn dequeue(&self) -> Option<Claim<S>> {
        let raw = match self.store.pop_back(&self.topic).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(topic = %self.topic, %err, "dequeue degraded to empty");
                return None;
            }
        };
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.metrics.decode_failures.inc();
                error!(topic = %self.topic, %err, "dropping undecodable envelope");
                return None;
            }
        };

        let id = Uuid::new_v4().to_string();
        let claimed_at = self.clock.current();
        let key = self.lease_key(&id);
        // A decoded payload always fits the format again.
        let record = match Envelope::new(claimed_at, envelope.payload.clone()).encode() {
            Ok(record) => record,
            Err(err) => {
                error!(topic = %self.topic, claim = %id, %err, "lease record encode failed, payload lost");
                return None;
            }
        };
        if let Err(err) = self
            .store
            .set(&key, record, Some(self.cfg.record_ttl))
            .await
        {
            // The pop already happened: the payload is out of the list with
            // no lease to recover it. Surfaced via logs and metrics only.
            self.metrics.store_errors.inc();
            error!(topic = %self.topic, claim = %id, %err, "lease write failed after pop, payload lost");
            return None;
        }

        self.metrics.dequeued.inc();
        debug!(topic = %self.topic, claim = %id, "claimed");
        Some(Claim {
            id,
            topic: self.topic.clone(),
            claimed_at,
            payload: envelope.payload,
            key,
            store: self.store.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Claim up to `max` pending messages.
    ///
    /// Issues one [Queue::dequeue] per collected claim and stops at the first
    /// empty result. Not atomic as a batch: concurrent consumers may
    /// interleave.
    pub async fn dequeue_many(&self, max: usize) -> Vec<Claim<S>> {
        let mut claims = Vec::new();
        while claims.len() < max {
            match self.dequeue().await {
                Some(claim) => claims.push(claim),
                None => break,
            }
        }
        claims
    }

    /// Acknowledge a claim, permanently removing the message.
    ///
    /// Equivalent to [Claim::ack].
    pub async fn ack(&self, claim: &Claim<S>) {
        claim.ack().await;
    }

    /// Reclaim abandoned leases, returning how many payloads were requeued.
    ///
    /// Scans the topic's lease namespace in bounded batches. A lease held
    /// longer than [Config::lease_ttl] (or any lease, when `force` is set) is
    /// returned to the pending list as a fresh envelope and its record is
    /// deleted. `force` is meant for startup, to reclaim every claim of a
    /// prior process incarnation that can no longer acknowledge.
    ///
    /// A lease record that fails to decode is logged and skipped; the rest of
    /// the batch proceeds.
    pub async fn sweep(&self, force: bool) -> u64 {
        let prefix = self.lease_prefix();
        let now = self.clock.current();
        let mut requeued = 0;
        let mut cursor = 0;
        loop {
            let (next, keys) = match self.store.scan(cursor, &prefix).await {
                Ok(batch) => batch,
                Err(err) => {
                    self.metrics.store_errors.inc();
                    warn!(topic = %self.topic, %err, "sweep aborted");
                    break;
                }
            };
            for key in keys {
                match self.reclaim(&key, now, force).await {
                    Ok(true) => requeued += 1,
                    Ok(false) => {}
                    Err(Error::Envelope(err)) => {
                        self.metrics.decode_failures.inc();
                        warn!(%key, %err, "skipping undecodable lease record");
                    }
                    Err(Error::Store(err)) => {
                        self.metrics.store_errors.inc();
                        warn!(%key, %err, "lease reclaim failed");
                    }
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        if requeued > 0 {
            self.metrics.requeued.inc_by(requeued);
            debug!(topic = %self.topic, requeued, force, "sweep requeued abandoned leases");
        }
        requeued
    }

    /// Requeue the lease at `key` if it is expired or `force` is set.
    async fn reclaim(&self, key: &str, now: SystemTime, force: bool) -> Result<bool, Error> {
        // The lease may have been acknowledged (or expired out of the store)
        // since the scan returned its key.
        let Some(raw) = self.store.get(key).await? else {
            return Ok(false);
        };
        let record = Envelope::decode(raw.clone())?;
        let held = now.duration_since(record.stamped_at).unwrap_or_default();
        if !force && held <= self.cfg.lease_ttl {
            return Ok(false);
        }

        // Requeue before deleting the lease: a crash between the two calls
        // leaves a duplicate, never a loss.
        let fresh = Envelope::new(now, record.payload).encode()?;
        self.store.push_front(&self.topic, vec![fresh]).await?;
        self.metrics.enqueued.inc();
        if !self.store.delete_if_eq(key, &raw).await? {
            // A concurrent sweep reclaimed this lease between our read and
            // our delete; both requeues are now pending.
            warn!(%key, "lease concurrently reclaimed, duplicate requeued");
        }
        Ok(true)
    }

    /// Current pending (unclaimed) list length.
    ///
    /// In-flight leases are not counted. A transient store failure degrades
    /// to `0`.
    pub async fn size(&self) -> u64 {
        match self.store.len(&self.topic).await {
            Ok(len) => {
                self.metrics.pending.set(len as i64);
                len
            }
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(topic = %self.topic, %err, "size degraded to zero");
                0
            }
        }
    }

    /// Snapshot of all pending payloads, oldest first, without removing
    /// anything.
    ///
    /// Diagnostic only: entries that fail to decode are logged and omitted.
    pub async fn pending(&self) -> Vec<Bytes> {
        let raws = match self.store.range(&self.topic).await {
            Ok(raws) => raws,
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(topic = %self.topic, %err, "pending snapshot degraded to empty");
                return Vec::new();
            }
        };
        // The store returns the list head first (newest); report dequeue order.
        raws.into_iter()
            .rev()
            .filter_map(|raw| match Envelope::decode(raw) {
                Ok(envelope) => Some(envelope.payload),
                Err(err) => {
                    self.metrics.decode_failures.inc();
                    warn!(topic = %self.topic, %err, "skipping undecodable pending entry");
                    None
                }
            })
            .collect()
    }
}

/// An in-memory handle to a claimed message.
///
/// A claim exists only in consumer memory; its durable counterpart is the
/// lease record written at claim time. Dropping a claim without calling
/// [Claim::ack] abandons it: once the lease exceeds the queue's lease
/// duration, a sweep returns the payload to the pending list.
pub struct Claim<S: Store> {
    id: String,
    topic: String,
    claimed_at: SystemTime,
    payload: Bytes,
    key: String,
    store: S,
    metrics: Arc<metrics::Metrics>,
}

impl<S: Store> Claim<S> {
    /// Unique identifier of this claim.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The topic the message was claimed from.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// When the claim was made.
    pub fn claimed_at(&self) -> SystemTime {
        self.claimed_at
    }

    /// The decoded payload.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Acknowledge the message, deleting its lease record.
    ///
    /// Idempotent: acknowledging an already-deleted lease is a no-op. A
    /// transient store failure is logged and the lease is left to expire,
    /// which redelivers the message (at-least-once).
    pub async fn ack(&self) {
        match self.store.delete(&self.key).await {
            Ok(existed) => {
                if existed {
                    self.metrics.acked.inc();
                }
                debug!(claim = %self.id, existed, "acknowledged");
            }
            Err(err) => {
                self.metrics.store_errors.inc();
                warn!(claim = %self.id, %err, "ack failed, lease left to expire");
            }
        }
    }
}

impl<S: Store> fmt::Debug for Claim<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claim")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("claimed_at", &self.claimed_at)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks;
    use crate::store::Memory;
    use prometheus_client::encoding::text::encode;
    use std::time::Duration;

    const LEASE_TTL: Duration = Duration::from_secs(60);

    struct Harness {
        queue: Queue<Memory<mocks::Clock>, mocks::Clock>,
        store: Memory<mocks::Clock>,
        clock: mocks::Clock,
        registry: Registry,
    }

    fn setup(topic: &str) -> Harness {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let clock = mocks::Clock::default();
        let store = Memory::new(clock.clone());
        let mut registry = Registry::default();
        let queue = Queue::new(
            store.clone(),
            clock.clone(),
            Config::new(topic).with_lease_ttl(LEASE_TTL),
            &mut registry,
        );
        Harness {
            queue,
            store,
            clock,
            registry,
        }
    }

    fn payloads(items: &[&'static [u8]]) -> Vec<Bytes> {
        items.iter().copied().map(Bytes::from_static).collect()
    }

    async fn lease_keys(store: &Memory<mocks::Clock>, topic: &str) -> Vec<String> {
        let prefix = format!("lease/{topic}/");
        let mut keys = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, batch) = store.scan(cursor, &prefix).await.unwrap();
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys
    }

    #[tokio::test]
    async fn test_batch_enqueue_fifo() {
        let h = setup("fifo");
        h.queue.enqueue(payloads(&[b"a", b"b", b"c"])).await;
        assert_eq!(h.queue.size().await, 3);

        for expected in [b"a", b"b", b"c"] {
            let claim = h.queue.dequeue().await.unwrap();
            assert_eq!(claim.payload(), &Bytes::from_static(expected));
            claim.ack().await;
        }
        assert_eq!(h.queue.size().await, 0);
        assert!(h.queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_empty_topic() {
        let h = setup("empty");
        assert!(h.queue.dequeue().await.is_none());
        assert!(lease_keys(&h.store, "empty").await.is_empty());
        assert_eq!(h.queue.size().await, 0);
    }

    #[tokio::test]
    async fn test_expired_lease_swept_back_once() {
        let h = setup("abandon");
        h.queue.enqueue(payloads(&[b"job"])).await;
        let claim = h.queue.dequeue().await.unwrap();
        assert_eq!(h.queue.size().await, 0);
        drop(claim); // never acknowledged

        // Not yet expired: nothing to reclaim.
        h.clock.advance(LEASE_TTL / 2);
        assert_eq!(h.queue.sweep(false).await, 0);
        assert_eq!(h.queue.size().await, 0);

        // Past the lease duration: exactly one requeue, byte-equal payload.
        h.clock.advance(LEASE_TTL);
        assert_eq!(h.queue.sweep(false).await, 1);
        assert_eq!(h.queue.size().await, 1);
        assert_eq!(h.queue.pending().await, payloads(&[b"job"]));
        assert!(lease_keys(&h.store, "abandon").await.is_empty());

        // A second sweep finds nothing.
        assert_eq!(h.queue.sweep(false).await, 0);
        assert_eq!(h.queue.size().await, 1);
    }

    #[tokio::test]
    async fn test_ack_is_idempotent() {
        let h = setup("ack");
        h.queue.enqueue(payloads(&[b"once"])).await;
        let claim = h.queue.dequeue().await.unwrap();
        claim.ack().await;
        claim.ack().await;
        assert!(lease_keys(&h.store, "ack").await.is_empty());

        // Acknowledged means gone: even a forced sweep reclaims nothing.
        assert_eq!(h.queue.sweep(true).await, 0);
        assert_eq!(h.queue.size().await, 0);

        let mut buffer = String::new();
        encode(&mut buffer, &h.registry).unwrap();
        assert!(buffer.contains("acked_total 1"));
    }

    #[tokio::test]
    async fn test_force_sweep_reclaims_unexpired() {
        let h = setup("restart");
        h.queue.enqueue(payloads(&[b"orphan"])).await;
        let claim = h.queue.dequeue().await.unwrap();
        drop(claim);

        // No time has passed, but a restart reclaims everything outstanding.
        assert_eq!(h.queue.sweep(true).await, 1);
        assert_eq!(h.queue.pending().await, payloads(&[b"orphan"]));
    }

    #[tokio::test]
    async fn test_sweep_skips_undecodable_lease() {
        let h = setup("garbage");
        h.queue.enqueue(payloads(&[b"good"])).await;
        let claim = h.queue.dequeue().await.unwrap();
        drop(claim);
        h.store
            .set(
                "lease/garbage/not-an-envelope",
                Bytes::from_static(b"\xff\xff"),
                None,
            )
            .await
            .unwrap();

        assert_eq!(h.queue.sweep(true).await, 1);
        assert_eq!(h.queue.pending().await, payloads(&[b"good"]));
        // The undecodable record is left in place for its TTL to collect.
        assert_eq!(
            lease_keys(&h.store, "garbage").await,
            vec!["lease/garbage/not-an-envelope".to_string()]
        );

        let mut buffer = String::new();
        encode(&mut buffer, &h.registry).unwrap();
        assert!(buffer.contains("decode_failures_total 1"));
    }

    #[tokio::test]
    async fn test_record_ttl_is_the_backstop() {
        let h = setup("backstop");
        h.queue.enqueue(payloads(&[b"stale"])).await;
        let claim = h.queue.dequeue().await.unwrap();
        drop(claim);

        // Once the store itself expires the record, there is nothing left to
        // reclaim: the payload is gone. The backstop only bounds store growth
        // when no sweeper runs in time.
        h.clock.advance(LEASE_TTL * 3);
        assert!(lease_keys(&h.store, "backstop").await.is_empty());
        assert_eq!(h.queue.sweep(true).await, 0);
        assert_eq!(h.queue.size().await, 0);
    }

    #[tokio::test]
    async fn test_single_sweep_reclaims_many_leases() {
        let h = setup("bulk");
        let items: Vec<Bytes> = (0..40u32)
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        h.queue.enqueue(items).await;
        let claims = h.queue.dequeue_many(40).await;
        assert_eq!(claims.len(), 40);
        drop(claims); // all abandoned

        // One sweep must visit every lease, even across scan batches that
        // shrink as it deletes reclaimed records.
        assert_eq!(h.queue.sweep(true).await, 40);
        assert_eq!(h.queue.size().await, 40);
        assert!(lease_keys(&h.store, "bulk").await.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_many() {
        let h = setup("many");
        h.queue.enqueue(payloads(&[b"1", b"2", b"3"])).await;

        let claims = h.queue.dequeue_many(5).await;
        assert_eq!(claims.len(), 3);
        let got: Vec<Bytes> = claims.iter().map(|claim| claim.payload().clone()).collect();
        assert_eq!(got, payloads(&[b"1", b"2", b"3"]));
        assert!(h.queue.dequeue_many(1).await.is_empty());
        assert!(h.queue.dequeue_many(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_instances_never_share_a_claim() {
        let clock = mocks::Clock::default();
        let store = Memory::new(clock.clone());
        let mut r1 = Registry::default();
        let mut r2 = Registry::default();
        let cfg = Config::new("shared").with_lease_ttl(LEASE_TTL);
        let q1 = Queue::new(store.clone(), clock.clone(), cfg.clone(), &mut r1);
        let q2 = Queue::new(store.clone(), clock.clone(), cfg, &mut r2);

        q1.enqueue(payloads(&[b"w", b"x", b"y", b"z"])).await;
        let mut got = Vec::new();
        for queue in [&q1, &q2, &q1, &q2] {
            got.push(queue.dequeue().await.unwrap().payload().clone());
        }
        got.sort();
        got.dedup();
        assert_eq!(got.len(), 4);
        assert!(q1.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_store_failure_degrades() {
        let clock = mocks::Clock::default();
        let store = mocks::Faulty::new(Memory::new(clock.clone()));
        let mut registry = Registry::default();
        let queue = Queue::new(
            store.clone(),
            clock.clone(),
            Config::new("flaky").with_lease_ttl(LEASE_TTL),
            &mut registry,
        );

        store.fail(true);
        queue.enqueue(payloads(&[b"dropped"])).await;
        assert_eq!(queue.size().await, 0);
        assert!(queue.dequeue().await.is_none());
        assert_eq!(queue.sweep(false).await, 0);
        assert!(queue.pending().await.is_empty());

        // The enqueue during the outage was dropped, not buffered.
        store.fail(false);
        assert_eq!(queue.size().await, 0);

        let mut buffer = String::new();
        encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("store_errors_total"));
    }

    #[tokio::test]
    async fn test_undecodable_envelope_dropped() {
        let h = setup("junk");
        h.store
            .push_front("junk", vec![Bytes::from_static(b"\x00garbage")])
            .await
            .unwrap();
        assert!(h.queue.dequeue().await.is_none());
        assert_eq!(h.queue.size().await, 0);
        assert!(lease_keys(&h.store, "junk").await.is_empty());
    }
}
