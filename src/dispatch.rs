//! Polling consumer driving claim, callback, acknowledge cycles.
//!
//! A [Dispatcher] drains one [Queue] cooperatively: each iteration either
//! hands the oldest pending message to the callback or, when the topic looks
//! empty, sweeps for abandoned leases and backs off. The callback owns
//! acknowledgment; the loop never acks on its behalf, so a callback that
//! returns without calling [Claim::ack] abandons the claim for a later sweep
//! to recover.
//!
//! Stopping is advisory: [Stopper::stop] is observed at the top of the next
//! iteration (or mid-backoff), and an in-flight callback always completes.
//! Transient store trouble never ends the loop; the queue degrades those
//! calls to empty results, which land in the backoff path.

use crate::{
    clock::Clock,
    queue::{Claim, Queue},
    store::Store,
};
use std::{future::Future, num::NonZeroUsize, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::debug;

/// Default sleep between polls of an empty topic.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(5);

/// Configuration for [Dispatcher].
#[derive(Clone)]
pub struct Config {
    /// Sleep between polls while the topic is empty.
    pub backoff: Duration,

    /// Stop after dispatching this many messages.
    ///
    /// `None` runs until stopped. `Some(1)` is the bounded single-dispatch
    /// mode used by tests and drain scripts.
    pub limit: Option<NonZeroUsize>,

    /// Force-reclaim every outstanding lease once at startup, on the
    /// assumption that no consumer from a prior process incarnation is still
    /// alive to acknowledge.
    pub reclaim_on_start: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff: DEFAULT_BACKOFF,
            limit: None,
            reclaim_on_start: true,
        }
    }
}

/// Cancellation handle for a [Dispatcher].
#[derive(Clone)]
pub struct Stopper {
    tx: Arc<watch::Sender<bool>>,
}

impl Stopper {
    /// Request the dispatcher to stop.
    ///
    /// Cooperative and idempotent: the loop exits at the top of its next
    /// iteration, after any in-flight callback completes.
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// A polling consumer bound to one [Queue] and one callback.
pub struct Dispatcher<S: Store, C: Clock> {
    queue: Queue<S, C>,
    clock: C,
    cfg: Config,
    stopped: watch::Receiver<bool>,
    // Keeps the channel open if every external Stopper is dropped.
    _keepalive: Arc<watch::Sender<bool>>,
}

impl<S: Store, C: Clock> Dispatcher<S, C> {
    /// Create a dispatcher and the [Stopper] controlling it.
    pub fn new(queue: Queue<S, C>, clock: C, cfg: Config) -> (Self, Stopper) {
        let (tx, rx) = watch::channel(false);
        let tx = Arc::new(tx);
        (
            Self {
                queue,
                clock,
                cfg,
                stopped: rx,
                _keepalive: tx.clone(),
            },
            Stopper { tx },
        )
    }

    /// Run the polling loop, invoking `callback` once per claimed message.
    ///
    /// Returns when stopped or when [Config::limit] dispatches have been
    /// made. The callback is awaited before the next message is claimed and
    /// is responsible for acknowledging the claim.
    pub async fn run<F, Fut>(mut self, mut callback: F)
    where
        F: FnMut(Claim<S>) -> Fut + Send,
        Fut: Future<Output = ()> + Send,
    {
        if self.cfg.reclaim_on_start {
            let reclaimed = self.queue.sweep(true).await;
            if reclaimed > 0 {
                debug!(topic = %self.queue.topic(), reclaimed, "reclaimed leases from a prior run");
            }
        }

        let mut dispatched = 0usize;
        loop {
            if *self.stopped.borrow() {
                debug!(topic = %self.queue.topic(), dispatched, "dispatcher stopped");
                return;
            }
            if let Some(limit) = self.cfg.limit {
                if dispatched >= limit.get() {
                    debug!(topic = %self.queue.topic(), dispatched, "dispatch limit reached");
                    return;
                }
            }

            if self.queue.size().await == 0 {
                self.queue.sweep(false).await;
                self.idle().await;
                continue;
            }
            match self.queue.dequeue().await {
                Some(claim) => {
                    callback(claim).await;
                    dispatched += 1;
                }
                None => {
                    // Lost the race for the last pending message to another
                    // consumer; check for expired leases and retry without
                    // sleeping.
                    self.queue.sweep(false).await;
                }
            }
        }
    }

    /// Sleep the backoff interval, waking early on stop.
    async fn idle(&mut self) {
        let sleep = self.clock.sleep(self.cfg.backoff);
        tokio::select! {
            _ = sleep => {}
            _ = self.stopped.changed() => {}
        }
    }
}
