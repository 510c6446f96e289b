//! Mock implementations for testing.

use crate::{clock, store};
use bytes::Bytes;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// A controllable [clock::Clock].
///
/// Time only moves when [Clock::advance] is called or a sleep completes:
/// sleeping advances the clock by the requested duration and yields once so
/// other tasks (a concurrent `stop()`, another consumer) get to run, which
/// keeps polling loops live on a single-threaded test runtime.
#[derive(Clone)]
pub struct Clock {
    now: Arc<Mutex<SystemTime>>,
}

impl Clock {
    /// Create a clock starting at `start`.
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += duration;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl clock::Clock for Clock {
    fn current(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send + 'static {
        let now = self.now.clone();
        async move {
            {
                let mut now = now.lock().unwrap();
                *now += duration;
            }
            tokio::task::yield_now().await;
        }
    }
}

/// A [store::Store] wrapper that injects transient failures.
///
/// While failing, every operation returns [store::Error::Unavailable];
/// otherwise calls pass through to the wrapped store.
pub struct Faulty<S: store::Store> {
    inner: S,
    failing: Arc<AtomicBool>,
}

impl<S: store::Store> Faulty<S> {
    /// Wrap `inner`, initially healthy.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Toggle failure injection on or off, affecting all clones.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), store::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(store::Error::Unavailable("injected fault".to_string()));
        }
        Ok(())
    }
}

impl<S: store::Store> Clone for Faulty<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            failing: self.failing.clone(),
        }
    }
}

impl<S: store::Store> store::Store for Faulty<S> {
    async fn push_front(&self, topic: &str, items: Vec<Bytes>) -> Result<(), store::Error> {
        self.check()?;
        self.inner.push_front(topic, items).await
    }

    async fn pop_back(&self, topic: &str) -> Result<Option<Bytes>, store::Error> {
        self.check()?;
        self.inner.pop_back(topic).await
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, store::Error> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), store::Error> {
        self.check()?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool, store::Error> {
        self.check()?;
        self.inner.delete(key).await
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, store::Error> {
        self.check()?;
        self.inner.delete_if_eq(key, expected).await
    }

    async fn scan(&self, cursor: u64, prefix: &str) -> Result<(u64, Vec<String>), store::Error> {
        self.check()?;
        self.inner.scan(cursor, prefix).await
    }

    async fn range(&self, topic: &str) -> Result<Vec<Bytes>, store::Error> {
        self.check()?;
        self.inner.range(topic).await
    }

    async fn len(&self, topic: &str) -> Result<u64, store::Error> {
        self.check()?;
        self.inner.len(topic).await
    }
}
