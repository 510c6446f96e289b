//! Time access for lease accounting and polling backoff.
//!
//! Lease expiry is judged by comparing wall-clock timestamps, so every
//! component that needs the current time takes a [Clock] instead of calling
//! [SystemTime::now] directly. Tests substitute [crate::mocks::Clock] to move
//! time forward without sleeping.

use std::{
    future::Future,
    time::{Duration, SystemTime},
};

/// Interface for time-based operations.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Returns the current time.
    fn current(&self) -> SystemTime;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static;
}

/// [Clock] backed by the system clock and the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send + 'static {
        tokio::time::sleep(duration)
    }
}
