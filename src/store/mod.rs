//! Contract for the backing list/key-value store.
//!
//! The store is an external collaborator: it must provide an atomic list
//! prepend, an atomic pop from the list tail, keyed get/set/delete with
//! optional expiry, and a cursor-based key scan. The delivery protocol in
//! [crate::queue] is built entirely from these primitives; no retry or
//! pooling logic belongs here.
//!
//! All operations are fallible: a [Error::Unavailable] result models a
//! transient failure (network partition, timeout) and is converted to a
//! degraded empty/zero result at the queue boundary rather than propagated
//! to callers.

use bytes::Bytes;
use std::{future::Future, time::Duration};
use thiserror::Error;

mod memory;
pub use memory::Memory;

/// Errors that can occur when interacting with a [Store].
#[derive(Debug, Error)]
pub enum Error {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Interface to the list/key-value primitives required by the queue.
///
/// Implementations are handles to a shared store and must be cheap to clone.
/// Lists and keys live in separate namespaces: `topic` arguments address
/// lists, `key` arguments address scalar entries.
pub trait Store: Clone + Send + Sync + 'static {
    /// Atomically prepend `items` to the head of the `topic` list, in order.
    ///
    /// The first item of the batch ends up furthest from the head, so a batch
    /// is popped back out in the order it was given.
    fn push_front(
        &self,
        topic: &str,
        items: Vec<Bytes>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Atomically pop one item from the tail of the `topic` list.
    ///
    /// Returns `None` if the list is empty. Paired with [Store::push_front],
    /// this yields FIFO order.
    fn pop_back(&self, topic: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;

    /// Get the value stored at `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;

    /// Set `key` to `value`, overwriting any existing entry.
    ///
    /// If `ttl` is provided, the store expires the entry once the duration
    /// elapses; an expired entry behaves as if it were deleted.
    fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Delete the entry at `key`.
    ///
    /// Returns whether an entry existed. Deleting an absent key is not an
    /// error.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Delete the entry at `key` only if its current value equals `expected`.
    ///
    /// Returns whether the entry was deleted. Used to detect a concurrent
    /// sweep reclaiming the same lease.
    fn delete_if_eq(
        &self,
        key: &str,
        expected: &[u8],
    ) -> impl Future<Output = Result<bool, Error>> + Send;

    /// Return a bounded batch of keys starting with `prefix`.
    ///
    /// Iteration starts with `cursor == 0`; each call returns the cursor for
    /// the next batch, and a returned cursor of `0` signals completion. A
    /// full iteration returns every key that exists for its entire duration,
    /// even if the caller deletes already-returned keys between batches; keys
    /// inserted or removed mid-iteration may or may not appear.
    fn scan(
        &self,
        cursor: u64,
        prefix: &str,
    ) -> impl Future<Output = Result<(u64, Vec<String>), Error>> + Send;

    /// Return the full contents of the `topic` list, head first, without
    /// removing anything.
    fn range(&self, topic: &str) -> impl Future<Output = Result<Vec<Bytes>, Error>> + Send;

    /// Return the length of the `topic` list.
    fn len(&self, topic: &str) -> impl Future<Output = Result<u64, Error>> + Send;
}
