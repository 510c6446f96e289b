//! In-memory [Store] implementation.

use super::{Error, Store};
use crate::clock::Clock;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    ops::Bound,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

/// Number of keys returned per [Store::scan] batch.
const SCAN_BATCH: usize = 32;

struct Entry {
    value: Bytes,
    expires_at: Option<SystemTime>,
}

impl Entry {
    fn expired(&self, now: SystemTime) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<Bytes>>,
    keys: BTreeMap<String, Entry>,
    // In-progress scans: cursor id to the last key already returned.
    scans: HashMap<u64, String>,
    next_scan_id: u64,
}

impl State {
    /// Drop all entries whose expiry has passed.
    fn purge_expired(&mut self, now: SystemTime) {
        self.keys.retain(|_, entry| !entry.expired(now));
    }
}

/// In-memory store for tests and single-process deployments.
///
/// Expiry is lazy: entries are judged against the provided [Clock] whenever
/// they are read or scanned, so simulated clocks work the same as the system
/// clock. Cloning returns a handle to the same state.
pub struct Memory<C: Clock> {
    clock: C,
    state: Arc<Mutex<State>>,
}

impl<C: Clock> Memory<C> {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            state: Arc::new(Mutex::new(State::default())),
        }
    }
}

impl<C: Clock> Clone for Memory<C> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: Clock> Store for Memory<C> {
    async fn push_front(&self, topic: &str, items: Vec<Bytes>) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let list = state.lists.entry(topic.to_string()).or_default();
        for item in items {
            list.push_front(item);
        }
        Ok(())
    }

    async fn pop_back(&self, topic: &str) -> Result<Option<Bytes>, Error> {
        let mut state = self.state.lock().unwrap();
        Ok(state.lists.get_mut(topic).and_then(VecDeque::pop_back))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        let now = self.clock.current();
        let mut state = self.state.lock().unwrap();
        match state.keys.get(key) {
            Some(entry) if entry.expired(now) => {
                state.keys.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> Result<(), Error> {
        let expires_at = ttl.map(|ttl| self.clock.current() + ttl);
        let mut state = self.state.lock().unwrap();
        state.keys.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let now = self.clock.current();
        let mut state = self.state.lock().unwrap();
        match state.keys.remove(key) {
            Some(entry) => Ok(!entry.expired(now)),
            None => Ok(false),
        }
    }

    async fn delete_if_eq(&self, key: &str, expected: &[u8]) -> Result<bool, Error> {
        let now = self.clock.current();
        let mut state = self.state.lock().unwrap();
        match state.keys.get(key) {
            Some(entry) if !entry.expired(now) && entry.value == expected => {
                state.keys.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan(&self, cursor: u64, prefix: &str) -> Result<(u64, Vec<String>), Error> {
        let now = self.clock.current();
        let mut state = self.state.lock().unwrap();
        state.purge_expired(now);

        // Each batch resumes strictly after the last key it returned, so keys
        // the caller deletes between batches cannot shift the remainder out
        // of the iteration.
        let start = if cursor == 0 {
            Bound::Included(prefix.to_string())
        } else {
            match state.scans.remove(&cursor) {
                Some(last) => Bound::Excluded(last),
                // Unknown or already-consumed cursor: nothing left.
                None => return Ok((0, Vec::new())),
            }
        };
        let batch: Vec<String> = state
            .keys
            .range((start, Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .take(SCAN_BATCH)
            .map(|(key, _)| key.clone())
            .collect();
        let next = match batch.last() {
            Some(last) if batch.len() == SCAN_BATCH => {
                state.next_scan_id += 1;
                let id = state.next_scan_id;
                state.scans.insert(id, last.clone());
                id
            }
            _ => 0,
        };
        Ok((next, batch))
    }

    async fn range(&self, topic: &str) -> Result<Vec<Bytes>, Error> {
        let state = self.state.lock().unwrap();
        Ok(state
            .lists
            .get(topic)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn len(&self, topic: &str) -> Result<u64, Error> {
        let state = self.state.lock().unwrap();
        Ok(state.lists.get(topic).map_or(0, |list| list.len() as u64))
    }
}
