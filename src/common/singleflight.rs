//! Keyed request coalescing
//!
//! Concurrent callers sharing a key collapse into one upstream call: the
//! first caller runs the work, everyone else awaits a clone of its result.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Mutex;

use tokio::sync::broadcast;

use crate::common::{Error, Result};

/// Per-key in-flight gate.
pub struct SingleFlight<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<Result<V>>>>,
}

enum Role<V> {
    Leader,
    Follower(broadcast::Receiver<Result<V>>),
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `work` for `key`, or await the result of the in-flight run.
    ///
    /// If the leading caller is dropped mid-flight, waiters fail with an
    /// upstream error and the next caller starts a fresh run.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let role = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(&key) {
                Some(tx) => Role::Follower(tx.subscribe()),
                None => {
                    let (tx, _) = broadcast::channel(1);
                    inflight.insert(key.clone(), tx);
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(mut rx) => match rx.recv().await {
                Ok(result) => result,
                Err(_) => Err(Error::Upstream("coalesced request was dropped".into())),
            },
            Role::Leader => {
                let guard = FlightGuard {
                    flights: self,
                    key: Some(key),
                };
                let result = work().await;
                if let Some(tx) = guard.complete() {
                    let _ = tx.send(result.clone());
                }
                result
            }
        }
    }

    fn remove(&self, key: &K) -> Option<broadcast::Sender<Result<V>>> {
        self.inflight.lock().unwrap().remove(key)
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the in-flight slot even when the leader future is cancelled,
/// which drops the sender and wakes every waiter with an error.
struct FlightGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    flights: &'a SingleFlight<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone, V: Clone> FlightGuard<'_, K, V> {
    fn complete(mut self) -> Option<broadcast::Sender<Result<V>>> {
        let key = self.key.take()?;
        self.flights.remove(&key)
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.flights.remove(&key);
        }
    }
}
