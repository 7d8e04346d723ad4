// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Single-flight execution: at most one in-progress run per key, with
//! concurrent callers sharing its result.

use crate::{Error, Result};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

type SharedRun<V> = Shared<BoxFuture<'static, std::result::Result<V, Arc<Error>>>>;

pub struct SingleFlight<K, V: Clone> {
    inflight: Mutex<HashMap<K, SharedRun<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `start()` for `key` unless a run for `key` is already in flight,
    /// in which case wait for that run and return its result.
    ///
    /// A run whose callers all go away stays registered and is resumed by
    /// the next caller for the same key.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (_, result) = self.start_or_join(key, start);
        result.await
    }

    /// Like [`SingleFlight::run`], also reporting whether this call started
    /// the run (`true`) or joined one already in flight (`false`).
    pub fn start_or_join<F, Fut>(&self, key: K, start: F) -> (bool, impl Future<Output = Result<V>> + '_)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (started, run) = self.register(key.clone(), start);
        (started, self.finish(key, run))
    }

    /// Like [`SingleFlight::start_or_join`], except that a started run is
    /// driven on the tokio runtime and deregisters itself when done, even if
    /// every caller has gone away.
    pub fn spawn_or_join<F, Fut>(
        self: &Arc<Self>,
        key: K,
        start: F,
    ) -> (bool, impl Future<Output = Result<V>> + Send + 'static)
    where
        K: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let (started, run) = self.register(key.clone(), start);
        if started {
            let flight = Arc::clone(self);
            let driven = run.clone();
            let done_key = key.clone();
            drop(tokio::spawn(async move {
                _ = driven.await;
                flight.forget_finished(&done_key);
            }));
        }
        let flight = Arc::clone(self);
        (started, async move { flight.finish(key, run).await })
    }

    fn register<F, Fut>(&self, key: K, start: F) -> (bool, SharedRun<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut inflight = self.inflight.lock();
        match inflight.get(&key) {
            // A finished run nobody collected is replaced, not joined
            Some(run) if run.peek().is_none() => (false, run.clone()),
            _ => {
                let run = start().map(|r| r.map_err(Arc::new)).boxed().shared();
                _ = inflight.insert(key, run.clone());
                (true, run)
            }
        }
    }

    async fn finish(&self, key: K, run: SharedRun<V>) -> Result<V> {
        let result = run.clone().await;

        {
            let mut inflight = self.inflight.lock();
            if inflight.get(&key).is_some_and(|current| current.ptr_eq(&run)) {
                _ = inflight.remove(&key);
            }
        }
        // Release this handle so the last holder can take the error itself
        drop(run);

        result.map_err(Error::from_shared)
    }

    fn forget_finished(&self, key: &K) {
        let mut inflight = self.inflight.lock();
        if inflight.get(key).is_some_and(|run| run.peek().is_some()) {
            _ = inflight.remove(key);
        }
    }

    /// Whether a run for `key` is registered and not yet finished
    #[must_use]
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.inflight.lock().get(key).is_some_and(|run| run.peek().is_none())
    }
}
