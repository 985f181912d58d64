// /////////////////////////////////////////////////////////////////////////////
// Research Flow
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Cache Strategy (bounded staleness fallback)
//!
//! Serves a previously successful result when the primary fails with a
//! handled error and the cached entry is still within its TTL.
//!
//! ## Semantics
//!
//! 1. Attempt the primary. On success, store `(key, result, now)` and return.
//! 2. On a handled error, return the cached result if `now - stored_at <=
//!    ttl`; otherwise propagate the error.
//! 3. Non-handled errors bypass the cache entirely.
//!
//! Keys are caller-built strings of the form `function-name(ordered-args)`;
//! the search registry derives them from `(query, backend, params)`.
//!
//! The store is process-wide per [`StaleCache`] instance. Entries are guarded
//! by a read-write lock: lookups take the shared lock, stores and purges the
//! exclusive one. Timekeeping uses `tokio::time::Instant` so paused-clock
//! tests can drive expiry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use research_flow_domain::FlowError;

use super::fallback::ErrorPredicate;

/// TTL-bounded result store shared by cache strategies.
pub struct StaleCache<T> {
    ttl: Duration,
    entries: RwLock<HashMap<String, (T, Instant)>>,
}

impl<T: Clone> StaleCache<T> {
    /// Creates a cache whose entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Entry TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value for `key` when still fresh.
    pub fn get_fresh(&self, key: &str) -> Option<T> {
        let entries = self.entries.read();
        entries.get(key).and_then(|(value, stored_at)| {
            if stored_at.elapsed() <= self.ttl {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    /// Stores `value` under `key`, stamping the current time.
    pub fn put(&self, key: &str, value: T) {
        self.entries.write().insert(key.to_string(), (value, Instant::now()));
    }

    /// Drops every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, (_, stored_at)| stored_at.elapsed() <= self.ttl);
        before - entries.len()
    }

    /// Number of live (possibly stale) entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// Cache strategy bound to one key in a shared [`StaleCache`].
#[derive(Clone)]
pub struct CacheStrategy<T> {
    cache: Arc<StaleCache<T>>,
    key: String,
    handled: ErrorPredicate,
}

impl<T: Clone> CacheStrategy<T> {
    /// Creates a strategy handling every error kind.
    pub fn new(cache: Arc<StaleCache<T>>, key: impl Into<String>) -> Self {
        Self {
            cache,
            key: key.into(),
            handled: Arc::new(|_| true),
        }
    }

    /// Creates a strategy handling only errors matching `handled`.
    pub fn handling(cache: Arc<StaleCache<T>>, key: impl Into<String>, handled: ErrorPredicate) -> Self {
        Self {
            cache,
            key: key.into(),
            handled,
        }
    }

    /// Runs `op` with stale-result fallback semantics.
    pub async fn execute<F, Fut>(&self, op: F) -> Result<T, FlowError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowError>>,
    {
        match op().await {
            Ok(value) => {
                self.cache.put(&self.key, value.clone());
                debug!(key = %self.key, "cached fresh result");
                Ok(value)
            }
            Err(err) if (self.handled)(&err) => match self.cache.get_fresh(&self.key) {
                Some(value) => {
                    info!(key = %self.key, error = %err, "primary failed, serving cached result");
                    Ok(value)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}
