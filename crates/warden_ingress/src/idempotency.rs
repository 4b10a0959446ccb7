//! Idempotency cache for retried submissions.
//!
//! A retry cache, not a distributed lock: two identical submissions
//! racing before the first completes may both execute live. The store
//! only ever holds terminal states, each with an expiry.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use warden_core::{RunRequest, RunState};

/// TTL'd cache of terminal run states keyed by idempotency key
#[derive(Debug)]
pub struct IdempotencyStore {
    ttl: Duration,
    inner: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    state: RunState,
    expires_at: Instant,
}

impl IdempotencyStore {
    /// Create a store with the given TTL
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// The key for a request: the explicit key when given, otherwise a
    /// hash of locator, module, args, and caller.
    #[must_use]
    pub fn key_for(request: &RunRequest) -> String {
        if let Some(key) = &request.idempotency_key {
            if !key.trim().is_empty() {
                return key.clone();
            }
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(request.locator.as_bytes());
        hasher.update(b"|");
        hasher.update(request.module.as_bytes());
        hasher.update(b"|");
        let args = serde_json::to_string(&request.args).unwrap_or_default();
        hasher.update(args.as_bytes());
        hasher.update(b"|");
        hasher.update(request.caller.as_deref().unwrap_or("").as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Look up a cached terminal state, purging it if expired
    #[must_use]
    pub fn get(&self, key: &str) -> Option<RunState> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            let entry = inner.get(key)?;
            if entry.expires_at > Instant::now() {
                return Some(entry.state.clone());
            }
        }
        // expired: drop it
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.remove(key);
        None
    }

    /// Store a terminal state. Non-terminal states are ignored.
    pub fn put(&self, key: &str, state: RunState) {
        if !state.status.is_terminal() {
            return;
        }
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.insert(
            key.to_string(),
            Entry {
                state,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Number of live entries (expired entries may still be counted
    /// until their next lookup)
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
