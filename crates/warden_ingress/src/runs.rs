//! The run table.
//!
//! An explicitly-owned store injected into the ingress service; terminal
//! runs are retained until their TTL so status polling works after
//! completion.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use warden_core::{RunId, RunState};

/// In-memory table of run states
#[derive(Debug)]
pub struct RunTable {
    ttl: Duration,
    inner: RwLock<HashMap<RunId, Entry>>,
}

#[derive(Debug)]
struct Entry {
    state: RunState,
    touched_at: Instant,
}

impl RunTable {
    /// Create a table with the given terminal-state retention
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert (or replace) a run state
    pub fn insert(&self, state: RunState) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        self.purge_expired(&mut inner);
        inner.insert(
            state.run_id,
            Entry {
                state,
                touched_at: Instant::now(),
            },
        );
    }

    /// Current view of a run
    #[must_use]
    pub fn get(&self, run_id: RunId) -> Option<RunState> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.get(&run_id).map(|entry| entry.state.clone())
    }

    /// Apply a mutation to a run's state, returning the updated copy.
    ///
    /// Returns `None` when the run is unknown.
    pub fn update<F>(&self, run_id: RunId, mutate: F) -> Option<RunState>
    where
        F: FnOnce(&mut RunState),
    {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = inner.get_mut(&run_id)?;
        mutate(&mut entry.state);
        entry.touched_at = Instant::now();
        Some(entry.state.clone())
    }

    /// Number of tracked runs
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_expired(&self, inner: &mut HashMap<RunId, Entry>) {
        let now = Instant::now();
        inner.retain(|_, entry| {
            !entry.state.status.is_terminal() || now.duration_since(entry.touched_at) < self.ttl
        });
    }
}
