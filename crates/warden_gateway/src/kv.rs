//! Namespaced scratch KV store.
//!
//! Process-wide shared state isolated only by namespace. This is an
//! explicit trust boundary, not per-run isolation: KV is scratch space,
//! not a system of record, and last-writer-wins is acceptable.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Outcome of a KV write attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWriteOutcome {
    /// Value stored
    Stored,
    /// New key refused: namespace at its key-count ceiling
    KeyQuotaExceeded,
    /// Value refused: serialized size over the byte ceiling
    ValueTooLarge,
}

/// In-process KV store with per-namespace quotas
#[derive(Debug, Default)]
pub struct KvStore {
    namespaces: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl KvStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value
    #[must_use]
    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        namespaces.get(namespace)?.get(key).cloned()
    }

    /// Write a value, enforcing quotas as hard denies.
    ///
    /// Overwriting an existing key is allowed even at the key-count
    /// ceiling; values are never silently truncated.
    pub fn set(
        &self,
        namespace: &str,
        key: &str,
        value: Value,
        max_keys: usize,
        max_value_bytes: usize,
    ) -> KvWriteOutcome {
        let serialized_len = value.to_string().len();
        if serialized_len > max_value_bytes {
            return KvWriteOutcome::ValueTooLarge;
        }
        let mut namespaces = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        let space = namespaces.entry(namespace.to_string()).or_default();
        if !space.contains_key(key) && space.len() >= max_keys {
            return KvWriteOutcome::KeyQuotaExceeded;
        }
        space.insert(key.to_string(), value);
        KvWriteOutcome::Stored
    }

    /// Number of keys in a namespace
    #[must_use]
    pub fn len(&self, namespace: &str) -> usize {
        let namespaces = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
        namespaces.get(namespace).map_or(0, HashMap::len)
    }

    /// Whether a namespace holds no keys
    #[must_use]
    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}
