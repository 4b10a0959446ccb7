//! In-process metrics.
//!
//! Counters and gauges backed by atomics, with a Prometheus text
//! exposition for the `/metrics` endpoint. One `WardenMetrics` instance is
//! built per service and injected into the components that record into it.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counter metric (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a counter at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment by a delta
    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Read the current value
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric (can go up and down)
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Create a gauge at zero
    #[must_use]
    pub const fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement by one
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Read the current value
    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Counter family keyed by a label value.
///
/// Labels are created lazily on first use; the set is expected to stay
/// small (capability names, deny reasons, syscall kinds).
#[derive(Debug, Default)]
pub struct LabeledCounter {
    inner: RwLock<BTreeMap<String, u64>>,
}

impl LabeledCounter {
    /// Create an empty family
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BTreeMap::new()),
        }
    }

    /// Increment the counter for a label
    pub fn inc(&self, label: &str) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *map.entry(label.to_string()).or_insert(0) += 1;
    }

    /// Read the counter for a label
    #[must_use]
    pub fn get(&self, label: &str) -> u64 {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(label).copied().unwrap_or(0)
    }

    /// Sum across all labels
    #[must_use]
    pub fn total(&self) -> u64 {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().sum()
    }

    /// Snapshot of all label values
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Metrics registry for one Warden instance
#[derive(Debug, Default)]
pub struct WardenMetrics {
    /// Runs by terminal result (`ok`, `error`, `dryrun`, `frozen`, ...)
    pub runs_total: LabeledCounter,
    /// Policy denies by stage reason
    pub policy_denied: LabeledCounter,
    /// Gateway denies by `capability:reason`
    pub gateway_denied: LabeledCounter,
    /// Syscalls by `kind:result`
    pub syscalls_total: LabeledCounter,
    /// Module cache hits
    pub cache_hits: Counter,
    /// Artifact downloads attempted
    pub downloads: Counter,
    /// Runs whose measured usage exceeded a resolved budget
    pub resource_violations: Counter,
    /// Events forwarded to the sink
    pub events_emitted: Counter,
    /// Submissions rejected for backpressure
    pub backpressure_rejects: Counter,
    /// Currently executing runs
    pub active_runs: Gauge,
}

impl WardenMetrics {
    /// Create a fresh registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the registry in Prometheus text exposition format
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        let mut out = String::new();
        for (name, family) in [
            ("warden_runs_total", &self.runs_total),
            ("warden_policy_denied_total", &self.policy_denied),
            ("warden_gateway_denied_total", &self.gateway_denied),
            ("warden_syscalls_total", &self.syscalls_total),
        ] {
            out.push_str(&format!("# TYPE {name} counter\n"));
            for (label, value) in family.snapshot() {
                out.push_str(&format!("{name}{{label=\"{label}\"}} {value}\n"));
            }
        }
        for (name, counter) in [
            ("warden_cache_hit_total", &self.cache_hits),
            ("warden_downloads_total", &self.downloads),
            ("warden_resource_violations_total", &self.resource_violations),
            ("warden_events_emitted_total", &self.events_emitted),
            ("warden_backpressure_rejects_total", &self.backpressure_rejects),
        ] {
            out.push_str(&format!("# TYPE {name} counter\n{name} {}\n", counter.get()));
        }
        out.push_str(&format!(
            "# TYPE warden_active_runs gauge\nwarden_active_runs {}\n",
            self.active_runs.get()
        ));
        out
    }
}
