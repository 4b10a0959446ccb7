//! Resource limits and usage accounting for sandboxed execution.

use serde::{Deserialize, Serialize};

/// WASM linear memory page size (64 KiB)
pub const WASM_PAGE_BYTES: u64 = 65_536;

/// Hard ceilings resolved for one run.
///
/// The CPU budget is denominated in fuel, an abstract bounded-computation
/// unit consumed deterministically by execution; wall-clock is a separate,
/// independent guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Maximum linear memory in 64 KiB pages
    pub memory_pages: u64,
    /// Fuel budget for execution
    pub fuel: u64,
    /// Wall-clock budget in milliseconds
    pub wall_ms: u64,
}

impl ResourceLimits {
    /// Create limits
    #[must_use]
    pub const fn new(memory_pages: u64, fuel: u64, wall_ms: u64) -> Self {
        Self {
            memory_pages,
            fuel,
            wall_ms,
        }
    }

    /// Memory ceiling in bytes
    #[must_use]
    pub const fn memory_bytes(&self) -> u64 {
        self.memory_pages * WASM_PAGE_BYTES
    }

    /// Apply request hints. Hints may only tighten, never loosen: each
    /// hinted value is clamped to the configured ceiling.
    #[must_use]
    pub fn tighten(&self, hints: &LimitHints) -> Self {
        Self {
            memory_pages: clamp_hint(self.memory_pages, hints.memory_pages),
            fuel: clamp_hint(self.fuel, hints.fuel),
            wall_ms: clamp_hint(self.wall_ms, hints.wall_ms),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_pages: 256, // 16 MiB
            fuel: 10_000_000,
            wall_ms: 2_000,
        }
    }
}

fn clamp_hint(ceiling: u64, hint: Option<u64>) -> u64 {
    match hint {
        Some(v) if v > 0 => v.min(ceiling),
        _ => ceiling,
    }
}

/// Optional per-request limit hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitHints {
    /// Requested memory page ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_pages: Option<u64>,
    /// Requested fuel budget
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fuel: Option<u64>,
    /// Requested wall-clock budget in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wall_ms: Option<u64>,
}

impl LimitHints {
    /// Hints that leave every limit at its default
    #[must_use]
    pub const fn none() -> Self {
        Self {
            memory_pages: None,
            fuel: None,
            wall_ms: None,
        }
    }
}

/// Measured resource usage for one run.
///
/// Reported on every outcome, success or failure; partial on truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Fuel consumed
    pub fuel_used: u64,
    /// Peak linear memory observed, in pages
    pub mem_pages: u64,
    /// Syscalls dispatched through the gateway
    pub syscalls: u64,
    /// Wall-clock time spent executing, in milliseconds
    pub elapsed_ms: u64,
}

impl Usage {
    /// Empty usage (dry-run, frozen, or denied before execution)
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            fuel_used: 0,
            mem_pages: 0,
            syscalls: 0,
            elapsed_ms: 0,
        }
    }

    /// Whether any budget in `limits` was exceeded
    #[must_use]
    pub const fn exceeds(&self, limits: &ResourceLimits) -> bool {
        self.fuel_used > limits.fuel
            || self.mem_pages > limits.memory_pages
            || self.elapsed_ms > limits.wall_ms
    }

    /// Whether nothing was measured at all
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.fuel_used == 0 && self.mem_pages == 0 && self.syscalls == 0 && self.elapsed_ms == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_memory_bytes() {
        let limits = ResourceLimits::new(2, 1000, 100);
        assert_eq!(limits.memory_bytes(), 131_072);
    }

    #[test]
    fn test_tighten_clamps_to_ceiling() {
        let defaults = ResourceLimits::new(256, 10_000_000, 2_000);
        let hints = LimitHints {
            memory_pages: Some(1024),
            fuel: Some(500),
            wall_ms: None,
        };
        let resolved = defaults.tighten(&hints);
        // may not loosen past the ceiling
        assert_eq!(resolved.memory_pages, 256);
        // may tighten below it
        assert_eq!(resolved.fuel, 500);
        // unset hints keep defaults
        assert_eq!(resolved.wall_ms, 2_000);
    }

    #[test]
    fn test_tighten_ignores_zero() {
        let defaults = ResourceLimits::default();
        let hints = LimitHints {
            fuel: Some(0),
            ..LimitHints::none()
        };
        assert_eq!(defaults.tighten(&hints).fuel, defaults.fuel);
    }

    #[test]
    fn test_usage_exceeds() {
        let limits = ResourceLimits::new(10, 1000, 100);
        let ok = Usage {
            fuel_used: 900,
            mem_pages: 10,
            syscalls: 3,
            elapsed_ms: 50,
        };
        assert!(!ok.exceeds(&limits));

        let over_fuel = Usage {
            fuel_used: 1001,
            ..ok
        };
        assert!(over_fuel.exceeds(&limits));

        let over_mem = Usage {
            mem_pages: 11,
            ..ok
        };
        assert!(over_mem.exceeds(&limits));

        let over_wall = Usage {
            elapsed_ms: 101,
            ..ok
        };
        assert!(over_wall.exceeds(&limits));
    }

    #[test]
    fn test_usage_empty() {
        assert!(Usage::empty().is_empty());
        let used = Usage {
            syscalls: 1,
            ..Usage::empty()
        };
        assert!(!used.is_empty());
    }
}
