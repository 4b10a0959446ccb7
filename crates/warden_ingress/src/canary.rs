//! Deterministic canary admission.
//!
//! Admission is a pure function of the run's idempotency identifier and
//! the configured fraction: the identifier hashes into a bucket which is
//! compared against the fraction. The same identifier always lands in
//! the same bucket, so retries of one request never flap between live
//! and dry-run.

/// Decide live (`true`) vs dry-run (`false`) admission.
///
/// A fraction of 0 (or less) always dry-runs; 1 (or more) always goes
/// live.
#[must_use]
pub fn admit(identifier: &str, fraction: f64) -> bool {
    if fraction <= 0.0 {
        return false;
    }
    if fraction >= 1.0 {
        return true;
    }
    let hash = blake3::hash(identifier.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    let bucket = u64::from_le_bytes(prefix);
    (bucket as f64 / u64::MAX as f64) < fraction
}
