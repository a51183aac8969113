//! Built-in lane defaults (layer 1 of the config merge).

/// Smallest admissible build concurrency.
pub const MIN_CAPACITY: usize = 1;

/// Largest admissible build concurrency. Capacity is clamped here no matter
/// what the environment asks for, to bound resource usage on the host.
pub const MAX_CAPACITY: usize = 4;

/// Default concurrent build slots.
pub const DEFAULT_CAPACITY: usize = 2;

/// Default absolute per-build budget: 45 minutes.
pub const DEFAULT_ABSOLUTE_TIMEOUT_SECS: u64 = 45 * 60;

/// Default inactivity window: 10 minutes without observed progress.
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 10 * 60;

/// Default slot-watchdog tick period.
pub const DEFAULT_WATCHDOG_PERIOD_SECS: u64 = 60;

/// Default supervisor timeout-check period.
pub const DEFAULT_TIMEOUT_CHECK_SECS: u64 = 30;

/// Clamp a configured capacity into the admissible range.
pub fn clamp_capacity(requested: usize) -> usize {
    requested.clamp(MIN_CAPACITY, MAX_CAPACITY)
}
