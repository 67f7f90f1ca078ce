//! Clock reads.
//!
//! All deadlines in the engine are absolute nanoseconds since the Unix
//! epoch (the substrate's expiry resolution); stream and time-series IDs
//! use milliseconds.

use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_MS: u64 = 1_000_000;
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Current wall clock in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Current wall clock in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    now_ns() / NANOS_PER_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic_enough() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(now_ms() > 1_500_000_000_000); // sometime after 2017
    }
}
