// SPDX-License-Identifier: MPL-2.0

//! Clock ticks and bring-up delays.

use core::time::Duration;
use std::time::Instant;

/// The frequency of the system tick.
pub const TICK_HZ: u64 = 100;

const MILLIS_PER_TICK: u64 = 1000 / TICK_HZ;

/// Converts a tick count into a duration.
pub fn ticks_to_duration(ticks: u64) -> Duration {
    Duration::from_millis(ticks * MILLIS_PER_TICK)
}

/// Returns a monotonic timestamp.
pub fn now() -> Instant {
    Instant::now()
}

/// Delays the caller for `ms` milliseconds.
///
/// Used between the inter-processor signals of the bring-up sequence.
pub fn wait_ms(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_conversion() {
        assert_eq!(ticks_to_duration(0), Duration::ZERO);
        assert_eq!(ticks_to_duration(TICK_HZ), Duration::from_secs(1));
    }
}
