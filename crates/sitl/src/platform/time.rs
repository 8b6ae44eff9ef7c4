//! Wall-clock time source for host runs.

use polaris_nav_core::traits::TimeSource;
use std::time::Instant;

/// Monotonic time source backed by `std::time::Instant`.
///
/// The epoch is the moment of construction, mirroring the
/// microseconds-since-boot convention of the firmware timers.
#[derive(Clone)]
pub struct HostTime {
    epoch: Instant,
}

impl HostTime {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for HostTime {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for HostTime {
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_is_monotonic() {
        let clock = HostTime::new();
        let first = clock.now_us();
        let second = clock.now_us();
        assert!(second >= first);
    }

    #[test]
    fn ms_tracks_us() {
        let clock = HostTime::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        assert!(clock.now_ms() >= 1);
        assert!(clock.now_us() >= 1000);
    }
}
