use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{Local, TimeZone};

use crate::model::{DAY_MS, Ms};

/// Source of "now" for booking rules. The check-in-not-in-the-past rule and
/// the occupancy side effect both read it.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;

    /// Local midnight at the start of the current day.
    fn start_of_today(&self) -> Ms;

    fn start_of_tomorrow(&self) -> Ms {
        self.start_of_today() + DAY_MS
    }
}

/// Wall clock in the server's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Local::now().timestamp_millis()
    }

    fn start_of_today(&self) -> Ms {
        let now = Local::now();
        now.date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
            // DST gap at midnight: fall back to the UTC day boundary.
            .map_or_else(
                || {
                    let ms = now.timestamp_millis();
                    ms - ms.rem_euclid(DAY_MS)
                },
                |dt| dt.timestamp_millis(),
            )
    }
}

/// Settable clock whose days start at UTC midnight.
#[derive(Debug)]
pub struct FixedClock {
    now: AtomicI64,
}

impl FixedClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Ms) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.now.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }

    fn start_of_today(&self) -> Ms {
        let now = self.now_ms();
        now - now.rem_euclid(DAY_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_day_boundaries() {
        let clock = FixedClock::new(3 * DAY_MS + 5_000);
        assert_eq!(clock.start_of_today(), 3 * DAY_MS);
        assert_eq!(clock.start_of_tomorrow(), 4 * DAY_MS);
        clock.advance(DAY_MS);
        assert_eq!(clock.start_of_today(), 4 * DAY_MS);
        clock.set(0);
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn system_clock_midnight_is_within_a_day() {
        let clock = SystemClock;
        let now = clock.now_ms();
        let midnight = clock.start_of_today();
        assert!(midnight <= now);
        // 25h tolerates a DST transition day.
        assert!(now - midnight < DAY_MS + 3_600_000);
    }
}
