//! Per-sensor runtime state.
//!
//! A `Sensor` pairs the immutable identity from configuration with the
//! mutable state the dispatch loop maintains: the last decoded reading and
//! one publish timestamp per sink. The two timers are independent — the
//! live sink and the durable sink each debounce on their own interval, and
//! a suppressed publish never resets a timer.
//!
//! A `Sensor` is owned exclusively by the dispatch loop; nothing here
//! needs locking.

use crate::config::{Intervals, SensorConfig};
use crate::decoder::Family;
use crate::mac_address::MacAddress;
use crate::measurement::Measurement;
use std::time::{Duration, Instant};

/// Runtime state for one configured sensor.
#[derive(Debug, Clone)]
pub struct Sensor {
    /// Stable bridge identity, assigned positionally from configuration
    /// order. Id 1 belongs to the bridge itself; sensors start at 2.
    pub id: u64,
    pub name: String,
    pub address: MacAddress,
    pub table: String,
    pub family: Family,
    live_interval: Duration,
    durable_interval: Duration,
    last_reading: Option<Measurement>,
    last_seen: Option<Instant>,
    last_published_live: Option<Instant>,
    last_published_durable: Option<Instant>,
}

impl Sensor {
    pub fn new(config: &SensorConfig, id: u64, intervals: &Intervals) -> Self {
        Self {
            id,
            name: config.name.clone(),
            address: config.mac,
            table: config.table.clone(),
            family: config.firmware,
            live_interval: intervals.live,
            durable_interval: intervals.durable,
            last_reading: None,
            last_seen: None,
            last_published_live: None,
            last_published_durable: None,
        }
    }

    /// Replace the last-known reading. `last_seen` is a diagnostics
    /// marker only; it never gates publishing.
    pub fn update(&mut self, reading: Measurement, now: Instant) {
        self.last_reading = Some(reading);
        self.last_seen = Some(now);
    }

    pub fn last_reading(&self) -> Option<Measurement> {
        self.last_reading
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// True when the live sink has never been published to, or the live
    /// interval has elapsed since the last publish.
    pub fn should_publish_live(&self, now: Instant) -> bool {
        due(self.last_published_live, self.live_interval, now)
    }

    /// Same rule as [`Self::should_publish_live`], tracked independently
    /// on the durable interval.
    pub fn should_publish_durable(&self, now: Instant) -> bool {
        due(self.last_published_durable, self.durable_interval, now)
    }

    pub fn mark_published_live(&mut self, now: Instant) {
        self.last_published_live = Some(now);
    }

    pub fn mark_published_durable(&mut self, now: Instant) {
        self.last_published_durable = Some(now);
    }
}

fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    match last {
        None => true,
        Some(last) => now.duration_since(last) >= interval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use crate::test_utils::{TEST_MAC, atc_reading};

    fn sensor(live_secs: u64, durable_secs: u64) -> Sensor {
        let config = SensorConfig {
            name: "Bedroom".to_string(),
            mac: TEST_MAC,
            firmware: Family::Atc,
            table: "home_temperature".to_string(),
        };
        let intervals = Intervals {
            live: Duration::from_secs(live_secs),
            durable: Duration::from_secs(durable_secs),
        };
        Sensor::new(&config, 2, &intervals)
    }

    fn t(base: Instant, secs: u64) -> Instant {
        base + Duration::from_secs(secs)
    }

    #[test]
    fn test_update_replaces_reading_and_bumps_last_seen() {
        let mut s = sensor(120, 300);
        assert!(s.last_reading().is_none());
        assert!(s.last_seen().is_none());

        let base = Instant::now();
        s.update(Measurement::Atc(atc_reading()), base);
        assert_eq!(s.last_reading(), Some(Measurement::Atc(atc_reading())));
        assert_eq!(s.last_seen(), Some(base));

        let mut second = atc_reading();
        second.temperature = 22.0;
        s.update(Measurement::Atc(second), t(base, 5));
        assert_eq!(s.last_reading(), Some(Measurement::Atc(second)));
        assert_eq!(s.last_seen(), Some(t(base, 5)));
    }

    #[test]
    fn test_first_publish_always_due() {
        let s = sensor(120, 300);
        let now = Instant::now();
        assert!(s.should_publish_live(now));
        assert!(s.should_publish_durable(now));
    }

    #[test]
    fn test_publish_blocked_within_interval() {
        let mut s = sensor(120, 300);
        let base = Instant::now();

        s.mark_published_live(base);
        assert!(!s.should_publish_live(t(base, 1)));
        assert!(!s.should_publish_live(t(base, 119)));
        assert!(s.should_publish_live(t(base, 120)));
        assert!(s.should_publish_live(t(base, 3600)));
    }

    #[test]
    fn test_timers_are_independent() {
        let mut s = sensor(120, 300);
        let base = Instant::now();

        s.mark_published_live(base);
        // durable has never published, so it is still due
        assert!(!s.should_publish_live(t(base, 10)));
        assert!(s.should_publish_durable(t(base, 10)));

        s.mark_published_durable(t(base, 10));
        assert!(!s.should_publish_durable(t(base, 100)));
        // live elapses at 120, durable not before 310
        assert!(s.should_publish_live(t(base, 120)));
        assert!(!s.should_publish_durable(t(base, 309)));
        assert!(s.should_publish_durable(t(base, 310)));
    }

    #[test]
    fn test_suppressed_publish_does_not_reset_timer() {
        let mut s = sensor(30, 300);
        let base = Instant::now();

        s.mark_published_live(base);
        // repeated checks inside the interval never push the deadline out
        assert!(!s.should_publish_live(t(base, 10)));
        assert!(!s.should_publish_live(t(base, 20)));
        assert!(s.should_publish_live(t(base, 30)));
    }

    #[test]
    fn test_unmarked_failure_retries_naturally() {
        // the loop only marks after a successful sink call; a failed call
        // leaves the timer untouched and the next reading is due again
        let mut s = sensor(120, 300);
        let base = Instant::now();

        assert!(s.should_publish_durable(base));
        // sink call failed: no mark
        assert!(s.should_publish_durable(t(base, 1)));

        s.mark_published_durable(t(base, 1));
        assert!(!s.should_publish_durable(t(base, 2)));
    }

    #[test]
    fn test_publish_count_is_bounded_by_interval() {
        // feed updates every second for ten minutes; the number of allowed
        // live publishes is bounded by elapsed / interval + 1
        let mut s = sensor(60, 300);
        let base = Instant::now();

        let mut live = 0;
        let mut durable = 0;
        for secs in 0..600 {
            let now = t(base, secs);
            if s.should_publish_live(now) {
                live += 1;
                s.mark_published_live(now);
            }
            if s.should_publish_durable(now) {
                durable += 1;
                s.mark_published_durable(now);
            }
        }

        assert_eq!(live, 10); // 600s / 60s
        assert_eq!(durable, 2); // at t=0 and t=300
    }
}
