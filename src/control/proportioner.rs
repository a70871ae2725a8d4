// src/control/proportioner.rs - Time-proportioning output driver
//! Turns a duty percentage into relay on/off decisions.
//!
//! The duty is latched at the start of each cycle: the output is on for the
//! first `duty / 100 × cycle` of the window and off for the rest. A duty
//! requested mid-cycle takes effect when the next cycle opens.

use crate::decimal::Decimal;
use chrono::{DateTime, TimeDelta, Utc};

#[derive(Debug, Clone, PartialEq)]
pub struct TimeProportioner {
    cycle_start: Option<DateTime<Utc>>,
    cycle_length: TimeDelta,
    duty: Decimal,
}

impl Default for TimeProportioner {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeProportioner {
    pub fn new() -> Self {
        Self {
            cycle_start: None,
            cycle_length: TimeDelta::zero(),
            duty: Decimal::ZERO,
        }
    }

    /// Duty applied to the current cycle.
    pub fn duty(&self) -> Decimal {
        self.duty
    }

    pub fn cycle_start(&self) -> Option<DateTime<Utc>> {
        self.cycle_start
    }

    pub fn cycle_length(&self) -> TimeDelta {
        self.cycle_length
    }

    /// Forget the current cycle; the next call opens a fresh one.
    pub fn reset(&mut self) {
        self.cycle_start = None;
        self.cycle_length = TimeDelta::zero();
        self.duty = Decimal::ZERO;
    }

    /// Decide whether the output should be on at `now`.
    ///
    /// `duty` is clamped to [0, 100]; `cycle_secs` is expected to be positive
    /// and is floored at one millisecond.
    pub fn output_at(&mut self, duty: Decimal, cycle_secs: Decimal, now: DateTime<Utc>) -> bool {
        let start = match self.cycle_start {
            Some(start) if now >= start && now - start < self.cycle_length => start,
            _ => {
                self.cycle_start = Some(now);
                self.cycle_length = TimeDelta::milliseconds(cycle_secs.to_millis().max(1));
                self.duty = duty.clamp(Decimal::ZERO, Decimal::HUNDRED);
                now
            }
        };
        // elapsed < duty / 100 * length, compared in raw units to stay exact.
        let elapsed_ms = (now - start).num_milliseconds() as i128;
        let length_ms = self.cycle_length.num_milliseconds() as i128;
        elapsed_ms * 100 * (Decimal::SCALE as i128) < self.duty.raw() as i128 * length_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn on_fraction(duty: Decimal, cycle_secs: i64, sample_ms: i64) -> (usize, usize) {
        let mut driver = TimeProportioner::new();
        let samples = (cycle_secs * 1000 / sample_ms) as usize;
        let mut on = 0;
        for n in 0..samples {
            let now = t0() + TimeDelta::milliseconds(n as i64 * sample_ms);
            if driver.output_at(duty, Decimal::from_int(cycle_secs), now) {
                on += 1;
            }
        }
        (on, samples)
    }

    #[test]
    fn test_on_fraction_matches_duty() {
        for duty in ["0", "5", "25", "50", "73.5", "99", "100"] {
            let duty: Decimal = duty.parse().unwrap();
            let (on, samples) = on_fraction(duty, 10, 100);
            let expected = duty.to_f64() / 100.0 * samples as f64;
            assert!(
                (on as f64 - expected).abs() <= 1.0,
                "duty {} gave {} of {} samples",
                duty,
                on,
                samples
            );
        }
    }

    #[test]
    fn test_zero_and_full_duty() {
        let (on, _) = on_fraction(Decimal::ZERO, 4, 50);
        assert_eq!(on, 0);
        let (on, samples) = on_fraction(Decimal::HUNDRED, 4, 50);
        assert_eq!(on, samples);
    }

    #[test]
    fn test_duty_latched_until_next_cycle() {
        let mut driver = TimeProportioner::new();
        let cycle = Decimal::from_int(10);
        assert!(driver.output_at(Decimal::from_int(50), cycle, t0()));
        // Dropping to zero mid-cycle keeps the latched 50%.
        assert!(driver.output_at(Decimal::ZERO, cycle, t0() + TimeDelta::seconds(2)));
        assert!(!driver.output_at(Decimal::ZERO, cycle, t0() + TimeDelta::seconds(6)));
        assert_eq!(driver.duty(), Decimal::from_int(50));
        // New cycle picks up the new duty.
        assert!(!driver.output_at(Decimal::ZERO, cycle, t0() + TimeDelta::seconds(10)));
        assert_eq!(driver.duty(), Decimal::ZERO);
        assert_eq!(driver.cycle_start(), Some(t0() + TimeDelta::seconds(10)));
    }

    #[test]
    fn test_clock_jump_backwards_opens_new_cycle() {
        let mut driver = TimeProportioner::new();
        let cycle = Decimal::from_int(10);
        driver.output_at(Decimal::from_int(30), cycle, t0());
        let earlier = t0() - TimeDelta::seconds(5);
        assert!(driver.output_at(Decimal::from_int(30), cycle, earlier));
        assert_eq!(driver.cycle_start(), Some(earlier));
    }

    #[test]
    fn test_very_long_cycle() {
        let mut driver = TimeProportioner::new();
        let cycle = Decimal::from_int(10_000_000_000);
        assert!(driver.output_at(Decimal::from_int(50), cycle, t0()));
        assert!(driver.output_at(Decimal::from_int(50), cycle, t0() + TimeDelta::days(365)));
        let cycle = Decimal::from_raw(i64::MAX);
        driver.reset();
        assert!(driver.output_at(Decimal::HUNDRED, cycle, t0()));
    }

    #[test]
    fn test_duty_clamped() {
        let mut driver = TimeProportioner::new();
        driver.output_at(Decimal::from_int(150), Decimal::from_int(1), t0());
        assert_eq!(driver.duty(), Decimal::HUNDRED);
        driver.reset();
        driver.output_at(Decimal::from_int(-5), Decimal::from_int(1), t0());
        assert_eq!(driver.duty(), Decimal::ZERO);
    }
}
