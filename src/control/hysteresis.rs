// src/control/hysteresis.rs - On/off control with a deadband and minimum on-time
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Absolute temperature band, in the probe's scale, plus the minimum time an
/// output stays engaged once switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HysteresisBand {
    #[serde(default)]
    pub min: Decimal,
    #[serde(default)]
    pub max: Decimal,
    #[serde(default)]
    pub min_on_secs: Decimal,
}

impl HysteresisBand {
    pub fn new(min: Decimal, max: Decimal, min_on_secs: Decimal) -> Self {
        Self { min, max, min_on_secs }
    }

    pub fn validate(&self) -> BrewResult<()> {
        if self.min > self.max {
            return Err(BrewError::invalid(format!(
                "hysteresis min {} is above max {}",
                self.min, self.max
            )));
        }
        if self.min_on_secs.is_negative() {
            return Err(BrewError::invalid(format!(
                "hysteresis minimum on-time must be >= 0, got {}",
                self.min_on_secs
            )));
        }
        Ok(())
    }

    fn min_on(&self) -> TimeDelta {
        TimeDelta::milliseconds(self.min_on_secs.to_millis())
    }
}

/// When each side was last switched on, if it is currently engaged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HysteresisState {
    heat_on_since: Option<DateTime<Utc>>,
    cool_on_since: Option<DateTime<Utc>>,
}

impl HysteresisState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn heating(&self) -> bool {
        self.heat_on_since.is_some()
    }

    pub fn cooling(&self) -> bool {
        self.cool_on_since.is_some()
    }

    /// Heat engages below `min` and releases at or above `max` once the
    /// minimum on-time has passed.
    pub fn heat_demand(&mut self, band: &HysteresisBand, measured: Decimal, now: DateTime<Utc>) -> bool {
        match self.heat_on_since {
            Some(since) => {
                if measured >= band.max && now - since >= band.min_on() {
                    self.heat_on_since = None;
                    false
                } else {
                    true
                }
            }
            None => {
                if measured < band.min {
                    self.heat_on_since = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Cool engages above `max` (only when `allowed`) and releases at or
    /// below `min` once the minimum on-time has passed.
    pub fn cool_demand(
        &mut self,
        band: &HysteresisBand,
        measured: Decimal,
        now: DateTime<Utc>,
        allowed: bool,
    ) -> bool {
        match self.cool_on_since {
            Some(since) => {
                if measured <= band.min && now - since >= band.min_on() {
                    self.cool_on_since = None;
                    false
                } else {
                    true
                }
            }
            None => {
                if allowed && measured > band.max {
                    self.cool_on_since = Some(now);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: i64) -> Decimal {
        Decimal::from_int(v)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_band_validation() {
        assert!(HysteresisBand::new(d(68), d(70), d(60)).validate().is_ok());
        assert!(HysteresisBand::new(d(70), d(70), d(0)).validate().is_ok());
        assert!(HysteresisBand::new(d(71), d(70), d(60)).validate().is_err());
        assert!(HysteresisBand::new(d(68), d(70), d(-1)).validate().is_err());
    }

    #[test]
    fn test_heat_holds_for_minimum_on_time() {
        let band = HysteresisBand::new(d(68), d(70), d(60));
        let mut state = HysteresisState::default();
        assert!(!state.heat_demand(&band, d(69), t(0)));
        assert!(state.heat_demand(&band, d(66), t(10)));
        assert!(state.heat_demand(&band, d(71), t(40)));
        assert!(state.heat_demand(&band, d(71), t(69)));
        assert!(!state.heat_demand(&band, d(71), t(70)));
        assert!(!state.heating());
    }

    #[test]
    fn test_heat_stays_on_inside_band() {
        let band = HysteresisBand::new(d(68), d(70), d(0));
        let mut state = HysteresisState::default();
        assert!(state.heat_demand(&band, d(67), t(0)));
        assert!(state.heat_demand(&band, d(69), t(100)));
        assert!(!state.heat_demand(&band, d(70), t(200)));
    }

    #[test]
    fn test_cool_respects_allowed_flag() {
        let band = HysteresisBand::new(d(64), d(66), d(30));
        let mut state = HysteresisState::default();
        assert!(!state.cool_demand(&band, d(68), t(0), false));
        assert!(state.cool_demand(&band, d(68), t(1), true));
        assert!(state.cool_demand(&band, d(63), t(20), true));
        assert!(!state.cool_demand(&band, d(63), t(31), true));
    }
}
