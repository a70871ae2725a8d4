// src/mash/step.rs - One step of a mash profile
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use crate::hardware::TempScale;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    Pending,
    Active,
    Complete,
}

/// A temperature target held for a duration.
///
/// `start` is stamped on first activation, `target_end` once the vessel is
/// within tolerance and the hold begins, `end` when the step is retired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MashStep {
    pub position: i32,
    pub target_temp: Decimal,
    pub temp_unit: TempScale,
    pub duration_mins: Decimal,
    pub method: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub active: bool,
    pub start: Option<DateTime<Utc>>,
    pub target_end: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl MashStep {
    /// One year.
    pub const MAX_DURATION_MINS: Decimal = Decimal::from_int(525_600);

    pub fn new(position: i32) -> Self {
        Self {
            position,
            target_temp: Decimal::ZERO,
            temp_unit: TempScale::Fahrenheit,
            duration_mins: Decimal::ZERO,
            method: String::new(),
            step_type: String::new(),
            active: false,
            start: None,
            target_end: None,
            end: None,
        }
    }

    pub fn set_target(&mut self, temp: Decimal, unit: TempScale) {
        self.target_temp = temp;
        self.temp_unit = unit;
    }

    pub fn set_duration(&mut self, mins: Decimal) -> BrewResult<()> {
        if mins.is_negative() || mins > Self::MAX_DURATION_MINS {
            return Err(BrewError::invalid(format!(
                "step {} duration must be within 0..={} minutes, got {}",
                self.position,
                Self::MAX_DURATION_MINS,
                mins
            )));
        }
        self.duration_mins = mins;
        Ok(())
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    pub fn set_type(&mut self, step_type: impl Into<String>) {
        self.step_type = step_type.into();
    }

    /// Only the ordering key changes.
    pub fn set_position(&mut self, position: i32) {
        self.position = position;
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.active = true;
        if self.start.is_none() {
            self.start = Some(now);
        }
    }

    pub fn deactivate(&mut self, record_end: bool, now: DateTime<Utc>) {
        self.active = false;
        if record_end {
            self.end = Some(now);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn hold_started(&self) -> bool {
        self.target_end.is_some()
    }

    pub fn duration(&self) -> TimeDelta {
        TimeDelta::milliseconds((self.duration_mins * Decimal::from_int(60)).to_millis())
    }

    /// Start the timed hold: `target_end = now + duration`.
    pub fn begin_hold(&mut self, now: DateTime<Utc>) -> BrewResult<DateTime<Utc>> {
        let target_end = now.checked_add_signed(self.duration()).ok_or_else(|| {
            BrewError::invalid(format!(
                "step {} duration of {} minutes runs past the supported date range",
                self.position, self.duration_mins
            ))
        })?;
        self.target_end = Some(target_end);
        Ok(target_end)
    }

    pub fn target_temp_as(&self, scale: TempScale) -> Decimal {
        self.temp_unit.convert(self.target_temp, scale)
    }

    pub fn state(&self) -> StepState {
        if self.active {
            StepState::Active
        } else if self.end.is_some() {
            StepState::Complete
        } else {
            StepState::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_activate_stamps_start_once() {
        let mut step = MashStep::new(0);
        assert_eq!(step.state(), StepState::Pending);

        step.activate(t(0));
        step.deactivate(false, t(10));
        step.activate(t(20));

        assert_eq!(step.start, Some(t(0)));
        assert_eq!(step.state(), StepState::Active);
        assert!(step.end.is_none());
    }

    #[test]
    fn test_deactivate_records_end_on_request() {
        let mut step = MashStep::new(3);
        step.activate(t(0));
        step.deactivate(true, t(90));

        assert!(!step.is_active());
        assert_eq!(step.end, Some(t(90)));
        assert_eq!(step.state(), StepState::Complete);
    }

    #[test]
    fn test_begin_hold_uses_duration() {
        let mut step = MashStep::new(0);
        step.set_duration(Decimal::new(15, 1)).unwrap();
        assert!(!step.hold_started());

        let end = step.begin_hold(t(0)).unwrap();
        assert_eq!(end, t(90));
        assert!(step.hold_started());
    }

    #[test]
    fn test_out_of_range_duration_rejected() {
        let mut step = MashStep::new(0);
        step.set_duration(Decimal::from_int(30)).unwrap();
        assert!(step.set_duration(Decimal::from_int(-1)).is_err());
        assert!(step.set_duration(Decimal::from_int(1_000_000_000_000)).is_err());
        assert_eq!(step.duration_mins, Decimal::from_int(30));
        step.set_duration(MashStep::MAX_DURATION_MINS).unwrap();
    }

    #[test]
    fn test_begin_hold_past_date_range_fails() {
        let mut step = MashStep::new(0);
        step.set_duration(MashStep::MAX_DURATION_MINS).unwrap();
        assert!(step.begin_hold(DateTime::<Utc>::MAX_UTC).is_err());
        assert!(!step.hold_started());
    }

    #[test]
    fn test_target_conversion() {
        let mut step = MashStep::new(0);
        step.set_target(Decimal::from_int(65), TempScale::Celsius);
        assert_eq!(step.target_temp_as(TempScale::Fahrenheit), Decimal::from_int(149));
        assert_eq!(step.target_temp_as(TempScale::Celsius), Decimal::from_int(65));
    }

    #[test]
    fn test_set_position_keeps_timestamps() {
        let mut step = MashStep::new(0);
        step.activate(t(5));
        step.set_position(7);
        assert_eq!(step.position, 7);
        assert!(step.is_active());
        assert_eq!(step.start, Some(t(5)));
    }

    #[test]
    fn test_serializes_type_field() {
        let mut step = MashStep::new(1);
        step.set_type("Sacch Rest");
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "Sacch Rest");
        assert_eq!(json["temp_unit"], "F");
    }
}
