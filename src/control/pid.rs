// src/control/pid.rs - PID term computation for one side (heat or cool)
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proportional, integral and derivative gains for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Gains {
    #[serde(default)]
    pub p: Decimal,
    #[serde(default)]
    pub i: Decimal,
    #[serde(default)]
    pub d: Decimal,
}

impl Gains {
    pub fn new(p: Decimal, i: Decimal, d: Decimal) -> Self {
        Self { p, i, d }
    }

    pub fn validate(&self, side: &str) -> BrewResult<()> {
        for (name, value) in [("p", self.p), ("i", self.i), ("d", self.d)] {
            if value.is_negative() {
                return Err(BrewError::invalid(format!(
                    "{} {} gain must be >= 0, got {}",
                    side, name, value
                )));
            }
        }
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.p.is_zero() || !self.i.is_zero() || !self.d.is_zero()
    }
}

/// Running state of one PID side.
///
/// Output is a duty percentage in [0, 100]. Time is measured in seconds
/// between successive calls; the first call after a reset has no integral
/// or derivative contribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidState {
    integral: Decimal,
    previous_error: Option<Decimal>,
    previous_time: Option<DateTime<Utc>>,
    output: Decimal,
}

impl PidState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn integral(&self) -> Decimal {
        self.integral
    }

    /// Last computed duty.
    pub fn output(&self) -> Decimal {
        self.output
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Compute the duty for `error`, where a positive error means this side
    /// should work harder.
    pub fn calculate_output(&mut self, gains: &Gains, error: Decimal, now: DateTime<Utc>) -> Decimal {
        let dt = self
            .previous_time
            .map(|prev| Decimal::from_millis((now - prev).num_milliseconds()))
            .filter(|dt| dt.is_positive());

        let (integral, derivative) = match dt {
            Some(dt) => {
                let derivative = self
                    .previous_error
                    .and_then(|prev| (error - prev).checked_div(dt))
                    .unwrap_or(Decimal::ZERO);
                (self.integral + error * dt, derivative)
            }
            None => (self.integral, Decimal::ZERO),
        };

        // The integral alone may never ask for more than full duty.
        let limit = if gains.i.is_positive() {
            Decimal::HUNDRED.checked_div(gains.i).unwrap_or(Decimal::HUNDRED)
        } else {
            Decimal::from_int(1_000_000)
        };
        let integral = integral.clamp(-limit, limit);

        let raw = gains.p * error + gains.i * integral + gains.d * derivative;
        let output = raw.clamp(Decimal::ZERO, Decimal::HUNDRED);

        // Anti-windup: while saturated, only accept integral movement that
        // pulls the output back into range.
        let saturated_high = raw > Decimal::HUNDRED && error.is_positive();
        let saturated_low = raw < Decimal::ZERO && error.is_negative();
        if !saturated_high && !saturated_low {
            self.integral = integral;
        }

        self.previous_error = Some(error);
        self.previous_time = Some(now);
        self.output = output;

        tracing::debug!(
            "PID error={} integral={} derivative={} output={}",
            error,
            self.integral,
            derivative,
            output
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_gain_validation() {
        assert!(Gains::new(d("1"), d("0"), d("0.5")).validate("heat").is_ok());
        assert!(matches!(
            Gains::new(d("1"), d("-0.1"), d("0")).validate("heat"),
            Err(BrewError::InvalidParameter { .. })
        ));
        assert!(!Gains::default().is_configured());
    }

    #[test]
    fn test_proportional_only() {
        let gains = Gains::new(d("10"), Decimal::ZERO, Decimal::ZERO);
        let mut pid = PidState::new();
        assert_eq!(pid.calculate_output(&gains, d("2.5"), t(0)), d("25"));
        assert_eq!(pid.calculate_output(&gains, d("-1"), t(1)), Decimal::ZERO);
        assert_eq!(pid.calculate_output(&gains, d("50"), t(2)), Decimal::HUNDRED);
    }

    #[test]
    fn test_integral_accumulates_over_time() {
        let gains = Gains::new(Decimal::ZERO, d("0.5"), Decimal::ZERO);
        let mut pid = PidState::new();
        pid.calculate_output(&gains, d("2"), t(0));
        assert_eq!(pid.integral(), Decimal::ZERO);
        let out = pid.calculate_output(&gains, d("2"), t(10));
        assert_eq!(pid.integral(), d("20"));
        assert_eq!(out, d("10"));
    }

    #[test]
    fn test_integral_does_not_wind_up_while_saturated() {
        let gains = Gains::new(d("100"), d("1"), Decimal::ZERO);
        let mut pid = PidState::new();
        for n in 0..20 {
            assert_eq!(pid.calculate_output(&gains, d("5"), t(n * 10)), Decimal::HUNDRED);
        }
        assert_eq!(pid.integral(), Decimal::ZERO);
    }

    #[test]
    fn test_derivative_reacts_to_change() {
        let gains = Gains::new(Decimal::ZERO, Decimal::ZERO, d("10"));
        let mut pid = PidState::new();
        pid.calculate_output(&gains, d("1"), t(0));
        let out = pid.calculate_output(&gains, d("3"), t(0) + TimeDelta::seconds(4));
        assert_eq!(out, d("5"));
    }

    #[test]
    fn test_reset_clears_history() {
        let gains = Gains::new(Decimal::ZERO, d("1"), Decimal::ZERO);
        let mut pid = PidState::new();
        pid.calculate_output(&gains, d("1"), t(0));
        pid.calculate_output(&gains, d("1"), t(5));
        assert!(pid.integral().is_positive());
        pid.reset();
        assert_eq!(pid, PidState::default());
    }
}
