// src/control/settings.rs - Typed configuration payloads for a controller
use super::hysteresis::HysteresisBand;
use super::pid::Gains;
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Off,
    Manual,
    #[serde(alias = "pid")]
    Auto,
    #[serde(alias = "hysteria")]
    Hysteresis,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Off => "off",
            Mode::Manual => "manual",
            Mode::Auto => "auto",
            Mode::Hysteresis => "hysteresis",
        };
        f.write_str(s)
    }
}

/// Gains and time-proportioning cycle for one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideSettings {
    #[serde(default)]
    pub p: Decimal,
    #[serde(default)]
    pub i: Decimal,
    #[serde(default)]
    pub d: Decimal,
    #[serde(default = "default_heat_cycle")]
    pub cycle_secs: Decimal,
}

impl SideSettings {
    pub fn with_cycle(cycle_secs: Decimal) -> Self {
        Self {
            p: Decimal::ZERO,
            i: Decimal::ZERO,
            d: Decimal::ZERO,
            cycle_secs,
        }
    }

    pub fn gains(&self) -> Gains {
        Gains::new(self.p, self.i, self.d)
    }

    pub fn set_gains(&mut self, gains: Gains) {
        self.p = gains.p;
        self.i = gains.i;
        self.d = gains.d;
    }

    fn validate(&self, side: &str) -> BrewResult<()> {
        self.gains().validate(side)?;
        validate_cycle(side, self.cycle_secs)
    }
}

impl Default for SideSettings {
    fn default() -> Self {
        Self::with_cycle(default_heat_cycle())
    }
}

/// Everything tunable on a controller, validated and applied as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSettings {
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub setpoint: Decimal,
    #[serde(default)]
    pub manual_duty: Decimal,
    #[serde(default = "default_manual_cycle")]
    pub manual_cycle_secs: Decimal,
    #[serde(default)]
    pub cool_delay_secs: Decimal,
    #[serde(default = "SideSettings::default")]
    pub heat: SideSettings,
    #[serde(default = "default_cool_side")]
    pub cool: SideSettings,
    #[serde(default)]
    pub hysteresis: HysteresisBand,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            mode: Mode::Off,
            setpoint: Decimal::ZERO,
            manual_duty: Decimal::ZERO,
            manual_cycle_secs: default_manual_cycle(),
            cool_delay_secs: Decimal::ZERO,
            heat: SideSettings::default(),
            cool: default_cool_side(),
            hysteresis: HysteresisBand::default(),
        }
    }
}

impl ControllerSettings {
    /// Check every field; nothing is applied unless all of them pass.
    pub fn validate(&self) -> BrewResult<()> {
        validate_duty(self.manual_duty)?;
        self.heat.validate("heat")?;
        self.cool.validate("cool")?;
        validate_cycle("manual", self.manual_cycle_secs)?;
        validate_cool_delay(self.cool_delay_secs)?;
        self.hysteresis.validate()
    }
}

/// One configured output line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSettings {
    pub pin: String,
    #[serde(default)]
    pub inverted: bool,
}

impl OutputSettings {
    pub fn new(pin: impl Into<String>, inverted: bool) -> Self {
        Self {
            pin: pin.into(),
            inverted,
        }
    }
}

pub(crate) fn validate_duty(duty: Decimal) -> BrewResult<()> {
    if duty < Decimal::ZERO || duty > Decimal::HUNDRED {
        return Err(BrewError::invalid(format!(
            "duty must be within 0..=100, got {}",
            duty
        )));
    }
    Ok(())
}

pub(crate) fn validate_cycle(kind: &str, secs: Decimal) -> BrewResult<()> {
    if !secs.is_positive() {
        return Err(BrewError::invalid(format!(
            "{} cycle must be > 0 seconds, got {}",
            kind, secs
        )));
    }
    Ok(())
}

pub(crate) fn validate_cool_delay(secs: Decimal) -> BrewResult<()> {
    if secs.is_negative() {
        return Err(BrewError::invalid(format!(
            "cool delay must be >= 0 seconds, got {}",
            secs
        )));
    }
    Ok(())
}

fn default_heat_cycle() -> Decimal {
    Decimal::from_int(2)
}

fn default_cool_side() -> SideSettings {
    SideSettings::with_cycle(Decimal::from_int(600))
}

fn default_manual_cycle() -> Decimal {
    Decimal::from_int(2)
}
