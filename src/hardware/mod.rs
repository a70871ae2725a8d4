// src/hardware/mod.rs - Probe and output capabilities consumed by the engine
//! Hardware seams.
//!
//! The engine never talks to a bus directly. It consumes a
//! [`TemperatureProbe`] and any number of [`DigitalOutput`]s, and a
//! [`PinFactory`] turns configured pin names into those capabilities. Real
//! OneWire/GPIO drivers live outside this crate; [`sim`] provides an
//! in-process implementation for the host binary and the tests.

pub mod sim;

use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HardwareError {
    #[error("read failed: {0}")]
    Read(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("no such device: {0}")]
    NoDevice(String),
}

/// Temperature scale of a probe, a setpoint or a mash step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TempScale {
    #[default]
    #[serde(rename = "F", alias = "f")]
    Fahrenheit,
    #[serde(rename = "C", alias = "c")]
    Celsius,
}

impl TempScale {
    /// Convert `value` expressed in `self` into `to`.
    pub fn convert(self, value: Decimal, to: TempScale) -> Decimal {
        match (self, to) {
            (TempScale::Celsius, TempScale::Fahrenheit) => {
                value * Decimal::new(18, 1) + Decimal::from_int(32)
            }
            (TempScale::Fahrenheit, TempScale::Celsius) => ((value - Decimal::from_int(32))
                * Decimal::from_int(5))
            .checked_div(Decimal::from_int(9))
            .unwrap_or(Decimal::ZERO),
            _ => value,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            TempScale::Fahrenheit => "F",
            TempScale::Celsius => "C",
        }
    }
}

impl fmt::Display for TempScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for TempScale {
    type Err = BrewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "F" | "FAHRENHEIT" => Ok(TempScale::Fahrenheit),
            "C" | "CELSIUS" => Ok(TempScale::Celsius),
            other => Err(BrewError::invalid(format!("unknown temperature scale '{}'", other))),
        }
    }
}

/// A temperature probe bound to one vessel.
pub trait TemperatureProbe: Send {
    /// Address or name of the probe, used in logs and status.
    fn name(&self) -> &str;

    /// Scale the probe is configured to report in.
    fn scale(&self) -> TempScale;

    /// Current reading converted to `scale`.
    fn current_temperature(&mut self, scale: TempScale) -> Result<Decimal, HardwareError>;

    /// Calibration offset already folded into the readings.
    fn calibration(&self) -> Decimal {
        Decimal::ZERO
    }
}

/// A single on/off actuator line. `on` is the electrical level.
pub trait DigitalOutput: Send {
    fn set_state(&mut self, on: bool) -> Result<(), HardwareError>;
}

/// Opens probes and outputs by their configured names.
pub trait PinFactory: Send + Sync {
    fn open_output(&self, pin: &str) -> Result<Box<dyn DigitalOutput>, HardwareError>;

    fn open_probe(
        &self,
        address: &str,
        scale: TempScale,
    ) -> Result<Box<dyn TemperatureProbe>, HardwareError>;
}

/// A configured output: pin name, polarity and last confirmed logical state.
///
/// The controller always speaks in terms of "engaged"; inversion is applied
/// here, right before the write.
pub struct OutputChannel {
    pin: String,
    inverted: bool,
    output: Box<dyn DigitalOutput>,
    state: Option<bool>,
}

impl OutputChannel {
    pub fn new(pin: impl Into<String>, output: Box<dyn DigitalOutput>, inverted: bool) -> Self {
        Self {
            pin: pin.into(),
            inverted,
            output,
            state: None,
        }
    }

    pub fn pin(&self) -> &str {
        &self.pin
    }

    pub fn inverted(&self) -> bool {
        self.inverted
    }

    /// Last logical state confirmed by a successful write, `None` if unknown.
    pub fn state(&self) -> Option<bool> {
        self.state
    }

    pub fn is_on(&self) -> bool {
        self.state == Some(true)
    }

    /// Drive the output to the logical state `on`.
    ///
    /// Skips the write when the state is already known to match. A failed
    /// write leaves the state unknown so the next call writes again.
    pub fn set(&mut self, on: bool) -> BrewResult<bool> {
        if self.state == Some(on) {
            return Ok(false);
        }
        match self.output.set_state(on != self.inverted) {
            Ok(()) => {
                self.state = Some(on);
                Ok(true)
            }
            Err(e) => {
                self.state = None;
                Err(BrewError::Actuator {
                    pin: self.pin.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputChannel")
            .field("pin", &self.pin)
            .field("inverted", &self.inverted)
            .field("state", &self.state)
            .finish()
    }
}
