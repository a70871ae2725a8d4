// src/control/controller.rs - Per-vessel temperature controller
use super::hysteresis::{HysteresisBand, HysteresisState};
use super::pid::{Gains, PidState};
use super::proportioner::TimeProportioner;
use super::settings::{
    validate_cool_delay, validate_cycle, validate_duty, ControllerSettings, Mode,
};
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use crate::hardware::{OutputChannel, TempScale, TemperatureProbe};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Heat,
    Cool,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Heat => "heat",
            Side::Cool => "cool",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Heat,
    Cool,
    Manual,
}

/// What one `tick` decided and did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub measured: Option<Decimal>,
    pub heat_duty: Decimal,
    pub cool_duty: Decimal,
    pub heat_on: bool,
    pub cool_on: bool,
    /// Cooling was wanted but held back by the cool delay.
    pub cool_withheld: bool,
    /// Output writes that failed this tick; they are retried on the next one.
    pub actuator_faults: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStatus {
    pub pin: String,
    pub inverted: bool,
    pub on: Option<bool>,
}

impl From<&OutputChannel> for OutputStatus {
    fn from(channel: &OutputChannel) -> Self {
        Self {
            pin: channel.pin().to_string(),
            inverted: channel.inverted(),
            on: channel.state(),
        }
    }
}

/// Status snapshot for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatus {
    pub name: String,
    pub probe: String,
    pub scale: TempScale,
    pub calibration: Decimal,
    pub temperature: Option<Decimal>,
    pub heat_duty: Decimal,
    pub cool_duty: Decimal,
    pub heat: Option<OutputStatus>,
    pub cool: Option<OutputStatus>,
    pub aux: Option<OutputStatus>,
    pub settings: ControllerSettings,
}

/// Closed-loop controller for one vessel.
///
/// Owns the probe and the heat/cool/aux outputs. Setpoints and band limits
/// are in the probe's scale. All setters validate first and leave the
/// controller untouched on error.
pub struct Controller {
    name: String,
    probe: Box<dyn TemperatureProbe>,
    heat: Option<OutputChannel>,
    cool: Option<OutputChannel>,
    aux: Option<OutputChannel>,
    settings: ControllerSettings,
    heat_driver: TimeProportioner,
    cool_driver: TimeProportioner,
    heat_pid: PidState,
    cool_pid: PidState,
    hysteresis: HysteresisState,
    cool_last_on: Option<DateTime<Utc>>,
    last_temperature: Option<Decimal>,
    heat_duty: Decimal,
    cool_duty: Decimal,
}

impl Controller {
    pub fn new(name: impl Into<String>, probe: Box<dyn TemperatureProbe>) -> Self {
        Self {
            name: name.into(),
            probe,
            heat: None,
            cool: None,
            aux: None,
            settings: ControllerSettings::default(),
            heat_driver: TimeProportioner::new(),
            cool_driver: TimeProportioner::new(),
            heat_pid: PidState::new(),
            cool_pid: PidState::new(),
            hysteresis: HysteresisState::default(),
            cool_last_on: None,
            last_temperature: None,
            heat_duty: Decimal::ZERO,
            cool_duty: Decimal::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn probe_name(&self) -> &str {
        self.probe.name()
    }

    /// Scale of the bound probe; setpoints are expressed in it.
    pub fn scale(&self) -> TempScale {
        self.probe.scale()
    }

    pub fn mode(&self) -> Mode {
        self.settings.mode
    }

    pub fn setpoint(&self) -> Decimal {
        self.settings.setpoint
    }

    pub fn manual_duty(&self) -> Decimal {
        self.settings.manual_duty
    }

    pub fn gains(&self, side: Side) -> Gains {
        match side {
            Side::Heat => self.settings.heat.gains(),
            Side::Cool => self.settings.cool.gains(),
        }
    }

    pub fn cycle(&self, kind: CycleKind) -> Decimal {
        match kind {
            CycleKind::Heat => self.settings.heat.cycle_secs,
            CycleKind::Cool => self.settings.cool.cycle_secs,
            CycleKind::Manual => self.settings.manual_cycle_secs,
        }
    }

    pub fn cool_delay(&self) -> Decimal {
        self.settings.cool_delay_secs
    }

    pub fn hysteresis(&self) -> HysteresisBand {
        self.settings.hysteresis
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Duty computed by the most recent tick.
    pub fn duty(&self, side: Side) -> Decimal {
        match side {
            Side::Heat => self.heat_duty,
            Side::Cool => self.cool_duty,
        }
    }

    pub fn last_temperature(&self) -> Option<Decimal> {
        self.last_temperature
    }

    pub fn has_valid_heater(&self) -> bool {
        self.heat.is_some()
    }

    pub fn has_valid_cooler(&self) -> bool {
        self.cool.is_some()
    }

    pub fn heat_output(&self) -> Option<&OutputChannel> {
        self.heat.as_ref()
    }

    pub fn cool_output(&self) -> Option<&OutputChannel> {
        self.cool.as_ref()
    }

    pub fn aux_output(&self) -> Option<&OutputChannel> {
        self.aux.as_ref()
    }

    fn check_mode_outputs(
        &self,
        mode: Mode,
        heat: bool,
        cool: bool,
    ) -> BrewResult<()> {
        match mode {
            Mode::Off => Ok(()),
            Mode::Manual if !heat => Err(BrewError::invalid(format!(
                "{}: manual mode needs a heat output",
                self.name
            ))),
            _ if !heat && !cool => Err(BrewError::invalid(format!(
                "{}: mode {} needs a heat or cool output",
                self.name, mode
            ))),
            _ => Ok(()),
        }
    }

    fn reset_control_state(&mut self) {
        self.heat_driver.reset();
        self.cool_driver.reset();
        self.heat_pid.reset();
        self.cool_pid.reset();
        self.hysteresis.reset();
        self.heat_duty = Decimal::ZERO;
        self.cool_duty = Decimal::ZERO;
    }

    pub fn set_mode(&mut self, mode: Mode) -> BrewResult<()> {
        self.check_mode_outputs(mode, self.has_valid_heater(), self.has_valid_cooler())?;
        if mode != self.settings.mode {
            tracing::info!("{}: mode {} -> {}", self.name, self.settings.mode, mode);
            self.settings.mode = mode;
            self.reset_control_state();
        }
        Ok(())
    }

    pub fn set_setpoint(&mut self, value: Decimal) -> BrewResult<()> {
        if value != self.settings.setpoint {
            tracing::info!(
                "{}: setpoint {}{} -> {}{}",
                self.name,
                self.settings.setpoint,
                self.scale(),
                value,
                self.scale()
            );
            self.settings.setpoint = value;
        }
        Ok(())
    }

    pub fn set_gains(&mut self, side: Side, gains: Gains) -> BrewResult<()> {
        gains.validate(&side.to_string())?;
        match side {
            Side::Heat => {
                self.settings.heat.set_gains(gains);
                self.heat_pid.reset();
            }
            Side::Cool => {
                self.settings.cool.set_gains(gains);
                self.cool_pid.reset();
            }
        }
        tracing::info!(
            "{}: {} gains p={} i={} d={}",
            self.name,
            side,
            gains.p,
            gains.i,
            gains.d
        );
        Ok(())
    }

    pub fn set_cycle(&mut self, kind: CycleKind, secs: Decimal) -> BrewResult<()> {
        let label = match kind {
            CycleKind::Heat => "heat",
            CycleKind::Cool => "cool",
            CycleKind::Manual => "manual",
        };
        validate_cycle(label, secs)?;
        match kind {
            CycleKind::Heat => self.settings.heat.cycle_secs = secs,
            CycleKind::Cool => self.settings.cool.cycle_secs = secs,
            CycleKind::Manual => self.settings.manual_cycle_secs = secs,
        }
        Ok(())
    }

    pub fn set_cool_delay(&mut self, secs: Decimal) -> BrewResult<()> {
        validate_cool_delay(secs)?;
        self.settings.cool_delay_secs = secs;
        Ok(())
    }

    pub fn set_hysteresis(&mut self, band: HysteresisBand) -> BrewResult<()> {
        band.validate()?;
        self.settings.hysteresis = band;
        Ok(())
    }

    pub fn set_manual_duty(&mut self, duty: Decimal) -> BrewResult<()> {
        validate_duty(duty)?;
        self.settings.manual_duty = duty;
        Ok(())
    }

    /// Replace every tunable at once.
    pub fn apply_settings(&mut self, settings: ControllerSettings) -> BrewResult<()> {
        settings.validate()?;
        self.check_mode_outputs(settings.mode, self.has_valid_heater(), self.has_valid_cooler())?;
        let reset = settings.mode != self.settings.mode
            || settings.heat.gains() != self.settings.heat.gains()
            || settings.cool.gains() != self.settings.cool.gains();
        tracing::info!(
            "{}: applying settings mode={} setpoint={} duty={}",
            self.name,
            settings.mode,
            settings.setpoint,
            settings.manual_duty
        );
        self.settings = settings;
        if reset {
            self.reset_control_state();
        }
        Ok(())
    }

    /// Swap the output lines. Outputs being replaced are switched off first.
    pub fn set_outputs(
        &mut self,
        heat: Option<OutputChannel>,
        cool: Option<OutputChannel>,
        aux: Option<OutputChannel>,
    ) -> BrewResult<()> {
        self.check_mode_outputs(self.settings.mode, heat.is_some(), cool.is_some())?;
        for channel in [self.heat.as_mut(), self.cool.as_mut(), self.aux.as_mut()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = channel.set(false) {
                tracing::warn!("{}: could not release {}: {}", self.name, channel.pin(), e);
            }
        }
        self.heat = heat;
        self.cool = cool;
        self.aux = aux;
        self.cool_last_on = None;
        self.reset_control_state();
        Ok(())
    }

    /// Flip the auxiliary output and return its new state.
    pub fn toggle_aux(&mut self) -> BrewResult<bool> {
        let name = self.name.clone();
        let aux = self
            .aux
            .as_mut()
            .ok_or_else(|| BrewError::unknown(format!("{}: no aux output configured", name)))?;
        let target = !aux.is_on();
        aux.set(target)?;
        tracing::info!("{}: aux output {}", name, if target { "on" } else { "off" });
        Ok(target)
    }

    /// Read the probe in `scale`. Readings are cached in the probe's scale.
    pub fn read_temperature(&mut self, scale: TempScale) -> BrewResult<Decimal> {
        let native = self.probe.scale();
        match self.probe.current_temperature(native) {
            Ok(value) => {
                self.last_temperature = Some(value);
                Ok(native.convert(value, scale))
            }
            Err(e) => Err(BrewError::Probe {
                probe: self.probe.name().to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Switch heat and cool off. Returns the number of failed writes.
    pub fn force_off(&mut self) -> usize {
        let mut faults = 0;
        for channel in [self.heat.as_mut(), self.cool.as_mut()].into_iter().flatten() {
            if let Err(e) = channel.set(false) {
                tracing::warn!("{}: {}", self.name, e);
                faults += 1;
            }
        }
        faults
    }

    fn cool_delay_elapsed(&self, now: DateTime<Utc>) -> bool {
        let delay = TimeDelta::milliseconds(self.settings.cool_delay_secs.to_millis());
        self.cool_last_on.map(|last| now - last >= delay).unwrap_or(true)
    }

    fn cool_engaged(&self) -> bool {
        self.cool.as_ref().map(OutputChannel::is_on).unwrap_or(false)
    }

    /// One control cycle.
    ///
    /// A probe failure switches both outputs off and is returned; output
    /// write failures are counted in the report and retried next tick.
    pub fn tick(&mut self, now: DateTime<Utc>) -> BrewResult<TickReport> {
        let mut report = TickReport::default();
        let mut wants_heat = false;
        let mut wants_cool = false;

        match self.settings.mode {
            Mode::Off => {
                self.heat_driver.reset();
                self.cool_driver.reset();
                self.heat_duty = Decimal::ZERO;
                self.cool_duty = Decimal::ZERO;
            }
            Mode::Manual => {
                self.heat_duty = self.settings.manual_duty;
                self.cool_duty = Decimal::ZERO;
                self.cool_driver.reset();
                wants_heat = self.heat.is_some()
                    && self.heat_driver.output_at(
                        self.settings.manual_duty,
                        self.settings.manual_cycle_secs,
                        now,
                    );
            }
            Mode::Auto => {
                let measured = self.measure()?;
                report.measured = Some(measured);
                let error = self.settings.setpoint - measured;
                let mut heat_duty = Decimal::ZERO;
                let mut cool_duty = Decimal::ZERO;
                if self.heat.is_some() {
                    heat_duty = self
                        .heat_pid
                        .calculate_output(&self.settings.heat.gains(), error, now);
                }
                if self.cool.is_some() {
                    cool_duty = self
                        .cool_pid
                        .calculate_output(&self.settings.cool.gains(), -error, now);
                }
                // Never heat and cool together; the stronger demand wins.
                if heat_duty.is_positive() && cool_duty.is_positive() {
                    if heat_duty >= cool_duty {
                        cool_duty = Decimal::ZERO;
                    } else {
                        heat_duty = Decimal::ZERO;
                    }
                }
                self.heat_duty = heat_duty;
                self.cool_duty = cool_duty;

                if self.heat.is_some() {
                    wants_heat =
                        self.heat_driver
                            .output_at(heat_duty, self.settings.heat.cycle_secs, now);
                }
                if self.cool.is_some() {
                    wants_cool =
                        self.cool_driver
                            .output_at(cool_duty, self.settings.cool.cycle_secs, now);
                    if wants_cool && !self.cool_engaged() && !self.cool_delay_elapsed(now) {
                        tracing::debug!("{}: cooling withheld by cool delay", self.name);
                        self.cool_driver.reset();
                        wants_cool = false;
                        report.cool_withheld = true;
                    }
                }
            }
            Mode::Hysteresis => {
                let measured = self.measure()?;
                report.measured = Some(measured);
                let band = self.settings.hysteresis;
                if self.heat.is_some() && !self.hysteresis.cooling() {
                    wants_heat = self.hysteresis.heat_demand(&band, measured, now);
                }
                if self.cool.is_some() && !self.hysteresis.heating() {
                    let allowed = self.cool_engaged() || self.cool_delay_elapsed(now);
                    wants_cool = self.hysteresis.cool_demand(&band, measured, now, allowed);
                    if !allowed && measured > band.max {
                        report.cool_withheld = true;
                    }
                }
                self.heat_duty = if wants_heat { Decimal::HUNDRED } else { Decimal::ZERO };
                self.cool_duty = if wants_cool { Decimal::HUNDRED } else { Decimal::ZERO };
            }
        }

        report.heat_duty = self.heat_duty;
        report.cool_duty = self.cool_duty;
        self.drive(wants_heat, wants_cool, now, &mut report);
        Ok(report)
    }

    fn measure(&mut self) -> BrewResult<Decimal> {
        let scale = self.probe.scale();
        match self.read_temperature(scale) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.heat_duty = Decimal::ZERO;
                self.cool_duty = Decimal::ZERO;
                self.force_off();
                Err(e)
            }
        }
    }

    fn drive(&mut self, heat_on: bool, cool_on: bool, now: DateTime<Utc>, report: &mut TickReport) {
        // Release before engage so both sides are never on together.
        if heat_on {
            self.write_cool(cool_on, now, report);
            self.write_heat(heat_on, report);
        } else {
            self.write_heat(heat_on, report);
            self.write_cool(cool_on, now, report);
        }
    }

    fn write_heat(&mut self, on: bool, report: &mut TickReport) {
        if let Some(channel) = self.heat.as_mut() {
            match channel.set(on) {
                Ok(_) => report.heat_on = channel.is_on(),
                Err(e) => {
                    tracing::warn!("{}: {}", self.name, e);
                    report.actuator_faults += 1;
                }
            }
        }
    }

    fn write_cool(&mut self, on: bool, now: DateTime<Utc>, report: &mut TickReport) {
        if let Some(channel) = self.cool.as_mut() {
            let was_on = channel.is_on();
            match channel.set(on) {
                Ok(_) => {
                    report.cool_on = channel.is_on();
                    if on && !was_on {
                        self.cool_last_on = Some(now);
                    }
                }
                Err(e) => {
                    tracing::warn!("{}: {}", self.name, e);
                    report.actuator_faults += 1;
                }
            }
        }
    }

    pub fn status(&self) -> ControllerStatus {
        ControllerStatus {
            name: self.name.clone(),
            probe: self.probe.name().to_string(),
            scale: self.probe.scale(),
            calibration: self.probe.calibration(),
            temperature: self.last_temperature,
            heat_duty: self.heat_duty,
            cool_duty: self.cool_duty,
            heat: self.heat.as_ref().map(OutputStatus::from),
            cool: self.cool.as_ref().map(OutputStatus::from),
            aux: self.aux.as_ref().map(OutputStatus::from),
            settings: self.settings.clone(),
        }
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("name", &self.name)
            .field("probe", &self.probe.name())
            .field("heat", &self.heat)
            .field("cool", &self.cool)
            .field("aux", &self.aux)
            .field("settings", &self.settings)
            .finish()
    }
}
