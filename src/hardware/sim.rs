// src/hardware/sim.rs - In-process probes, outputs and a simple kettle model
//! Simulated hardware.
//!
//! Every simulated device hands out a cheap cloneable handle so a test or the
//! host binary can observe output levels and drive probe readings while the
//! engine owns the device itself.

use super::{DigitalOutput, HardwareError, PinFactory, TempScale, TemperatureProbe};
use crate::decimal::Decimal;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Observer/driver side of a [`SimProbe`].
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    reading: Arc<Mutex<Decimal>>,
    failing: Arc<AtomicBool>,
    scale: TempScale,
}

impl ProbeHandle {
    /// Set the reading, expressed in the probe's own scale.
    pub fn set(&self, value: Decimal) {
        *lock(&self.reading) = value;
    }

    pub fn get(&self) -> Decimal {
        *lock(&self.reading)
    }

    pub fn scale(&self) -> TempScale {
        self.scale
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimProbe {
    name: String,
    calibration: Decimal,
    handle: ProbeHandle,
}

impl SimProbe {
    pub fn new(name: impl Into<String>, scale: TempScale, initial: Decimal) -> (Self, ProbeHandle) {
        let handle = ProbeHandle {
            reading: Arc::new(Mutex::new(initial)),
            failing: Arc::new(AtomicBool::new(false)),
            scale,
        };
        let probe = Self {
            name: name.into(),
            calibration: Decimal::ZERO,
            handle: handle.clone(),
        };
        (probe, handle)
    }

    pub fn with_calibration(mut self, offset: Decimal) -> Self {
        self.calibration = offset;
        self
    }
}

impl TemperatureProbe for SimProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn scale(&self) -> TempScale {
        self.handle.scale
    }

    fn current_temperature(&mut self, scale: TempScale) -> Result<Decimal, HardwareError> {
        if self.handle.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Read(format!("{} did not respond", self.name)));
        }
        let raw = self.handle.get() + self.calibration;
        Ok(self.handle.scale.convert(raw, scale))
    }

    fn calibration(&self) -> Decimal {
        self.calibration
    }
}

/// Observer side of a [`SimOutput`].
#[derive(Debug, Clone)]
pub struct OutputHandle {
    level: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl OutputHandle {
    /// Electrical level last written.
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of successful writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct SimOutput {
    pin: String,
    handle: OutputHandle,
}

impl SimOutput {
    pub fn new(pin: impl Into<String>) -> (Self, OutputHandle) {
        let handle = OutputHandle {
            level: Arc::new(AtomicBool::new(false)),
            writes: Arc::new(AtomicUsize::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        };
        let output = Self {
            pin: pin.into(),
            handle: handle.clone(),
        };
        (output, handle)
    }
}

impl DigitalOutput for SimOutput {
    fn set_state(&mut self, on: bool) -> Result<(), HardwareError> {
        if self.handle.failing.load(Ordering::SeqCst) {
            return Err(HardwareError::Write(format!("{} is not responding", self.pin)));
        }
        self.handle.level.store(on, Ordering::SeqCst);
        self.handle.writes.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("{} <- {}", self.pin, if on { "high" } else { "low" });
        Ok(())
    }
}

/// Pin factory backed by simulated devices.
///
/// Opening the same pin twice returns outputs that share one handle, the
/// way two file descriptors on one GPIO line would.
#[derive(Debug, Default)]
pub struct SimPins {
    outputs: Mutex<HashMap<String, OutputHandle>>,
    probes: Mutex<HashMap<String, ProbeHandle>>,
    ambient: Decimal,
}

impl SimPins {
    pub fn new(ambient_f: Decimal) -> Self {
        Self {
            ambient: ambient_f,
            ..Default::default()
        }
    }

    pub fn output(&self, pin: &str) -> Option<OutputHandle> {
        lock(&self.outputs).get(pin).cloned()
    }

    pub fn probe(&self, address: &str) -> Option<ProbeHandle> {
        lock(&self.probes).get(address).cloned()
    }
}

impl PinFactory for SimPins {
    fn open_output(&self, pin: &str) -> Result<Box<dyn DigitalOutput>, HardwareError> {
        if pin.trim().is_empty() {
            return Err(HardwareError::NoDevice("empty pin name".to_string()));
        }
        let mut outputs = lock(&self.outputs);
        let output = match outputs.get(pin) {
            Some(handle) => SimOutput {
                pin: pin.to_string(),
                handle: handle.clone(),
            },
            None => {
                let (output, handle) = SimOutput::new(pin);
                outputs.insert(pin.to_string(), handle);
                output
            }
        };
        Ok(Box::new(output))
    }

    fn open_probe(
        &self,
        address: &str,
        scale: TempScale,
    ) -> Result<Box<dyn TemperatureProbe>, HardwareError> {
        if address.trim().is_empty() {
            return Err(HardwareError::NoDevice("empty probe address".to_string()));
        }
        let mut probes = lock(&self.probes);
        let initial = TempScale::Fahrenheit.convert(self.ambient, scale);
        let (probe, handle) = SimProbe::new(address, scale, initial);
        let probe = match probes.get(address) {
            Some(existing) if existing.scale == scale => SimProbe {
                name: address.to_string(),
                calibration: Decimal::ZERO,
                handle: existing.clone(),
            },
            _ => {
                probes.insert(address.to_string(), handle);
                probe
            }
        };
        Ok(Box::new(probe))
    }
}

/// Lumped thermal model of one vessel.
///
/// Heating and cooling add or remove a fixed number of degrees per second
/// while engaged; the contents also drift toward ambient.
#[derive(Debug, Clone)]
pub struct Kettle {
    pub probe: ProbeHandle,
    pub heat: Option<(OutputHandle, bool)>,
    pub cool: Option<(OutputHandle, bool)>,
    pub ambient_f: f64,
    pub heat_rate_f: f64,
    pub cool_rate_f: f64,
    pub loss_per_sec: f64,
    pub noise_f: f64,
}

impl Kettle {
    pub fn new(probe: ProbeHandle, ambient_f: f64) -> Self {
        Self {
            probe,
            heat: None,
            cool: None,
            ambient_f,
            heat_rate_f: 0.08,
            cool_rate_f: 0.05,
            loss_per_sec: 0.0005,
            noise_f: 0.05,
        }
    }

    /// Attach a heater; `inverted` mirrors the output's configured polarity.
    pub fn with_heater(mut self, handle: OutputHandle, inverted: bool) -> Self {
        self.heat = Some((handle, inverted));
        self
    }

    pub fn with_cooler(mut self, handle: OutputHandle, inverted: bool) -> Self {
        self.cool = Some((handle, inverted));
        self
    }

    fn engaged(output: &Option<(OutputHandle, bool)>) -> bool {
        output
            .as_ref()
            .map(|(handle, inverted)| handle.level() != *inverted)
            .unwrap_or(false)
    }

    /// Advance the model by `dt_secs` and publish the new reading.
    pub fn step(&self, dt_secs: f64) {
        let scale = self.probe.scale();
        let mut temp_f = scale.convert(self.probe.get(), TempScale::Fahrenheit).to_f64();
        if Self::engaged(&self.heat) {
            temp_f += self.heat_rate_f * dt_secs;
        }
        if Self::engaged(&self.cool) {
            temp_f -= self.cool_rate_f * dt_secs;
        }
        temp_f -= (temp_f - self.ambient_f) * self.loss_per_sec * dt_secs;
        if self.noise_f > 0.0 {
            temp_f += rand::rng().random_range(-self.noise_f..self.noise_f);
        }
        if let Some(reading) = Decimal::from_f64(temp_f) {
            self.probe.set(TempScale::Fahrenheit.convert(reading.round_dp(2), scale));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_reports_in_requested_scale() {
        let (mut probe, handle) = SimProbe::new("28-01", TempScale::Celsius, Decimal::from_int(100));
        assert_eq!(
            probe.current_temperature(TempScale::Fahrenheit).unwrap(),
            Decimal::from_int(212)
        );
        handle.set_failing(true);
        assert!(probe.current_temperature(TempScale::Celsius).is_err());
    }

    #[test]
    fn test_pins_share_handles() {
        let pins = SimPins::new(Decimal::from_int(68));
        let mut a = pins.open_output("GPIO5").unwrap();
        a.set_state(true).unwrap();
        assert!(pins.output("GPIO5").unwrap().level());
        assert!(pins.open_output("").is_err());
        let mut probe = pins.open_probe("28-02", TempScale::Fahrenheit).unwrap();
        assert_eq!(
            probe.current_temperature(TempScale::Fahrenheit).unwrap(),
            Decimal::from_int(68)
        );
    }

    #[test]
    fn test_kettle_heats_when_engaged() {
        let (_probe, handle) = SimProbe::new("28-03", TempScale::Fahrenheit, Decimal::from_int(60));
        let (_heater, heat_handle) = SimOutput::new("GPIO6");
        heat_handle.level.store(true, Ordering::SeqCst);
        let mut kettle = Kettle::new(handle.clone(), 60.0).with_heater(heat_handle, false);
        kettle.noise_f = 0.0;
        kettle.step(10.0);
        assert!(handle.get() > Decimal::from_int(60));
    }
}
