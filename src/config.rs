//! # Brewery Configuration
//!
//! One TOML file describes the engine cadences and every vessel: its probe,
//! outputs, controller settings and mash profile.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [engine]
//! control_interval_ms = 1000
//! mash_interval_secs = 10
//! variance_f = 2.0
//!
//! [[vessel]]
//! name = "mlt"
//! probe = "28-000004a1b2c3"
//! heat = { pin = "GPIO17" }
//!
//! [vessel.settings]
//! mode = "auto"
//! setpoint = 152.0
//!
//! [[vessel.mash_step]]
//! position = 0
//! target_temp = 152.0
//! duration_mins = 60.0
//! ```
//!
//! Saving writes back the runtime state of every step (activation and
//! timestamps) so a restarted host resumes where it stopped.

// src/config.rs - Single configuration file
use crate::control::{ControllerSettings, OutputSettings};
use crate::decimal::Decimal;
use crate::error::BrewError;
use crate::hardware::TempScale;
use crate::mash::MashStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(#[from] BrewError),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default, rename = "vessel")]
    pub vessels: Vec<VesselConfig>,
}

/// Loop cadences and scheduler defaults.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_control_interval_ms")]
    pub control_interval_ms: u64,
    #[serde(default = "default_mash_interval_secs")]
    pub mash_interval_secs: u64,
    #[serde(default = "default_variance_f")]
    pub variance_f: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            control_interval_ms: default_control_interval_ms(),
            mash_interval_secs: default_mash_interval_secs(),
            variance_f: default_variance_f(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct VesselConfig {
    pub name: String,
    pub probe: String,
    #[serde(default)]
    pub scale: TempScale,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux: Option<String>,
    /// Overrides `engine.variance_f` for this vessel's scheduler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance_f: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heat: Option<OutputSettings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cool: Option<OutputSettings>,
    #[serde(default)]
    pub settings: ControllerSettings,
    #[serde(default, rename = "mash_step", skip_serializing_if = "Vec::is_empty")]
    pub mash_steps: Vec<MashStepConfig>,
}

impl VesselConfig {
    pub fn new(name: impl Into<String>, probe: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            probe: probe.into(),
            scale: TempScale::default(),
            aux: None,
            variance_f: None,
            heat: None,
            cool: None,
            settings: ControllerSettings::default(),
            mash_steps: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), BrewError> {
        if self.name.trim().is_empty() {
            return Err(BrewError::invalid("vessel name must not be empty"));
        }
        if self.probe.trim().is_empty() {
            return Err(BrewError::invalid(format!("{}: probe must not be empty", self.name)));
        }
        self.settings.validate()?;
        if self.settings.mode != crate::control::Mode::Off && self.heat.is_none() && self.cool.is_none() {
            return Err(BrewError::invalid(format!(
                "{}: mode {} needs a heat or cool output",
                self.name, self.settings.mode
            )));
        }
        if let Some(variance) = self.variance_f {
            if variance.is_negative() {
                return Err(BrewError::invalid(format!(
                    "{}: variance must be >= 0, got {}",
                    self.name, variance
                )));
            }
        }
        let mut positions = HashSet::new();
        let mut active = 0;
        for step in &self.mash_steps {
            if !positions.insert(step.position) {
                return Err(BrewError::invalid(format!(
                    "{}: duplicate mash step position {}",
                    self.name, step.position
                )));
            }
            if step.active {
                active += 1;
            }
            step.to_step()?;
        }
        if active > 1 {
            return Err(BrewError::invalid(format!(
                "{}: {} mash steps marked active",
                self.name, active
            )));
        }
        Ok(())
    }
}

/// A mash step as stored on disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MashStepConfig {
    pub position: i32,
    #[serde(default)]
    pub target_temp: Decimal,
    #[serde(default)]
    pub temp_unit: TempScale,
    #[serde(default)]
    pub duration_mins: Decimal,
    #[serde(default)]
    pub method: String,
    #[serde(default, rename = "type")]
    pub step_type: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl MashStepConfig {
    pub fn new(position: i32, target_temp: Decimal, temp_unit: TempScale, duration_mins: Decimal) -> Self {
        Self {
            position,
            target_temp,
            temp_unit,
            duration_mins,
            method: String::new(),
            step_type: String::new(),
            active: false,
            start: None,
            target_end: None,
            end: None,
        }
    }

    pub fn to_step(&self) -> Result<MashStep, BrewError> {
        let mut step = MashStep::new(self.position);
        step.set_target(self.target_temp, self.temp_unit);
        step.set_duration(self.duration_mins)?;
        step.set_method(self.method.clone());
        step.set_type(self.step_type.clone());
        step.active = self.active;
        step.start = self.start;
        step.target_end = self.target_end;
        step.end = self.end;
        Ok(step)
    }
}

impl From<&MashStep> for MashStepConfig {
    fn from(step: &MashStep) -> Self {
        Self {
            position: step.position,
            target_temp: step.target_temp,
            temp_unit: step.temp_unit,
            duration_mins: step.duration_mins,
            method: step.method.clone(),
            step_type: step.step_type.clone(),
            active: step.active,
            start: step.start,
            target_end: step.target_end,
            end: step.end,
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            ConfigError::Io(e)
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|e| {
            tracing::error!("Failed to parse config TOML: {}", e);
            ConfigError::Parse(e)
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = self.to_toml_string()?;
        std::fs::write(path.as_ref(), contents)?;
        tracing::info!("Saved configuration to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), BrewError> {
        if self.engine.control_interval_ms == 0 {
            return Err(BrewError::invalid("control_interval_ms must be > 0"));
        }
        if self.engine.mash_interval_secs == 0 {
            return Err(BrewError::invalid("mash_interval_secs must be > 0"));
        }
        if self.engine.variance_f.is_negative() {
            return Err(BrewError::invalid(format!(
                "variance_f must be >= 0, got {}",
                self.engine.variance_f
            )));
        }
        let mut names = HashSet::new();
        for vessel in &self.vessels {
            if !names.insert(vessel.name.as_str()) {
                return Err(BrewError::invalid(format!("duplicate vessel '{}'", vessel.name)));
            }
            vessel.validate()?;
        }
        Ok(())
    }

    pub fn vessel(&self, name: &str) -> Option<&VesselConfig> {
        self.vessels.iter().find(|v| v.name == name)
    }
}

fn default_control_interval_ms() -> u64 { 1000 }
fn default_mash_interval_secs() -> u64 { 10 }
fn default_variance_f() -> Decimal { Decimal::from_int(2) }

fn is_false(value: &bool) -> bool {
    !*value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Mode;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
        [engine]
        mash_interval_secs = 5

        [[vessel]]
        name = "mlt"
        probe = "28-000004a1b2c3"
        scale = "F"
        heat = { pin = "GPIO17" }
        cool = { pin = "GPIO27", inverted = true }
        aux = "GPIO22"

        [vessel.settings]
        mode = "hysteria"
        setpoint = 152.5
        cool_delay_secs = 180
        heat = { p = 25.0, i = 0.5, d = 2.0 }
        hysteresis = { min = 150.0, max = 154.0, min_on_secs = 60 }

        [[vessel.mash_step]]
        position = 0
        target_temp = 150.0
        duration_mins = 60.0
        method = "Infusion"
        type = "Sacch Rest"

        [[vessel.mash_step]]
        position = 1
        target_temp = 76
        temp_unit = "C"
        duration_mins = 10
    "#;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.engine.control_interval_ms, 1000);
        assert_eq!(config.engine.mash_interval_secs, 10);
        assert_eq!(config.engine.variance_f, Decimal::from_int(2));
        assert!(config.vessels.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.mash_interval_secs, 5);
        // Defaults for missing fields
        assert_eq!(config.engine.control_interval_ms, 1000);

        let mlt = config.vessel("mlt").unwrap();
        assert_eq!(mlt.heat, Some(OutputSettings::new("GPIO17", false)));
        assert_eq!(mlt.cool, Some(OutputSettings::new("GPIO27", true)));
        assert_eq!(mlt.aux.as_deref(), Some("GPIO22"));
        assert_eq!(mlt.settings.mode, Mode::Hysteresis);
        assert_eq!(mlt.settings.setpoint, Decimal::new(1525, 1));
        assert_eq!(mlt.settings.heat.i, Decimal::new(5, 1));
        assert_eq!(mlt.settings.heat.cycle_secs, Decimal::from_int(2));
        assert_eq!(mlt.settings.cool.cycle_secs, Decimal::from_int(600));
        assert_eq!(mlt.settings.hysteresis.max, Decimal::from_int(154));
        assert_eq!(mlt.mash_steps.len(), 2);
        assert_eq!(mlt.mash_steps[0].step_type, "Sacch Rest");
        assert_eq!(mlt.mash_steps[1].temp_unit, TempScale::Celsius);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = Config::load(&file_path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_duplicate_vessels() {
        let toml = r#"
        [[vessel]]
        name = "hlt"
        probe = "a"
        [[vessel]]
        name = "hlt"
        probe = "b"
        "#;
        let result = Config::from_toml_str(toml);
        assert!(matches!(result, Err(ConfigError::Invalid(BrewError::InvalidParameter { .. }))));
    }

    #[test]
    fn test_rejects_bad_settings() {
        let toml = r#"
        [[vessel]]
        name = "hlt"
        probe = "a"
        heat = { pin = "GPIO5" }
        [vessel.settings]
        manual_duty = 120
        "#;
        assert!(matches!(Config::from_toml_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_mode_without_outputs() {
        let toml = r#"
        [[vessel]]
        name = "hlt"
        probe = "a"
        [vessel.settings]
        mode = "auto"
        "#;
        assert!(matches!(Config::from_toml_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_pid_mode_alias() {
        let toml = r#"
        [[vessel]]
        name = "hlt"
        probe = "a"
        heat = { pin = "GPIO5" }
        [vessel.settings]
        mode = "pid"
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.vessels[0].settings.mode, Mode::Auto);
    }

    #[test]
    fn test_rejects_overlong_mash_step() {
        let toml = r#"
        [[vessel]]
        name = "hlt"
        probe = "a"
        [[vessel.mash_step]]
        position = 0
        target_temp = 150
        duration_mins = 1000000000000
        "#;
        assert!(matches!(Config::from_toml_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        config.vessels[0].mash_steps[0].active = true;
        config.vessels[0].mash_steps[0].start = Some(start);
        config.vessels[0].variance_f = Some(Decimal::new(15, 1));

        let dir = tempdir().unwrap();
        let file_path = dir.path().join("brewery.toml");
        config.save(&file_path).unwrap();
        let loaded = Config::load(&file_path).unwrap();
        assert_eq!(loaded, config);
    }
}
