// src/mash/scheduler.rs - Ordered mash steps driving one controller's setpoint
use super::step::MashStep;
use crate::config::MashStepConfig;
use crate::control::Controller;
use crate::decimal::Decimal;
use crate::error::{BrewError, BrewResult};
use crate::hardware::TempScale;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Running,
}

/// What a single poll did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No active step.
    Idle,
    /// Active step, vessel still outside the tolerance band.
    Ramping,
    /// Vessel reached the band; the hold timer started.
    HoldStarted,
    Holding,
    Advanced { from: i32, to: i32 },
    /// The last step finished; nothing is active any more.
    Completed,
}

/// A batch of steps applied in one go. `temp_unit`, when set, overrides the
/// unit of every step in the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MashProfile {
    #[serde(default)]
    pub temp_unit: Option<TempScale>,
    #[serde(default)]
    pub steps: Vec<MashStepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MashSnapshot {
    pub controller: String,
    pub state: SchedulerState,
    pub current: Option<i32>,
    pub variance_f: Decimal,
    pub steps: BTreeMap<i32, MashStep>,
}

/// Mash steps keyed by position, bound to a controller by name.
///
/// Keys are kept in sync with `MashStep::position` by `sort_mash_steps`.
/// At most one step is active at any time.
#[derive(Debug, Clone)]
pub struct MashScheduler {
    controller: String,
    variance_f: Decimal,
    steps: BTreeMap<i32, MashStep>,
}

impl MashScheduler {
    pub fn new(controller: impl Into<String>, variance_f: Decimal) -> Self {
        Self {
            controller: controller.into(),
            variance_f: variance_f.abs(),
            steps: BTreeMap::new(),
        }
    }

    /// Rebuild a scheduler from configured steps, restoring any saved
    /// activation and timestamps.
    pub fn from_steps(
        controller: impl Into<String>,
        variance_f: Decimal,
        steps: &[MashStepConfig],
    ) -> BrewResult<Self> {
        let mut scheduler = Self::new(controller, variance_f);
        let mut active = 0;
        for config in steps {
            if scheduler.steps.contains_key(&config.position) {
                return Err(BrewError::invalid(format!(
                    "{}: duplicate mash step position {}",
                    scheduler.controller, config.position
                )));
            }
            let step = config.to_step()?;
            if step.active {
                active += 1;
            }
            scheduler.steps.insert(step.position, step);
        }
        if active > 1 {
            return Err(BrewError::invalid(format!(
                "{}: {} mash steps marked active",
                scheduler.controller, active
            )));
        }
        Ok(scheduler)
    }

    pub fn controller_name(&self) -> &str {
        &self.controller
    }

    pub fn variance_f(&self) -> Decimal {
        self.variance_f
    }

    pub fn set_variance_f(&mut self, variance_f: Decimal) -> BrewResult<()> {
        if variance_f.is_negative() {
            return Err(BrewError::invalid(format!(
                "variance must be >= 0, got {}",
                variance_f
            )));
        }
        self.variance_f = variance_f;
        Ok(())
    }

    pub fn steps(&self) -> impl Iterator<Item = &MashStep> {
        self.steps.values()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step at `position`, created empty if absent.
    pub fn add_mash_step(&mut self, position: i32) -> &mut MashStep {
        self.steps
            .entry(position)
            .or_insert_with(|| MashStep::new(position))
    }

    /// New step after the highest existing position.
    pub fn append_mash_step(&mut self) -> &mut MashStep {
        let position = self
            .steps
            .keys()
            .next_back()
            .map(|p| p.saturating_add(1))
            .unwrap_or(0);
        self.add_mash_step(position)
    }

    pub fn get_mash_step(&self, position: i32) -> Option<&MashStep> {
        self.steps.get(&position)
    }

    pub fn get_mash_step_mut(&mut self, position: i32) -> Option<&mut MashStep> {
        self.steps.get_mut(&position)
    }

    fn unknown_step(&self, position: i32) -> BrewError {
        tracing::warn!("{}: no mash step at position {}", self.controller, position);
        BrewError::unknown(format!("{}: mash step {}", self.controller, position))
    }

    /// Remove a step. Removing the active step leaves the scheduler idle; the
    /// controller keeps its setpoint.
    pub fn del_mash_step(&mut self, position: i32, now: DateTime<Utc>) -> BrewResult<MashStep> {
        let mut step = self
            .steps
            .remove(&position)
            .ok_or_else(|| self.unknown_step(position))?;
        if step.is_active() {
            step.deactivate(false, now);
            tracing::info!("{}: removed active mash step {}", self.controller, position);
        }
        Ok(step)
    }

    pub fn activate_step(&mut self, position: i32, now: DateTime<Utc>) -> BrewResult<()> {
        if !self.steps.contains_key(&position) {
            return Err(self.unknown_step(position));
        }
        for (p, step) in self.steps.iter_mut() {
            if *p != position && step.is_active() {
                step.deactivate(false, now);
            }
        }
        if let Some(step) = self.steps.get_mut(&position) {
            step.activate(now);
            tracing::info!(
                "{}: mash step {} active, target {}{}",
                self.controller,
                position,
                step.target_temp,
                step.temp_unit
            );
        }
        Ok(())
    }

    pub fn deactivate_step(&mut self, position: i32, now: DateTime<Utc>) -> BrewResult<()> {
        match self.steps.get_mut(&position) {
            Some(step) => {
                step.deactivate(false, now);
                Ok(())
            }
            None => Err(self.unknown_step(position)),
        }
    }

    pub fn deactivate_all(&mut self, now: DateTime<Utc>) {
        for step in self.steps.values_mut().filter(|s| s.is_active()) {
            step.deactivate(false, now);
        }
    }

    /// Re-key steps by their `position` field. Duplicate positions are
    /// rejected and the current order is kept.
    pub fn sort_mash_steps(&mut self) -> BrewResult<()> {
        let mut sorted = BTreeMap::new();
        for step in self.steps.values() {
            if sorted.insert(step.position, step.clone()).is_some() {
                return Err(BrewError::invalid(format!(
                    "{}: two mash steps share position {}",
                    self.controller, step.position
                )));
            }
        }
        self.steps = sorted;
        Ok(())
    }

    /// Move several steps at once. Every source must exist and the
    /// resulting positions must be distinct.
    pub fn reorder(&mut self, moves: &[(i32, i32)]) -> BrewResult<()> {
        let mut sources = HashSet::new();
        for (from, _) in moves {
            if !self.steps.contains_key(from) {
                return Err(self.unknown_step(*from));
            }
            if !sources.insert(*from) {
                return Err(BrewError::invalid(format!(
                    "{}: mash step {} moved twice",
                    self.controller, from
                )));
            }
        }

        let mut targets = HashSet::new();
        for (key, step) in &self.steps {
            let position = moves
                .iter()
                .find(|(from, _)| from == key)
                .map(|(_, to)| *to)
                .unwrap_or(step.position);
            if !targets.insert(position) {
                return Err(BrewError::invalid(format!(
                    "{}: reorder collides at position {}",
                    self.controller, position
                )));
            }
        }

        for (from, to) in moves {
            if let Some(step) = self.steps.get_mut(from) {
                step.set_position(*to);
            }
        }
        self.sort_mash_steps()
    }

    /// Map key of the active step. It can differ from the step's `position`
    /// until the next `sort_mash_steps`.
    fn current_key(&self) -> Option<i32> {
        self.steps
            .iter()
            .find(|(_, step)| step.is_active())
            .map(|(key, _)| *key)
    }

    pub fn get_current_mash_step(&self) -> Option<&MashStep> {
        self.steps.values().find(|s| s.is_active())
    }

    pub fn state(&self) -> SchedulerState {
        if self.get_current_mash_step().is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Insert or update many steps at once. Existing steps keep their
    /// activation and timestamps. Nothing changes if any entry is invalid.
    pub fn apply_profile(&mut self, profile: &MashProfile) -> BrewResult<()> {
        let mut seen = HashSet::new();
        let mut updates = Vec::with_capacity(profile.steps.len());
        for config in &profile.steps {
            if !seen.insert(config.position) {
                return Err(BrewError::invalid(format!(
                    "{}: profile repeats position {}",
                    self.controller, config.position
                )));
            }
            let mut step = config.to_step()?;
            if let Some(unit) = profile.temp_unit {
                step.temp_unit = unit;
            }
            updates.push(step);
        }

        for update in updates {
            let step = self.add_mash_step(update.position);
            step.set_target(update.target_temp, update.temp_unit);
            step.duration_mins = update.duration_mins;
            step.method = update.method;
            step.step_type = update.step_type;
        }
        tracing::info!(
            "{}: applied mash profile of {} steps",
            self.controller,
            profile.steps.len()
        );
        self.sort_mash_steps()
    }

    /// Start or stop the profile. Starting without a position picks the
    /// first step and is refused while a step is already running.
    pub fn toggle(
        &mut self,
        activate: bool,
        position: Option<i32>,
        now: DateTime<Utc>,
    ) -> BrewResult<Option<i32>> {
        if !activate {
            self.deactivate_all(now);
            tracing::info!("{}: mash profile stopped", self.controller);
            return Ok(None);
        }
        let position = match position {
            Some(p) => p,
            None => {
                if let Some(current) = self.get_current_mash_step() {
                    return Err(BrewError::invalid(format!(
                        "{}: mash profile already running at step {}",
                        self.controller, current.position
                    )));
                }
                *self.steps.keys().next().ok_or_else(|| {
                    BrewError::unknown(format!("{}: no mash steps", self.controller))
                })?
            }
        };
        self.activate_step(position, now)?;
        Ok(Some(position))
    }

    /// One scheduler iteration against the bound controller.
    pub fn poll(&mut self, controller: &mut Controller, now: DateTime<Utc>) -> BrewResult<PollOutcome> {
        let Some(position) = self.current_key() else {
            return Ok(PollOutcome::Idle);
        };
        let measured = controller.read_temperature(TempScale::Fahrenheit)?;
        let next = self
            .steps
            .range(position.saturating_add(1)..)
            .next()
            .map(|(p, _)| *p);

        let variance = self.variance_f;
        let Some(step) = self.steps.get_mut(&position) else {
            return Ok(PollOutcome::Idle);
        };
        let target_f = step.target_temp_as(TempScale::Fahrenheit);
        let within = (measured - target_f).abs() <= variance;

        let outcome = match (within, step.target_end) {
            (true, None) => {
                let end = step.begin_hold(now)?;
                tracing::info!(
                    "{}: mash step {} holding at {}F until {}",
                    self.controller,
                    position,
                    measured,
                    end.to_rfc3339()
                );
                PollOutcome::HoldStarted
            }
            (true, Some(end)) if now >= end => {
                step.deactivate(true, now);
                match next {
                    Some(to) => {
                        self.activate_step(to, now)?;
                        PollOutcome::Advanced { from: position, to }
                    }
                    None => {
                        tracing::info!("{}: mash profile complete", self.controller);
                        return Ok(PollOutcome::Completed);
                    }
                }
            }
            (_, Some(_)) => PollOutcome::Holding,
            (false, None) => PollOutcome::Ramping,
        };

        if let Some(step) = self.get_current_mash_step() {
            let target = step.target_temp_as(controller.scale());
            if controller.setpoint() != target {
                controller.set_setpoint(target)?;
            }
        }
        Ok(outcome)
    }

    pub fn snapshot(&self) -> MashSnapshot {
        MashSnapshot {
            controller: self.controller.clone(),
            state: self.state(),
            current: self.current_key(),
            variance_f: self.variance_f,
            steps: self.steps.clone(),
        }
    }

    /// Steps in configuration form, for persisting.
    pub fn to_configs(&self) -> Vec<MashStepConfig> {
        self.steps.values().map(MashStepConfig::from).collect()
    }
}
