// src/runtime.rs - Background loops and the brewery supervisor
//! Each vessel runs a control loop ticking its [`Controller`] and, once it
//! has a mash profile, a scheduler loop polling its [`MashScheduler`]. Both
//! are plain tokio tasks stopped through a watch channel.

use crate::config::{Config, EngineConfig, VesselConfig};
use crate::control::{Controller, ControllerStatus, OutputSettings};
use crate::error::{BrewError, BrewResult};
use crate::hardware::{HardwareError, OutputChannel, PinFactory};
use crate::mash::{MashScheduler, MashSnapshot};
use crate::registry::{Registry, SharedController, SharedScheduler};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A running background loop.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl LoopHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to exit. Safe to call more than once.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn join(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!("{} loop ended abnormally: {}", self.name, e);
        }
    }
}

fn spawn_periodic<F, Fut, Exit>(name: String, period: Duration, mut body: F, on_exit: Exit) -> LoopHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
    Exit: Future<Output = ()> + Send + 'static,
{
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let loop_name = name.clone();
    let task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("{} loop started", loop_name);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    body().await;
                }
            }
        }
        on_exit.await;
        tracing::info!("{} loop shutting down", loop_name);
    });
    LoopHandle { name, shutdown, task }
}

/// Tick `controller` every `period`. Outputs are forced off when the loop
/// stops.
pub fn spawn_control_loop(controller: SharedController, name: &str, period: Duration) -> LoopHandle {
    let vessel = name.to_string();
    let tick_target = controller.clone();
    let body = move || {
        let controller = tick_target.clone();
        let vessel = vessel.clone();
        async move {
            let mut controller = controller.lock().await;
            match controller.tick(Utc::now()) {
                Ok(report) => tracing::debug!(
                    "{}: heat {}% ({}) cool {}% ({})",
                    vessel,
                    report.heat_duty,
                    report.heat_on,
                    report.cool_duty,
                    report.cool_on
                ),
                Err(e) => tracing::error!("{}: control tick failed: {}", vessel, e),
            }
        }
    };
    let released = name.to_string();
    let on_exit = async move {
        let faults = controller.lock().await.force_off();
        if faults > 0 {
            tracing::warn!("{}: {} outputs could not be switched off", released, faults);
        }
    };
    spawn_periodic(format!("{} control", name), period, body, on_exit)
}

/// Poll the scheduler every `period`, resolving its controller through
/// `registry` on each iteration.
pub fn spawn_mash_loop(
    scheduler: SharedScheduler,
    name: &str,
    registry: Registry,
    period: Duration,
) -> LoopHandle {
    let vessel = name.to_string();
    let body = move || {
        let scheduler = scheduler.clone();
        let registry = registry.clone();
        let vessel = vessel.clone();
        async move {
            if let Err(e) = poll_once(&vessel, &scheduler, &registry).await {
                tracing::error!("{}: mash poll failed: {}", vessel, e);
            }
        }
    };
    spawn_periodic(format!("{} mash", name), period, body, async {})
}

async fn poll_once(name: &str, scheduler: &SharedScheduler, registry: &Registry) -> BrewResult<()> {
    let controller = registry.require_controller(name).await?;
    let mut scheduler = scheduler.lock().await;
    let mut controller = controller.lock().await;
    let outcome = scheduler.poll(&mut controller, Utc::now())?;
    tracing::debug!("{}: mash poll {:?}", name, outcome);
    Ok(())
}

fn hardware_fault(what: &str, e: HardwareError) -> BrewError {
    BrewError::Actuator {
        pin: what.to_string(),
        reason: e.to_string(),
    }
}

fn open_channel(pins: &dyn PinFactory, output: &OutputSettings) -> BrewResult<OutputChannel> {
    let line = pins
        .open_output(&output.pin)
        .map_err(|e| hardware_fault(&output.pin, e))?;
    Ok(OutputChannel::new(output.pin.clone(), line, output.inverted))
}

/// Open the hardware named by `vessel` and build a configured controller.
pub fn build_controller(vessel: &VesselConfig, pins: &dyn PinFactory) -> BrewResult<Controller> {
    vessel.validate()?;
    let probe = pins
        .open_probe(&vessel.probe, vessel.scale)
        .map_err(|e| BrewError::Probe {
            probe: vessel.probe.clone(),
            reason: e.to_string(),
        })?;
    let heat = vessel.heat.as_ref().map(|o| open_channel(pins, o)).transpose()?;
    let cool = vessel.cool.as_ref().map(|o| open_channel(pins, o)).transpose()?;
    let aux = vessel
        .aux
        .as_ref()
        .map(|pin| open_channel(pins, &OutputSettings::new(pin.clone(), false)))
        .transpose()?;

    let mut controller = Controller::new(vessel.name.clone(), probe);
    controller.set_outputs(heat, cool, aux)?;
    controller.apply_settings(vessel.settings.clone())?;
    Ok(controller)
}

#[derive(Debug, Clone, Serialize)]
pub struct VesselStatus {
    pub controller: ControllerStatus,
    pub mash: Option<MashSnapshot>,
}

/// Owns the registry, the pin factory and every running loop.
pub struct Brewery {
    registry: Registry,
    pins: Arc<dyn PinFactory>,
    engine: EngineConfig,
    control_loops: HashMap<String, LoopHandle>,
    mash_loops: HashMap<String, LoopHandle>,
}

impl Brewery {
    pub fn new(pins: Arc<dyn PinFactory>, engine: EngineConfig) -> Self {
        Self {
            registry: Registry::new(),
            pins,
            engine,
            control_loops: HashMap::new(),
            mash_loops: HashMap::new(),
        }
    }

    /// Build every configured vessel and start its loops.
    pub async fn from_config(config: &Config, pins: Arc<dyn PinFactory>) -> BrewResult<Self> {
        config.validate()?;
        let mut brewery = Self::new(pins, config.engine.clone());
        for vessel in &config.vessels {
            brewery.add_vessel(vessel).await?;
        }
        Ok(brewery)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    fn control_period(&self) -> Duration {
        Duration::from_millis(self.engine.control_interval_ms)
    }

    fn mash_period(&self) -> Duration {
        Duration::from_secs(self.engine.mash_interval_secs)
    }

    pub async fn add_vessel(&mut self, vessel: &VesselConfig) -> BrewResult<SharedController> {
        let controller = build_controller(vessel, self.pins.as_ref())?;
        let scheduler = if vessel.mash_steps.is_empty() {
            None
        } else {
            let variance = vessel.variance_f.unwrap_or(self.engine.variance_f);
            Some(MashScheduler::from_steps(vessel.name.clone(), variance, &vessel.mash_steps)?)
        };

        let shared = self.registry.add_controller(controller).await?;
        let handle = spawn_control_loop(shared.clone(), &vessel.name, self.control_period());
        self.control_loops.insert(vessel.name.clone(), handle);
        if let Some(scheduler) = scheduler {
            self.start_scheduler(scheduler).await?;
        }
        tracing::info!("Vessel {} online", vessel.name);
        Ok(shared)
    }

    async fn start_scheduler(&mut self, scheduler: MashScheduler) -> BrewResult<SharedScheduler> {
        let name = scheduler.controller_name().to_string();
        let shared = self.registry.add_scheduler(scheduler).await?;
        let handle = spawn_mash_loop(shared.clone(), &name, self.registry.clone(), self.mash_period());
        self.mash_loops.insert(name, handle);
        Ok(shared)
    }

    /// The scheduler bound to `name`, created and started on first use.
    pub async fn ensure_scheduler(&mut self, name: &str) -> BrewResult<SharedScheduler> {
        if let Some(existing) = self.registry.scheduler(name).await {
            return Ok(existing);
        }
        self.registry.require_controller(name).await?;
        self.start_scheduler(MashScheduler::new(name, self.engine.variance_f))
            .await
    }

    /// Stop both loops of a vessel, switch its outputs off and forget it.
    pub async fn remove_vessel(&mut self, name: &str) -> BrewResult<()> {
        let controller = self.registry.require_controller(name).await?;
        if let Some(handle) = self.mash_loops.remove(name) {
            handle.join().await;
        }
        if let Some(handle) = self.control_loops.remove(name) {
            handle.join().await;
        }
        self.registry.remove_scheduler(name).await;
        self.registry.remove_controller(name).await;
        controller.lock().await.force_off();
        tracing::info!("Vessel {} removed", name);
        Ok(())
    }

    pub async fn status(&self) -> Vec<VesselStatus> {
        let mut statuses = Vec::new();
        for name in self.registry.controller_names().await {
            let mash = match self.registry.scheduler(&name).await {
                Some(scheduler) => Some(scheduler.lock().await.snapshot()),
                None => None,
            };
            if let Some(controller) = self.registry.controller(&name).await {
                statuses.push(VesselStatus {
                    controller: controller.lock().await.status(),
                    mash,
                });
            }
        }
        statuses
    }

    /// Current live state expressed as a configuration, for persisting.
    pub async fn snapshot_config(&self) -> Config {
        let mut vessels = Vec::new();
        for name in self.registry.controller_names().await {
            let (mash_steps, variance_f) = match self.registry.scheduler(&name).await {
                Some(scheduler) => {
                    let scheduler = scheduler.lock().await;
                    let variance = scheduler.variance_f();
                    (
                        scheduler.to_configs(),
                        (variance != self.engine.variance_f).then_some(variance),
                    )
                }
                None => (Vec::new(), None),
            };
            let Some(controller) = self.registry.controller(&name).await else {
                continue;
            };
            let controller = controller.lock().await;
            let output = |channel: Option<&OutputChannel>| {
                channel.map(|c| OutputSettings::new(c.pin(), c.inverted()))
            };
            vessels.push(VesselConfig {
                name: name.clone(),
                probe: controller.probe_name().to_string(),
                scale: controller.scale(),
                aux: controller.aux_output().map(|c| c.pin().to_string()),
                variance_f,
                heat: output(controller.heat_output()),
                cool: output(controller.cool_output()),
                settings: controller.settings().clone(),
                mash_steps,
            });
        }
        Config {
            engine: self.engine.clone(),
            vessels,
        }
    }

    /// Stop every loop and wait for them to exit.
    pub async fn shutdown(&mut self) {
        tracing::info!("Shutting down brewery");
        for handle in self.mash_loops.values().chain(self.control_loops.values()) {
            handle.stop();
        }
        for (_, handle) in self.mash_loops.drain() {
            handle.join().await;
        }
        for (_, handle) in self.control_loops.drain() {
            handle.join().await;
        }
    }
}
