// src/registry.rs - Name lookup for live controllers and schedulers
use crate::control::Controller;
use crate::error::{BrewError, BrewResult};
use crate::mash::MashScheduler;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub type SharedController = Arc<Mutex<Controller>>;
pub type SharedScheduler = Arc<Mutex<MashScheduler>>;

/// Controllers and schedulers by vessel name.
///
/// Cloning shares the same maps. The maps are only held long enough to clone
/// an `Arc` out; callers then lock the scheduler before the controller.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    controllers: Arc<RwLock<HashMap<String, SharedController>>>,
    schedulers: Arc<RwLock<HashMap<String, SharedScheduler>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_controller(&self, controller: Controller) -> BrewResult<SharedController> {
        let name = controller.name().to_string();
        let mut controllers = self.controllers.write().await;
        if controllers.contains_key(&name) {
            return Err(BrewError::invalid(format!("controller '{}' already exists", name)));
        }
        let shared = Arc::new(Mutex::new(controller));
        controllers.insert(name.clone(), shared.clone());
        tracing::info!("Registered controller {}", name);
        Ok(shared)
    }

    pub async fn controller(&self, name: &str) -> Option<SharedController> {
        self.controllers.read().await.get(name).cloned()
    }

    pub async fn require_controller(&self, name: &str) -> BrewResult<SharedController> {
        self.controller(name).await.ok_or_else(|| {
            tracing::warn!("Unknown controller {}", name);
            BrewError::unknown(format!("controller '{}'", name))
        })
    }

    pub async fn remove_controller(&self, name: &str) -> Option<SharedController> {
        self.controllers.write().await.remove(name)
    }

    pub async fn controller_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.controllers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a scheduler under the name of the controller it drives.
    pub async fn add_scheduler(&self, scheduler: MashScheduler) -> BrewResult<SharedScheduler> {
        let name = scheduler.controller_name().to_string();
        self.require_controller(&name).await?;
        let mut schedulers = self.schedulers.write().await;
        if schedulers.contains_key(&name) {
            return Err(BrewError::invalid(format!("scheduler for '{}' already exists", name)));
        }
        let shared = Arc::new(Mutex::new(scheduler));
        schedulers.insert(name, shared.clone());
        Ok(shared)
    }

    pub async fn scheduler(&self, name: &str) -> Option<SharedScheduler> {
        self.schedulers.read().await.get(name).cloned()
    }

    pub async fn remove_scheduler(&self, name: &str) -> Option<SharedScheduler> {
        self.schedulers.write().await.remove(name)
    }
}
