// src/lib.rs - Temperature control engine for a home-brewing rig
pub mod config;
pub mod control;
pub mod decimal;
pub mod error;
pub mod hardware;
pub mod mash;
pub mod registry;
pub mod runtime;

pub use config::{Config, ConfigError};
pub use control::{Controller, Mode};
pub use decimal::Decimal;
pub use error::{BrewError, BrewResult};
pub use mash::{MashScheduler, MashStep};
pub use registry::Registry;
pub use runtime::Brewery;
