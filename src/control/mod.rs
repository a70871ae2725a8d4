// src/control/mod.rs - Closed-loop temperature control
pub mod controller;
pub mod hysteresis;
pub mod pid;
pub mod proportioner;
pub mod settings;

pub use controller::{Controller, ControllerStatus, CycleKind, OutputStatus, Side, TickReport};
pub use hysteresis::HysteresisBand;
pub use pid::Gains;
pub use settings::{ControllerSettings, Mode, OutputSettings, SideSettings};
