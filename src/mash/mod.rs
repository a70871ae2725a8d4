// src/mash/mod.rs - Mash profiles
pub mod scheduler;
pub mod step;

pub use scheduler::{MashProfile, MashScheduler, MashSnapshot, PollOutcome, SchedulerState};
pub use step::{MashStep, StepState};
