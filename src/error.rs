// src/error.rs - Error taxonomy shared by the controller and the mash scheduler
use thiserror::Error;

pub type BrewResult<T> = Result<T, BrewError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BrewError {
    /// Out-of-range numeric input. The target is left unchanged.
    #[error("Invalid parameter: {what}")]
    InvalidParameter { what: String },

    /// A step position, vessel or output that does not exist.
    #[error("Unknown reference: {what}")]
    UnknownReference { what: String },

    /// The temperature probe could not be read.
    #[error("Probe error on {probe}: {reason}")]
    Probe { probe: String, reason: String },

    /// A digital output rejected a write.
    #[error("Actuator fault on {pin}: {reason}")]
    Actuator { pin: String, reason: String },
}

impl BrewError {
    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidParameter { what: what.into() }
    }

    pub fn unknown(what: impl Into<String>) -> Self {
        Self::UnknownReference { what: what.into() }
    }
}
