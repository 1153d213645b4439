//! Indicator Output Abstraction
//!
//! The experiment only ever drives outputs high or low by id. Backends:
//! - `gpio`: Raspberry Pi GPIO pins (feature `gpio`)
//! - `null`: logs the calls, for hosts without outputs

#[cfg(feature = "gpio")]
pub mod gpio;

pub mod null;

use thiserror::Error;

/// Output identifier (BCM pin number on the Pi)
pub type OutputId = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    Low,
    High,
}

#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("output {0} is not configured")]
    UnknownOutput(OutputId),

    #[error("output backend failure: {0}")]
    Backend(String),
}

/// Something that can drive indicator outputs.
///
/// Shared between the experiment and its detached turn-off timers, so
/// calls may arrive concurrently for the same output; the last call wins.
pub trait Actuator: Send + Sync {
    fn set_output(&self, id: OutputId, level: OutputLevel) -> Result<(), ActuatorError>;
}
