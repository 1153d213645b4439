//! Null/Fallback Output Backend
//!
//! Used when no GPIO is available (development hosts, `--simulate`).
//! Every call succeeds and is logged.

use super::{Actuator, ActuatorError, OutputId, OutputLevel};
use tracing::info;

#[derive(Debug, Default)]
pub struct NullActuator;

impl NullActuator {
    pub fn new() -> Self {
        Self
    }
}

impl Actuator for NullActuator {
    fn set_output(&self, id: OutputId, level: OutputLevel) -> Result<(), ActuatorError> {
        info!("output {} -> {:?}", id, level);
        Ok(())
    }
}
