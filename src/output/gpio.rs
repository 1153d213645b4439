//! Raspberry Pi GPIO outputs
//!
//! Each configured pin is claimed as an output, driven low at start.
//! rppal resets pins to their previous mode when dropped.

use super::{Actuator, ActuatorError, OutputId, OutputLevel};
use rppal::gpio::{Gpio, OutputPin};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

pub struct GpioActuator {
    pins: Mutex<HashMap<OutputId, OutputPin>>,
}

impl GpioActuator {
    /// Claim `ids` as outputs
    pub fn open(ids: &[OutputId]) -> Result<Self, ActuatorError> {
        let gpio = Gpio::new().map_err(|e| ActuatorError::Backend(e.to_string()))?;

        let mut pins = HashMap::new();
        for &id in ids {
            let pin = gpio
                .get(id)
                .map_err(|e| ActuatorError::Backend(format!("GPIO {id}: {e}")))?
                .into_output_low();
            pins.insert(id, pin);
        }

        info!("Claimed GPIO outputs {:?}", ids);
        Ok(Self {
            pins: Mutex::new(pins),
        })
    }
}

impl Actuator for GpioActuator {
    fn set_output(&self, id: OutputId, level: OutputLevel) -> Result<(), ActuatorError> {
        let mut pins = self
            .pins
            .lock()
            .map_err(|_| ActuatorError::Backend("GPIO pin table poisoned".to_string()))?;
        let pin = pins.get_mut(&id).ok_or(ActuatorError::UnknownOutput(id))?;

        match level {
            OutputLevel::High => pin.set_high(),
            OutputLevel::Low => pin.set_low(),
        }
        Ok(())
    }
}
