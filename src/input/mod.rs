//! Input Device Abstraction
//!
//! Readers show up as keyboards. This module defines what the rest of the
//! crate needs from them, independent of where the events come from:
//!
//! - `InputBackend`: enumerates devices and opens their event streams
//! - `KeyEventStream`: an open device producing raw key events
//!
//! Backends:
//! - `evdev`: Linux `/dev/input/event*` devices
//! - `scripted`: in-process channels, for tests and simulation runs

pub mod evdev;
pub mod scripted;

use async_trait::async_trait;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A keyboard-like input device as seen at enumeration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    /// Stable physical port path (e.g. `usb-0000:01:00.0-1.2/input0`).
    /// Used as the reader address everywhere downstream.
    pub address: String,
    /// Human-readable device name reported by the driver
    pub name: String,
    /// Node to open (e.g. `/dev/input/event3`)
    pub path: PathBuf,
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}' at {}", self.path.display(), self.name, self.address)
    }
}

/// Key state change reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Pressed,
    Released,
    /// Autorepeat while the key is held
    Held,
}

impl KeyTransition {
    /// Map a kernel key event value (0 = up, 1 = down, 2 = repeat)
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyTransition::Released),
            1 => Some(KeyTransition::Pressed),
            2 => Some(KeyTransition::Held),
            _ => None,
        }
    }
}

/// One raw key event from a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawKeyEvent {
    pub key: u16,
    pub transition: KeyTransition,
}

impl RawKeyEvent {
    pub fn pressed(key: u16) -> Self {
        Self { key, transition: KeyTransition::Pressed }
    }

    pub fn released(key: u16) -> Self {
        Self { key, transition: KeyTransition::Released }
    }
}

/// Which enumerated devices to register
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Devices whose reported name equals this string
    Name(String),
    /// Devices whose address is in this list
    Addresses(Vec<String>),
}

impl DeviceSelector {
    pub fn matches(&self, device: &InputDevice) -> bool {
        match self {
            DeviceSelector::Name(name) => device.name == *name,
            DeviceSelector::Addresses(addrs) => addrs.iter().any(|a| *a == device.address),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Name(name) => write!(f, "name '{name}'"),
            DeviceSelector::Addresses(addrs) => write!(f, "addresses {addrs:?}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("no input devices match {selector}")]
    NoDevicesFound { selector: String },

    #[error("failed to open input device {address}")]
    Open {
        address: String,
        #[source]
        source: io::Error,
    },
}

/// An open device event stream.
///
/// `next_event` yields key events only, in device order. `Ok(None)` means
/// the device is gone (disconnect); the stream is not restartable.
#[async_trait]
pub trait KeyEventStream: Send {
    async fn next_event(&mut self) -> io::Result<Option<RawKeyEvent>>;
}

/// Source of input devices
pub trait InputBackend: Send + Sync {
    /// Every device currently present, readers or not
    fn list_available(&self) -> Result<Vec<InputDevice>, InputError>;

    /// Open the event stream of a previously listed device
    fn open(&self, device: &InputDevice) -> Result<Box<dyn KeyEventStream>, InputError>;
}
