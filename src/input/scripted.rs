//! Scripted input backend
//!
//! Devices are fed from channels instead of hardware. Used by the test
//! suite and by `rfidlab run --simulate`.

use super::{InputBackend, InputDevice, InputError, KeyEventStream, RawKeyEvent};
use crate::scancode::{KEY_ENTER, key_for};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;

type EventResult = io::Result<RawKeyEvent>;

struct Entry {
    device: InputDevice,
    receiver: Mutex<Option<UnboundedReceiver<EventResult>>>,
}

/// Backend whose devices are driven by [`ScriptedDevice`] handles
#[derive(Default)]
pub struct ScriptedBackend {
    entries: Vec<Entry>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and get the handle that types into it
    pub fn add_device(&mut self, name: &str, address: &str) -> ScriptedDevice {
        let (tx, rx) = mpsc::unbounded_channel();
        let index = self.entries.len();
        self.entries.push(Entry {
            device: InputDevice {
                address: address.to_string(),
                name: name.to_string(),
                path: PathBuf::from(format!("/dev/input/scripted{index}")),
            },
            receiver: Mutex::new(Some(rx)),
        });

        ScriptedDevice {
            address: address.to_string(),
            sender: tx,
        }
    }
}

impl InputBackend for ScriptedBackend {
    fn list_available(&self) -> Result<Vec<InputDevice>, InputError> {
        Ok(self.entries.iter().map(|e| e.device.clone()).collect())
    }

    fn open(&self, device: &InputDevice) -> Result<Box<dyn KeyEventStream>, InputError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.device.address == device.address)
            .ok_or_else(|| InputError::Open {
                address: device.address.clone(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such scripted device"),
            })?;

        let receiver = entry
            .receiver
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or_else(|| InputError::Open {
                address: device.address.clone(),
                source: io::Error::new(io::ErrorKind::ResourceBusy, "scripted device already opened"),
            })?;

        Ok(Box::new(ScriptedStream { receiver }))
    }
}

struct ScriptedStream {
    receiver: UnboundedReceiver<EventResult>,
}

#[async_trait]
impl KeyEventStream for ScriptedStream {
    async fn next_event(&mut self) -> io::Result<Option<RawKeyEvent>> {
        match self.receiver.recv().await {
            Some(Ok(ev)) => Ok(Some(ev)),
            Some(Err(e)) => Err(e),
            // All handles dropped: treat as unplugged
            None => Ok(None),
        }
    }
}

/// Typing handle for one scripted device. Dropping every handle
/// disconnects the device.
#[derive(Clone)]
pub struct ScriptedDevice {
    address: String,
    sender: UnboundedSender<EventResult>,
}

impl ScriptedDevice {
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a raw event
    pub fn send(&self, event: RawKeyEvent) {
        if self.sender.send(Ok(event)).is_err() {
            warn!("Scripted device {} has no listener", self.address);
        }
    }

    /// Press and release each key of `code`, without the terminator.
    /// Characters with no key are skipped.
    pub fn type_partial(&self, code: &str) {
        for c in code.chars() {
            match key_for(c) {
                Some(key) => {
                    self.send(RawKeyEvent::pressed(key));
                    self.send(RawKeyEvent::released(key));
                }
                None => warn!("No key for {:?}, skipping", c),
            }
        }
    }

    /// Type `code` the way a reader does: one key per character, then Enter
    pub fn type_code(&self, code: &str) {
        self.type_partial(code);
        self.send(RawKeyEvent::pressed(KEY_ENTER));
        self.send(RawKeyEvent::released(KEY_ENTER));
    }

    /// Make the next read fail with `kind`
    pub fn fail(&self, kind: io::ErrorKind) {
        let _ = self.sender.send(Err(io::Error::new(kind, "scripted read failure")));
    }
}
