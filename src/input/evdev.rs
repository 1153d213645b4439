//! evdev input backend
//!
//! Enumerates `/dev/input/event*` and reads key events asynchronously.
//! Readers are not grabbed: they keep typing into the console as well,
//! which is harmless on a headless host.

use super::{InputBackend, InputDevice, InputError, KeyEventStream, KeyTransition, RawKeyEvent};
use crate::scancode::KEY_ENTER;
use ::evdev::{Device, InputEventKind, Key};
use async_trait::async_trait;
use std::io;
use tracing::{debug, info};

/// Linux evdev device source
#[derive(Debug, Default)]
pub struct EvdevBackend;

impl EvdevBackend {
    pub fn new() -> Self {
        Self
    }
}

impl InputBackend for EvdevBackend {
    fn list_available(&self) -> Result<Vec<InputDevice>, InputError> {
        let mut devices = Vec::new();

        for (path, dev) in ::evdev::enumerate() {
            let name = dev.name().unwrap_or_default().to_string();

            // Readers are keyboards; anything that cannot send Enter can't be one
            let has_enter = dev
                .supported_keys()
                .map(|k| k.contains(Key::new(KEY_ENTER)))
                .unwrap_or(false);
            if !has_enter {
                debug!("  Skipping {:?} ('{}'): no Enter key", path, name);
                continue;
            }

            // Port path is stable across reboots; fall back to the node when the driver has none
            let address = match dev.physical_path() {
                Some(phys) if !phys.is_empty() => phys.to_string(),
                _ => path.display().to_string(),
            };

            devices.push(InputDevice { address, name, path });
        }

        devices.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(devices)
    }

    fn open(&self, device: &InputDevice) -> Result<Box<dyn KeyEventStream>, InputError> {
        let open_err = |source| InputError::Open {
            address: device.address.clone(),
            source,
        };

        let dev = Device::open(&device.path).map_err(open_err)?;
        let stream = dev.into_event_stream().map_err(open_err)?;
        info!("Opened reader {}", device);

        Ok(Box::new(EvdevKeyStream { stream }))
    }
}

struct EvdevKeyStream {
    stream: ::evdev::EventStream,
}

#[async_trait]
impl KeyEventStream for EvdevKeyStream {
    async fn next_event(&mut self) -> io::Result<Option<RawKeyEvent>> {
        loop {
            let ev = match self.stream.next_event().await {
                Ok(ev) => ev,
                // Unplugged
                Err(e) if e.raw_os_error() == Some(libc::ENODEV) => return Ok(None),
                Err(e) => return Err(e),
            };

            if let InputEventKind::Key(key) = ev.kind() {
                if let Some(transition) = KeyTransition::from_value(ev.value()) {
                    return Ok(Some(RawKeyEvent { key: key.code(), transition }));
                }
            }
            // SYN, MSC_SCAN, LEDs: not ours
        }
    }
}
