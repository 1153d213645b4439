//! Multi-reader input multiplexer
//!
//! One listener task per registered reader reads raw key events, decodes
//! them into that reader's own buffer, and on Enter sends the completed
//! code down a single queue. The caller's [`ScanHandler`] is driven from
//! that queue only, so scan processing is never concurrent with itself.
//!
//! Shutdown is a shared `CancellationToken`: listeners drop whatever is in
//! their buffer and exit, and `start` returns once all of them are joined.

use crate::input::{DeviceSelector, InputBackend, InputDevice, InputError, KeyEventStream};
use crate::scancode::{self, Decoded};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Completed codes waiting for the consumer
const SCAN_QUEUE_CAPACITY: usize = 64;

/// A completed code from one reader
#[derive(Debug, Clone, PartialEq)]
pub struct ScanEvent {
    /// Wall clock time, for records
    pub timestamp: DateTime<Local>,
    /// Monotonic time, for debouncing
    pub received_at: Instant,
    /// Reader address (physical port path)
    pub address: String,
    pub code: String,
}

impl ScanEvent {
    pub fn new(address: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            received_at: Instant::now(),
            address: address.into(),
            code: code.into(),
        }
    }
}

/// Consumer of completed codes
#[async_trait]
pub trait ScanHandler: Send {
    async fn on_code_scanned(&mut self, event: ScanEvent);
}

/// Characters typed by one reader since its last Enter
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodeBuffer {
    chars: String,
}

impl DecodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded key. Returns the completed code on the terminator,
    /// leaving the buffer empty.
    pub fn apply(&mut self, decoded: Decoded) -> Option<String> {
        match decoded {
            Decoded::Char(c) => {
                self.chars.push(c);
                None
            }
            Decoded::Terminator => Some(std::mem::take(&mut self.chars)),
            Decoded::Ignore => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

/// Why a listener stopped
#[derive(Debug)]
enum ListenerExit {
    Cancelled { discarded: usize },
    Disconnected,
    ReadFailed(io::Error),
    ConsumerGone,
}

/// Owns the registered readers and runs their listeners
pub struct DeviceMultiplexer {
    backend: Arc<dyn InputBackend>,
    devices: Vec<InputDevice>,
}

impl DeviceMultiplexer {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            devices: Vec::new(),
        }
    }

    /// Register every available device matching `selector`, replacing any
    /// previous registration. Zero matches is an error the caller decides on.
    pub fn register_devices(&mut self, selector: &DeviceSelector) -> Result<&[InputDevice], InputError> {
        let available = self.backend.list_available()?;
        let selected: Vec<InputDevice> = available.into_iter().filter(|d| selector.matches(d)).collect();

        if selected.is_empty() {
            return Err(InputError::NoDevicesFound {
                selector: selector.to_string(),
            });
        }

        info!("Registered {} reader(s) matching {}", selected.len(), selector);
        for device in &selected {
            info!("  {}", device);
        }

        self.devices = selected;
        Ok(&self.devices)
    }

    /// Every device the backend can see
    pub fn available_devices(&self) -> Result<Vec<InputDevice>, InputError> {
        self.backend.list_available()
    }

    /// Devices registered by the last [`register_devices`](Self::register_devices)
    pub fn active_devices(&self) -> &[InputDevice] {
        &self.devices
    }

    /// Listen to every registered reader and hand completed codes to
    /// `handler`, one at a time, until `shutdown` fires or every reader is
    /// gone. All listener tasks have ended when this returns.
    pub async fn start<H>(&self, handler: &mut H, shutdown: &CancellationToken)
    where
        H: ScanHandler + ?Sized,
    {
        let (tx, mut rx) = mpsc::channel(SCAN_QUEUE_CAPACITY);
        let mut listeners = JoinSet::new();

        for device in &self.devices {
            // One reader failing to open must not keep the others from running
            let stream = match self.backend.open(device) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Reader {} unavailable: {}", device.address, e);
                    continue;
                }
            };

            let address = device.address.clone();
            let tx = tx.clone();
            let token = shutdown.clone();
            listeners.spawn(async move {
                let exit = listen(&address, stream, tx, token).await;
                (address, exit)
            });
        }
        drop(tx);

        if listeners.is_empty() {
            warn!("No reader could be opened; nothing to listen to");
            return;
        }

        info!("Listening on {} reader(s)", listeners.len());

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping listeners");
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => handler.on_code_scanned(event).await,
                    None => {
                        info!("All readers are gone");
                        break;
                    }
                },
            }
        }

        // Listeners blocked on a full queue see the closed channel and exit
        drop(rx);

        while let Some(joined) = listeners.join_next().await {
            match joined {
                Ok((address, ListenerExit::Cancelled { discarded })) => {
                    if discarded > 0 {
                        debug!("Reader {}: dropped {} unterminated character(s)", address, discarded);
                    }
                    debug!("Reader {} listener stopped", address);
                }
                Ok((address, ListenerExit::Disconnected)) => {
                    debug!("Reader {} listener ended (disconnected)", address);
                }
                Ok((address, ListenerExit::ReadFailed(e))) => {
                    debug!("Reader {} listener ended (read error: {})", address, e);
                }
                Ok((address, ListenerExit::ConsumerGone)) => {
                    debug!("Reader {} listener ended (consumer gone)", address);
                }
                Err(e) => error!("Reader listener panicked: {}", e),
            }
        }
    }
}

/// Read one reader until it ends or shutdown fires
async fn listen(
    address: &str,
    mut stream: Box<dyn KeyEventStream>,
    tx: mpsc::Sender<ScanEvent>,
    shutdown: CancellationToken,
) -> ListenerExit {
    let mut buffer = DecodeBuffer::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return ListenerExit::Cancelled { discarded: buffer.as_str().chars().count() };
            }
            next = stream.next_event() => next,
        };

        let raw = match next {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                warn!("Reader {} disconnected", address);
                return ListenerExit::Disconnected;
            }
            Err(e) => {
                warn!("Reader {} read failed: {}", address, e);
                return ListenerExit::ReadFailed(e);
            }
        };

        let Some(code) = buffer.apply(scancode::decode(raw.key, raw.transition)) else {
            continue;
        };

        let event = ScanEvent::new(address, code);
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return ListenerExit::Cancelled { discarded: 0 },
            sent = tx.send(event) => {
                if sent.is_err() {
                    return ListenerExit::ConsumerGone;
                }
            }
        }
    }
}
