//! Duplicate scan suppression
//!
//! A tag held against a reader is read again and again. A scan is dropped
//! when it repeats the last admitted (reader, code) pair within the window.

use thiserror::Error;
use tokio::time::{Duration, Instant};

#[derive(Debug, Error, PartialEq)]
#[error("debounce window must be positive, got {0:?}")]
pub struct InvalidWindow(pub Duration);

/// Most recent admitted scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastScan {
    pub at: Instant,
    pub address: String,
    pub code: String,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last: Option<LastScan>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Result<Self, InvalidWindow> {
        if window.is_zero() {
            return Err(InvalidWindow(window));
        }
        Ok(Self { window, last: None })
    }

    pub fn last(&self) -> Option<&LastScan> {
        self.last.as_ref()
    }

    /// Admit or suppress a scan. Admitted scans (sentinels included)
    /// become the new [`LastScan`]; suppressed ones leave it untouched.
    pub fn accept(&mut self, address: &str, code: &str, now: Instant) -> bool {
        if let Some(last) = &self.last {
            let repeat = last.address == address && last.code == code;
            if repeat && now.saturating_duration_since(last.at) < self.window {
                return false;
            }
        }

        self.last = Some(LastScan {
            at: now,
            address: address.to_string(),
            code: code.to_string(),
        });
        true
    }
}
