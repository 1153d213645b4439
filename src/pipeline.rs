//! Scan processing path: debounce, then the experiment.
//!
//! The multiplexer drives this one scan at a time, so the debouncer state
//! and the experiment log need no locking.

use crate::debounce::Debouncer;
use crate::experiment::{ExperimentController, Outcome};
use crate::multiplexer::{ScanEvent, ScanHandler};
use async_trait::async_trait;
use tracing::{debug, info};

pub struct ScanPipeline {
    debouncer: Debouncer,
    controller: ExperimentController,
}

impl ScanPipeline {
    pub fn new(debouncer: Debouncer, controller: ExperimentController) -> Self {
        Self { debouncer, controller }
    }

    pub fn controller(&self) -> &ExperimentController {
        &self.controller
    }

    /// Process one scan. `None` if it was dropped as a duplicate.
    pub async fn process(&mut self, event: &ScanEvent) -> Option<Outcome> {
        if !self.debouncer.accept(&event.address, &event.code, event.received_at) {
            debug!("Duplicate {} from {} suppressed", event.code, event.address);
            return None;
        }

        info!("code scanned: {} {} {}", event.timestamp.to_rfc3339(), event.address, event.code);
        Some(self.controller.handle(event).await)
    }
}

#[async_trait]
impl ScanHandler for ScanPipeline {
    async fn on_code_scanned(&mut self, event: ScanEvent) {
        self.process(&event).await;
    }
}
