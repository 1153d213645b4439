//! Experiment state machine
//!
//! Idle until the start code is scanned, Running until the stop code.
//! While Running every other scan is recorded and classified against the
//! active condition; an activation lights that reader's indicator.
//!
//! Transitions (sentinels win over activation codes):
//! - start code, any state: reset log, START record, flash x2 -> Running
//! - stop code, any state: END record, export, flash x4 -> Idle
//! - other code, Running: record, light reader if it is an activation
//! - other code, Idle: ignored

use crate::config::{Condition, Config, ConfigError};
use crate::export::ScanExporter;
use crate::multiplexer::ScanEvent;
use crate::output::{Actuator, OutputId, OutputLevel};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const START_MARKER: &str = "START";
pub const END_MARKER: &str = "END";

const START_FLASHES: u32 = 2;
const STOP_FLASHES: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExperimentState {
    #[default]
    Idle,
    Running,
}

/// One row of the experiment log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub timestamp: DateTime<Local>,
    /// Condition the run was under
    pub condition: String,
    /// Reader index; `None` for START/END markers
    pub reader: Option<usize>,
    pub code: String,
    pub is_activation: bool,
}

impl ScanRecord {
    pub fn marker(timestamp: DateTime<Local>, condition: &str, marker: &str) -> Self {
        Self {
            timestamp,
            condition: condition.to_string(),
            reader: None,
            code: marker.to_string(),
            is_activation: false,
        }
    }
}

/// What [`ExperimentController::handle`] did with a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Started,
    Stopped,
    Recorded { reader: usize, is_activation: bool },
    UnknownReader,
    IgnoredWhileIdle,
}

/// Settings the controller needs, resolved from [`Config`]
#[derive(Debug, Clone)]
pub struct ExperimentSettings {
    pub start_code: String,
    pub stop_code: String,
    pub condition_id: String,
    pub condition: Condition,
    pub readers_addresses: Vec<String>,
    pub readers_outputs: Vec<OutputId>,
    pub light_duration: Duration,
    pub flash_on: Duration,
    pub flash_off: Duration,
}

impl ExperimentSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            start_code: config.start_code.clone(),
            stop_code: config.stop_code.clone(),
            condition_id: config.condition_to_run.clone(),
            condition: config.active_condition()?.clone(),
            readers_addresses: config.readers_addresses.clone(),
            readers_outputs: config.readers_leds_addresses.clone(),
            light_duration: config.light_duration()?,
            flash_on: config.flash_on(),
            flash_off: config.flash_off(),
        })
    }
}

pub struct ExperimentController {
    settings: ExperimentSettings,
    state: ExperimentState,
    records: Vec<ScanRecord>,
    actuator: Arc<dyn Actuator>,
    exporter: Box<dyn ScanExporter>,
}

impl ExperimentController {
    pub fn new(
        settings: ExperimentSettings,
        actuator: Arc<dyn Actuator>,
        exporter: Box<dyn ScanExporter>,
    ) -> Self {
        Self {
            settings,
            state: ExperimentState::Idle,
            records: Vec::new(),
            actuator,
            exporter,
        }
    }

    pub fn state(&self) -> ExperimentState {
        self.state
    }

    /// Records collected since the last start
    pub fn records(&self) -> &[ScanRecord] {
        &self.records
    }

    /// Apply one admitted scan
    pub async fn handle(&mut self, event: &ScanEvent) -> Outcome {
        if event.code == self.settings.start_code {
            self.start(event.timestamp).await;
            return Outcome::Started;
        }

        if event.code == self.settings.stop_code {
            self.stop(event.timestamp).await;
            return Outcome::Stopped;
        }

        if self.state == ExperimentState::Idle {
            debug!("Ignoring {} from {} (not running)", event.code, event.address);
            return Outcome::IgnoredWhileIdle;
        }

        let Some(reader) = self.reader_index(&event.address) else {
            debug!("Scan from unconfigured reader {} ignored", event.address);
            return Outcome::UnknownReader;
        };

        let is_activation = self.settings.condition.is_activation(reader, &event.code);
        self.records.push(ScanRecord {
            timestamp: event.timestamp,
            condition: self.settings.condition_id.clone(),
            reader: Some(reader),
            code: event.code.clone(),
            is_activation,
        });
        info!("Reader {} scanned {} (activation: {})", reader, event.code, is_activation);

        if is_activation {
            self.light(reader);
        }

        Outcome::Recorded { reader, is_activation }
    }

    fn reader_index(&self, address: &str) -> Option<usize> {
        self.settings.readers_addresses.iter().position(|a| a == address)
    }

    async fn start(&mut self, timestamp: DateTime<Local>) {
        if self.state == ExperimentState::Running {
            warn!("Start code while running: discarding {} record(s)", self.records.len());
        }

        self.records.clear();
        self.records.push(ScanRecord::marker(timestamp, &self.settings.condition_id, START_MARKER));
        info!("Experiment started (condition {})", self.settings.condition_id);

        self.flash_all(START_FLASHES).await;
        self.state = ExperimentState::Running;
    }

    async fn stop(&mut self, timestamp: DateTime<Local>) {
        self.records.push(ScanRecord::marker(timestamp, &self.settings.condition_id, END_MARKER));
        info!("Experiment stopped with {} record(s)", self.records.len());

        match self.exporter.export(&self.records) {
            Ok(path) => info!("Exported scans to {:?}", path),
            Err(e) => error!("Failed to export scans: {}", e),
        }

        self.flash_all(STOP_FLASHES).await;
        self.state = ExperimentState::Idle;
    }

    /// Light a reader's indicator and schedule it off. Earlier timers for the
    /// same output are not cancelled: a re-scan inside the light window is
    /// turned off by the first timer, before its own duration ends.
    fn light(&self, reader: usize) {
        let Some(&id) = self.settings.readers_outputs.get(reader) else {
            warn!("Reader {} has no indicator output", reader);
            return;
        };

        set(self.actuator.as_ref(), id, OutputLevel::High);

        let actuator = Arc::clone(&self.actuator);
        let duration = self.settings.light_duration;
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            set(actuator.as_ref(), id, OutputLevel::Low);
        });
    }

    /// Blink every reader indicator `times` times. Blocks scan processing
    /// for the duration of the pattern.
    async fn flash_all(&self, times: u32) {
        for _ in 0..times {
            self.set_all(OutputLevel::High);
            tokio::time::sleep(self.settings.flash_on).await;
            self.set_all(OutputLevel::Low);
            tokio::time::sleep(self.settings.flash_off).await;
        }
    }

    /// Drive every indicator to `level`
    pub fn set_all(&self, level: OutputLevel) {
        for &id in &self.settings.readers_outputs {
            set(self.actuator.as_ref(), id, level);
        }
    }
}

fn set(actuator: &dyn Actuator, id: OutputId, level: OutputLevel) {
    if let Err(e) = actuator.set_output(id, level) {
        warn!("Failed to set output {} {:?}: {}", id, level, e);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::export::ExportError;
    use crate::output::ActuatorError;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Actuator that remembers every call
    #[derive(Default)]
    pub(crate) struct RecordingActuator {
        pub calls: Mutex<Vec<(OutputId, OutputLevel)>>,
    }

    impl RecordingActuator {
        pub fn calls(&self) -> Vec<(OutputId, OutputLevel)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn clear(&self) {
            self.calls.lock().unwrap().clear();
        }
    }

    impl Actuator for RecordingActuator {
        fn set_output(&self, id: OutputId, level: OutputLevel) -> Result<(), ActuatorError> {
            self.calls.lock().unwrap().push((id, level));
            Ok(())
        }
    }

    /// Exporter that keeps every exported batch
    #[derive(Clone, Default)]
    pub(crate) struct MemoryExporter {
        pub exports: Arc<Mutex<Vec<Vec<ScanRecord>>>>,
    }

    impl ScanExporter for MemoryExporter {
        fn export(&mut self, records: &[ScanRecord]) -> Result<PathBuf, ExportError> {
            let mut exports = self.exports.lock().unwrap();
            exports.push(records.to_vec());
            Ok(PathBuf::from(format!("memory-{}", exports.len())))
        }
    }

    fn codes(c: &[&str]) -> BTreeSet<String> {
        c.iter().map(|s| s.to_string()).collect()
    }

    pub(crate) fn settings() -> ExperimentSettings {
        ExperimentSettings {
            start_code: "START1".into(),
            stop_code: "STOP1".into(),
            condition_id: "A".into(),
            condition: Condition::new(vec![codes(&["CODE1"]), codes(&["CODE3"])]),
            readers_addresses: vec!["readerA".into(), "readerB".into()],
            readers_outputs: vec![17, 27],
            light_duration: Duration::from_secs(1),
            flash_on: Duration::from_millis(100),
            flash_off: Duration::from_millis(100),
        }
    }

    fn controller() -> (ExperimentController, Arc<RecordingActuator>, MemoryExporter) {
        let actuator = Arc::new(RecordingActuator::default());
        let exporter = MemoryExporter::default();
        let ctrl = ExperimentController::new(settings(), actuator.clone(), Box::new(exporter.clone()));
        (ctrl, actuator, exporter)
    }

    fn scan(address: &str, code: &str) -> ScanEvent {
        ScanEvent::new(address, code)
    }

    fn summary(records: &[ScanRecord]) -> Vec<(Option<usize>, &str, bool)> {
        records.iter().map(|r| (r.reader, r.code.as_str(), r.is_activation)).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_from_idle() {
        let (mut ctrl, actuator, _) = controller();
        assert_eq!(ctrl.state(), ExperimentState::Idle);

        assert_eq!(ctrl.handle(&scan("readerA", "START1")).await, Outcome::Started);
        assert_eq!(ctrl.state(), ExperimentState::Running);
        assert_eq!(summary(ctrl.records()), [(None, START_MARKER, false)]);

        // Two flashes over both outputs
        let highs = actuator.calls().iter().filter(|(_, l)| *l == OutputLevel::High).count();
        assert_eq!(highs, 2 * 2);
        assert_eq!(actuator.calls().last(), Some(&(27, OutputLevel::Low)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ignores_other_codes() {
        let (mut ctrl, actuator, _) = controller();
        assert_eq!(ctrl.handle(&scan("readerA", "CODE1")).await, Outcome::IgnoredWhileIdle);
        assert_eq!(ctrl.state(), ExperimentState::Idle);
        assert!(ctrl.records().is_empty());
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activation_lights_reader() {
        let (mut ctrl, actuator, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        actuator.clear();

        let outcome = ctrl.handle(&scan("readerA", "CODE1")).await;
        assert_eq!(outcome, Outcome::Recorded { reader: 0, is_activation: true });
        assert_eq!(actuator.calls(), [(17, OutputLevel::High)]);

        tokio::time::sleep(Duration::from_millis(1001)).await;
        assert_eq!(actuator.calls(), [(17, OutputLevel::High), (17, OutputLevel::Low)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_matching_code_recorded_without_light() {
        let (mut ctrl, actuator, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        actuator.clear();

        // CODE3 activates reader B, not reader A
        let outcome = ctrl.handle(&scan("readerA", "CODE3")).await;
        assert_eq!(outcome, Outcome::Recorded { reader: 0, is_activation: false });
        assert_eq!(ctrl.state(), ExperimentState::Running);
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_reader_is_skipped() {
        let (mut ctrl, actuator, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        actuator.clear();

        assert_eq!(ctrl.handle(&scan("readerZ", "CODE1")).await, Outcome::UnknownReader);
        assert_eq!(ctrl.records().len(), 1);
        assert!(actuator.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_exports_and_returns_idle() {
        let (mut ctrl, actuator, exporter) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        ctrl.handle(&scan("readerA", "CODE1")).await;
        ctrl.handle(&scan("readerB", "CODE2")).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        actuator.clear();

        assert_eq!(ctrl.handle(&scan("readerB", "STOP1")).await, Outcome::Stopped);
        assert_eq!(ctrl.state(), ExperimentState::Idle);

        let exports = exporter.exports.lock().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(
            summary(&exports[0]),
            [
                (None, START_MARKER, false),
                (Some(0), "CODE1", true),
                (Some(1), "CODE2", false),
                (None, END_MARKER, false),
            ]
        );

        let highs = actuator.calls().iter().filter(|(_, l)| *l == OutputLevel::High).count();
        assert_eq!(highs, 4 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_idle_exports_end_marker() {
        let (mut ctrl, actuator, exporter) = controller();

        assert_eq!(ctrl.handle(&scan("readerA", "STOP1")).await, Outcome::Stopped);
        assert_eq!(ctrl.state(), ExperimentState::Idle);

        let exports = exporter.exports.lock().unwrap();
        assert_eq!(exports.len(), 1);
        assert_eq!(summary(&exports[0]), [(None, END_MARKER, false)]);

        let highs = actuator.calls().iter().filter(|(_, l)| *l == OutputLevel::High).count();
        assert_eq!(highs, 4 * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_all_low_turns_off_lit_reader() {
        let (mut ctrl, actuator, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        ctrl.handle(&scan("readerA", "CODE1")).await;
        actuator.clear();

        // Off timer for reader A is still pending
        ctrl.set_all(OutputLevel::Low);
        assert_eq!(actuator.calls(), [(17, OutputLevel::Low), (27, OutputLevel::Low)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_log() {
        let (mut ctrl, _, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        ctrl.handle(&scan("readerA", "CODE1")).await;
        ctrl.handle(&scan("readerA", "START1")).await;

        assert_eq!(ctrl.state(), ExperimentState::Running);
        assert_eq!(summary(ctrl.records()), [(None, START_MARKER, false)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_wins_over_activation() {
        let mut s = settings();
        s.condition = Condition::new(vec![["START1".to_string()].into_iter().collect()]);
        let actuator = Arc::new(RecordingActuator::default());
        let mut ctrl = ExperimentController::new(s, actuator, Box::new(MemoryExporter::default()));

        ctrl.handle(&scan("readerA", "START1")).await;
        assert_eq!(ctrl.handle(&scan("readerA", "START1")).await, Outcome::Started);
        assert_eq!(ctrl.records().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_lights_turn_off_early() {
        let (mut ctrl, actuator, _) = controller();
        ctrl.handle(&scan("readerA", "START1")).await;
        actuator.clear();

        ctrl.handle(&scan("readerA", "CODE1")).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        ctrl.handle(&scan("readerA", "CODE1")).await;

        // First timer fires 400ms after the second scan and turns the light off
        tokio::time::sleep(Duration::from_millis(401)).await;
        assert_eq!(
            actuator.calls(),
            [(17, OutputLevel::High), (17, OutputLevel::High), (17, OutputLevel::Low)]
        );

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(actuator.calls().len(), 4);
    }
}
