//! rfidlab - RFID reader experiment controller
//!
//! Listens to several keyboard-emulating RFID readers at once, rebuilds
//! each reader's scanned codes from keystrokes, and runs a start/stop lab
//! experiment over them with LED feedback and CSV export.
//!
//! Flow: readers -> [`multiplexer`] (with [`scancode`]) -> [`pipeline`]
//! ([`debounce`] then [`experiment`]) -> [`output`] and [`export`].

pub mod config;
pub mod debounce;
pub mod experiment;
pub mod export;
pub mod input;
pub mod multiplexer;
pub mod output;
pub mod pipeline;
pub mod scancode;

pub use config::Config;
pub use experiment::{ExperimentController, ExperimentSettings, ExperimentState, ScanRecord};
pub use multiplexer::{DeviceMultiplexer, ScanEvent, ScanHandler};
pub use pipeline::ScanPipeline;
