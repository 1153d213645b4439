//! Experiment configuration
//!
//! Loaded once from TOML at startup, validated, then shared read-only.
//! Any problem here is fatal: the experiment never starts on a bad config.

use crate::output::OutputId;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Activation codes of one condition, indexed by reader
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Condition {
    readers: Vec<BTreeSet<String>>,
}

impl Condition {
    pub fn new(readers: Vec<BTreeSet<String>>) -> Self {
        Self { readers }
    }

    /// Whether `code` activates reader `reader`. Readers without an entry
    /// have no activation codes.
    pub fn is_activation(&self, reader: usize, code: &str) -> bool {
        self.readers
            .get(reader)
            .map(|codes| codes.contains(code))
            .unwrap_or(false)
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }
}

/// Experiment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Identical (reader, code) scans closer than this are dropped
    pub debounce_seconds: f64,

    /// Sentinel code that starts a run
    pub start_code: String,

    /// Sentinel code that ends a run and exports it
    pub stop_code: String,

    /// Key into `conditions`
    pub condition_to_run: String,

    pub conditions: BTreeMap<String, Condition>,

    /// Reader port paths; position = reader index
    pub readers_addresses: Vec<String>,

    /// Indicator output per reader, aligned with `readers_addresses`
    pub readers_leds_addresses: Vec<OutputId>,

    /// How long a reader's indicator stays lit after an activation
    pub light_on_seconds: f64,

    #[serde(default)]
    pub debug: bool,

    /// Device name the readers report
    #[serde(default = "default_reader_device_name")]
    pub reader_device_name: String,

    /// Where exported scan files go
    #[serde(default = "default_export_directory")]
    pub export_directory: PathBuf,

    #[serde(default = "default_flash_ms")]
    pub flash_on_ms: u64,

    #[serde(default = "default_flash_ms")]
    pub flash_off_ms: u64,
}

fn default_reader_device_name() -> String {
    "HXGCoLtd".to_string()
}

fn default_export_directory() -> PathBuf {
    PathBuf::from("scans")
}

fn default_flash_ms() -> u64 {
    150
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be a positive number of seconds, got {value}")]
    InvalidDuration { field: &'static str, value: f64 },

    #[error("{0} must not be empty")]
    EmptyCode(&'static str),

    #[error("start_code and stop_code are both '{0}'")]
    SameSentinels(String),

    #[error("condition_to_run '{0}' is not defined in conditions")]
    UnknownCondition(String),

    #[error("{leds} LED outputs configured for {readers} readers")]
    LedCountMismatch { readers: usize, leds: usize },

    #[error("condition '{condition}' lists {listed} readers but only {readers} are configured")]
    TooManyConditionReaders {
        condition: String,
        listed: usize,
        readers: usize,
    },
}

fn positive_duration(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::InvalidDuration { field, value }),
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/rfidlab/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not find config directory")?
            .join("rfidlab");
        Ok(config_dir.join("config.toml"))
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config file {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive_duration("debounce_seconds", self.debounce_seconds)?;
        positive_duration("light_on_seconds", self.light_on_seconds)?;

        if self.start_code.is_empty() {
            return Err(ConfigError::EmptyCode("start_code"));
        }
        if self.stop_code.is_empty() {
            return Err(ConfigError::EmptyCode("stop_code"));
        }
        if self.start_code == self.stop_code {
            return Err(ConfigError::SameSentinels(self.start_code.clone()));
        }

        if !self.conditions.contains_key(&self.condition_to_run) {
            return Err(ConfigError::UnknownCondition(self.condition_to_run.clone()));
        }

        let readers = self.readers_addresses.len();
        if self.readers_leds_addresses.len() != readers {
            return Err(ConfigError::LedCountMismatch {
                readers,
                leds: self.readers_leds_addresses.len(),
            });
        }

        for (name, condition) in &self.conditions {
            if condition.reader_count() > readers {
                return Err(ConfigError::TooManyConditionReaders {
                    condition: name.clone(),
                    listed: condition.reader_count(),
                    readers,
                });
            }
        }

        Ok(())
    }

    pub fn debounce_window(&self) -> Result<Duration, ConfigError> {
        positive_duration("debounce_seconds", self.debounce_seconds)
    }

    pub fn light_duration(&self) -> Result<Duration, ConfigError> {
        positive_duration("light_on_seconds", self.light_on_seconds)
    }

    pub fn flash_on(&self) -> Duration {
        Duration::from_millis(self.flash_on_ms)
    }

    pub fn flash_off(&self) -> Duration {
        Duration::from_millis(self.flash_off_ms)
    }

    pub fn active_condition(&self) -> Result<&Condition, ConfigError> {
        self.conditions
            .get(&self.condition_to_run)
            .ok_or_else(|| ConfigError::UnknownCondition(self.condition_to_run.clone()))
    }
}
