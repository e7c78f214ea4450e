// src/config.rs
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::ConnectionMode;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SerialEndpoint {
    pub port: String,
    pub baud_rate: u32,
}

impl SerialEndpoint {
    fn new(port: &str) -> Self {
        Self {
            port: port.to_owned(),
            baud_rate: 9600,
        }
    }
}

impl Default for SerialEndpoint {
    fn default() -> Self {
        Self::new("")
    }
}

/// Request strings understood by the DAQ and the voltmeter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    /// DAQ input carrying the machine's ready / end-of-test signal.
    pub status: String,
    /// DAQ input wired to the LVDT.
    pub displacement: String,
    /// Voltmeter request returning the thermocouple voltage in volts.
    pub thermocouple: String,
    /// Written to the DAQ before the ready check (1 mA current output).
    pub excitation_command: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            status: "AI0".to_owned(),
            displacement: "AI2".to_owned(),
            thermocouple: "?".to_owned(),
            excitation_command: "VC3".to_owned(),
        }
    }
}

/// Station-wide settings, fixed for the lifetime of the process.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StationConfig {
    pub mode: ConnectionMode,
    pub daq: SerialEndpoint,
    pub voltmeter: SerialEndpoint,
    pub channels: ChannelConfig,
    pub query_timeout_ms: u64,
    pub check_interval_secs: f64,
    pub min_save_interval_secs: f64,
    pub ready_threshold: f64,
    pub idle_probe_interval_secs: f64,
    pub poll_interval_ms: u64,
    pub initial_capacity: usize,
    pub output_dir: PathBuf,
    /// Simulation only: seconds after which the simulated machine signals end of test.
    pub simulation_run_secs: Option<f64>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Simulation,
            daq: SerialEndpoint::new("/dev/ttyUSB0"),
            voltmeter: SerialEndpoint::new("/dev/ttyUSB1"),
            channels: ChannelConfig::default(),
            query_timeout_ms: 2000,
            check_interval_secs: 3.0,
            min_save_interval_secs: 5.0,
            ready_threshold: 0.001,
            idle_probe_interval_secs: 3.0,
            poll_interval_ms: 10,
            initial_capacity: 100,
            output_dir: PathBuf::from("."),
            simulation_run_secs: None,
        }
    }
}

impl StationConfig {
    /// Reads a JSON config file; missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: StationConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.query_timeout_ms > 0, "query_timeout_ms must be > 0");
        ensure!(self.check_interval_secs > 0.0, "check_interval_secs must be > 0");
        ensure!(self.min_save_interval_secs > 0.0, "min_save_interval_secs must be > 0");
        ensure!(self.idle_probe_interval_secs > 0.0, "idle_probe_interval_secs must be > 0");
        ensure!(self.ready_threshold >= 0.0, "ready_threshold must be >= 0");
        ensure!(self.initial_capacity >= 1, "initial_capacity must be >= 1");
        if let Some(secs) = self.simulation_run_secs {
            ensure!(secs.is_finite() && secs > 0.0, "simulation_run_secs must be > 0");
        }
        if self.mode == ConnectionMode::Hardware {
            ensure!(!self.daq.port.is_empty(), "hardware mode needs daq.port");
            ensure!(!self.voltmeter.port.is_empty(), "hardware mode needs voltmeter.port");
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryField {
    Name,
    Material,
    Period,
    GaugeLength,
    Notes,
    WindowStart,
    BinSize,
}

/// Text typed by the operator, as typed.
///
/// Every field is locked on its own and the last write wins. Nothing here is trusted:
/// the engine parses and validates on its own schedule and keeps the effective values in
/// [`RunSettings`].
#[derive(Debug)]
pub struct OperatorEntries {
    name: Mutex<String>,
    material: Mutex<String>,
    period: Mutex<String>,
    gauge_length: Mutex<String>,
    notes: Mutex<String>,
    window_start: Mutex<String>,
    bin_size: Mutex<String>,
}

impl Default for OperatorEntries {
    fn default() -> Self {
        Self {
            name: Mutex::default(),
            material: Mutex::default(),
            period: Mutex::default(),
            gauge_length: Mutex::new("1.4".to_owned()),
            notes: Mutex::default(),
            window_start: Mutex::new("0".to_owned()),
            bin_size: Mutex::new("1".to_owned()),
        }
    }
}

impl OperatorEntries {
    fn slot(&self, field: EntryField) -> &Mutex<String> {
        match field {
            EntryField::Name => &self.name,
            EntryField::Material => &self.material,
            EntryField::Period => &self.period,
            EntryField::GaugeLength => &self.gauge_length,
            EntryField::Notes => &self.notes,
            EntryField::WindowStart => &self.window_start,
            EntryField::BinSize => &self.bin_size,
        }
    }
    pub fn set(&self, field: EntryField, value: impl Into<String>) {
        let mut slot = self.slot(field).lock().unwrap_or_else(PoisonError::into_inner);
        *slot = value.into();
    }
    pub fn get(&self, field: EntryField) -> String {
        self.slot(field)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .trim()
            .to_owned()
    }
}

/// Effective, validated run settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunSettings {
    pub period: f64,
    pub gauge_length: f64,
    pub window_start: f32,
    pub bin_size: usize,
}

/// Identity of a run, written into the metadata file.
#[derive(Clone, Debug, PartialEq)]
pub struct TestInfo {
    pub name: String,
    pub material: String,
    pub gauge_length: f64,
    pub notes: String,
}

fn positive(text: &str) -> Option<f64> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v > 0.0)
}

pub fn parse_period(text: &str) -> Result<f64, ValidationError> {
    positive(text).ok_or_else(|| ValidationError::Period(text.to_owned()))
}

pub fn parse_gauge_length(text: &str) -> Result<f64, ValidationError> {
    positive(text).ok_or_else(|| ValidationError::GaugeLength(text.to_owned()))
}

pub fn parse_window_start(text: &str) -> Result<f32, ValidationError> {
    text.trim()
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| ValidationError::WindowStart(text.to_owned()))
}

pub fn parse_bin_size(text: &str) -> Result<usize, ValidationError> {
    text.trim()
        .parse::<usize>()
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| ValidationError::BinSize(text.to_owned()))
}
