// src/types.rs
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::RunSettings;
use crate::store::{Sample, StoreView};

// Connection mode
#[derive(PartialEq, Clone, Copy, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    #[default]
    Simulation,
    Hardware,
}

#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum RunPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Paused => "paused",
            RunPhase::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

// Operator -> engine. Field edits go through `OperatorEntries` instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorCommand {
    Start,
    Pause,
    Resume,
    TogglePause,
    Stop,
    Shutdown,
}

// Engine -> operator
#[derive(Clone, Debug)]
pub enum StationMessage {
    Log(String),
    Phase(RunPhase),
    Probe(ProbeReading),
    RunStarted {
        store: StoreView,
        data_file: PathBuf,
        info_file: PathBuf,
    },
    Settings(RunSettings),
    Reading(Sample),
    Saved { rows: usize, total: usize },
}

/// Raw instrument values seen while waiting for a run to start.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeReading {
    pub status_volts: f64,
    pub displacement_volts: f64,
    pub thermocouple_millivolts: f64,
}

/// A sampling period that took effect at `elapsed` seconds into the run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeriodLogEntry {
    pub period: f64,
    pub elapsed: f32,
}
