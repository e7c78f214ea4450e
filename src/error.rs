// src/error.rs
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::drivers::InstrumentError;

/// Bad operator input. The operation is skipped and state is left alone.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("test name must not be empty")]
    EmptyName,
    #[error("test name `{0}` cannot be used as a file name")]
    UnsafeName(String),
    #[error("material must not be empty")]
    EmptyMaterial,
    #[error("period must be a number greater than zero, got `{0}`")]
    Period(String),
    #[error("gauge length must be a number greater than zero, got `{0}`")]
    GaugeLength(String),
    #[error("display window start must be a number of seconds >= 0, got `{0}`")]
    WindowStart(String),
    #[error("bin size must be a whole number >= 1, got `{0}`")]
    BinSize(String),
    #[error("machine not ready (status signal {status:.4} V), please prepare machine for test")]
    NotReady { status: f64 },
    #[error("`{action}` is not allowed while {phase}")]
    WrongPhase { action: &'static str, phase: String },
}

#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct PersistenceError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Every file a flush failed to write, in the order they were attempted.
#[derive(Debug, Error)]
pub struct FlushError {
    pub failures: Vec<PersistenceError>,
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum DomainError {
    #[error("true strain undefined: 1 + strain = {0} is not positive")]
    NonPositiveLog(f64),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("no samples recorded yet")]
    NotStarted,
    #[error("range {from}..{to} is outside the {count} stored samples")]
    OutOfRange { from: usize, to: usize, count: usize },
    #[error("could not grow sample storage to {requested} samples")]
    Allocation { requested: usize },
}

#[derive(Debug, Error)]
pub enum StationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
    #[error(transparent)]
    Persistence(#[from] FlushError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

impl From<StoreError> for StationError {
    fn from(value: StoreError) -> Self {
        // every store failure that reaches the loop breaks an invariant of the run
        StationError::Fatal(value.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for StationError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StationError::Fatal("shared run state lock poisoned".to_owned())
    }
}
