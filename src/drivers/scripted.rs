use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::drivers::{Instrument, InstrumentError};

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<Option<f64>>>,
    held: HashMap<String, f64>,
    writes: Vec<String>,
    delay: Option<Duration>,
    fail_close: bool,
    closed: bool,
}

/// In-memory instrument for tests and deterministic playback.
///
/// Clones share one script, so a test can keep a handle after boxing the instrument into a
/// [`crate::drivers::Rig`].
#[derive(Clone)]
pub struct ScriptedInstrument {
    name: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedInstrument {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            script: Arc::default(),
        }
    }
    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
    /// Value returned for `request` whenever nothing is queued.
    pub fn hold(&self, request: &str, value: f64) {
        self.script().held.insert(request.to_owned(), value);
    }
    /// Replies for `request`, consumed in order before the held value.
    pub fn push(&self, request: &str, values: impl IntoIterator<Item = f64>) {
        self.script()
            .queued
            .entry(request.to_owned())
            .or_default()
            .extend(values.into_iter().map(Some));
    }
    /// Makes the next `request` fail with an I/O error.
    pub fn fail_next(&self, request: &str) {
        self.script()
            .queued
            .entry(request.to_owned())
            .or_default()
            .push_back(None);
    }
    pub fn fail_close(&self) {
        self.script().fail_close = true;
    }
    /// Blocks every call for `delay` (for exercising timeouts).
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }
    pub fn writes(&self) -> Vec<String> {
        self.script().writes.clone()
    }
    pub fn is_closed(&self) -> bool {
        self.script().closed
    }
    fn pause(&self) {
        let delay = self.script().delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }
    fn io_failure(&self, what: &str) -> InstrumentError {
        InstrumentError::Io {
            instrument: self.name.clone(),
            source: io::Error::new(io::ErrorKind::Other, format!("scripted failure: {what}")),
        }
    }
}

impl Instrument for ScriptedInstrument {
    fn name(&self) -> &str {
        &self.name
    }
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        self.pause();
        let mut script = self.script();
        if script.closed {
            return Err(InstrumentError::Closed {
                instrument: self.name.clone(),
            });
        }
        script.writes.push(command.to_owned());
        Ok(())
    }
    fn query(&mut self, request: &str) -> Result<f64, InstrumentError> {
        self.pause();
        let mut script = self.script();
        if script.closed {
            return Err(InstrumentError::Closed {
                instrument: self.name.clone(),
            });
        }
        let queued = script.queued.get_mut(request).and_then(VecDeque::pop_front);
        match queued {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(self.io_failure(request)),
            None => script
                .held
                .get(request)
                .copied()
                .ok_or_else(|| InstrumentError::BadReply {
                    instrument: self.name.clone(),
                    request: request.to_owned(),
                    reply: String::new(),
                }),
        }
    }
    fn close(&mut self) -> Result<(), InstrumentError> {
        let mut script = self.script();
        script.closed = true;
        if script.fail_close {
            return Err(self.io_failure("close"));
        }
        Ok(())
    }
}
