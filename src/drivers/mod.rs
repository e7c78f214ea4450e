// src/drivers/mod.rs
pub mod error;
pub mod instrument;
#[cfg(test)]
pub mod scripted;
pub mod serial;
pub mod sim;
pub mod timeout;
pub use error::InstrumentError;
pub use instrument::{Instrument, Rig};
#[cfg(test)]
pub use scripted::ScriptedInstrument;
pub use serial::SerialInstrument;
pub use sim::{SimulatedDaq, SimulatedVoltmeter};
pub use timeout::TimedInstrument;
