use log::debug;

use crate::config::ChannelConfig;
use crate::drivers::InstrumentError;
use crate::types::ProbeReading;

/// Request/response device on a bus or serial line.
///
/// Calls may block; wrap slow devices in [`crate::drivers::TimedInstrument`] to bound them.
pub trait Instrument: Send {
    fn name(&self) -> &str;
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;
    fn query(&mut self, request: &str) -> Result<f64, InstrumentError>;
    fn close(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

/// The two instruments of the creep frame: a DAQ (status + LVDT) and a voltmeter
/// (thermocouple).
pub struct Rig {
    daq: Box<dyn Instrument>,
    voltmeter: Box<dyn Instrument>,
    channels: ChannelConfig,
}

impl Rig {
    pub fn new(
        daq: Box<dyn Instrument>,
        voltmeter: Box<dyn Instrument>,
        channels: ChannelConfig,
    ) -> Self {
        Self {
            daq,
            voltmeter,
            channels,
        }
    }
    pub fn excite(&mut self) -> Result<(), InstrumentError> {
        self.daq.write(&self.channels.excitation_command)
    }
    pub fn status(&mut self) -> Result<f64, InstrumentError> {
        let volts = self.daq.query(&self.channels.status)?;
        debug!("status signal: {volts}");
        Ok(volts)
    }
    pub fn displacement_volts(&mut self) -> Result<f64, InstrumentError> {
        let volts = self.daq.query(&self.channels.displacement)?;
        debug!("displacement voltage: {volts}");
        Ok(volts)
    }
    /// The voltmeter reports volts; the thermocouple tables want millivolts.
    pub fn thermocouple_millivolts(&mut self) -> Result<f64, InstrumentError> {
        let millivolts = 1000.0 * self.voltmeter.query(&self.channels.thermocouple)?;
        debug!("thermocouple voltage: {millivolts} mV");
        Ok(millivolts)
    }
    pub fn probe(&mut self) -> Result<ProbeReading, InstrumentError> {
        Ok(ProbeReading {
            status_volts: self.status()?,
            displacement_volts: self.displacement_volts()?,
            thermocouple_millivolts: self.thermocouple_millivolts()?,
        })
    }
    /// Closes both instruments, attempting the second even if the first fails.
    pub fn close(&mut self) -> Result<(), InstrumentError> {
        let daq = self.daq.close();
        let voltmeter = self.voltmeter.close();
        daq.and(voltmeter)
    }
}
