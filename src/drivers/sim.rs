use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::ChannelConfig;
use crate::drivers::{Instrument, InstrumentError};

/// Ready level of the simulated status signal (volts).
const STATUS_READY_VOLTS: f64 = 5.0;

/// DAQ stand-in: a machine that is ready until `run_for` has passed, and an LVDT following a
/// primary + secondary creep curve with jitter.
pub struct SimulatedDaq {
    channels: ChannelConfig,
    started: Instant,
    run_for: Option<Duration>,
    rng: StdRng,
}

impl SimulatedDaq {
    pub fn new(channels: ChannelConfig, run_for: Option<Duration>) -> Self {
        Self {
            channels,
            started: Instant::now(),
            run_for,
            rng: StdRng::from_entropy(),
        }
    }
    fn displacement_volts(&mut self, t: f64) -> f64 {
        let primary = 0.8 * (1.0 - (-t / 120.0).exp());
        let secondary = 5e-4 * t;
        1.0 + primary + secondary + self.rng.gen_range(-2e-3..2e-3)
    }
}

impl Instrument for SimulatedDaq {
    fn name(&self) -> &str {
        "sim-daq"
    }
    fn write(&mut self, _command: &str) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn query(&mut self, request: &str) -> Result<f64, InstrumentError> {
        let elapsed = self.started.elapsed();
        if request == self.channels.status {
            let over = self.run_for.map_or(false, |limit| elapsed >= limit);
            let level = if over { 0.0 } else { STATUS_READY_VOLTS };
            Ok(level + self.rng.gen_range(-1e-4..1e-4))
        } else if request == self.channels.displacement {
            Ok(self.displacement_volts(elapsed.as_secs_f64()))
        } else {
            Err(InstrumentError::BadReply {
                instrument: self.name().to_owned(),
                request: request.to_owned(),
                reply: "unknown channel".to_owned(),
            })
        }
    }
}

/// Voltmeter stand-in: a thermocouple holding near 400 C.
pub struct SimulatedVoltmeter {
    started: Instant,
    rng: StdRng,
}

impl SimulatedVoltmeter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for SimulatedVoltmeter {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrument for SimulatedVoltmeter {
    fn name(&self) -> &str {
        "sim-voltmeter"
    }
    fn write(&mut self, _command: &str) -> Result<(), InstrumentError> {
        Ok(())
    }
    fn query(&mut self, _request: &str) -> Result<f64, InstrumentError> {
        let t = self.started.elapsed().as_secs_f64();
        let drift = 2e-5 * (t / 30.0).sin();
        Ok(0.016_397 + drift + self.rng.gen_range(-1e-6..1e-6))
    }
}
