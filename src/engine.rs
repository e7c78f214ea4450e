// src/engine.rs
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{error, info, warn};

use crate::calibration::{
    displacement_from_voltage, engineering_strain, temperature_from_millivolts, true_strain,
};
use crate::config::{
    parse_bin_size, parse_gauge_length, parse_period, parse_window_start, EntryField,
    OperatorEntries, RunSettings, StationConfig, TestInfo,
};
use crate::derive::{strain_rate, STRAIN_RATE_WINDOW};
use crate::drivers::{InstrumentError, Rig};
use crate::error::{StationError, ValidationError};
use crate::recorder::DataRecorder;
use crate::store::{Sample, SampleStore, StoreView};
use crate::types::*;

/// Wall-clock source, in seconds since the Unix epoch.
pub trait Clock: Send {
    fn now(&self) -> f64;
}

/// Epoch time anchored once at construction and advanced by a monotonic clock, so elapsed
/// times never run backwards when the system clock is adjusted.
pub struct SystemClock {
    origin_epoch: f64,
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let origin_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self {
            origin_epoch,
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.origin_epoch + self.origin.elapsed().as_secs_f64()
    }
}

/// Sends operator-visible lines and mirrors them into the process log.
#[derive(Clone)]
pub struct OperatorLog {
    tx: Sender<StationMessage>,
}

impl OperatorLog {
    pub fn new(tx: Sender<StationMessage>) -> Self {
        Self { tx }
    }
    pub fn send(&self, message: StationMessage) {
        // a closed console is not an error for a headless run
        let _ = self.tx.send(message);
    }
    pub fn info(&self, text: impl Into<String>) {
        let text = text.into();
        info!("{text}");
        self.send(StationMessage::Log(text));
    }
    pub fn warn(&self, text: impl Into<String>) {
        let text = text.into();
        warn!("{text}");
        self.send(StationMessage::Log(text));
    }
    pub fn error(&self, text: impl Into<String>) {
        let text = text.into();
        error!("{text}");
        self.send(StationMessage::Log(text));
    }
}

/// Everything that belongs to one run. Owned by the acquisition loop; other threads only
/// see the store through [`StoreView`] and the rest through messages.
pub struct RunState {
    info: TestInfo,
    settings: RunSettings,
    start_time: f64,
    first_strain_offset: f64,
    store: StoreView,
    recorder: DataRecorder,
    period_log: Vec<PeriodLogEntry>,
    last_read: f64,
    last_check: f64,
    last_save: f64,
}

#[cfg(test)]
impl RunState {
    pub fn settings(&self) -> RunSettings {
        self.settings
    }
    pub fn store(&self) -> &StoreView {
        &self.store
    }
    pub fn period_log(&self) -> &[PeriodLogEntry] {
        &self.period_log
    }
    pub fn last_written_index(&self) -> usize {
        self.recorder.last_written_index()
    }
}

impl RunState {
    /// Takes one reading. Instrument and numeric problems are reported and absorbed; only a
    /// broken store comes back as an error.
    fn acquire(&mut self, now: f64, rig: &mut Rig, log: &OperatorLog) -> Result<(), StationError> {
        let (volts, millivolts) = match read_instruments(rig) {
            Ok(pair) => pair,
            Err(e) => {
                log.warn(format!("reading skipped: {e}"));
                return Ok(());
            }
        };
        let displacement = displacement_from_voltage(volts);
        let strain = engineering_strain(
            displacement,
            self.settings.gauge_length,
            self.first_strain_offset,
        );
        let true_strain = match true_strain(strain) {
            Ok(value) => value as f32,
            Err(e) => {
                log.warn(format!("{}; sample recorded as NaN", StationError::from(e)));
                f32::NAN
            }
        };
        let elapsed = (now - self.start_time) as f32;
        let temperature = temperature_from_millivolts(millivolts) as f32;
        let sample = {
            let mut store = self.store.writer()?;
            let rate = strain_rate(store.tail(STRAIN_RATE_WINDOW - 1), elapsed, true_strain);
            let sample = Sample {
                epoch_time: now,
                elapsed_time: elapsed,
                displacement: displacement as f32,
                engineering_strain: strain as f32,
                true_strain,
                strain_rate: rate,
                temperature,
            };
            store.append(sample)?;
            sample
        };
        log.send(StationMessage::Reading(sample));
        Ok(())
    }

    /// Returns `true` when the status signal says the test is over.
    fn check(
        &mut self,
        rig: &mut Rig,
        entries: &OperatorEntries,
        threshold: f64,
        log: &OperatorLog,
    ) -> bool {
        match rig.status() {
            Ok(status) if status.abs() <= threshold => return true,
            Ok(_) => {}
            Err(e) => log.warn(format!("status check failed: {e}")),
        }
        self.apply_entries(entries, log);
        false
    }

    fn apply_entries(&mut self, entries: &OperatorEntries, log: &OperatorLog) {
        let mut changed = false;
        match parse_period(&entries.get(EntryField::Period)) {
            Ok(period) if period != self.settings.period => {
                self.settings.period = period;
                let elapsed = self.store.latest().map_or(0.0, |s| s.elapsed_time);
                self.period_log.push(PeriodLogEntry { period, elapsed });
                log.info(format!("Period changed to {period}s."));
                changed = true;
            }
            Ok(_) => {}
            Err(e) => log.warn(e.to_string()),
        }
        match parse_window_start(&entries.get(EntryField::WindowStart)) {
            Ok(start) if start != self.settings.window_start => {
                self.settings.window_start = start;
                changed = true;
            }
            Ok(_) => {}
            Err(e) => log.warn(e.to_string()),
        }
        match parse_bin_size(&entries.get(EntryField::BinSize)) {
            Ok(bin) if bin != self.settings.bin_size => {
                self.settings.bin_size = bin;
                changed = true;
            }
            Ok(_) => {}
            Err(e) => log.warn(e.to_string()),
        }
        if changed {
            log.send(StationMessage::Settings(self.settings));
        }
    }

    fn save(&mut self, entries: &OperatorEntries, log: &OperatorLog) {
        self.info.notes = entries.get(EntryField::Notes);
        match self.recorder.flush(&self.store, &self.info, &self.period_log) {
            Ok(rows) => log.send(StationMessage::Saved {
                rows,
                total: self.recorder.last_written_index(),
            }),
            Err(e) => log.error(format!("{}; will retry on next save", StationError::from(e))),
        }
        if let Some(s) = self.store.latest() {
            log.info(format!(
                "Elapsed Time (s): {:.2} | True Strain: {:.5} | True Strain Rate: {:.3e} | Temperature (C): {:.2}",
                s.elapsed_time, s.true_strain, s.strain_rate, s.temperature
            ));
        }
    }
}

fn read_instruments(rig: &mut Rig) -> Result<(f64, f64), InstrumentError> {
    Ok((rig.displacement_volts()?, rig.thermocouple_millivolts()?))
}

/// The acquisition loop and its state machine: Idle -> Running <-> Paused -> Stopped.
pub struct Station<C: Clock = SystemClock> {
    config: StationConfig,
    rig: Rig,
    clock: C,
    entries: Arc<OperatorEntries>,
    log: OperatorLog,
    phase: RunPhase,
    stop_requested: bool,
    run: Option<RunState>,
    last_probe: Option<f64>,
}

impl<C: Clock> Station<C> {
    pub fn new(
        config: StationConfig,
        rig: Rig,
        clock: C,
        entries: Arc<OperatorEntries>,
        tx: Sender<StationMessage>,
    ) -> Self {
        Self {
            config,
            rig,
            clock,
            entries,
            log: OperatorLog::new(tx),
            phase: RunPhase::Idle,
            stop_requested: false,
            run: None,
            last_probe: None,
        }
    }
    pub fn phase(&self) -> RunPhase {
        self.phase
    }
    #[cfg(test)]
    pub fn run_state(&self) -> Option<&RunState> {
        self.run.as_ref()
    }
    fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        self.log.send(StationMessage::Phase(phase));
    }
    fn wrong_phase(&self, action: &'static str) -> ValidationError {
        ValidationError::WrongPhase {
            action,
            phase: self.phase.to_string(),
        }
    }

    /// Reports raw instrument values every probe interval while waiting for a start.
    pub fn monitor_idle(&mut self) {
        if self.phase != RunPhase::Idle {
            return;
        }
        let now = self.clock.now();
        if let Some(last) = self.last_probe {
            if now - last < self.config.idle_probe_interval_secs {
                return;
            }
        }
        self.last_probe = Some(now);
        match self.rig.probe() {
            Ok(probe) => {
                info!(
                    "idle probe: status {:.4} V, displacement {:.4} V, thermocouple {:.4} mV",
                    probe.status_volts, probe.displacement_volts, probe.thermocouple_millivolts
                );
                self.log.send(StationMessage::Probe(probe));
            }
            Err(e) => self.log.warn(format!("idle probe failed: {e}")),
        }
    }

    /// Validates the operator entries and the machine's ready signal, then begins a run.
    ///
    /// On any unmet precondition nothing changes and the reason is returned.
    pub fn start(&mut self) -> Result<(), StationError> {
        if self.phase != RunPhase::Idle {
            return Err(self.wrong_phase("start").into());
        }
        let name = self.entries.get(EntryField::Name);
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ValidationError::UnsafeName(name).into());
        }
        let material = self.entries.get(EntryField::Material);
        if material.is_empty() {
            return Err(ValidationError::EmptyMaterial.into());
        }
        let period = parse_period(&self.entries.get(EntryField::Period))?;
        let gauge_length = parse_gauge_length(&self.entries.get(EntryField::GaugeLength))?;
        let window_start = parse_window_start(&self.entries.get(EntryField::WindowStart))?;
        let bin_size = parse_bin_size(&self.entries.get(EntryField::BinSize))?;

        self.rig.excite()?;
        let status = self.rig.status()?;
        if status.abs() <= self.config.ready_threshold {
            return Err(ValidationError::NotReady { status }.into());
        }
        let baseline_volts = self.rig.displacement_volts()?;
        let first_strain_offset =
            engineering_strain(displacement_from_voltage(baseline_volts), gauge_length, 0.0);
        info!("first strain offset: {first_strain_offset}");

        let store = StoreView::new(SampleStore::with_capacity(self.config.initial_capacity)?);
        let recorder = DataRecorder::new(&self.config.output_dir, &name);
        let settings = RunSettings {
            period,
            gauge_length,
            window_start,
            bin_size,
        };
        let now = self.clock.now();
        self.log.send(StationMessage::RunStarted {
            store: store.clone(),
            data_file: recorder.data_path().to_path_buf(),
            info_file: recorder.info_path().to_path_buf(),
        });
        self.log.send(StationMessage::Settings(settings));
        self.run = Some(RunState {
            info: TestInfo {
                name,
                material,
                gauge_length,
                notes: self.entries.get(EntryField::Notes),
            },
            settings,
            start_time: now,
            first_strain_offset,
            store,
            recorder,
            period_log: vec![PeriodLogEntry {
                period,
                elapsed: 0.0,
            }],
            // back-dated so the first reading is taken right away
            last_read: now - period,
            last_check: now,
            last_save: now,
        });
        self.stop_requested = false;
        self.set_phase(RunPhase::Running);
        self.log.info("Test started.");
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), ValidationError> {
        if self.phase != RunPhase::Running {
            return Err(self.wrong_phase("pause"));
        }
        self.set_phase(RunPhase::Paused);
        self.log.info("Test paused.");
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), ValidationError> {
        if self.phase != RunPhase::Paused {
            return Err(self.wrong_phase("resume"));
        }
        self.set_phase(RunPhase::Running);
        self.log.info("Test resumed.");
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<(), ValidationError> {
        match self.phase {
            RunPhase::Paused => self.resume(),
            _ => self.pause(),
        }
    }

    /// Asks the loop to stop; honoured at the top of the next [`Station::tick`].
    pub fn request_stop(&mut self) -> Result<(), ValidationError> {
        match self.phase {
            RunPhase::Running | RunPhase::Paused => {
                self.stop_requested = true;
                Ok(())
            }
            _ => Err(self.wrong_phase("stop")),
        }
    }

    /// One pass of the acquisition cycle: read, check, save.
    ///
    /// Errors returned from here are fatal to the run; everything else is reported and
    /// absorbed.
    pub fn tick(&mut self) -> Result<(), StationError> {
        if !matches!(self.phase, RunPhase::Running | RunPhase::Paused) {
            return Ok(());
        }
        if self.stop_requested {
            self.log.info("Test stopped.");
            self.finish();
            return Ok(());
        }
        let now = self.clock.now();
        let phase = self.phase;
        let run = self
            .run
            .as_mut()
            .ok_or_else(|| StationError::Fatal(format!("{phase} without run state")))?;

        if phase == RunPhase::Running && now - run.last_read >= run.settings.period {
            run.last_read = now;
            run.acquire(now, &mut self.rig, &self.log)?;
        }

        if now - run.last_check >= self.config.check_interval_secs {
            run.last_check = now;
            let end_of_test = run.check(
                &mut self.rig,
                &self.entries,
                self.config.ready_threshold,
                &self.log,
            );
            if end_of_test {
                self.log.info("Test over.");
                self.finish();
                return Ok(());
            }
        }

        let save_every = self.config.min_save_interval_secs.max(run.settings.period);
        if now - run.last_save >= save_every {
            run.last_save = now;
            run.save(&self.entries, &self.log);
        }
        Ok(())
    }

    /// Terminal cleanup shared by every way a run can end.
    fn finish(&mut self) {
        if let Some(run) = self.run.as_mut() {
            run.save(&self.entries, &self.log);
        }
        match self.rig.close() {
            Ok(()) => self.log.info("Instruments closed."),
            Err(e) => self.log.warn(format!("closing instruments: {e}")),
        }
        self.stop_requested = false;
        self.set_phase(RunPhase::Stopped);
    }

    pub fn abort(&mut self, err: StationError) {
        self.log.error(format!("run aborted: {err}"));
        if self.phase != RunPhase::Stopped {
            self.finish();
        }
    }

    pub fn shutdown(&mut self) {
        match self.phase {
            RunPhase::Running | RunPhase::Paused => {
                self.log.info("Test stopped.");
                self.finish();
            }
            RunPhase::Idle => {
                if let Err(e) = self.rig.close() {
                    self.log.warn(format!("closing instruments: {e}"));
                }
                self.set_phase(RunPhase::Stopped);
            }
            RunPhase::Stopped => {}
        }
    }

    pub fn handle(&mut self, command: OperatorCommand) {
        let outcome: Result<(), StationError> = match command {
            OperatorCommand::Start => self.start(),
            OperatorCommand::Pause => self.pause().map_err(Into::into),
            OperatorCommand::Resume => self.resume().map_err(Into::into),
            OperatorCommand::TogglePause => self.toggle_pause().map_err(Into::into),
            OperatorCommand::Stop => self.request_stop().map_err(Into::into),
            OperatorCommand::Shutdown => {
                self.shutdown();
                Ok(())
            }
        };
        match outcome {
            Ok(()) => {}
            Err(e) if e.is_fatal() => self.abort(e),
            Err(e) => self.log.warn(e.to_string()),
        }
    }
}

/// Runs `station` on a background thread until shutdown or until the command channel
/// closes.
pub fn spawn_thread<C: Clock + 'static>(
    mut station: Station<C>,
    rx_cmd: Receiver<OperatorCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        station.log.info("Station engine ready.");
        let poll = Duration::from_millis(station.config.poll_interval_ms);
        loop {
            for _ in 0..10 {
                match rx_cmd.try_recv() {
                    Ok(OperatorCommand::Shutdown) | Err(TryRecvError::Disconnected) => {
                        station.shutdown();
                        return;
                    }
                    Ok(command) => station.handle(command),
                    Err(TryRecvError::Empty) => break,
                }
            }
            match station.phase() {
                RunPhase::Idle => station.monitor_idle(),
                RunPhase::Running | RunPhase::Paused => {
                    if let Err(e) = station.tick() {
                        station.abort(e);
                    }
                }
                RunPhase::Stopped => {}
            }
            thread::sleep(poll);
        }
    })
}
