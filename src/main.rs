// src/main.rs
mod calibration;
mod config;
mod derive;
mod drivers;
mod engine;
mod error;
mod recorder;
mod store;
mod types;

use std::io::{self, BufRead};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};

use config::{EntryField, OperatorEntries, RunSettings, StationConfig};
use drivers::{Rig, SerialInstrument, SimulatedDaq, SimulatedVoltmeter, TimedInstrument};
use engine::{Station, SystemClock};
use recorder::CSV_HEADER;
use store::StoreView;
use types::{ConnectionMode, OperatorCommand, StationMessage};

const HELP: &str = "\
commands:
  name <text> | material <text> | period <s> | gauge <in> | notes <text>
  window <s> | bin <n>          display window start and bin size
  start | pause | resume | toggle | stop
  show                          print the display series
  tail <n>                      print the newest n raw samples
  stress <g> <m^2>              intended stress for an applied load and area
  quit";

/// What the console needs to render the current run.
#[derive(Default)]
struct DisplayState {
    store: Option<StoreView>,
    settings: Option<RunSettings>,
}

fn build_rig(config: &StationConfig) -> Result<Rig> {
    let timeout = Duration::from_millis(config.query_timeout_ms);
    let rig = match config.mode {
        ConnectionMode::Simulation => {
            log::info!("simulation mode");
            let run_for = config.simulation_run_secs.map(Duration::from_secs_f64);
            Rig::new(
                Box::new(TimedInstrument::spawn(
                    SimulatedDaq::new(config.channels.clone(), run_for),
                    timeout,
                )),
                Box::new(TimedInstrument::spawn(SimulatedVoltmeter::new(), timeout)),
                config.channels.clone(),
            )
        }
        ConnectionMode::Hardware => {
            let daq = SerialInstrument::open("daq", &config.daq, timeout)
                .context("failed to open the DAQ")?;
            let voltmeter = SerialInstrument::open("voltmeter", &config.voltmeter, timeout)
                .context("failed to open the voltmeter")?;
            Rig::new(
                Box::new(TimedInstrument::spawn(daq, timeout)),
                Box::new(TimedInstrument::spawn(voltmeter, timeout)),
                config.channels.clone(),
            )
        }
    };
    Ok(rig)
}

fn spawn_printer(
    rx: Receiver<StationMessage>,
    display: Arc<Mutex<DisplayState>>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for message in rx {
            match message {
                StationMessage::Log(text) => println!("{text}"),
                StationMessage::Phase(phase) => println!("[{phase}]"),
                StationMessage::Probe(p) => println!(
                    "status {:.4} V | displacement {:.4} V | thermocouple {:.4} mV",
                    p.status_volts, p.displacement_volts, p.thermocouple_millivolts
                ),
                StationMessage::RunStarted {
                    store,
                    data_file,
                    info_file,
                } => {
                    println!("recording to {} and {}", data_file.display(), info_file.display());
                    display.lock().unwrap_or_else(PoisonError::into_inner).store = Some(store);
                }
                StationMessage::Settings(settings) => {
                    display.lock().unwrap_or_else(PoisonError::into_inner).settings =
                        Some(settings);
                }
                StationMessage::Reading(s) => log::debug!(
                    "t={:.2}s eps={:.5} rate={:.3e} T={:.1}C",
                    s.elapsed_time,
                    s.true_strain,
                    s.strain_rate,
                    s.temperature
                ),
                StationMessage::Saved { rows, total } => {
                    log::debug!("saved {rows} rows ({total} on disk)")
                }
            }
        }
    })
}

fn show(display: &Mutex<DisplayState>) {
    let display = display.lock().unwrap_or_else(PoisonError::into_inner);
    let (Some(store), Some(settings)) = (&display.store, &display.settings) else {
        println!("no run yet");
        return;
    };
    let points = store.display_points(settings.window_start, settings.bin_size);
    println!(
        "{} points from {} samples, {} slots (window {}s, bin {})",
        points.len(),
        store.len(),
        store.capacity(),
        settings.window_start,
        settings.bin_size
    );
    println!("elapsed_s,true_strain,strain_rate,temperature_c");
    for p in points {
        println!(
            "{:.2},{:.6},{:.3e},{:.2}",
            p.elapsed_time, p.true_strain, p.strain_rate, p.temperature
        );
    }
}

fn tail(display: &Mutex<DisplayState>, n: &str) {
    let Ok(n) = n.trim().parse::<usize>() else {
        println!("tail needs a sample count");
        return;
    };
    let display = display.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(store) = &display.store else {
        println!("no run yet");
        return;
    };
    let last = match store.last_index() {
        Ok(last) => last,
        Err(e) => {
            println!("{e}");
            return;
        }
    };
    println!("{CSV_HEADER}");
    let samples = store.tail(n);
    let first = (last + 1).saturating_sub(samples.len());
    for (i, s) in samples.iter().enumerate() {
        println!(
            "#{} {},{},{},{},{},{},{}",
            first + i,
            s.epoch_time,
            s.elapsed_time,
            s.displacement,
            s.engineering_strain,
            s.true_strain,
            s.strain_rate,
            s.temperature
        );
    }
}

fn stress(args: &str) {
    let mut values = args.split_whitespace().map(str::parse::<f64>);
    match (values.next(), values.next()) {
        (Some(Ok(grams)), Some(Ok(area))) if grams >= 0.0 && area > 0.0 => println!(
            "intended stress {:.2} MPa",
            calibration::intended_stress_mpa(grams, area)
        ),
        _ => println!("stress needs an applied load in grams and an area in m^2 > 0"),
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => StationConfig::load(Path::new(&path))?,
        None => StationConfig::default(),
    };
    let rig = build_rig(&config)?;

    let entries = Arc::new(OperatorEntries::default());
    let (tx, rx) = mpsc::channel();
    let (tx_cmd, rx_cmd) = mpsc::channel();
    let display = Arc::new(Mutex::new(DisplayState::default()));

    let station = Station::new(config, rig, SystemClock::new(), entries.clone(), tx);
    let engine = engine::spawn_thread(station, rx_cmd);
    let printer = spawn_printer(rx, display.clone());

    println!("{HELP}");
    for line in io::stdin().lock().lines() {
        let line = line.context("failed to read stdin")?;
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
        let field = match word {
            "name" => Some(EntryField::Name),
            "material" => Some(EntryField::Material),
            "period" => Some(EntryField::Period),
            "gauge" => Some(EntryField::GaugeLength),
            "notes" => Some(EntryField::Notes),
            "window" => Some(EntryField::WindowStart),
            "bin" => Some(EntryField::BinSize),
            _ => None,
        };
        if let Some(field) = field {
            entries.set(field, rest);
            continue;
        }
        let command = match word {
            "start" => OperatorCommand::Start,
            "pause" => OperatorCommand::Pause,
            "resume" => OperatorCommand::Resume,
            "toggle" => OperatorCommand::TogglePause,
            "stop" => OperatorCommand::Stop,
            "quit" | "exit" => break,
            "show" => {
                show(&display);
                continue;
            }
            "tail" => {
                tail(&display, rest);
                continue;
            }
            "stress" => {
                stress(rest);
                continue;
            }
            "" => continue,
            _ => {
                println!("{HELP}");
                continue;
            }
        };
        if tx_cmd.send(command).is_err() {
            log::error!("station engine has exited");
            break;
        }
    }

    let _ = tx_cmd.send(OperatorCommand::Shutdown);
    drop(tx_cmd);
    if engine.join().is_err() {
        log::error!("station engine panicked");
    }
    let _ = printer.join();
    Ok(())
}
