use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::config::TestInfo;
use crate::error::{FlushError, PersistenceError};
use crate::store::StoreView;
use crate::types::PeriodLogEntry;

pub const CSV_HEADER: &str = "Epoch Time (s),Elapsed Time (s),Displacement (in),Engineering Strain,True Strain,Strain Rate (1/s),Temperature (C)";

const SEPARATOR_WIDTH: usize = 50;

/// Writes a run to disk: an append-only CSV of samples and a small info file that is
/// rewritten on every flush.
pub struct DataRecorder {
    data_path: PathBuf,
    info_path: PathBuf,
    last_written_index: usize,
}

impl DataRecorder {
    pub fn new(output_dir: &Path, test_name: &str) -> Self {
        Self {
            data_path: output_dir.join(format!("{test_name}_data.csv")),
            info_path: output_dir.join(format!("{test_name}_info.csv")),
            last_written_index: 0,
        }
    }
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }
    pub fn info_path(&self) -> &Path {
        &self.info_path
    }
    /// Samples before this index are on disk.
    pub fn last_written_index(&self) -> usize {
        self.last_written_index
    }

    /// Appends unwritten samples and rewrites the info file.
    ///
    /// Both files are attempted on every call and every failure is returned. Returns the
    /// number of rows appended.
    pub fn flush(
        &mut self,
        store: &StoreView,
        info: &TestInfo,
        period_log: &[PeriodLogEntry],
    ) -> Result<usize, FlushError> {
        let rows = self.append_rows(store);
        let info = self.write_info(info, period_log);
        match (rows, info) {
            (Ok(rows), Ok(())) => Ok(rows),
            (rows, info) => Err(FlushError {
                failures: rows.err().into_iter().chain(info.err()).collect(),
            }),
        }
    }

    fn append_rows(&mut self, store: &StoreView) -> Result<usize, PersistenceError> {
        let from = self.last_written_index;
        let to = store.len();
        if from >= to {
            return Ok(0);
        }
        let fail = |source: io::Error| PersistenceError {
            path: self.data_path.clone(),
            source,
        };
        let samples = store
            .slice(from, to)
            .map_err(|e| fail(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.data_path)
            .map_err(fail)?;
        let start_len = file.metadata().map_err(fail)?.len();
        let mut text = String::with_capacity(samples.len() * 96);
        if start_len == 0 {
            text.push_str(CSV_HEADER);
            text.push('\n');
        }
        for s in &samples {
            // writing into a String cannot fail
            let _ = writeln!(
                text,
                "{},{},{},{},{},{},{}",
                s.epoch_time,
                s.elapsed_time,
                s.displacement,
                s.engineering_strain,
                s.true_strain,
                s.strain_rate,
                s.temperature
            );
        }
        if let Err(e) = write_durably(&mut file, text.as_bytes()) {
            // drop any partial rows so the retry does not duplicate them
            if let Err(trunc) = file.set_len(start_len) {
                log::error!(
                    "could not roll back partial write to {}: {trunc}",
                    self.data_path.display()
                );
            }
            return Err(fail(e));
        }
        self.last_written_index = to;
        Ok(samples.len())
    }

    fn write_info(
        &self,
        info: &TestInfo,
        period_log: &[PeriodLogEntry],
    ) -> Result<(), PersistenceError> {
        let text = render_info(info, period_log);
        let tmp = self.info_path.with_extension("csv.tmp");
        let fail = |source: io::Error| PersistenceError {
            path: self.info_path.clone(),
            source,
        };
        fs::write(&tmp, text).map_err(fail)?;
        fs::rename(&tmp, &self.info_path).map_err(fail)
    }
}

fn write_durably(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_data()
}

pub fn render_info(info: &TestInfo, period_log: &[PeriodLogEntry]) -> String {
    let rule = "=".repeat(SEPARATOR_WIDTH);
    let mut text = String::new();
    let _ = writeln!(text, "{rule}");
    let _ = writeln!(text, "Name: {}", info.name);
    let _ = writeln!(text, "Material: {}", info.material);
    let _ = writeln!(text, "Gauge Length (in): {}", info.gauge_length);
    let _ = writeln!(text, "Notes: {}", info.notes);
    for entry in period_log {
        let _ = writeln!(text, "Period Log: {} at {}", entry.period, entry.elapsed);
    }
    let _ = writeln!(text, "{rule}");
    text
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{Sample, SampleStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fresh directory under the system temp dir.
    pub(crate) fn scratch_dir(tag: &str) -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "creep-station-{tag}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
    fn info() -> TestInfo {
        TestInfo {
            name: "specimen7".into(),
            material: "Sn-Pb".into(),
            gauge_length: 1.4,
            notes: "first try".into(),
        }
    }
    fn push(view: &StoreView, n: usize) {
        let mut store = view.writer().unwrap();
        for _ in 0..n {
            let i = store.len() as f32;
            store
                .append(Sample {
                    epoch_time: 1_700_000_000.0 + f64::from(i),
                    elapsed_time: i,
                    displacement: 0.6,
                    engineering_strain: 0.01 * i,
                    true_strain: 0.01 * i,
                    strain_rate: 0.01,
                    temperature: 400.0,
                })
                .unwrap();
        }
    }
    fn data_lines(recorder: &DataRecorder) -> Vec<String> {
        fs::read_to_string(recorder.data_path())
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }
    #[test]
    fn header_once_and_only_new_rows() {
        let dir = scratch_dir("rows");
        let view = StoreView::new(SampleStore::with_capacity(2).unwrap());
        let mut recorder = DataRecorder::new(&dir, "specimen7");
        let log = [PeriodLogEntry { period: 1.0, elapsed: 0.0 }];
        push(&view, 3);
        assert_eq!(recorder.flush(&view, &info(), &log).unwrap(), 3);
        push(&view, 2);
        assert_eq!(recorder.flush(&view, &info(), &log).unwrap(), 2);
        let lines = data_lines(&recorder);
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "1700000000,0,0.6,0,0,0.01,400");
        assert!(lines[5].starts_with("1700000004,4,"));
        assert_eq!(recorder.last_written_index(), 5);
    }
    #[test]
    fn second_flush_without_new_samples_is_idempotent() {
        let dir = scratch_dir("idem");
        let view = StoreView::new(SampleStore::with_capacity(4).unwrap());
        let mut recorder = DataRecorder::new(&dir, "specimen7");
        push(&view, 4);
        recorder.flush(&view, &info(), &[]).unwrap();
        let before = data_lines(&recorder);
        assert_eq!(recorder.flush(&view, &info(), &[]).unwrap(), 0);
        assert_eq!(data_lines(&recorder), before);
        assert_eq!(recorder.last_written_index(), 4);
    }
    #[test]
    fn failed_write_keeps_cursor_and_retries_everything() {
        let dir = scratch_dir("fail").join("missing");
        let view = StoreView::new(SampleStore::with_capacity(4).unwrap());
        let mut recorder = DataRecorder::new(&dir, "specimen7");
        push(&view, 3);
        let err = recorder.flush(&view, &info(), &[]).unwrap_err();
        assert_eq!(err.failures[0].path, recorder.data_path());
        assert_eq!(recorder.last_written_index(), 0);
        fs::create_dir_all(&dir).unwrap();
        push(&view, 1);
        assert_eq!(recorder.flush(&view, &info(), &[]).unwrap(), 4);
        assert_eq!(data_lines(&recorder).len(), 5);
    }
    #[test]
    fn info_file_is_rewritten_with_period_history() {
        let dir = scratch_dir("info");
        let view = StoreView::new(SampleStore::with_capacity(4).unwrap());
        let mut recorder = DataRecorder::new(&dir, "specimen7");
        let mut log = vec![PeriodLogEntry { period: 1.0, elapsed: 0.0 }];
        recorder.flush(&view, &info(), &log).unwrap();
        log.push(PeriodLogEntry { period: 2.5, elapsed: 12.5 });
        let mut edited = info();
        edited.notes = "furnace door opened".into();
        recorder.flush(&view, &edited, &log).unwrap();
        let text = fs::read_to_string(recorder.info_path()).unwrap();
        let rule = "=".repeat(50);
        let expected = format!(
            "{rule}\nName: specimen7\nMaterial: Sn-Pb\nGauge Length (in): 1.4\nNotes: furnace door opened\nPeriod Log: 1 at 0\nPeriod Log: 2.5 at 12.5\n{rule}\n"
        );
        assert_eq!(text, expected);
        assert!(!recorder.data_path().exists());
    }
    #[test]
    fn both_file_failures_are_reported() {
        let dir = scratch_dir("both");
        let view = StoreView::new(SampleStore::with_capacity(4).unwrap());
        let mut recorder = DataRecorder::new(&dir, "specimen7");
        // directories squatting on both targets make each write fail on its own
        fs::create_dir_all(recorder.data_path()).unwrap();
        fs::create_dir_all(recorder.info_path().with_extension("csv.tmp")).unwrap();
        push(&view, 2);
        let err = recorder.flush(&view, &info(), &[]).unwrap_err();
        let paths: Vec<&Path> = err.failures.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(paths, vec![recorder.data_path(), recorder.info_path()]);
        let text = err.to_string();
        assert!(text.contains("specimen7_data.csv"));
        assert!(text.contains("specimen7_info.csv"));
        assert_eq!(recorder.last_written_index(), 0);
    }
}
