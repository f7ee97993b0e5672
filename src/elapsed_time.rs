//! Wall-clock stage timing
//!
//! Every `log` call appends a `task,seconds,timestamp` row to the run
//! metadata CSV as it happens, so the file reflects completed stages even if
//! the run later aborts. Write failures are logged and otherwise ignored.

use chrono::Local;
use log::{info, warn};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const RUNTIME_FILE: &str = "metadata_runtime.csv";
pub const TOTAL_LABEL: &str = "total";

pub struct StageTimer {
    path: PathBuf,
    last: Instant,
    entries: Vec<(String, Duration)>,
}

impl StageTimer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StageTimer {
            path: path.into(),
            last: Instant::now(),
            entries: Vec::new(),
        }
    }

    /// Record the time since the previous `reset`/`log` under `label`
    pub fn log(&mut self, label: &str) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last);
        self.last = now;
        info!("{label} took {:.2}s", elapsed.as_secs_f64());
        self.append_row(label, elapsed);
        self.entries.push((label.to_string(), elapsed));
    }

    /// Restart the interval clock; history is kept
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Record the sum of every interval logged so far
    pub fn log_total(&mut self) -> Duration {
        let total = self.total();
        info!("Total runtime {:.2}s", total.as_secs_f64());
        self.append_row(TOTAL_LABEL, total);
        total
    }

    pub fn total(&self) -> Duration {
        self.entries.iter().map(|(_, d)| *d).sum()
    }

    /// Labels logged so far, in order
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(l, _)| l.as_str())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_row(&self, label: &str, elapsed: Duration) {
        if let Err(e) = self.try_append_row(label, elapsed) {
            warn!(
                "Could not record timing for '{label}' in {}: {e}",
                self.path.display()
            );
        }
    }

    fn try_append_row(&self, label: &str, elapsed: Duration) -> anyhow::Result<()> {
        let needs_header = std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if needs_header {
            writer.write_record(["task", "seconds", "timestamp"])?;
        }
        let seconds = format!("{:.3}", elapsed.as_secs_f64());
        let timestamp = Local::now().to_rfc3339();
        writer.write_record([label, seconds.as_str(), timestamp.as_str()])?;
        writer.flush()?;
        Ok(())
    }
}
