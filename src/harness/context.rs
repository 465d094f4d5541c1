use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::events::{StepEvent, StepPhase};

/// Captured output of one finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepLog {
    /// Canonical function name.
    pub func: String,
    /// Exit status.
    pub status: i32,
    /// Captured stdout.
    pub out_file: PathBuf,
    /// Captured stderr.
    pub err_file: PathBuf,
}

/// State scoped to one `run` invocation: identity, log directory and the
/// step logs reported so far, in completion order.
#[derive(Debug)]
pub struct RunContext {
    /// Random run identifier.
    pub run_id: Uuid,
    /// `<logs_dir>/<timestamp>-<run_id>`
    pub run_dir: PathBuf,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    step_logs: Vec<StepLog>,
}

impl RunContext {
    /// Allocate a run id and create its log directory under `logs_dir`.
    pub fn create(logs_dir: &Path) -> io::Result<Self> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let run_dir = logs_dir.join(format!(
            "{}-{run_id}",
            started_at.format("%Y-%m-%dT%H-%M-%SZ")
        ));
        std::fs::create_dir_all(&run_dir)?;
        Ok(Self {
            run_id,
            run_dir,
            started_at,
            step_logs: Vec::new(),
        })
    }

    /// Variables handing the run directory to the runtime library.
    pub fn env(&self) -> [(&'static str, String); 2] {
        [
            ("JAIPH_RUN_DIR", self.run_dir.display().to_string()),
            ("JAIPH_RUN_ID", self.run_id.to_string()),
        ]
    }

    /// Remember the log files of a finished step.
    pub fn record(&mut self, event: &StepEvent) {
        if event.phase != StepPhase::StepEnd {
            return;
        }
        let (Some(out_file), Some(err_file)) = (&event.out_file, &event.err_file) else {
            return;
        };
        self.step_logs.push(StepLog {
            func: event.func.clone(),
            status: event.exit_status(),
            out_file: PathBuf::from(out_file),
            err_file: PathBuf::from(err_file),
        });
    }

    /// Step logs in completion order.
    pub fn step_logs(&self) -> &[StepLog] {
        &self.step_logs
    }

    /// Log files to point at after a failure: those of the most recently
    /// started failed step, else the newest capture files in the run
    /// directory.
    pub fn failure_files(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        let failed = self
            .step_logs
            .iter()
            .filter(|log| log.status != 0)
            .max_by(|a, b| a.out_file.file_name().cmp(&b.out_file.file_name()));
        if let Some(log) = failed {
            return (Some(log.out_file.clone()), Some(log.err_file.clone()));
        }
        self.newest_capture_files()
    }

    fn newest_capture_files(&self) -> (Option<PathBuf>, Option<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(&self.run_dir) else {
            return (None, None);
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        let newest = |suffix: &str| {
            names
                .iter()
                .rev()
                .find(|name| name.ends_with(suffix))
                .map(|name| self.run_dir.join(name))
        };
        (newest(".out"), newest(".err"))
    }
}
