//! Fractional progress reporting for long-running stages.
//!
//! Every stage reports `(run_id, thread_id, fraction, message)`. Reaching 1.0 is
//! the stage's success signal: a supervisor that never sees it treats the stage
//! as failed. Reports are fire-and-forget, so a sink that cannot store an update
//! logs a warning and the stage carries on.

use crate::error::{Result, StageError};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub run_id: String,
    pub thread_id: String,
    pub fraction: f64,
    pub message: String,
}

impl ProgressUpdate {
    /// Build an update with the fraction clamped to `[0, 1]`.
    pub fn new(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        fraction: f64,
        message: impl Into<String>,
    ) -> Self {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            fraction,
            message: message.into(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }
}

/// Latest state of one worker thread within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadProgress {
    pub fraction: f64,
    pub message: String,
}

/// Merged view of every thread of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunProgress {
    pub threads: BTreeMap<String, ThreadProgress>,
}

impl RunProgress {
    fn apply(&mut self, update: &ProgressUpdate) {
        self.threads.insert(
            update.thread_id.clone(),
            ThreadProgress {
                fraction: update.fraction,
                message: update.message.clone(),
            },
        );
    }

    /// Mean fraction over all threads; 0 for a run nobody reported on.
    pub fn overall(&self) -> f64 {
        if self.threads.is_empty() {
            return 0.0;
        }
        self.threads.values().map(|t| t.fraction).sum::<f64>() / self.threads.len() as f64
    }

    pub fn is_complete(&self) -> bool {
        !self.threads.is_empty() && self.threads.values().all(|t| t.fraction >= 1.0)
    }
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

/// Sink that only logs; used when no progress directory is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, update: &ProgressUpdate) {
        debug!(
            "[{}/{}] {:5.1}% {}",
            update.run_id,
            update.thread_id,
            update.fraction * 100.0,
            update.message
        );
    }
}

/// In-process store, keyed by run.
#[derive(Debug, Default)]
pub struct MemoryProgress {
    runs: Mutex<BTreeMap<String, RunProgress>>,
}

impl MemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, run_id: &str) -> RunProgress {
        self.runs.lock().get(run_id).cloned().unwrap_or_default()
    }
}

impl ProgressSink for MemoryProgress {
    fn report(&self, update: &ProgressUpdate) {
        self.runs
            .lock()
            .entry(update.run_id.clone())
            .or_default()
            .apply(update);
    }
}

/// One JSON document per thread under `<root>/<run_id>/<thread_id>.json`.
///
/// Threads never share a file, and each document is written to a temporary
/// name and renamed into place, so concurrent reporters cannot clobber or
/// half-write each other's state.
#[derive(Debug, Clone)]
pub struct FileProgress {
    root: PathBuf,
}

impl FileProgress {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run_id: &str) -> Result<PathBuf> {
        check_id(run_id)?;
        Ok(self.root.join(run_id))
    }

    fn store(&self, update: &ProgressUpdate) -> Result<()> {
        check_id(&update.thread_id)?;
        let dir = self.run_dir(&update.run_id)?;
        fs::create_dir_all(&dir).map_err(|e| StageError::io(&dir, e))?;

        let target = dir.join(format!("{}.json", update.thread_id));
        let staging = dir.join(format!(".{}.json.tmp", update.thread_id));

        let body = serde_json::to_vec_pretty(&ThreadProgress {
            fraction: update.fraction,
            message: update.message.clone(),
        })
        .map_err(|e| StageError::io(&target, e.into()))?;

        fs::write(&staging, body).map_err(|e| StageError::io(&staging, e))?;
        fs::rename(&staging, &target).map_err(|e| StageError::io(&target, e))
    }

    /// Merge every thread document of `run_id`. A run with no documents is empty.
    pub fn snapshot(&self, run_id: &str) -> Result<RunProgress> {
        let dir = self.run_dir(run_id)?;
        let mut run = RunProgress::default();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(run),
            Err(e) => return Err(StageError::io(&dir, e)),
        };

        for entry in entries {
            let path = entry.map_err(|e| StageError::io(&dir, e))?.path();
            if !is_thread_document(&path) {
                continue;
            }
            let Some(thread_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let text = fs::read(&path).map_err(|e| StageError::io(&path, e))?;
            let thread: ThreadProgress =
                serde_json::from_slice(&text).map_err(|e| StageError::io(&path, e.into()))?;
            run.threads.insert(thread_id.to_owned(), thread);
        }

        Ok(run)
    }
}

/// Ids become file names under the progress root. Leading dots are reserved
/// for staging files.
fn check_id(id: &str) -> Result<()> {
    let escapes = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\'])
        || Path::new(id).is_absolute();
    if escapes {
        return Err(StageError::InvalidProgressId(id.to_owned()));
    }
    Ok(())
}

fn is_thread_document(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map_or(true, |n| n.starts_with('.'));
    !hidden && path.extension().is_some_and(|ext| ext == "json")
}

impl ProgressSink for FileProgress {
    fn report(&self, update: &ProgressUpdate) {
        if let Err(err) = self.store(update) {
            warn!("progress update for {}/{} dropped: {err}", update.run_id, update.thread_id);
        }
    }
}

/// Rate limiter for progress reports from tight loops.
///
/// Fires at most once per `every` items and never twice within 200 ms.
#[derive(Debug)]
pub struct Throttle {
    last: Instant,
    every: usize,
}

impl Throttle {
    const MIN_INTERVAL: Duration = Duration::from_millis(200);

    pub fn new(every: usize) -> Self {
        Self {
            last: Instant::now(),
            every: every.max(1),
        }
    }

    /// `true` when `count` is a multiple of `every` and the interval has elapsed.
    /// A `true` answer restarts the interval.
    #[inline]
    pub fn should(&mut self, count: usize) -> bool {
        if count % self.every == 0 && self.last.elapsed() >= Self::MIN_INTERVAL {
            self.last = Instant::now();
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractions_are_clamped() {
        assert_eq!(ProgressUpdate::new("r", "t", 1.7, "").fraction, 1.0);
        assert_eq!(ProgressUpdate::new("r", "t", -0.2, "").fraction, 0.0);
        assert_eq!(ProgressUpdate::new("r", "t", f64::NAN, "").fraction, 0.0);
    }

    #[test]
    fn memory_sink_keeps_latest_per_thread() {
        let sink = MemoryProgress::new();
        sink.report(&ProgressUpdate::new("run", "1", 0.25, "rough"));
        sink.report(&ProgressUpdate::new("run", "1", 0.5, "rough"));
        sink.report(&ProgressUpdate::new("run", "2", 1.0, "oro"));

        let run = sink.snapshot("run");
        assert_eq!(run.threads.len(), 2);
        assert_eq!(run.threads["1"].fraction, 0.5);
        assert_eq!(run.overall(), 0.75);
        assert!(!run.is_complete());
        assert!(sink.snapshot("other").threads.is_empty());
    }

    #[test]
    fn file_sink_writes_one_document_per_thread() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileProgress::new(dir.path());

        sink.report(&ProgressUpdate::new("42", "0", 0.3, "inout"));
        sink.report(&ProgressUpdate::new("42", "1", 1.0, "oro"));
        sink.report(&ProgressUpdate::new("42", "0", 1.0, "inout"));

        assert!(dir.path().join("42").join("0.json").exists());
        assert!(!dir.path().join("42").join(".0.json.tmp").exists());

        let run = sink.snapshot("42").unwrap();
        assert_eq!(run.threads.len(), 2);
        assert_eq!(run.threads["0"].message, "inout");
        assert!(run.is_complete());
    }

    #[test]
    fn file_sink_snapshot_of_unknown_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let run = FileProgress::new(dir.path()).snapshot("missing").unwrap();
        assert_eq!(run, RunProgress::default());
    }

    #[test]
    fn ids_cannot_leave_the_progress_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("progress");
        let sink = FileProgress::new(&root);

        let escaping = [
            ("42", "../x"),
            ("..", "0"),
            ("42", ".hidden"),
            ("a/b", "0"),
            ("42", ""),
        ];
        for (run_id, thread_id) in escaping {
            let update = ProgressUpdate::new(run_id, thread_id, 0.5, "rough");
            assert!(matches!(sink.store(&update), Err(StageError::InvalidProgressId(_))));
            sink.report(&update);
        }

        assert!(!root.join("x.json").exists());
        assert!(!root.join("0.json").exists());
        assert!(!root.join("a").exists());
        assert!(matches!(sink.snapshot("../42"), Err(StageError::InvalidProgressId(_))));
    }

    #[test]
    fn unwritable_sink_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "").unwrap();

        FileProgress::new(&blocker).report(&ProgressUpdate::new("r", "t", 0.5, ""));
    }

    #[test]
    fn throttle_respects_count_and_interval() {
        let mut throttle = Throttle::new(10);
        assert!(!throttle.should(10));

        throttle.last = Instant::now()
            .checked_sub(Duration::from_millis(250))
            .unwrap();
        assert!(!throttle.should(11));
        assert!(throttle.should(20));
        assert!(!throttle.should(30));
    }
}
