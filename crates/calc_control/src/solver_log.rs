//! Post-run inspection of a solver log.

use crate::error::{ControlError, Result};
use serde::Serialize;
use std::path::Path;

pub const LOG_NAME: &str = "log_simpleFoam";

/// Logs shorter than this never count as a completed run.
const MIN_LINES: usize = 5;
/// The completion line must be among the last few lines.
const END_WINDOW: usize = 3;
/// How far back from the end the last `Time =` line is searched.
const ITERATION_WINDOW: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogSummary {
    pub lines: usize,
    /// The solver printed its `End` line.
    pub completed: bool,
    /// Last value of `Time =` near the end of the log.
    pub last_iteration: Option<String>,
}

impl LogSummary {
    /// A run counts only when it completed and reported an iteration.
    pub fn is_valid(&self) -> bool {
        self.completed && self.last_iteration.is_some()
    }
}

pub fn inspect(text: &str) -> LogSummary {
    let lines: Vec<&str> = text.lines().collect();

    let completed = lines.len() >= MIN_LINES
        && lines
            .iter()
            .rev()
            .take(END_WINDOW)
            .any(|line| line.trim_end() == "End");

    let last_iteration = lines
        .iter()
        .rev()
        .take(ITERATION_WINDOW)
        .find(|line| line.starts_with("Time ="))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_owned);

    LogSummary {
        lines: lines.len(),
        completed,
        last_iteration,
    }
}

/// Summary of `<stage_dir>/log_simpleFoam`, or `None` when the solver never wrote one.
pub fn inspect_stage(stage_dir: &Path) -> Result<Option<LogSummary>> {
    let path = stage_dir.join(LOG_NAME);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(inspect(&String::from_utf8_lossy(&bytes)))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ControlError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(body: &[&str]) -> String {
        let mut text = body.join("\n");
        text.push('\n');
        text
    }

    #[test]
    fn completed_run_reports_its_last_iteration() {
        let text = log(&[
            "/*---------*/",
            "Time = 1",
            "smoothSolver: Solving for Ux",
            "Time = 2",
            "smoothSolver: Solving for Ux",
            "ExecutionTime = 3.1 s",
            "End",
            "",
        ]);
        let summary = inspect(&text);

        assert!(summary.completed);
        assert_eq!(summary.last_iteration.as_deref(), Some("2"));
        assert!(summary.is_valid());
    }

    #[test]
    fn short_log_is_never_complete() {
        let summary = inspect(&log(&["Time = 1", "End"]));
        assert!(!summary.completed);
        assert!(!summary.is_valid());
    }

    #[test]
    fn end_must_be_near_the_tail() {
        let summary = inspect(&log(&["Time = 1", "End", "a", "b", "c", "d"]));
        assert!(!summary.completed);
    }

    #[test]
    fn iteration_must_be_in_the_last_hundred_lines() {
        let mut body = vec!["Time = 7"];
        body.extend(std::iter::repeat("residual").take(ITERATION_WINDOW));
        body.push("End");
        let summary = inspect(&log(&body));

        assert!(summary.completed);
        assert_eq!(summary.last_iteration, None);
        assert!(!summary.is_valid());
    }

    #[test]
    fn missing_log_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(inspect_stage(dir.path()).unwrap(), None);

        std::fs::write(dir.path().join(LOG_NAME), log(&["a", "b", "c", "Time = 4", "End"])).unwrap();
        let summary = inspect_stage(dir.path()).unwrap().unwrap();
        assert!(summary.is_valid());
    }
}
