//! Graceful stop of a running solver.
//!
//! The solver re-reads `system/controlDict` when its modification time
//! changes. Switching `stopAt` to `writeNow` makes it write the current
//! iteration and exit on its own; nothing is signalled or killed.

use crate::error::{ControlError, Result};
use crate::status::{infer_status, stop_stage, FsMarkers, JobStatus, MarkerSource, Stage};
use chrono::{Local, TimeZone};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::{self, File, FileTimes};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

pub const STOP_DIRECTIVE: &str = "stopAt          writeNow;";

static STOP_AT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*stopAt\b[^\r\n]*").unwrap());

/// Modification time stamped on a rewritten control file, 2024-12-12 12:12 local time.
pub fn sentinel_time() -> Result<SystemTime> {
    Local
        .with_ymd_and_hms(2024, 12, 12, 12, 12, 0)
        .earliest()
        .map(SystemTime::from)
        .ok_or(ControlError::Timestamp)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopOutcome {
    pub status: JobStatus,
    pub stage: Stage,
    pub control_file: PathBuf,
    /// Whether this request saved the original control file.
    pub backup_created: bool,
}

/// `text` with every `stopAt` directive replaced, or `None` when it has none.
pub fn rewrite_stop_directive(text: &str) -> Option<String> {
    if !STOP_AT.is_match(text) {
        return None;
    }
    Some(STOP_AT.replace_all(text, STOP_DIRECTIVE).into_owned())
}

/// Ask the solver running in `job_dir` to stop after writing its current state.
pub fn request_stop(job_dir: &Path) -> Result<StopOutcome> {
    let markers = FsMarkers::new(job_dir)?;
    request_stop_with(&markers, job_dir)
}

pub fn request_stop_with<M: MarkerSource>(markers: &M, job_dir: &Path) -> Result<StopOutcome> {
    let markers = markers.markers()?;
    let status = infer_status(&markers);
    let stage = stop_stage(&markers);
    let stage_dir = job_dir.join(stage.dir_name());
    debug!(?status, %stage, "stop request");

    let control_file = stage_dir.join("system").join("controlDict");
    if !control_file.is_file() {
        return Err(ControlError::MissingControlFile(control_file));
    }

    let backup = control_file.with_file_name("controlDict.orig");
    let backup_created = !backup.exists();
    if backup_created {
        fs::copy(&control_file, &backup).map_err(|e| ControlError::io(&backup, e))?;
    }

    let original = fs::read_to_string(&control_file).map_err(|e| ControlError::io(&control_file, e))?;
    let stopped = rewrite_stop_directive(&original)
        .ok_or_else(|| ControlError::MissingStopDirective(control_file.clone()))?;

    let staged = control_file.with_file_name("controlDict_stop");
    fs::write(&staged, stopped).map_err(|e| ControlError::io(&staged, e))?;
    fs::copy(&staged, &control_file).map_err(|e| ControlError::io(&control_file, e))?;

    let mtime = sentinel_time()?;
    File::options()
        .write(true)
        .open(&control_file)
        .and_then(|f| f.set_times(FileTimes::new().set_modified(mtime)))
        .map_err(|e| ControlError::io(&control_file, e))?;

    let marker = stage_dir.join("stopped");
    fs::write(&marker, "\n").map_err(|e| ControlError::io(&marker, e))?;

    info!(
        job = %job_dir.display(),
        %stage,
        backup_created,
        "stop requested"
    );

    Ok(StopOutcome {
        status,
        stage,
        control_file,
        backup_created,
    })
}
