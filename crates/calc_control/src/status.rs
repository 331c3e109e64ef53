//! Job status as a pure function of the marker files.

use crate::error::{ControlError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Stage {
    Coarse,
    Fine,
}

impl Stage {
    pub const ALL: [Stage; 2] = [Stage::Fine, Stage::Coarse];

    /// Sub-directory of the job directory holding this stage.
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Coarse => "COARSE",
            Stage::Fine => "FINE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Raw observations a status decision is made from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Markers {
    pub corrupted: bool,
    pub coarse_terminated: bool,
    pub coarse_paused: bool,
    pub coarse_stopped: bool,
    pub coarse_launched: bool,
    pub fine_launched: bool,
    /// `n_it_max_init` from `param.xml`; zero means the job has no initialization stage.
    pub init_iterations: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobStatus {
    pub corrupted: bool,
    pub over_init: bool,
    pub launched: bool,
    pub running_init: bool,
}

impl JobStatus {
    /// The stage the solver is working on: initialization while it runs, the
    /// refined solve otherwise.
    pub fn active_stage(&self) -> Stage {
        if self.running_init {
            Stage::Coarse
        } else {
            Stage::Fine
        }
    }
}

pub fn infer_status(markers: &Markers) -> JobStatus {
    let over_init = markers.coarse_terminated || markers.coarse_paused || markers.coarse_stopped;
    let launched = markers.coarse_launched;
    JobStatus {
        corrupted: markers.corrupted,
        over_init,
        launched,
        running_init: markers.init_iterations != 0 && !markers.corrupted && !over_init && launched,
    }
}

/// Stage a stop request applies to.
///
/// The `stopped` marker of an earlier request does not move the target to the
/// refined solve until that stage has been launched, so a repeated request
/// lands on the same stage as the first one.
pub fn stop_stage(markers: &Markers) -> Stage {
    if markers.fine_launched {
        return infer_status(markers).active_stage();
    }
    let before_request = Markers {
        coarse_stopped: false,
        ..markers.clone()
    };
    infer_status(&before_request).active_stage()
}

pub trait MarkerSource {
    fn markers(&self) -> Result<Markers>;
}

/// Markers read from a job directory on disk.
#[derive(Debug, Clone)]
pub struct FsMarkers {
    job_dir: PathBuf,
}

impl FsMarkers {
    pub fn new(job_dir: impl Into<PathBuf>) -> Result<Self> {
        let job_dir = job_dir.into();
        if !job_dir.is_dir() {
            return Err(ControlError::NotAJobDirectory(job_dir));
        }
        Ok(Self { job_dir })
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    fn stage_marker(&self, stage: Stage, name: &str) -> bool {
        self.job_dir.join(stage.dir_name()).join(name).is_file()
    }
}

impl MarkerSource for FsMarkers {
    fn markers(&self) -> Result<Markers> {
        Ok(Markers {
            corrupted: self.job_dir.join("corrupted").is_file(),
            coarse_terminated: self.stage_marker(Stage::Coarse, "terminated"),
            coarse_paused: self.stage_marker(Stage::Coarse, "paused"),
            coarse_stopped: self.stage_marker(Stage::Coarse, "stopped"),
            coarse_launched: self.stage_marker(Stage::Coarse, "launched"),
            fine_launched: self.stage_marker(Stage::Fine, "launched"),
            init_iterations: read_init_iterations(&self.job_dir.join("param.xml"))?,
        })
    }
}

static INIT_ITERATIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<n_it_max_init>\s*([^<]*?)\s*</n_it_max_init>").unwrap());

/// `n_it_max_init` of a `param.xml` document.
pub fn parse_init_iterations(xml: &str) -> std::result::Result<i64, String> {
    let raw = INIT_ITERATIONS
        .captures(xml)
        .and_then(|c| c.get(1))
        .ok_or_else(|| "no <n_it_max_init> element".to_owned())?
        .as_str();
    raw.parse::<i64>()
        .map_err(|_| format!("n_it_max_init `{raw}` is not an integer"))
}

fn read_init_iterations(path: &Path) -> Result<i64> {
    let xml = std::fs::read_to_string(path).map_err(|e| ControlError::io(path, e))?;
    parse_init_iterations(&xml).map_err(|reason| ControlError::Param {
        path: path.to_owned(),
        reason,
    })
}
