//! Stage wiring: which files each stage reads and writes, and the shared
//! per-invocation context.
//!
//! All stages work inside `<folder>/FILES/`. File names are templates over the
//! mesh code (`fine`, `coarse`, `reduced`). Outputs are written next to their
//! final name with a `.partial` suffix and renamed once complete; a leftover
//! `.partial` means another invocation is writing the same folder, or one died
//! half-way, and the stage refuses to run.

use crate::error::{Result, StageError};
use crate::progress::{ProgressSink, ProgressUpdate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FILES_DIR: &str = "FILES";
pub const PARTIAL_SUFFIX: &str = ".partial";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Rough,
    Inout,
    Oro,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Rough, StageKind::Inout, StageKind::Oro];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Rough => "rough",
            StageKind::Inout => "inout",
            StageKind::Oro => "oro",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The `FILES/` directory of a working folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workdir {
    files: PathBuf,
}

impl Workdir {
    pub fn new(folder: impl AsRef<Path>) -> Self {
        Self {
            files: folder.as_ref().join(FILES_DIR),
        }
    }

    pub fn files(&self) -> &Path {
        &self.files
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.files.join(name)
    }
}

/// Replace every `{code}` in a file name template.
pub fn expand(template: &str, code: &str) -> String {
    template.replace("{code}", code)
}

pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// A complete `.partial` file waiting to be renamed over its output.
///
/// The partial file is created exclusively, so two writers of the same output
/// cannot both proceed; the loser gets [`StageError::ConcurrentRun`].
///
/// Dropping it without committing removes the partial file, so a stage that
/// fails half-way through its outputs leaves none of them behind.
#[derive(Debug)]
pub struct StagedOutput {
    path: PathBuf,
    partial: PathBuf,
    committed: bool,
}

impl StagedOutput {
    pub fn write<F>(path: &Path, write: F) -> Result<Self>
    where
        F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
    {
        let partial = partial_path(path);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => StageError::ConcurrentRun(partial.clone()),
                _ => StageError::io(&partial, e),
            })?;
        let staged = Self {
            path: path.to_owned(),
            partial,
            committed: false,
        };

        let mut writer = BufWriter::new(file);
        write(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| StageError::io(path, e))?;

        Ok(staged)
    }

    fn commit(mut self) -> Result<()> {
        std::fs::rename(&self.partial, &self.path).map_err(|e| StageError::io(&self.path, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedOutput {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.partial);
        }
    }
}

/// Rename every staged output into place.
///
/// Nothing is renamed until every output is fully written. If a rename fails,
/// the outputs already renamed by this call are removed again.
pub fn commit_all<I>(outputs: I) -> Result<()>
where
    I: IntoIterator<Item = StagedOutput>,
{
    let mut done: Vec<PathBuf> = Vec::new();
    for output in outputs {
        let path = output.path.clone();
        if let Err(err) = output.commit() {
            for committed in &done {
                let _ = std::fs::remove_file(committed);
            }
            return Err(err);
        }
        done.push(path);
    }
    Ok(())
}

/// Input and output file templates of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub kind: StageKind,
    inputs: &'static [&'static str],
    outputs: &'static [&'static str],
}

impl StageSpec {
    pub fn inputs(&self, code: &str) -> Vec<String> {
        self.inputs.iter().map(|t| expand(t, code)).collect()
    }

    pub fn outputs(&self, code: &str) -> Vec<String> {
        self.outputs.iter().map(|t| expand(t, code)).collect()
    }

    pub fn check_inputs(&self, workdir: &Workdir, code: &str) -> Result<()> {
        for name in self.inputs(code) {
            let path = workdir.path(&name);
            if !path.is_file() {
                return Err(StageError::MissingInput(path));
            }
        }
        Ok(())
    }

    pub fn check_no_partial(&self, workdir: &Workdir, code: &str) -> Result<()> {
        for name in self.outputs(code) {
            let partial = partial_path(&workdir.path(&name));
            if partial.exists() {
                return Err(StageError::ConcurrentRun(partial));
            }
        }
        Ok(())
    }
}

/// Every stage and its files, built once per process.
#[derive(Debug, Clone)]
pub struct StageTable {
    specs: [StageSpec; 3],
}

impl StageTable {
    pub fn new() -> Self {
        Self {
            specs: [
                StageSpec {
                    kind: StageKind::Rough,
                    inputs: &["{code}_roughness", "{code}.msh2"],
                    outputs: &["{code}_rough.msh2", "{code}_ground_bc"],
                },
                StageSpec {
                    kind: StageKind::Inout,
                    inputs: &["{code}_roughness", "{code}_elevation.msh2"],
                    outputs: &["{code}_inout_bc", "inout_param_{code}"],
                },
                StageSpec {
                    kind: StageKind::Oro,
                    inputs: &["{code}_elevation", "{code}_zsinfo"],
                    outputs: &["{code}_elevation", "propagate_param_{code}"],
                },
            ],
        }
    }

    pub fn get(&self, kind: StageKind) -> &StageSpec {
        // `specs` is laid out in `StageKind` declaration order.
        &self.specs[kind as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &StageSpec> {
        self.specs.iter()
    }
}

impl Default for StageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a stage needs besides its own parameters.
pub struct StageContext<'a> {
    pub run_id: &'a str,
    pub thread_id: &'a str,
    pub code: &'a str,
    pub message: &'a str,
    pub workdir: &'a Workdir,
    pub table: &'a StageTable,
    pub progress: &'a dyn ProgressSink,
}

impl StageContext<'_> {
    /// Path of a templated file of this mesh code.
    pub fn file(&self, template: &str) -> PathBuf {
        self.workdir.path(&expand(template, self.code))
    }

    pub fn report(&self, fraction: f64) {
        self.progress.report(&ProgressUpdate::new(
            self.run_id,
            self.thread_id,
            fraction,
            self.message,
        ));
    }

    /// Report the start of step `step` (1-based) out of `steps`, tagging the message.
    pub fn report_step(&self, step: usize, steps: usize) {
        self.progress.report(&ProgressUpdate::new(
            self.run_id,
            self.thread_id,
            (step - 1) as f64 / steps as f64,
            format!("{} - {step}/{steps}", self.message),
        ));
    }

    /// Check inputs and leftovers of `kind` before any work starts.
    pub fn prepare(&self, kind: StageKind) -> Result<&StageSpec> {
        let spec = self.table.get(kind);
        spec.check_inputs(self.workdir, self.code)?;
        spec.check_no_partial(self.workdir, self.code)?;
        self.report(0.0);
        Ok(spec)
    }
}

/// Outcome of a successful stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub code: String,
    pub outputs: Vec<PathBuf>,
    pub summary: String,
}

impl StageReport {
    pub(crate) fn new(ctx: &StageContext<'_>, spec: &StageSpec, summary: String) -> Self {
        Self {
            stage: spec.kind,
            code: ctx.code.to_owned(),
            outputs: spec
                .outputs(ctx.code)
                .iter()
                .map(|name| ctx.workdir.path(name))
                .collect(),
            summary,
        }
    }
}
