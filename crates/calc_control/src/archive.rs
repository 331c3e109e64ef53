//! Zip of the status files of a job, everything under `CVG/`.
//!
//! Layout inside the archive:
//!
//! ```text
//! CVG/<job files>                         actual.xml history.xml ... log
//! CVG/<STAGE>/launched|terminated|log_simpleFoam
//! CVG/<STAGE>/logs/...
//! CVG/<STAGE>/postProcessing/probes/...
//! CVG/<STAGE>/log_simpleFoam.<i>          one per history.xml entry
//! ```
//!
//! Backup files (`*~`) and hidden files or directories are left out. Files
//! that do not exist are skipped; only an unreadable existing file fails.

use crate::error::{ControlError, Result};
use crate::solver_log::LOG_NAME;
use crate::status::Stage;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARCHIVE_ROOT: &str = "CVG";

const JOB_FILES: [&str; 8] = [
    "actual.xml",
    "history.xml",
    "info.xml",
    "itstart_c",
    "itstart_i",
    "param.xml",
    "terminated",
    "log",
];
const STAGE_FILES: [&str; 3] = ["launched", "terminated", LOG_NAME];
const STAGE_TREES: [&str; 2] = ["logs", "postProcessing/probes"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub output: PathBuf,
    pub files: usize,
    /// Iteration logs listed in `history.xml` but absent from disk.
    pub missing_logs: Vec<String>,
}

/// One `log_simpleFoam.<i>` listed in `history.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLog {
    pub stage: Stage,
    pub file_name: String,
}

static HISTORY_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\w+\s([^>]*)>").unwrap());
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).unwrap());

/// Iteration logs of a `history.xml`: `type="init"` entries live in COARSE,
/// `type="calc"` entries in FINE; other entries are ignored.
pub fn history_logs(xml: &str) -> Vec<HistoryLog> {
    HISTORY_ENTRY
        .captures_iter(xml)
        .filter_map(|entry| {
            let attributes = entry.get(1)?.as_str();
            let mut kind = None;
            let mut index = None;
            for attribute in ATTRIBUTE.captures_iter(attributes) {
                match &attribute[1] {
                    "type" => kind = Some(attribute[2].to_owned()),
                    "i" => index = Some(attribute[2].trim().to_owned()),
                    _ => {}
                }
            }
            let stage = match kind.as_deref()? {
                "init" => Stage::Coarse,
                "calc" => Stage::Fine,
                _ => return None,
            };
            Some(HistoryLog {
                stage,
                file_name: format!("{LOG_NAME}.{}", index?),
            })
        })
        .collect()
}

fn is_excluded(name: &str) -> bool {
    name.starts_with('.') || name.ends_with('~')
}

/// Archive name -> source path, sorted so archives are reproducible.
fn collect(job_dir: &Path) -> Result<(BTreeMap<String, PathBuf>, Vec<String>)> {
    let mut entries = BTreeMap::new();
    let mut add = |name: String, path: PathBuf| {
        if path.is_file() {
            entries.insert(name, path);
        }
    };

    for name in JOB_FILES {
        add(format!("{ARCHIVE_ROOT}/{name}"), job_dir.join(name));
    }

    for stage in Stage::ALL {
        let stage_dir = job_dir.join(stage.dir_name());
        for name in STAGE_FILES {
            add(format!("{ARCHIVE_ROOT}/{stage}/{name}"), stage_dir.join(name));
        }

        for tree in STAGE_TREES {
            let root = stage_dir.join(tree);
            if !root.is_dir() {
                continue;
            }
            let walker = WalkDir::new(&root)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| !is_excluded(&e.file_name().to_string_lossy()));
            for entry in walker {
                let entry = entry.map_err(|e| {
                    let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                    ControlError::io(path, e.into())
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(relative) = entry.path().strip_prefix(&stage_dir) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                add(format!("{ARCHIVE_ROOT}/{stage}/{relative}"), entry.path().to_path_buf());
            }
        }
    }

    let mut missing = Vec::new();
    let history = job_dir.join("history.xml");
    if history.is_file() {
        let xml = std::fs::read_to_string(&history).map_err(|e| ControlError::io(&history, e))?;
        for log in history_logs(&xml) {
            let path = job_dir.join(log.stage.dir_name()).join(&log.file_name);
            if path.is_file() {
                add(format!("{ARCHIVE_ROOT}/{}/{}", log.stage, log.file_name), path);
            } else {
                warn!(path = %path.display(), "history lists a log that does not exist");
                missing.push(format!("{}/{}", log.stage, log.file_name));
            }
        }
    }

    Ok((entries, missing))
}

/// Write the status archive of `job_dir` to `output`, replacing any previous one.
pub fn write_archive(job_dir: &Path, output: &Path) -> Result<ArchiveSummary> {
    if !job_dir.is_dir() {
        return Err(ControlError::NotAJobDirectory(job_dir.to_owned()));
    }
    let (entries, missing_logs) = collect(job_dir)?;

    let zip_error = |source| ControlError::Archive {
        path: output.to_owned(),
        source,
    };

    let file = File::create(output).map_err(|e| ControlError::io(output, e))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    // Both stages always carry a postProcessing directory, even when empty.
    for stage in Stage::ALL {
        zip.add_directory(format!("{ARCHIVE_ROOT}/{stage}/postProcessing/"), options)
            .map_err(zip_error)?;
    }

    for (name, path) in &entries {
        debug!(%name, "archiving");
        zip.start_file(name.as_str(), options).map_err(zip_error)?;
        let mut source = File::open(path).map_err(|e| ControlError::io(path, e))?;
        io::copy(&mut source, &mut zip).map_err(|e| ControlError::io(path, e))?;
    }

    let mut writer = zip.finish().map_err(zip_error)?;
    writer.flush().map_err(|e| ControlError::io(output, e))?;

    Ok(ArchiveSummary {
        output: output.to_owned(),
        files: entries.len(),
        missing_logs,
    })
}
