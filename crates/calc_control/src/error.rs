use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not a calculation directory")]
    NotAJobDirectory(PathBuf),

    #[error("{path}: cannot read the initialization budget: {reason}")]
    Param { path: PathBuf, reason: String },

    #[error("control file {0} is missing")]
    MissingControlFile(PathBuf),

    #[error("control file {0} has no stopAt directive")]
    MissingStopDirective(PathBuf),

    #[error("the stop timestamp does not exist in the local time zone")]
    Timestamp,

    #[error("writing archive {path}: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
}

impl ControlError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ControlError>;
