use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{origin}, line {line}: {message}")]
    Syntax {
        origin: String,
        line: usize,
        message: String,
    },

    #[error("{origin}: section closed by `{section}` declares {declared} records, found {found}")]
    CountMismatch {
        origin: String,
        section: &'static str,
        declared: usize,
        found: usize,
    },

    #[error("{origin}: unexpected end of file")]
    UnexpectedEof { origin: String },
}

impl FormatError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
