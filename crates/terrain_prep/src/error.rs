use std::path::PathBuf;

/// Failures of a preprocessing stage.
///
/// Every variant is a hard precondition violation: the stage stops and reports
/// it instead of writing partial output.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Format(#[from] msh2::FormatError),

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("missing input file {0}")]
    MissingInput(PathBuf),

    #[error("{0} exists: another run is writing this folder or a previous one crashed")]
    ConcurrentRun(PathBuf),

    #[error("element {element}: no roughness record at line {record}")]
    MissingSample { element: usize, record: usize },

    #[error("element {element}: roughness {value:.5} matches no roughness class")]
    UnknownRoughnessClass { element: usize, value: f64 },

    #[error("mesh declares no ground group (dimension 2, id {0})")]
    MissingGroundGroup(i64),

    #[error("element {element} references node {node}, which is not in the mesh")]
    DanglingNode { element: usize, node: usize },

    #[error("element {element} has {found} nodes, expected {expected}")]
    ElementShape {
        element: usize,
        expected: usize,
        found: usize,
    },

    #[error("boundary {0} is not one of the declared inlet/outlet groups")]
    UnknownBoundary(i64),

    #[error("empty selection: {0}")]
    EmptySelection(&'static str),

    #[error("`{0}` cannot name a progress document: use no path separators or `..`")]
    InvalidProgressId(String),

    #[error("elevation field has {nodes} nodes but the neighbour table {detail}")]
    NeighbourMismatch { nodes: usize, detail: String },
}

impl StageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
