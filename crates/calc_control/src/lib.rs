//! Supervision of a calculation job directory.
//!
//! A job directory holds `param.xml`, `history.xml` and one sub-directory per
//! stage (`COARSE` for initialization, `FINE` for the refined solve). The
//! external solver and its launcher communicate through marker files only:
//! `launched`, `terminated`, `paused`, `stopped` inside a stage and
//! `corrupted` at the top. This crate reads those markers, asks a running
//! solver to stop by editing its control dictionary, inspects solver logs and
//! packages the status files for download.

pub mod archive;
mod error;
pub mod solver_log;
pub mod status;
pub mod stop;

pub use error::{ControlError, Result};
pub use status::{infer_status, stop_stage, FsMarkers, JobStatus, MarkerSource, Markers, Stage};
pub use stop::{request_stop, StopOutcome};
