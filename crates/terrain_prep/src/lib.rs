//! Terrain preprocessing for wind-flow meshes.
//!
//! Three stages prepare the files of one mesh code inside `<folder>/FILES/`:
//!
//! | stage   | reads                                   | writes                                      |
//! |---------|-----------------------------------------|---------------------------------------------|
//! | `rough` | `<code>.msh2`, `<code>_roughness`       | `<code>_rough.msh2`, `<code>_ground_bc`     |
//! | `inout` | `<code>_elevation.msh2`, `<code>_roughness` | `<code>_inout_bc`, `inout_param_<code>` |
//! | `oro`   | `<code>_elevation`, `<code>_zsinfo`     | `<code>_elevation`, `propagate_param_<code>` |
//!
//! Each stage reports progress through a [`progress::ProgressSink`] and
//! returns a [`StageReport`] or the [`StageError`] that stopped it.

pub mod classify;
mod error;
pub mod inout;
pub mod orography;
pub mod pipeline;
pub mod progress;
pub mod rewrite;
pub mod stages;

#[cfg(test)]
pub(crate) mod fixtures;

pub use error::{Result, StageError};
pub use stages::{StageContext, StageKind, StageReport, StageTable, Workdir};

/// Mesh code whose orography is never zoned.
pub const REDUCED_CODE: &str = "reduced";
