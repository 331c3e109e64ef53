//! Shared test inputs.

use crate::progress::ProgressSink;
use crate::stages::{StageContext, StageTable, Workdir};
use std::path::Path;
use tempfile::TempDir;

/// Two ground triangles, one inlet quad, one other triangle, one volume group.
pub const SMALL_MESH: &str = "\
$MeshFormat
2.2 0 8
$EndMeshFormat
$PhysicalNames
4
2 1 \"top\"
2 3 \"ground\"
2 5 \"inlet_0\"
3 9 \"fluid\"
$EndPhysicalNames
$Nodes
5
1 0.0 0.0 10.0
2 10.0 0.0 12.0
3 10.0 10.0 14.0
4 0.0 10.0 11.0
5 5.0 5.0 20.0
$EndNodes
$Elements
4
1 2 2 3 7 1 2 3
2 2 2 3 7 1 3 4
3 3 2 5 8 1 2 3 4
4 2 2 1 6 2 3 5
$EndElements
";

/// One sector: an outlet face at y = -100 seen first (two quads), an inlet
/// face at y = 100, and a ground triangle that must be ignored.
pub const INOUT_MESH: &str = "\
$MeshFormat
2.2 0 8
$EndMeshFormat
$PhysicalNames
4
2 3 \"ground\"
2 11 \"inlet_0\"
2 12 \"outlet_0\"
3 20 \"fluid\"
$EndPhysicalNames
$Nodes
9
1 0 -100 10
2 100 -100 12
3 0 100 5
4 100 100 6
5 0 -100 30
6 100 -100 30
7 0 100 30
8 100 100 30
9 50 -100 2
$EndNodes
$Elements
4
1 2 2 3 1 1 2 4
2 3 2 12 12 1 2 6 5
3 3 2 11 11 3 4 8 7
4 3 2 12 12 1 9 6 5
$EndElements
";

/// Working folder with an empty `FILES/` directory.
pub fn folder() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("FILES")).unwrap();
    dir
}

/// Run `f` with a context for run `run`, thread `0`.
pub fn with_context<T>(
    folder: &Path,
    code: &str,
    progress: &dyn ProgressSink,
    f: impl FnOnce(&StageContext<'_>) -> T,
) -> T {
    let workdir = Workdir::new(folder);
    let table = StageTable::new();
    let ctx = StageContext {
        run_id: "run",
        thread_id: "0",
        code,
        message: "test",
        workdir: &workdir,
        table: &table,
        progress,
    };
    f(&ctx)
}
