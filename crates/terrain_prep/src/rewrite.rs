//! Split the single terrain boundary of a mesh into one boundary per roughness
//! class, and declare a canopy volume per class.

use crate::classify::ClassTable;
use crate::error::{Result, StageError};
use crate::stages::{commit_all, StageContext, StageKind, StageReport, StagedOutput};
use log::info;
use msh2::{read_roughness_column, Mesh, PhysicalGroup, KIND_TRIANGLE};
use std::io::Write;

/// Physical id of the terrain surface in a freshly generated mesh.
pub const GROUND_GROUP_ID: i64 = 3;
pub const GROUND_GROUP_DIM: u8 = 2;

/// Replace the ground declaration with per-class declarations and retag every
/// ground triangle with the `ground_id` of its roughness class.
///
/// `roughness[i]` is the roughness of the element whose id is `i + 1`.
/// Returns the number of retagged elements.
pub fn rewrite_mesh(mesh: &mut Mesh, classes: &ClassTable, roughness: &[f64]) -> Result<usize> {
    let ground = mesh
        .groups
        .iter()
        .position(|g| g.dim == GROUND_GROUP_DIM && g.id == GROUND_GROUP_ID)
        .ok_or(StageError::MissingGroundGroup(GROUND_GROUP_ID))?;
    mesh.groups.remove(ground);

    // New declarations go in front of the volume group, which is declared last.
    let at = mesh.groups.len().saturating_sub(1);
    let declarations = classes
        .iter()
        .map(|c| PhysicalGroup::new(2, c.ground_id, c.ground_label()))
        .chain(
            classes
                .iter()
                .map(|c| PhysicalGroup::new(3, c.canopy_id, c.canopy_label())),
        );
    let volume = mesh.groups.split_off(at);
    mesh.groups.extend(declarations);
    mesh.groups.extend(volume);

    let mut retagged = 0;
    for element in &mut mesh.elements {
        if element.kind != KIND_TRIANGLE || element.physical() != Some(GROUND_GROUP_ID) {
            continue;
        }

        let value = element
            .id
            .checked_sub(1)
            .and_then(|index| roughness.get(index))
            .copied()
            .ok_or(StageError::MissingSample {
                element: element.id,
                record: element.id,
            })?;

        let class = classes
            .lookup(value)
            .ok_or(StageError::UnknownRoughnessClass {
                element: element.id,
                value,
            })?;

        element.set_physical(class.ground_id);
        retagged += 1;
    }

    Ok(retagged)
}

/// `_ground_bc`: one `%7.5f` class value per line, in class order.
pub fn write_ground_bc<W: Write>(classes: &ClassTable, w: &mut W) -> std::io::Result<()> {
    for class in classes {
        writeln!(w, "{class}")?;
    }
    Ok(())
}

/// `rough` stage: `<code>.msh2` + `<code>_roughness` -> `<code>_rough.msh2` + `<code>_ground_bc`.
pub fn run(ctx: &StageContext<'_>) -> Result<StageReport> {
    let spec = ctx.prepare(StageKind::Rough)?;

    let roughness = read_roughness_column(ctx.file("{code}_roughness"))?;
    let classes = ClassTable::from_values(&roughness);
    ctx.report(0.2);

    let mut mesh = Mesh::read(ctx.file("{code}.msh2"))?;
    ctx.report(0.5);

    let retagged = rewrite_mesh(&mut mesh, &classes, &roughness)?;
    ctx.report(0.8);

    let rough = StagedOutput::write(&ctx.file("{code}_rough.msh2"), |w| mesh.write_to(w))?;
    let bc = StagedOutput::write(&ctx.file("{code}_ground_bc"), |w| {
        write_ground_bc(&classes, w)
    })?;
    commit_all([rough, bc])?;

    info!(
        "{}: {} roughness classes, {} ground elements retagged",
        ctx.code,
        classes.len(),
        retagged
    );
    ctx.report(1.0);

    Ok(StageReport::new(
        ctx,
        spec,
        format!("{} classes, {retagged} ground elements", classes.len()),
    ))
}
