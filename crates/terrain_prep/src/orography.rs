//! Orography smoothing around the domain edge.
//!
//! The ground elevation is smoothed globally, then the outer ring of the
//! circular domain is brought down to a flat plateau at the mean outer
//! elevation so inflow boundaries see level ground:
//!
//! ```text
//!   d <= radflat             untouched
//!   radflat < d <= limflat   linear blend from the terrain to the plateau
//!   limflat < d              plateau at zmoy
//! ```
//!
//! with `limflat = D/2 - 500` and `radflat = (Dref/2 + limflat) / 2`, `d` the
//! planar distance from the domain centre.

use crate::error::{Result, StageError};
use crate::progress::Throttle;
use crate::stages::{commit_all, StageContext, StageKind, StageReport, StagedOutput};
use log::{debug, info};
use msh2::{ElevationField, NeighbourTable};
use std::f64::consts::PI;
use std::io::Write;

/// Smoothing is skipped for blend factors at or below this value.
pub const MIN_BLEND: f64 = 0.01;
/// Jacobi passes applied inside the flattening radius after zoning.
pub const INLET_PASSES: usize = 10;
/// Width of the plateau band between the domain edge and `limflat`.
pub const PLATEAU_WIDTH: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InletMode {
    /// Flatten the outer ring, then re-smooth inside it.
    FlattenAndSmooth,
    /// Leave the outer ring alone.
    Disabled,
    /// Re-smooth inside the flattening radius without flattening.
    SmoothOnly,
}

impl InletMode {
    /// `0` flattens and smooths, `1` disables, `2` and above only smooth.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => InletMode::FlattenAndSmooth,
            c if c >= 2 => InletMode::SmoothOnly,
            _ => InletMode::Disabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrographyParams {
    pub iterations: usize,
    pub blend: f64,
    pub inlet_mode: InletMode,
    pub domain_diameter: f64,
    pub reference_diameter: f64,
    /// Reduced meshes skip zoning altogether.
    pub reduced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zoning {
    pub limflat: f64,
    pub radflat: f64,
}

impl Zoning {
    pub fn new(domain_diameter: f64, reference_diameter: f64) -> Self {
        let limflat = domain_diameter / 2.0 - PLATEAU_WIDTH;
        Self {
            limflat,
            radflat: (reference_diameter / 2.0 + limflat) / 2.0,
        }
    }
}

#[inline]
fn planar_radius(point: &[f64; 3]) -> f64 {
    point[0].hypot(point[1])
}

/// Plateau elevation and rim resolution, the values handed to later meshing steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrographySummary {
    pub zmoy: f64,
    pub rescoarse: f64,
    pub inlet_mode: InletMode,
}

/// The table must have one row per node and only reference existing nodes.
pub fn check_neighbours(field: &ElevationField, table: &NeighbourTable) -> Result<()> {
    if table.len() != field.len() {
        return Err(StageError::NeighbourMismatch {
            nodes: field.len(),
            detail: format!("has {} rows", table.len()),
        });
    }
    if let Some(max) = table.max_index() {
        if max >= field.len() {
            return Err(StageError::NeighbourMismatch {
                nodes: field.len(),
                detail: format!("references node {}", max + 1),
            });
        }
    }
    Ok(())
}

/// One Jacobi pass: every selected node moves toward the mean of its
/// neighbours, reading only pre-pass values. Nodes without neighbours stay put.
fn smooth_pass<F>(field: &mut ElevationField, table: &NeighbourTable, blend: f64, selected: &F)
where
    F: Fn(&[f64; 3]) -> bool,
{
    let before: Vec<f64> = field.points.iter().map(|p| p[2]).collect();

    for (index, point) in field.points.iter_mut().enumerate() {
        if !selected(point) {
            continue;
        }
        let (sum, count) = table
            .neighbours(index)
            .fold((0.0, 0usize), |(sum, count), n| (sum + before[n], count + 1));
        if count > 0 {
            point[2] = (1.0 - blend) * before[index] + blend * sum / count as f64;
        }
    }
}

/// `passes` global passes, only when `blend` exceeds [`MIN_BLEND`].
pub fn smooth_global(field: &mut ElevationField, table: &NeighbourTable, blend: f64, passes: usize) {
    smooth_global_with(field, table, blend, passes, |_| {});
}

/// [`smooth_global`], calling `on_pass` with the 1-based number of each finished pass.
pub fn smooth_global_with<F>(
    field: &mut ElevationField,
    table: &NeighbourTable,
    blend: f64,
    passes: usize,
    mut on_pass: F,
) where
    F: FnMut(usize),
{
    if blend <= MIN_BLEND {
        return;
    }
    for pass in 1..=passes {
        smooth_pass(field, table, blend, &|_: &[f64; 3]| true);
        on_pass(pass);
    }
}

/// `(zmoy, rescoarse)` of an unreduced field.
pub fn zone_statistics(field: &ElevationField, zoning: &Zoning, domain_diameter: f64) -> Result<(f64, f64)> {
    let (sum, outer) = field
        .points
        .iter()
        .filter(|p| planar_radius(p) > zoning.radflat)
        .fold((0.0, 0usize), |(sum, count), p| (sum + p[2], count + 1));
    if outer == 0 {
        return Err(StageError::EmptySelection("no ground node beyond the blending radius"));
    }

    let rim_radius = domain_diameter / 2.0;
    let rim = field
        .points
        .iter()
        .filter(|p| planar_radius(p) > rim_radius - 1.0)
        .count();
    if rim == 0 {
        return Err(StageError::EmptySelection("no ground node on the domain rim"));
    }

    Ok((sum / outer as f64, 2.0 * PI * rim_radius / rim as f64))
}

/// Set the plateau beyond `limflat` and blend the ring down to it.
pub fn flatten(field: &mut ElevationField, zoning: &Zoning, zmoy: f64) {
    let Zoning { limflat, radflat } = *zoning;
    let width = limflat - radflat;

    for point in &mut field.points {
        let d = planar_radius(point);
        if d > limflat {
            point[2] = zmoy;
        } else if d > radflat {
            point[2] = zmoy * (d - radflat) / width + point[2] * (limflat - d) / width;
        }
    }
}

/// [`INLET_PASSES`] passes over the nodes within `limflat`.
pub fn smooth_inlet(field: &mut ElevationField, table: &NeighbourTable, zoning: &Zoning, blend: f64) {
    let limflat = zoning.limflat;
    let inside = move |p: &[f64; 3]| planar_radius(p) <= limflat;
    for _ in 0..INLET_PASSES {
        smooth_pass(field, table, blend, &inside);
    }
}

/// Whole smoothing sequence on an in-memory field.
pub fn smooth_orography(
    field: &mut ElevationField,
    table: &NeighbourTable,
    params: &OrographyParams,
) -> Result<OrographySummary> {
    check_neighbours(field, table)?;
    smooth_global(field, table, params.blend, params.iterations);
    let (zmoy, rescoarse, inlet_mode) = apply_zoning(field, params)?;
    finish_inlet(field, table, params, inlet_mode);

    Ok(OrographySummary {
        zmoy,
        rescoarse,
        inlet_mode,
    })
}

fn apply_zoning(field: &mut ElevationField, params: &OrographyParams) -> Result<(f64, f64, InletMode)> {
    if params.reduced {
        return Ok((0.0, 0.0, InletMode::SmoothOnly));
    }

    let zoning = Zoning::new(params.domain_diameter, params.reference_diameter);
    let (zmoy, rescoarse) = zone_statistics(field, &zoning, params.domain_diameter)?;
    if params.inlet_mode == InletMode::FlattenAndSmooth {
        flatten(field, &zoning, zmoy);
    }
    Ok((zmoy, rescoarse, params.inlet_mode))
}

fn finish_inlet(field: &mut ElevationField, table: &NeighbourTable, params: &OrographyParams, mode: InletMode) {
    if mode == InletMode::Disabled {
        return;
    }
    let zoning = Zoning::new(params.domain_diameter, params.reference_diameter);
    smooth_inlet(field, table, &zoning, params.blend);
}

/// `propagate_param_<code>`: `%.1f` plateau elevation and rim resolution.
pub fn write_propagate_param<W: Write>(summary: &OrographySummary, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "{:.1}", summary.zmoy)?;
    writeln!(w, "{:.1}", summary.rescoarse)
}

/// `oro` stage: rewrites `<code>_elevation` in place and writes `propagate_param_<code>`.
pub fn run(ctx: &StageContext<'_>, params: &OrographyParams) -> Result<StageReport> {
    const STEPS: usize = 4;
    let spec = ctx.prepare(StageKind::Oro)?;

    ctx.report_step(1, STEPS);
    let mut field = ElevationField::read(ctx.file("{code}_elevation"))?;
    let table = NeighbourTable::read(ctx.file("{code}_zsinfo"))?;
    check_neighbours(&field, &table)?;
    debug!("{}: {} ground nodes", ctx.code, field.len());

    ctx.report_step(2, STEPS);
    let mut throttle = Throttle::new(1);
    smooth_global_with(&mut field, &table, params.blend, params.iterations, |pass| {
        if throttle.should(pass) {
            let within = pass as f64 / params.iterations as f64;
            ctx.report((1.0 + within) / STEPS as f64);
        }
    });

    ctx.report_step(3, STEPS);
    let (zmoy, rescoarse, inlet_mode) = apply_zoning(&mut field, params)?;

    ctx.report_step(4, STEPS);
    finish_inlet(&mut field, &table, params, inlet_mode);

    let summary = OrographySummary {
        zmoy,
        rescoarse,
        inlet_mode,
    };
    let elevation = StagedOutput::write(&ctx.file("{code}_elevation"), |w| field.write_to(w))?;
    let param = StagedOutput::write(&ctx.file("propagate_param_{code}"), |w| {
        write_propagate_param(&summary, w)
    })?;
    // The elevation file replaces the input, so it is renamed last.
    commit_all([param, elevation])?;

    info!(
        "{}: zmoy {:.1}, rescoarse {:.1}, inlet {:?}",
        ctx.code, zmoy, rescoarse, inlet_mode
    );
    ctx.report(1.0);

    Ok(StageReport::new(
        ctx,
        spec,
        format!("zmoy {zmoy:.1}, rescoarse {rescoarse:.1}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use crate::progress::MemoryProgress;
    use approx::assert_relative_eq;
    use std::fs;

    const NONE: [i64; 10] = [-1; 10];

    fn row(neighbours: &[i64]) -> [i64; 10] {
        let mut row = NONE;
        row[..neighbours.len()].copy_from_slice(neighbours);
        row
    }

    fn field(points: &[[f64; 3]]) -> ElevationField {
        ElevationField {
            points: points.to_vec(),
        }
    }

    fn elevations(field: &ElevationField) -> Vec<f64> {
        field.points.iter().map(|p| p[2]).collect()
    }

    /// D = 2000, Dref = 600: limflat = 500, radflat = 400.
    fn params(inlet_mode: InletMode) -> OrographyParams {
        OrographyParams {
            iterations: 0,
            blend: 0.5,
            inlet_mode,
            domain_diameter: 2000.0,
            reference_diameter: 600.0,
            reduced: false,
        }
    }

    fn zoned_field() -> ElevationField {
        field(&[
            [0.0, 0.0, 10.0],
            [450.0, 0.0, 20.0],
            [0.0, 600.0, 40.0],
            [999.5, 0.0, 60.0],
        ])
    }

    #[test]
    fn jacobi_pass_reads_the_previous_field() {
        let mut f = field(&[[0.0, 0.0, 0.0], [1.0, 0.0, 3.0], [2.0, 0.0, 6.0]]);
        let table = NeighbourTable::from_one_based(&[row(&[2]), row(&[1, 3]), row(&[2])]);

        smooth_global(&mut f, &table, 0.5, 1);

        assert_eq!(elevations(&f), vec![1.5, 3.0, 4.5]);
    }

    #[test]
    fn isolated_node_keeps_its_elevation() {
        let mut f = field(&[[0.0, 0.0, 7.0], [1.0, 0.0, 1.0], [2.0, 0.0, 3.0]]);
        let table = NeighbourTable::from_one_based(&[NONE, row(&[3]), row(&[2])]);

        smooth_global(&mut f, &table, 0.5, 3);

        assert_eq!(f.points[0][2], 7.0);
        assert_relative_eq!(f.points[1][2], 2.0);
    }

    #[test]
    fn small_blend_skips_global_smoothing() {
        let mut f = field(&[[0.0, 0.0, 0.0], [1.0, 0.0, 10.0]]);
        let table = NeighbourTable::from_one_based(&[row(&[2]), row(&[1])]);

        smooth_global(&mut f, &table, MIN_BLEND, 5);

        assert_eq!(elevations(&f), vec![0.0, 10.0]);
    }

    #[test]
    fn pass_callback_sees_every_pass() {
        let mut f = field(&[[0.0, 0.0, 0.0], [1.0, 0.0, 10.0]]);
        let table = NeighbourTable::from_one_based(&[row(&[2]), row(&[1])]);

        let mut seen = Vec::new();
        smooth_global_with(&mut f, &table, 0.5, 3, |pass| seen.push(pass));
        assert_eq!(seen, vec![1, 2, 3]);

        seen.clear();
        smooth_global_with(&mut f, &table, MIN_BLEND, 3, |pass| seen.push(pass));
        assert!(seen.is_empty());
    }

    #[test]
    fn zoning_radii() {
        let zoning = Zoning::new(2000.0, 600.0);
        assert_eq!(zoning.limflat, 500.0);
        assert_eq!(zoning.radflat, 400.0);
    }

    #[test]
    fn flatten_sets_plateau_and_blends_the_ring() {
        let mut f = zoned_field();
        let table = NeighbourTable::from_one_based(&[NONE; 4]);

        let summary =
            smooth_orography(&mut f, &table, &params(InletMode::FlattenAndSmooth)).unwrap();

        assert_relative_eq!(summary.zmoy, 40.0);
        assert_relative_eq!(summary.rescoarse, 2.0 * PI * 1000.0);
        assert_eq!(elevations(&f), vec![10.0, 30.0, 40.0, 40.0]);
    }

    #[test]
    fn disabled_mode_keeps_the_terrain() {
        let mut f = zoned_field();
        let table = NeighbourTable::from_one_based(&[row(&[2]), row(&[1]), NONE, NONE]);

        let summary = smooth_orography(&mut f, &table, &params(InletMode::Disabled)).unwrap();

        assert_relative_eq!(summary.zmoy, 40.0);
        assert_eq!(elevations(&f), vec![10.0, 20.0, 40.0, 60.0]);
    }

    #[test]
    fn smooth_only_touches_nodes_inside_limflat() {
        let mut f = zoned_field();
        let table =
            NeighbourTable::from_one_based(&[row(&[2]), row(&[1]), row(&[4]), row(&[3])]);

        smooth_orography(&mut f, &table, &params(InletMode::SmoothOnly)).unwrap();

        assert_relative_eq!(f.points[0][2], 15.0);
        assert_relative_eq!(f.points[1][2], 15.0);
        assert_eq!(f.points[2][2], 40.0);
        assert_eq!(f.points[3][2], 60.0);
    }

    #[test]
    fn zero_blend_leaves_the_terrain_unchanged() {
        let table = NeighbourTable::from_one_based(&[
            row(&[2, 3]),
            row(&[1, 4]),
            row(&[1, 4]),
            row(&[2, 3]),
        ]);
        for reduced in [false, true] {
            let mut f = zoned_field();
            let params = OrographyParams {
                iterations: 5,
                blend: 0.0,
                reduced,
                ..params(InletMode::SmoothOnly)
            };

            let summary = smooth_orography(&mut f, &table, &params).unwrap();

            assert_eq!(summary.inlet_mode, InletMode::SmoothOnly);
            assert_eq!(elevations(&f), elevations(&zoned_field()));
        }
    }

    #[test]
    fn reduced_mesh_skips_zoning_and_forces_inlet_smoothing() {
        let mut f = field(&[[0.0, 0.0, 0.0], [10.0, 0.0, 10.0], [900.0, 0.0, 99.0]]);
        let table = NeighbourTable::from_one_based(&[row(&[2]), row(&[1]), row(&[1])]);
        let params = OrographyParams {
            reduced: true,
            ..params(InletMode::Disabled)
        };

        let summary = smooth_orography(&mut f, &table, &params).unwrap();

        assert_eq!(summary.zmoy, 0.0);
        assert_eq!(summary.rescoarse, 0.0);
        assert_eq!(summary.inlet_mode, InletMode::SmoothOnly);
        assert_eq!(elevations(&f), vec![5.0, 5.0, 99.0]);
    }

    #[test]
    fn empty_outer_zone_is_an_error() {
        let mut f = field(&[[0.0, 0.0, 1.0], [10.0, 0.0, 2.0]]);
        let table = NeighbourTable::from_one_based(&[NONE; 2]);

        let err = smooth_orography(&mut f, &table, &params(InletMode::Disabled)).unwrap_err();
        assert!(matches!(err, StageError::EmptySelection(_)));
    }

    #[test]
    fn empty_rim_is_an_error() {
        let mut f = field(&[[0.0, 0.0, 1.0], [450.0, 0.0, 2.0]]);
        let table = NeighbourTable::from_one_based(&[NONE; 2]);

        let err = smooth_orography(&mut f, &table, &params(InletMode::Disabled)).unwrap_err();
        assert!(matches!(err, StageError::EmptySelection(m) if m.contains("rim")));
    }

    #[test]
    fn neighbour_table_must_match_the_field() {
        let f = field(&[[0.0, 0.0, 1.0], [1.0, 0.0, 2.0]]);

        let short = NeighbourTable::from_one_based(&[NONE]);
        assert!(matches!(
            check_neighbours(&f, &short),
            Err(StageError::NeighbourMismatch { nodes: 2, .. })
        ));

        let dangling = NeighbourTable::from_one_based(&[row(&[3]), NONE]);
        assert!(check_neighbours(&f, &dangling).is_err());
    }

    #[test]
    fn legacy_mode_codes() {
        assert_eq!(InletMode::from_code(0), InletMode::FlattenAndSmooth);
        assert_eq!(InletMode::from_code(1), InletMode::Disabled);
        assert_eq!(InletMode::from_code(2), InletMode::SmoothOnly);
        assert_eq!(InletMode::from_code(7), InletMode::SmoothOnly);
    }

    #[test]
    fn stage_rewrites_elevation_and_writes_summary() {
        let folder = fixtures::folder();
        let files = folder.path().join("FILES");
        fs::write(
            files.join("fine_elevation"),
            "0 0 10\n450 0 20\n0 600 40\n999.5 0 60\n",
        )
        .unwrap();
        let zsinfo = "0 0 -1 -1 -1 -1 -1 -1 -1 -1 -1 -1\n".repeat(4);
        fs::write(files.join("fine_zsinfo"), zsinfo).unwrap();

        let progress = MemoryProgress::new();
        let params = params(InletMode::FlattenAndSmooth);
        fixtures::with_context(folder.path(), "fine", &progress, |ctx| run(ctx, &params)).unwrap();

        let elevation = fs::read_to_string(files.join("fine_elevation")).unwrap();
        assert_eq!(
            elevation.lines().nth(1),
            Some(format!("{:>15}\t{:>15}\t{:>15}", "450.00", "0.00", "30.00").as_str())
        );
        assert_eq!(
            fs::read_to_string(files.join("propagate_param_fine")).unwrap(),
            "40.0\n6283.2\n"
        );
        assert!(progress.snapshot("run").is_complete());
    }
}
