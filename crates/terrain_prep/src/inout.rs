//! Inlet/outlet boundary attribution.
//!
//! Each lateral boundary group of the elevated mesh gets the roughness of the
//! sample nearest to its centre, and its lowest elevation. The stage also
//! summarizes the terrain with an effective roughness over the whole domain
//! and over its inner square.

use crate::error::{Result, StageError};
use crate::stages::{commit_all, StageContext, StageKind, StageReport, StagedOutput};
use log::info;
use msh2::{read_roughness_samples, Mesh, RoughnessSample, KIND_QUADRANGLE};
use rstar::primitives::GeomWithData;
use rstar::RTree;
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InoutParams {
    /// Number of wind sectors; the mesh declares two boundary groups per sector.
    pub nsect: usize,
    pub reference_diameter: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryGroup {
    pub id: i64,
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub z_min: f64,
}

/// Boundary groups in the order their first element appears.
///
/// The centre is taken from the first quadrangle of each group; later ones
/// only lower the minimum elevation.
pub fn collect_boundaries(mesh: &Mesh, nsect: usize) -> Result<Vec<BoundaryGroup>> {
    let candidates = &mesh.groups[1.min(mesh.groups.len())..];
    let candidates = &candidates[..(2 * nsect).min(candidates.len())];

    let mut groups: Vec<BoundaryGroup> = Vec::new();
    let mut seen: HashMap<i64, usize> = HashMap::new();

    for element in mesh.elements.iter().filter(|e| e.kind == KIND_QUADRANGLE) {
        if element.nodes.len() != 4 {
            return Err(StageError::ElementShape {
                element: element.id,
                expected: 4,
                found: element.nodes.len(),
            });
        }

        let mut corners = [[0.0f64; 3]; 4];
        for (corner, &node_id) in corners.iter_mut().zip(&element.nodes) {
            let node = mesh.node(node_id).ok_or(StageError::DanglingNode {
                element: element.id,
                node: node_id,
            })?;
            *corner = [node.x, node.y, node.z];
        }
        let z_min = corners.iter().map(|c| c[2]).fold(f64::INFINITY, f64::min);

        let id = element
            .physical()
            .ok_or(StageError::UnknownBoundary(0))?;

        if let Some(&index) = seen.get(&id) {
            let group = &mut groups[index];
            group.z_min = group.z_min.min(z_min);
            continue;
        }

        let declared = candidates
            .iter()
            .find(|g| g.id == id)
            .ok_or(StageError::UnknownBoundary(id))?;

        seen.insert(id, groups.len());
        groups.push(BoundaryGroup {
            id,
            label: declared.label.clone(),
            x: corners.iter().map(|c| c[0]).sum::<f64>() / 4.0,
            y: corners.iter().map(|c| c[1]).sum::<f64>() / 4.0,
            z_min,
        });
    }

    Ok(groups)
}

/// Planar nearest-sample lookup over the roughness samples.
pub struct SampleIndex<'a> {
    samples: &'a [RoughnessSample],
    tree: RTree<GeomWithData<[f64; 2], usize>>,
}

impl<'a> SampleIndex<'a> {
    pub fn new(samples: &'a [RoughnessSample]) -> Self {
        let points = samples
            .iter()
            .enumerate()
            .map(|(index, s)| GeomWithData::new([s.x, s.y], index))
            .collect();
        Self {
            samples,
            tree: RTree::bulk_load(points),
        }
    }

    /// Nearest sample to `(x, y)`; among equidistant samples the one earliest
    /// in file order wins.
    pub fn nearest(&self, x: f64, y: f64) -> Option<&'a RoughnessSample> {
        let mut best: Option<(f64, usize)> = None;
        for (point, distance_2) in self.tree.nearest_neighbor_iter_with_distance_2(&[x, y]) {
            match best {
                Some((closest, _)) if distance_2 > closest => break,
                Some((_, index)) if point.data >= index => {}
                _ => best = Some((distance_2, point.data)),
            }
        }
        best.map(|(_, index)| &self.samples[index])
    }
}

/// `10 · exp(-1 / sqrt(mean(1 / ln(10/r)²)))`, the roughness whose log-law
/// profile matches the mean of the samples'. `None` for no samples.
pub fn effective_roughness<I>(roughness: I) -> Option<f64>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = roughness.into_iter().fold((0.0, 0usize), |(sum, count), r| {
        let log = (10.0 / r).ln();
        (sum + 1.0 / (log * log), count + 1)
    });
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    Some(10.0 * (-1.0 / mean.sqrt()).exp())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoughnessSummary {
    /// Samples inside the inner square of half-side `(Dref / √2) / 2`.
    pub inner_count: usize,
    pub effective_total: f64,
    pub effective_inner: f64,
}

pub fn summarize(samples: &[RoughnessSample], reference_diameter: f64) -> Result<RoughnessSummary> {
    let lim = reference_diameter / std::f64::consts::SQRT_2 / 2.0;
    let inner = || {
        samples
            .iter()
            .filter(move |s| s.x.abs() < lim && s.y.abs() < lim)
    };

    let effective_total = effective_roughness(samples.iter().map(|s| s.roughness))
        .ok_or(StageError::EmptySelection("no roughness samples"))?;
    let effective_inner = effective_roughness(inner().map(|s| s.roughness))
        .ok_or(StageError::EmptySelection("no roughness sample inside the reference square"))?;

    Ok(RoughnessSummary {
        inner_count: inner().count(),
        effective_total,
        effective_inner,
    })
}

/// One line per group: `label%15.2f(z)\t%15.4f(r1)\t%15.4f(r2)`.
pub fn write_inout_bc<W: Write>(
    groups: &[BoundaryGroup],
    index: &SampleIndex<'_>,
    w: &mut W,
) -> std::io::Result<()> {
    for group in groups {
        let primary = index.nearest(group.x, group.y).map_or(0.0, |s| s.roughness);
        // Upwind sector averaging is not modelled; both columns carry the nearest value.
        let secondary = primary;
        writeln!(w, "{}{:15.2}\t{:15.4}\t{:15.4}", group.label, group.z_min, primary, secondary)?;
    }
    Ok(())
}

/// `inout_param_<code>`: inner sample count, then both effective roughness
/// values with twelve significant digits.
pub fn write_inout_param<W: Write>(summary: &RoughnessSummary, w: &mut W) -> std::io::Result<()> {
    writeln!(w, "{}", summary.inner_count)?;
    writeln!(w, "{}", format_g12(summary.effective_total))?;
    writeln!(w, "{}", format_g12(summary.effective_inner))
}

/// `%.12g`, keeping a trailing `.0` on integral values: `0.1`, `2.0`, `1e-05`.
fn format_g12(value: f64) -> String {
    const DIGITS: i32 = 12;
    if !value.is_finite() {
        return value.to_string().to_lowercase();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_owned();
    }

    // Rounding to the significant digits first decides the exponent, as %g does.
    let scientific = format!("{:.*e}", (DIGITS - 1) as usize, value);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= DIGITS {
        let mantissa = mantissa.trim_end_matches('0').trim_end_matches('.');
        let sign = if exponent < 0 { '-' } else { '+' };
        return format!("{mantissa}e{sign}{:02}", exponent.abs());
    }

    let fixed = format!("{:.*}", (DIGITS - 1 - exponent) as usize, value);
    if !fixed.contains('.') {
        return fixed + ".0";
    }
    let trimmed = fixed.trim_end_matches('0');
    if trimmed.ends_with('.') {
        format!("{trimmed}0")
    } else {
        trimmed.to_owned()
    }
}

/// `inout` stage: `<code>_elevation.msh2` + `<code>_roughness` ->
/// `<code>_inout_bc` + `inout_param_<code>`.
pub fn run(ctx: &StageContext<'_>, params: &InoutParams) -> Result<StageReport> {
    let spec = ctx.prepare(StageKind::Inout)?;

    let samples = read_roughness_samples(ctx.file("{code}_roughness"))?;
    let summary = summarize(&samples, params.reference_diameter)?;
    ctx.report(0.2);

    let mesh = Mesh::read(ctx.file("{code}_elevation.msh2"))?;
    ctx.report(0.5);

    let groups = collect_boundaries(&mesh, params.nsect)?;
    let index = SampleIndex::new(&samples);
    ctx.report(0.7);

    let bc = StagedOutput::write(&ctx.file("{code}_inout_bc"), |w| {
        write_inout_bc(&groups, &index, w)
    })?;
    let param = StagedOutput::write(&ctx.file("inout_param_{code}"), |w| {
        write_inout_param(&summary, w)
    })?;
    commit_all([bc, param])?;

    info!(
        "{}: {} boundary groups, effective roughness {:.4} (inner {:.4}, {} samples)",
        ctx.code,
        groups.len(),
        summary.effective_total,
        summary.effective_inner,
        summary.inner_count
    );
    ctx.report(1.0);

    Ok(StageReport::new(
        ctx,
        spec,
        format!(
            "{} boundary groups, r_eff {:.4} / inner {:.4}",
            groups.len(),
            summary.effective_total,
            summary.effective_inner
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, INOUT_MESH};
    use crate::progress::MemoryProgress;
    use approx::assert_relative_eq;
    use std::fs;

    fn sample(x: f64, y: f64, roughness: f64) -> RoughnessSample {
        RoughnessSample { x, y, roughness }
    }

    #[test]
    fn groups_follow_first_seen_order_and_keep_lowest_z() {
        let mesh = Mesh::parse(INOUT_MESH, "inout").unwrap();
        let groups = collect_boundaries(&mesh, 1).unwrap();

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].label, "outlet_0");
        assert_eq!(groups[1].label, "inlet_0");

        // First outlet quad: corners 1, 2, 6, 5.
        assert_relative_eq!(groups[0].x, 50.0);
        assert_relative_eq!(groups[0].y, -100.0);
        // A later outlet quad reaches down to z = 2.
        assert_relative_eq!(groups[0].z_min, 2.0);
        assert_relative_eq!(groups[1].z_min, 5.0);
    }

    #[test]
    fn undeclared_boundary_is_rejected() {
        let mesh = Mesh::parse(INOUT_MESH, "inout").unwrap();
        // With no sectors there are no candidate groups at all.
        let err = collect_boundaries(&mesh, 0).unwrap_err();
        assert!(matches!(err, StageError::UnknownBoundary(12)));
    }

    #[test]
    fn nearest_prefers_the_earliest_sample_on_ties() {
        let samples = [
            sample(10.0, 0.0, 0.3),
            sample(-10.0, 0.0, 0.1),
            sample(0.0, 10.0, 0.2),
            sample(50.0, 50.0, 0.9),
        ];
        let index = SampleIndex::new(&samples);

        assert_eq!(index.nearest(0.0, 0.0).map(|s| s.roughness), Some(0.3));
        assert_eq!(index.nearest(-9.0, 1.0).map(|s| s.roughness), Some(0.1));
        assert_eq!(index.nearest(40.0, 40.0).map(|s| s.roughness), Some(0.9));
        assert!(SampleIndex::new(&[]).nearest(0.0, 0.0).is_none());
    }

    #[test]
    fn effective_roughness_of_a_uniform_field_is_itself() {
        assert_relative_eq!(effective_roughness([0.05; 4]).unwrap(), 0.05, epsilon = 1e-12);
        assert!(effective_roughness(std::iter::empty()).is_none());
    }

    #[test]
    fn effective_roughness_mixes_in_log_space() {
        let r = effective_roughness([0.01, 1.0]).unwrap();
        // 1/ln(1000)^2 and 1/ln(10)^2 averaged, then mapped back.
        let mean = (1.0 / 1000f64.ln().powi(2) + 1.0 / 10f64.ln().powi(2)) / 2.0;
        assert_relative_eq!(r, 10.0 * (-1.0 / mean.sqrt()).exp(), epsilon = 1e-12);
        assert!(r > 0.01 && r < 1.0);
    }

    #[test]
    fn summary_counts_the_inner_square() {
        // lim = (200 / √2) / 2 ≈ 70.7
        let samples = [
            sample(0.0, 0.0, 0.1),
            sample(70.0, -70.0, 0.1),
            sample(71.0, 0.0, 1.0),
            sample(0.0, -500.0, 1.0),
        ];
        let summary = summarize(&samples, 200.0).unwrap();

        assert_eq!(summary.inner_count, 2);
        assert_relative_eq!(summary.effective_inner, 0.1, epsilon = 1e-12);
        assert!(summary.effective_total > 0.1);
    }

    #[test]
    fn empty_inner_square_is_an_error() {
        let samples = [sample(500.0, 0.0, 0.1)];
        assert!(matches!(
            summarize(&samples, 200.0),
            Err(StageError::EmptySelection(_))
        ));
    }

    #[test]
    fn bc_lines_are_fixed_width() {
        let groups = [BoundaryGroup {
            id: 12,
            label: "inlet_0".into(),
            x: 0.0,
            y: 0.0,
            z_min: 12.346,
        }];
        let samples = [sample(1.0, 1.0, 0.05)];
        let mut out = Vec::new();
        write_inout_bc(&groups, &SampleIndex::new(&samples), &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("inlet_0{:>15}\t{:>15}\t{:>15}\n", "12.35", "0.0500", "0.0500")
        );
    }

    #[test]
    fn stage_writes_boundaries_and_summary() {
        let folder = fixtures::folder();
        let files = folder.path().join("FILES");
        fs::write(files.join("fine_elevation.msh2"), INOUT_MESH).unwrap();
        fs::write(
            files.join("fine_roughness"),
            "1 0 0 0 0.0 0.0 0.1\n2 0 0 0 0.0 -100.0 0.5\n3 0 0 0 0.0 100.0 0.2\n",
        )
        .unwrap();

        let progress = MemoryProgress::new();
        let params = InoutParams {
            nsect: 1,
            reference_diameter: 200.0,
        };
        fixtures::with_context(folder.path(), "fine", &progress, |ctx| run(ctx, &params)).unwrap();

        let bc = fs::read_to_string(files.join("fine_inout_bc")).unwrap();
        let lines: Vec<&str> = bc.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("outlet_0"));
        assert!(lines[0].ends_with("0.5000\t         0.5000"));
        assert!(lines[1].starts_with("inlet_0"));
        assert!(lines[1].ends_with("0.2000"));

        let param = fs::read_to_string(files.join("inout_param_fine")).unwrap();
        assert_eq!(param.lines().next(), Some("1"));
        assert!(progress.snapshot("run").is_complete());
    }

    #[test]
    fn param_floats_keep_twelve_significant_digits() {
        assert_eq!(format_g12(0.1), "0.1");
        assert_eq!(format_g12(2.0), "2.0");
        assert_eq!(format_g12(0.123456789012345), "0.123456789012");
        assert_eq!(format_g12(12.5), "12.5");
        assert_eq!(format_g12(0.0001), "0.0001");
        assert_eq!(format_g12(1e-5), "1e-05");
        assert_eq!(format_g12(123456789012345.0), "1.23456789012e+14");
        assert_eq!(format_g12(0.0), "0.0");

        let summary = RoughnessSummary {
            inner_count: 3,
            effective_total: 0.1,
            effective_inner: 1.0 / 3.0,
        };
        let mut out = Vec::new();
        write_inout_param(&summary, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "3\n0.1\n0.333333333333\n");
    }
}
