//! Whitespace-delimited field files that accompany a mesh.
//!
//! - `<code>_roughness`: one record per ground element. The last column is the
//!   roughness length; columns 5, 6, 7 (1-based) also carry `x y roughness`.
//! - `<code>_elevation`: one `x y z` record per ground node.
//! - `<code>_zsinfo`: per ground node, columns 3..=12 (1-based) hold the 1-based
//!   indices of up to ten neighbouring nodes, `-1` meaning "no neighbour".

use crate::error::{FormatError, Result};
use crate::parse_f64;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Number of neighbour slots per node in a `_zsinfo` record.
pub const NEIGHBOUR_SLOTS: usize = 10;

/// First 0-based column of the neighbour slots in a `_zsinfo` record.
const NEIGHBOUR_FIRST_COLUMN: usize = 2;

/// 0-based columns of `x y roughness` in a `_roughness` record.
const SAMPLE_COLUMNS: [usize; 3] = [4, 5, 6];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoughnessSample {
    pub x: f64,
    pub y: f64,
    pub roughness: f64,
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| FormatError::io(path, e))
}

#[cold]
fn syntax(path: &Path, line: usize, message: String) -> FormatError {
    FormatError::Syntax {
        origin: path.display().to_string(),
        line,
        message,
    }
}

/// Roughness from the last column of every record, in file order.
///
/// Record `i` (0-based) belongs to the element whose id is `i + 1`, so no
/// record may be skipped: a blank line is an error rather than a gap.
pub fn read_roughness_column<P: AsRef<Path>>(path: P) -> Result<Vec<f64>> {
    let path = path.as_ref();
    let text = read_text(path)?;

    text.lines()
        .enumerate()
        .map(|(index, line)| {
            let last = line
                .split_whitespace()
                .last()
                .ok_or_else(|| syntax(path, index + 1, "empty roughness record".into()))?;
            parse_f64(last).map_err(|message| syntax(path, index + 1, message))
        })
        .collect()
}

/// Positioned samples from columns 5, 6, 7 of every record, in file order.
pub fn read_roughness_samples<P: AsRef<Path>>(path: P) -> Result<Vec<RoughnessSample>> {
    let path = path.as_ref();
    let text = read_text(path)?;

    let mut samples = Vec::new();
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() <= SAMPLE_COLUMNS[2] {
            return Err(syntax(
                path,
                index + 1,
                format!("expected at least {} columns, found {}", SAMPLE_COLUMNS[2] + 1, values.len()),
            ));
        }

        let field = |column: usize| {
            parse_f64(values[column]).map_err(|message| syntax(path, index + 1, message))
        };

        samples.push(RoughnessSample {
            x: field(SAMPLE_COLUMNS[0])?,
            y: field(SAMPLE_COLUMNS[1])?,
            roughness: field(SAMPLE_COLUMNS[2])?,
        });
    }

    Ok(samples)
}

/// Ground node positions and elevations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ElevationField {
    pub points: Vec<[f64; 3]>,
}

impl ElevationField {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_text(path)?;

        let mut points = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let mut parts = line.split_whitespace();
            let mut coord = || -> Result<f64> {
                let raw = parts
                    .next()
                    .ok_or_else(|| syntax(path, index + 1, "expected `x y z`".into()))?;
                parse_f64(raw).map_err(|message| syntax(path, index + 1, message))
            };

            points.push([coord()?, coord()?, coord()?]);
        }

        Ok(Self { points })
    }

    /// Tab-separated `%15.2f` columns, one node per line.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for [x, y, z] in &self.points {
            writeln!(w, "{x:15.2}\t{y:15.2}\t{z:15.2}")?;
        }
        Ok(())
    }

    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|e| FormatError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|_| writer.flush())
            .map_err(|e| FormatError::io(path, e))
    }
}

/// Fixed-width neighbour lists, stored as 0-based indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NeighbourTable {
    slots: Vec<Option<usize>>,
}

impl NeighbourTable {
    /// Build from per-node lists of 1-based indices where `-1` marks an empty slot.
    pub fn from_one_based(rows: &[[i64; NEIGHBOUR_SLOTS]]) -> Self {
        let slots = rows
            .iter()
            .flat_map(|row| row.iter())
            .map(|&index| (index > 0).then(|| index as usize - 1))
            .collect();
        Self { slots }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = read_text(path)?;

        let mut rows = Vec::new();
        for (index, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let values: Vec<&str> = line.split_whitespace().collect();
            let end = NEIGHBOUR_FIRST_COLUMN + NEIGHBOUR_SLOTS;
            if values.len() < end {
                return Err(syntax(
                    path,
                    index + 1,
                    format!("expected at least {end} columns, found {}", values.len()),
                ));
            }

            let mut row = [-1i64; NEIGHBOUR_SLOTS];
            for (slot, raw) in row.iter_mut().zip(&values[NEIGHBOUR_FIRST_COLUMN..end]) {
                let value = parse_f64(raw).map_err(|message| syntax(path, index + 1, message))?;
                if value.fract() != 0.0 {
                    return Err(syntax(path, index + 1, format!("neighbour index `{raw}` is not integral")));
                }
                *slot = value as i64;
            }
            rows.push(row);
        }

        Ok(Self::from_one_based(&rows))
    }

    pub fn len(&self) -> usize {
        self.slots.len() / NEIGHBOUR_SLOTS
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 0-based neighbours of `node`, sentinel slots skipped.
    pub fn neighbours(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        let start = node * NEIGHBOUR_SLOTS;
        self.slots[start..start + NEIGHBOUR_SLOTS]
            .iter()
            .filter_map(|slot| *slot)
    }

    /// Largest referenced index, if any; used to check a table against its field.
    pub fn max_index(&self) -> Option<usize> {
        self.slots.iter().filter_map(|slot| *slot).max()
    }
}
