//! MSH2: gmsh 2.2 ASCII meshes plus the plain-text field files that travel with them.
//!
//! Mesh layout (one record per line, positions derived from the counts):
//!   $MeshFormat
//!   2.2 0 8                      version line, kept verbatim
//!   $EndMeshFormat
//!   $PhysicalNames
//!   N                            physical group count
//!   dim id "label"               x N
//!   $EndPhysicalNames
//!   $Nodes
//!   P                            node count
//!   id x y z                     x P
//!   $EndNodes
//!   $Elements
//!   E                            element count
//!   id kind ntags tag.. node..   x E   (tag 0 = physical id, tag 1 = elementary id)
//!   $EndElements
//!
//! Every record keeps the line it was parsed from. Records that are not touched
//! after parsing are written back byte-for-byte, so a rewriter only changes the
//! lines it means to change.

mod error;
pub mod fields;

pub use error::{FormatError, Result};
pub use fields::{
    read_roughness_column, read_roughness_samples, ElevationField, NeighbourTable,
    RoughnessSample,
};

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// gmsh element type of a 3-node triangle.
pub const KIND_TRIANGLE: u32 = 2;
/// gmsh element type of a 4-node quadrangle.
pub const KIND_QUADRANGLE: u32 = 3;

/// A `dim id "label"` declaration in the `$PhysicalNames` section.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalGroup {
    pub dim: u8,
    pub id: i64,
    pub label: String,
    source: Option<String>,
}

impl PhysicalGroup {
    pub fn new(dim: u8, id: i64, label: impl Into<String>) -> Self {
        Self {
            dim,
            id,
            label: label.into(),
            source: None,
        }
    }

    pub fn render(&self) -> Cow<'_, str> {
        match &self.source {
            Some(line) => Cow::Borrowed(line),
            None => Cow::Owned(format!("{} {} \"{}\"", self.dim, self.id, self.label)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    source: String,
}

impl Node {
    pub fn render(&self) -> &str {
        &self.source
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: usize,
    pub kind: u32,
    tags: Vec<i64>,
    pub nodes: Vec<usize>,
    source: Option<String>,
}

impl Element {
    pub fn tags(&self) -> &[i64] {
        &self.tags
    }

    /// Physical group the element belongs to (first tag), if it carries tags.
    pub fn physical(&self) -> Option<i64> {
        self.tags.first().copied()
    }

    /// Replace the physical tag. The element is re-rendered from its fields on write.
    pub fn set_physical(&mut self, id: i64) {
        match self.tags.first_mut() {
            Some(tag) => *tag = id,
            None => self.tags.push(id),
        }
        self.source = None;
    }

    pub fn render(&self) -> Cow<'_, str> {
        if let Some(line) = &self.source {
            return Cow::Borrowed(line);
        }

        let mut out = format!("{} {} {}", self.id, self.kind, self.tags.len());
        for tag in &self.tags {
            out.push(' ');
            out.push_str(&tag.to_string());
        }
        for node in &self.nodes {
            out.push(' ');
            out.push_str(&node.to_string());
        }
        Cow::Owned(out)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    /// The version line between `$MeshFormat` and `$EndMeshFormat`.
    pub version: String,
    pub groups: Vec<PhysicalGroup>,
    pub nodes: Vec<Node>,
    pub elements: Vec<Element>,
}

impl Mesh {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FormatError::io(path, e))?;
        Self::parse(&text, &path.display().to_string())
    }

    /// Parse a mesh held in memory; `origin` names the input in error messages.
    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        let mut cursor = Cursor::new(text, origin);

        cursor.expect_marker("$MeshFormat")?;
        let version = cursor.next_line()?.1.to_owned();
        cursor.expect_marker("$EndMeshFormat")?;

        cursor.expect_marker("$PhysicalNames")?;
        let groups = cursor.section("$EndPhysicalNames", parse_group)?;

        cursor.expect_marker("$Nodes")?;
        let nodes = cursor.section("$EndNodes", parse_node)?;

        cursor.expect_marker("$Elements")?;
        let elements = cursor.section("$EndElements", parse_element)?;

        Ok(Self {
            version,
            groups,
            nodes,
            elements,
        })
    }

    /// Node by 1-based position, the way element records reference nodes.
    pub fn node(&self, id: usize) -> Option<&Node> {
        id.checked_sub(1).and_then(|index| self.nodes.get(index))
    }

    pub fn group(&self, id: i64) -> Option<&PhysicalGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        writeln!(w, "$MeshFormat")?;
        writeln!(w, "{}", self.version)?;
        writeln!(w, "$EndMeshFormat")?;

        writeln!(w, "$PhysicalNames")?;
        writeln!(w, "{}", self.groups.len())?;
        for group in &self.groups {
            writeln!(w, "{}", group.render())?;
        }
        writeln!(w, "$EndPhysicalNames")?;

        writeln!(w, "$Nodes")?;
        writeln!(w, "{}", self.nodes.len())?;
        for node in &self.nodes {
            writeln!(w, "{}", node.render())?;
        }
        writeln!(w, "$EndNodes")?;

        writeln!(w, "$Elements")?;
        writeln!(w, "{}", self.elements.len())?;
        for element in &self.elements {
            writeln!(w, "{}", element.render())?;
        }
        writeln!(w, "$EndElements")?;

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

/// Line cursor that tracks 1-based line numbers for diagnostics.
struct Cursor<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
    origin: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, origin: &'a str) -> Self {
        Self {
            lines: text.lines().enumerate(),
            origin,
        }
    }

    fn next_line(&mut self) -> Result<(usize, &'a str)> {
        match self.lines.next() {
            Some((index, line)) => Ok((index + 1, line)),
            None => Err(FormatError::UnexpectedEof {
                origin: self.origin.to_owned(),
            }),
        }
    }

    fn expect_marker(&mut self, marker: &str) -> Result<()> {
        let (line_no, line) = self.next_line()?;
        if line.trim() != marker {
            return Err(self.syntax(line_no, format!("expected `{marker}`, found `{}`", line.trim())));
        }
        Ok(())
    }

    /// Read a declared count followed by exactly that many records and the end marker.
    fn section<T>(
        &mut self,
        end_marker: &'static str,
        parse: fn(&str) -> std::result::Result<T, String>,
    ) -> Result<Vec<T>> {
        let (count_line_no, count_line) = self.next_line()?;
        let declared: usize = count_line
            .trim()
            .parse()
            .map_err(|_| self.syntax(count_line_no, format!("bad record count `{}`", count_line.trim())))?;

        let mut records = Vec::with_capacity(declared);
        while records.len() < declared {
            let (line_no, line) = self.next_line()?;
            if line.trim() == end_marker {
                return Err(FormatError::CountMismatch {
                    origin: self.origin.to_owned(),
                    section: end_marker,
                    declared,
                    found: records.len(),
                });
            }
            records.push(parse(line).map_err(|message| self.syntax(line_no, message))?);
        }

        let mut found = declared;
        loop {
            let (line_no, line) = self.next_line()?;
            if line.trim() == end_marker {
                break;
            }
            if line.trim_start().starts_with('$') {
                return Err(self.syntax(line_no, format!("expected `{end_marker}`")));
            }
            found += 1;
        }

        if found != declared {
            return Err(FormatError::CountMismatch {
                origin: self.origin.to_owned(),
                section: end_marker,
                declared,
                found,
            });
        }

        Ok(records)
    }

    #[cold]
    fn syntax(&self, line: usize, message: String) -> FormatError {
        FormatError::Syntax {
            origin: self.origin.to_owned(),
            line,
            message,
        }
    }
}

fn parse_group(line: &str) -> std::result::Result<PhysicalGroup, String> {
    let mut parts = line.split_whitespace();
    let dim = parts
        .next()
        .and_then(|s| s.parse::<u8>().ok())
        .ok_or_else(|| format!("bad group dimension in `{line}`"))?;
    let id = parts
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| format!("bad group id in `{line}`"))?;

    // Labels are quoted and may in principle contain blanks.
    let rest: Vec<&str> = parts.collect();
    let label = rest.join(" ");
    let label = label.trim_matches('"').to_owned();

    Ok(PhysicalGroup {
        dim,
        id,
        label,
        source: Some(line.to_owned()),
    })
}

fn parse_node(line: &str) -> std::result::Result<Node, String> {
    let mut parts = line.split_whitespace();
    let mut field = |name: &str| {
        parts
            .next()
            .ok_or_else(|| format!("missing node {name} in `{line}`"))
    };

    let id = field("id")?
        .parse::<usize>()
        .map_err(|_| format!("bad node id in `{line}`"))?;
    let x = parse_f64(field("x")?)?;
    let y = parse_f64(field("y")?)?;
    let z = parse_f64(field("z")?)?;

    Ok(Node {
        id,
        x,
        y,
        z,
        source: line.to_owned(),
    })
}

fn parse_element(line: &str) -> std::result::Result<Element, String> {
    let values: Vec<&str> = line.split_whitespace().collect();
    if values.len() < 3 {
        return Err(format!("element record too short: `{line}`"));
    }

    let int = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| format!("bad integer `{s}` in `{line}`"))
    };

    let id = int(values[0])? as usize;
    let kind = int(values[1])? as u32;
    let ntags = int(values[2])? as usize;
    if values.len() < 3 + ntags {
        return Err(format!("element declares {ntags} tags but has fewer: `{line}`"));
    }

    let tags = values[3..3 + ntags]
        .iter()
        .map(|&s| int(s))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let nodes = values[3 + ntags..]
        .iter()
        .map(|&s| int(s).map(|v| v as usize))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Element {
        id,
        kind,
        tags,
        nodes,
        source: Some(line.to_owned()),
    })
}

#[inline]
pub(crate) fn parse_f64(s: &str) -> std::result::Result<f64, String> {
    s.parse::<f64>().map_err(|_| format!("bad number `{s}`"))
}
