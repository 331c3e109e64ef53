//! Roughness classes: the distinct roughness values of a terrain, rounded to
//! five decimals, each owning a ground and a canopy boundary id.

use std::fmt;

/// Ground boundary id of the first class.
pub const GROUND_ID_BASE: i64 = 1001;
/// Canopy volume id of the first class.
pub const CANOPY_ID_BASE: i64 = 2001;

const SCALE: f64 = 1e5;

/// Integer identity of a roughness after rounding to five decimals.
#[inline]
pub fn class_key(value: f64) -> i64 {
    (value * SCALE).round() as i64
}

#[inline]
pub fn round5(value: f64) -> f64 {
    class_key(value) as f64 / SCALE
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoughnessClass {
    pub value: f64,
    pub key: i64,
    pub ground_id: i64,
    pub canopy_id: i64,
}

impl RoughnessClass {
    pub fn ground_label(&self) -> String {
        format!("ground_{self}")
    }

    pub fn canopy_label(&self) -> String {
        format!("canopy_{self}")
    }
}

/// `%7.5f` of the class value; the spelling used in labels and `_ground_bc`.
impl fmt::Display for RoughnessClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:7.5}", self.value)
    }
}

/// Ascending, duplicate-free roughness classes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassTable {
    classes: Vec<RoughnessClass>,
}

impl ClassTable {
    pub fn from_values(values: &[f64]) -> Self {
        let mut rounded: Vec<f64> = values.iter().map(|&v| round5(v)).collect();
        rounded.sort_by(f64::total_cmp);
        rounded.dedup_by_key(|v| class_key(*v));

        let classes = rounded
            .into_iter()
            .enumerate()
            .map(|(index, value)| RoughnessClass {
                value,
                key: class_key(value),
                ground_id: GROUND_ID_BASE + index as i64,
                canopy_id: CANOPY_ID_BASE + index as i64,
            })
            .collect();

        Self { classes }
    }

    /// Class of a raw roughness value, rounded the same way the table was built.
    pub fn lookup(&self, value: f64) -> Option<&RoughnessClass> {
        let key = class_key(value);
        self.classes
            .binary_search_by_key(&key, |class| class.key)
            .ok()
            .map(|index| &self.classes[index])
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RoughnessClass> {
        self.classes.iter()
    }

    pub fn as_slice(&self) -> &[RoughnessClass] {
        &self.classes
    }
}

impl<'a> IntoIterator for &'a ClassTable {
    type Item = &'a RoughnessClass;
    type IntoIter = std::slice::Iter<'a, RoughnessClass>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
