use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IapError;

/// Axis label of an N-D image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dim {
    /// Time.
    T,
    /// Depth.
    Z,
    /// Channel.
    C,
    /// Sample / scene.
    S,
    H,
    W,
}

impl Dim {
    pub fn letter(self) -> char {
        match self {
            Dim::T => 'T',
            Dim::Z => 'Z',
            Dim::C => 'C',
            Dim::S => 'S',
            Dim::H => 'H',
            Dim::W => 'W',
        }
    }

    pub fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'T' => Some(Dim::T),
            'Z' => Some(Dim::Z),
            'C' => Some(Dim::C),
            'S' => Some(Dim::S),
            'H' => Some(Dim::H),
            'W' => Some(Dim::W),
            _ => None,
        }
    }

    pub fn is_spatial(self) -> bool {
        matches!(self, Dim::H | Dim::W)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Ordered axis labels, one per axis of the raw shape.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionAssignment(Vec<Dim>);

impl DimensionAssignment {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self(dims)
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn axis_of(&self, dim: Dim) -> Option<usize> {
        self.0.iter().position(|&d| d == dim)
    }

    /// Checks exactly one H, exactly one W, and one label per axis of `shape`.
    pub fn validate(&self, file: &str, shape: &[usize]) -> Result<(), IapError> {
        let invalid = |message: String| IapError::DimensionAssignmentInvalid {
            file: file.to_string(),
            message,
        };
        if self.0.len() != shape.len() {
            return Err(invalid(format!(
                "{} label(s) for a shape of {} axes {:?}",
                self.0.len(),
                shape.len(),
                shape
            )));
        }
        for dim in [Dim::H, Dim::W] {
            let count = self.0.iter().filter(|&&d| d == dim).count();
            if count != 1 {
                return Err(invalid(format!("expected exactly one {dim}, found {count}")));
            }
        }
        Ok(())
    }

    /// Non-spatial axes as `(axis index, label, extent)` in declaration order.
    pub fn slice_axes(&self, shape: &[usize]) -> Vec<(usize, Dim, usize)> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, d)| !d.is_spatial())
            .map(|(i, &d)| (i, d, shape.get(i).copied().unwrap_or(0)))
            .collect()
    }

    /// Slice keys in enumeration order: the non-spatial index tuples in
    /// lexicographic order, the last axis varying fastest.
    pub fn slice_keys(&self, base: &str, shape: &[usize]) -> Vec<String> {
        let axes = self.slice_axes(shape);
        slice_indices(&axes)
            .into_iter()
            .map(|index| slice_key(base, &axes, &index))
            .collect()
    }
}

impl fmt::Display for DimensionAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.0 {
            write!(f, "{d}")?;
        }
        Ok(())
    }
}

impl FromStr for DimensionAssignment {
    type Err = IapError;

    /// Parses a compact label string such as `ZHW` or `T,Z,H,W`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dims = s
            .chars()
            .filter(|c| !matches!(c, ',' | ' ' | '[' | ']'))
            .map(|c| {
                Dim::from_letter(c)
                    .ok_or_else(|| IapError::invalid(format!("unknown dimension label '{c}'")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if dims.is_empty() {
            return Err(IapError::invalid("empty dimension assignment"));
        }
        Ok(Self(dims))
    }
}

/// Every index tuple over `axes`, lexicographic.
pub(crate) fn slice_indices(axes: &[(usize, Dim, usize)]) -> Vec<Vec<usize>> {
    let total: usize = axes.iter().map(|&(_, _, n)| n).product();
    let mut out = Vec::with_capacity(total);
    if total == 0 {
        return out;
    }
    let mut index = vec![0usize; axes.len()];
    loop {
        out.push(index.clone());
        let mut k = axes.len();
        loop {
            if k == 0 {
                return out;
            }
            k -= 1;
            index[k] += 1;
            if index[k] < axes[k].2 {
                break;
            }
            index[k] = 0;
        }
    }
}

/// `<base>_<D><k>` per non-spatial axis, `k` 1-based.
pub(crate) fn slice_key(base: &str, axes: &[(usize, Dim, usize)], index: &[usize]) -> String {
    let mut key = base.to_string();
    for (&(_, dim, _), &i) in axes.iter().zip(index) {
        key.push('_');
        key.push(dim.letter());
        key.push_str(&(i + 1).to_string());
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(s: &str) -> DimensionAssignment {
        s.parse().unwrap()
    }

    #[test]
    fn validation_requires_one_h_and_one_w() {
        assert!(dims("ZHW").validate("a.tif", &[3, 10, 10]).is_ok());
        assert!(dims("ZHH").validate("a.tif", &[3, 10, 10]).is_err());
        assert!(dims("ZZW").validate("a.tif", &[3, 10, 10]).is_err());
        assert!(dims("HW").validate("a.tif", &[3, 10, 10]).is_err());
        let err = dims("HWW").validate("a.tif", &[3, 10, 10]).unwrap_err();
        assert!(matches!(err, IapError::DimensionAssignmentInvalid { .. }));
    }

    #[test]
    fn slice_keys_follow_declaration_order() {
        assert_eq!(
            dims("ZHW").slice_keys("img", &[3, 100, 100]),
            vec!["img_Z1", "img_Z2", "img_Z3"]
        );
        assert_eq!(
            dims("TZHW").slice_keys("img", &[2, 2, 4, 4]),
            vec!["img_T1_Z1", "img_T1_Z2", "img_T2_Z1", "img_T2_Z2"]
        );
        assert_eq!(
            dims("HWC").slice_keys("rgb", &[4, 4, 3]),
            vec!["rgb_C1", "rgb_C2", "rgb_C3"]
        );
    }

    #[test]
    fn parse_and_display() {
        let d: DimensionAssignment = "t, z, h, w".parse().unwrap();
        assert_eq!(d.to_string(), "TZHW");
        assert!("ZXW".parse::<DimensionAssignment>().is_err());
        assert!("".parse::<DimensionAssignment>().is_err());
    }
}
