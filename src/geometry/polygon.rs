//! Closed polygons stored as flat interleaved `x, y` coordinates.

use serde::{Deserialize, Serialize};

use super::{area, bbox, centroid, point_in_polygon, point_on_segment, BBox, Pixel, Point};
use crate::error::IapError;

/// A closed polygon in image pixel space.
///
/// Stored as `[x1, y1, x2, y2, ...]` with at least three vertices. The ring
/// is implicitly closed: the first vertex is never repeated at the end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Polygon {
    coords: Vec<f64>,
}

impl Polygon {
    /// Builds a polygon from flat coordinates.
    ///
    /// A trailing copy of the first vertex is dropped.
    pub fn new(mut coords: Vec<f64>) -> Result<Self, IapError> {
        if coords.len() % 2 != 0 {
            return Err(IapError::invalid(format!(
                "polygon has an odd number of coordinates ({})",
                coords.len()
            )));
        }
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(IapError::invalid("polygon has non-finite coordinates"));
        }
        let n = coords.len();
        if n >= 8 && coords[0] == coords[n - 2] && coords[1] == coords[n - 1] {
            coords.truncate(n - 2);
        }
        if coords.len() < 6 {
            return Err(IapError::invalid(format!(
                "polygon needs at least 3 vertices, got {}",
                coords.len() / 2
            )));
        }
        Ok(Self { coords })
    }

    pub fn from_points(points: &[Point]) -> Result<Self, IapError> {
        Self::new(points.iter().flat_map(|p| [p.x, p.y]).collect())
    }

    /// The four-corner ring of a bounding box.
    pub fn from_bbox(bbox: &BBox<Pixel>) -> Self {
        Self {
            coords: bbox.corners().iter().flat_map(|p| [p.x, p.y]).collect(),
        }
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn vertex_count(&self) -> usize {
        self.coords.len() / 2
    }

    pub fn vertex(&self, index: usize) -> Point {
        Point::new(self.coords[2 * index], self.coords[2 * index + 1])
    }

    pub fn points(&self) -> Vec<Point> {
        self.coords
            .chunks_exact(2)
            .map(|c| Point::new(c[0], c[1]))
            .collect()
    }

    pub fn area(&self) -> f64 {
        area(&self.points())
    }

    pub fn bbox(&self) -> BBox<Pixel> {
        bbox(&self.points()).unwrap_or_default()
    }

    pub fn centroid(&self) -> Point {
        centroid(&self.points()).unwrap_or_default()
    }

    pub fn contains(&self, p: Point) -> bool {
        point_in_polygon(p, &self.points())
    }

    /// Index of the first vertex within `radius` of `p`.
    pub fn vertex_near(&self, p: Point, radius: f64) -> Option<usize> {
        (0..self.vertex_count()).find(|&i| self.vertex(i).distance(p) <= radius)
    }

    /// Index `i` of the first edge `(i, i + 1)` that `p` lies on.
    pub fn edge_near(&self, p: Point, epsilon: f64) -> Option<usize> {
        let n = self.vertex_count();
        (0..n).find(|&i| point_on_segment(p, self.vertex(i), self.vertex((i + 1) % n), epsilon))
    }

    pub fn move_vertex(&mut self, index: usize, p: Point) {
        self.coords[2 * index] = p.x;
        self.coords[2 * index + 1] = p.y;
    }

    /// Inserts `p` after vertex `after`, splitting that edge.
    pub fn insert_after(&mut self, after: usize, p: Point) {
        let at = 2 * (after + 1);
        self.coords.splice(at..at, [p.x, p.y]);
    }

    /// Removes a vertex; a triangle cannot lose another vertex.
    pub fn remove_vertex(&mut self, index: usize) -> Result<(), IapError> {
        if self.vertex_count() <= 3 {
            return Err(IapError::invalid(
                "a polygon must keep at least 3 vertices",
            ));
        }
        self.coords.drain(2 * index..2 * index + 2);
        Ok(())
    }

    /// Copy with every coordinate rounded to the nearest integer.
    pub fn rounded(&self) -> Self {
        Self {
            coords: self.coords.iter().map(|c| c.round()).collect(),
        }
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            coords: self
                .coords
                .chunks_exact(2)
                .flat_map(|c| [c[0] + dx, c[1] + dy])
                .collect(),
        }
    }
}

impl TryFrom<Vec<f64>> for Polygon {
    type Error = IapError;

    fn try_from(coords: Vec<f64>) -> Result<Self, Self::Error> {
        Polygon::new(coords)
    }
}

impl From<Polygon> for Vec<f64> {
    fn from(polygon: Polygon) -> Self {
        polygon.coords
    }
}
