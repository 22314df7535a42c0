//! Geometry kernel: pure functions over points, polygons and boxes.
//!
//! Everything here works in image pixel space unless a type says otherwise.
//! Raster conversions (polygon fill, contour tracing, brush discs) live in
//! [`raster`]; polygon union and the connectivity test live in [`union`].

mod bbox;
mod polygon;
pub mod raster;
mod space;
pub mod union;

pub use bbox::BBox;
pub use polygon::Polygon;
pub use space::{Normalized, Pixel};

use serde::{Deserialize, Serialize};

/// A point in image pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[inline]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Unsigned shoelace area.
pub fn area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let j = (i + 1) % n;
            points[i].x * points[j].y - points[j].x * points[i].y
        })
        .sum();
    twice.abs() / 2.0
}

/// Tight axis-aligned box `(min_x, min_y, max_x - min_x, max_y - min_y)`.
pub fn bbox(points: &[Point]) -> Option<BBox<Pixel>> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(BBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
}

/// Arithmetic mean of the vertices; `None` for empty input.
pub fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

/// Ray-cast containment test.
///
/// An edge counts when exactly one endpoint lies strictly below the ray, so a
/// ray passing through a shared vertex is counted once.
pub fn point_in_polygon(p: Point, ring: &[Point]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (vi, vj) = (ring[i], ring[j]);
        if (vi.y > p.y) != (vj.y > p.y)
            && p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True when `p` lies on segment `a-b` within `epsilon` pixels of slack.
pub fn point_on_segment(p: Point, a: Point, b: Point, epsilon: f64) -> bool {
    (p.distance(a) + p.distance(b) - a.distance(b)).abs() < epsilon
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring(coords: &[(f64, f64)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn area_is_orientation_independent() {
        let cw = ring(&[(0.0, 0.0), (0.0, 10.0), (10.0, 10.0), (10.0, 0.0)]);
        let ccw = ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert_eq!(area(&cw), 100.0);
        assert_eq!(area(&ccw), 100.0);
        assert_eq!(area(&cw[..2]), 0.0);
    }

    #[test]
    fn bbox_and_centroid() {
        let pts = ring(&[(10.0, 20.0), (30.0, 5.0), (25.0, 40.0)]);
        assert_eq!(bbox(&pts).unwrap().to_array(), [10.0, 5.0, 20.0, 35.0]);
        let c = centroid(&pts).unwrap();
        assert!((c.x - 65.0 / 3.0).abs() < 1e-12);
        assert!((c.y - 65.0 / 3.0).abs() < 1e-12);
        assert!(centroid(&[]).is_none());
        assert!(bbox(&[]).is_none());
    }

    #[test]
    fn point_in_polygon_basic() {
        let sq = ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        assert!(point_in_polygon(Point::new(5.0, 5.0), &sq));
        assert!(!point_in_polygon(Point::new(15.0, 5.0), &sq));
        assert!(!point_in_polygon(Point::new(5.0, -1.0), &sq));
    }

    #[test]
    fn ray_through_vertex_counts_once() {
        let diamond = ring(&[(5.0, 0.0), (10.0, 5.0), (5.0, 10.0), (0.0, 5.0)]);
        assert!(point_in_polygon(Point::new(4.0, 5.0), &diamond));
        assert!(!point_in_polygon(Point::new(-1.0, 5.0), &diamond));
    }

    #[test]
    fn point_on_segment_tolerance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 0.0);
        assert!(point_on_segment(Point::new(5.0, 0.0), a, b, 0.1));
        assert!(point_on_segment(Point::new(5.0, 0.5), a, b, 0.1));
        assert!(!point_on_segment(Point::new(5.0, 2.0), a, b, 0.1));
        assert!(!point_on_segment(Point::new(12.0, 0.0), a, b, 0.1));
    }
}
