//! Polygon union for merging annotations.
//!
//! Connectivity is decided on the vector geometry: two polygons are linked
//! when any pair of edges intersects or touches, or when one contains the
//! other. The closure of that relation over the input must be a single
//! component. Polygons that meet in a single point are therefore connected.
//!
//! The merged ring itself is traced from a rasterization of all inputs. When
//! tracing yields several outer rings (e.g. two shapes joined only by a
//! sub-pixel sliver), the largest ring is kept and the rest are reported in
//! [`UnionOutcome::dropped_rings`]. Interior holes are never represented.

use image::GrayImage;

use super::raster::{fill_polygon, mask_to_polygons};
use super::{point_in_polygon, Point, Polygon};
use crate::error::IapError;

/// Result of a successful union.
#[derive(Clone, Debug, PartialEq)]
pub struct UnionOutcome {
    pub polygon: Polygon,
    /// Outer rings discarded because only the largest one is kept.
    pub dropped_rings: usize,
}

/// Merges `polygons` into one outer ring, or fails with `Disconnected`.
pub fn union(polygons: &[Polygon]) -> Result<UnionOutcome, IapError> {
    match polygons {
        [] => return Err(IapError::invalid("nothing to merge")),
        [only] => {
            return Ok(UnionOutcome {
                polygon: only.clone(),
                dropped_rings: 0,
            })
        }
        _ => {}
    }

    let components = component_count(polygons);
    if components != 1 {
        return Err(IapError::Disconnected { components });
    }

    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for poly in polygons {
        let b = poly.bbox();
        min_x = min_x.min(b.x);
        min_y = min_y.min(b.y);
        max_x = max_x.max(b.xmax());
        max_y = max_y.max(b.ymax());
    }

    // One pixel of padding on every side keeps contours off the border.
    let origin_x = min_x.floor() - 1.0;
    let origin_y = min_y.floor() - 1.0;
    let width = (max_x.ceil() - origin_x + 2.0) as u32;
    let height = (max_y.ceil() - origin_y + 2.0) as u32;

    let mut mask = GrayImage::new(width, height);
    for poly in polygons {
        fill_polygon(&mut mask, &poly.translated(-origin_x, -origin_y));
    }

    let mut rings = mask_to_polygons(&mask, 0.0);
    if rings.is_empty() {
        return Err(IapError::invalid("merged geometry is degenerate"));
    }
    rings.sort_by(|a, b| b.area().total_cmp(&a.area()));
    let dropped_rings = rings.len() - 1;
    let polygon = rings.swap_remove(0).translated(origin_x, origin_y);

    Ok(UnionOutcome {
        polygon,
        dropped_rings,
    })
}

/// True when the inputs form a single touches-or-intersects component.
pub fn is_connected(polygons: &[Polygon]) -> bool {
    component_count(polygons) <= 1
}

/// Number of connected components under the touches-or-intersects relation.
pub fn component_count(polygons: &[Polygon]) -> usize {
    let rings: Vec<Vec<Point>> = polygons.iter().map(Polygon::points).collect();
    let mut parent: Vec<usize> = (0..rings.len()).collect();

    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rings.len() {
        for j in (i + 1)..rings.len() {
            if rings_touch(&rings[i], &rings[j]) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[a] = b;
                }
            }
        }
    }

    (0..rings.len())
        .filter(|&i| find(&mut parent, i) == i)
        .count()
}

fn rings_touch(a: &[Point], b: &[Point]) -> bool {
    let edges = |r: &[Point]| -> Vec<(Point, Point)> {
        (0..r.len()).map(|i| (r[i], r[(i + 1) % r.len()])).collect()
    };
    let (ea, eb) = (edges(a), edges(b));
    if ea
        .iter()
        .any(|&(p1, p2)| eb.iter().any(|&(q1, q2)| segments_touch(p1, p2, q1, q2)))
    {
        return true;
    }
    // No edge contact: either disjoint or one strictly inside the other.
    point_in_polygon(a[0], b) || point_in_polygon(b[0], a)
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn within_box(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Closed-segment intersection, endpoints and collinear overlap included.
fn segments_touch(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && within_box(q1, q2, p1))
        || (d2 == 0.0 && within_box(q1, q2, p2))
        || (d3 == 0.0 && within_box(p1, p2, q1))
        || (d4 == 0.0 && within_box(p1, p2, q2))
}
