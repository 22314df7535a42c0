//! Conversions between vector geometry and 8-bit binary masks.
//!
//! Masks are [`GrayImage`]s where any non-zero pixel is foreground. A pixel
//! `(x, y)` covers the image-space point `(x, y)`, so a polygon whose vertices
//! sit on pixel centers rasterizes to exactly the pixels its outline touches
//! plus its interior.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_line_segment_mut, draw_polygon_mut, Canvas,
};
use imageproc::point::Point as IpPoint;

use super::{area, Point, Polygon};

pub const FOREGROUND: Luma<u8> = Luma([255]);

/// Fills `polygon` (outline included) into a fresh `width x height` mask.
pub fn rasterize_polygon(polygon: &Polygon, width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    fill_polygon(&mut mask, polygon);
    mask
}

/// Fills `polygon` (outline included) into an existing mask.
pub fn fill_polygon(mask: &mut GrayImage, polygon: &Polygon) {
    fill_polygon_with(mask, polygon, FOREGROUND);
}

/// Fills `polygon` with an arbitrary pixel value on any canvas, e.g. a
/// 16-bit label image.
pub fn fill_polygon_with<C>(mask: &mut C, polygon: &Polygon, value: C::Pixel)
where
    C: Canvas,
{
    let ring = integer_ring(polygon);
    if ring.len() >= 3 {
        draw_polygon_mut(mask, &ring, value);
    }
    let n = ring.len();
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        draw_line_segment_mut(mask, (a.x as f32, a.y as f32), (b.x as f32, b.y as f32), value);
    }
}

/// Rounds vertices to integers, dropping consecutive duplicates and a
/// closing duplicate (the drawing routines reject both).
pub(crate) fn integer_ring(polygon: &Polygon) -> Vec<IpPoint<i32>> {
    let mut ring: Vec<IpPoint<i32>> = Vec::with_capacity(polygon.vertex_count());
    for p in polygon.points() {
        let q = IpPoint::new(p.x.round() as i32, p.y.round() as i32);
        if ring.last() != Some(&q) {
            ring.push(q);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }
    ring
}

/// Extracts external contours of `mask` as polygons.
///
/// Holes are ignored. A contour is kept only when it has at least three
/// distinct vertices after collinear simplification and its area is strictly
/// greater than `min_area`. Blobs touching the image border are traced like
/// any other.
pub fn mask_to_polygons(mask: &GrayImage, min_area: f64) -> Vec<Polygon> {
    // Tracing runs on a copy with a one pixel background frame; a blob on
    // the border is otherwise reported as a hole.
    let mut padded = GrayImage::new(mask.width() + 2, mask.height() + 2);
    image::imageops::replace(&mut padded, mask, 1, 1);

    find_contours::<i32>(&padded)
        .into_iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .filter_map(|contour| {
            let points: Vec<Point> = contour
                .points
                .iter()
                .map(|p| Point::new((p.x - 1) as f64, (p.y - 1) as f64))
                .collect();
            let simplified = simplify_collinear(&points);
            if distinct_count(&simplified) < 3 || area(&simplified) <= min_area {
                return None;
            }
            Polygon::from_points(&simplified).ok()
        })
        .collect()
}

/// Removes vertices that continue straight along the previous direction.
pub fn simplify_collinear(points: &[Point]) -> Vec<Point> {
    let mut ring: Vec<Point> = Vec::with_capacity(points.len());
    for &p in points {
        if ring.last() != Some(&p) {
            ring.push(p);
        }
    }
    while ring.len() > 1 && ring.first() == ring.last() {
        ring.pop();
    }

    loop {
        let n = ring.len();
        if n < 3 {
            return ring;
        }
        let redundant = (0..n).find(|&i| {
            let prev = ring[(i + n - 1) % n];
            let cur = ring[i];
            let next = ring[(i + 1) % n];
            let (ax, ay) = (cur.x - prev.x, cur.y - prev.y);
            let (bx, by) = (next.x - cur.x, next.y - cur.y);
            ax * by - ay * bx == 0.0 && ax * bx + ay * by > 0.0
        });
        match redundant {
            Some(i) => {
                ring.remove(i);
            }
            None => return ring,
        }
    }
}

fn distinct_count(points: &[Point]) -> usize {
    let mut seen: Vec<(i64, i64)> = points
        .iter()
        .map(|p| (p.x.round() as i64, p.y.round() as i64))
        .collect();
    seen.sort_unstable();
    seen.dedup();
    seen.len()
}

/// Stamps a filled disc of `radius` pixels centered at `center`.
pub fn draw_disc(mask: &mut GrayImage, center: Point, radius: u32) {
    draw_filled_circle_mut(
        mask,
        (center.x.round() as i32, center.y.round() as i32),
        radius as i32,
        FOREGROUND,
    );
}

/// Stamps discs along `from -> to` so fast pointer moves leave no gaps.
pub fn draw_stroke(mask: &mut GrayImage, from: Point, to: Point, radius: u32) {
    let step = (radius as f64 / 2.0).max(1.0);
    let steps = (from.distance(to) / step).ceil().max(1.0) as usize;
    for i in 1..=steps {
        let t = i as f64 / steps as f64;
        let p = Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
        draw_disc(mask, p, radius);
    }
}

/// `base AND NOT cut`, pixel-wise. Both masks must share dimensions.
pub fn subtract(base: &GrayImage, cut: &GrayImage) -> GrayImage {
    let mut out = base.clone();
    for (o, c) in out.pixels_mut().zip(cut.pixels()) {
        if c[0] != 0 {
            o[0] = 0;
        }
    }
    out
}

/// True when any pixel is foreground in both masks.
pub fn overlaps(a: &GrayImage, b: &GrayImage) -> bool {
    a.pixels().zip(b.pixels()).any(|(p, q)| p[0] != 0 && q[0] != 0)
}

pub fn foreground_count(mask: &GrayImage) -> usize {
    mask.pixels().filter(|p| p[0] != 0).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(mask: &mut GrayImage, x0: u32, y0: u32, w: u32, h: u32) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                mask.put_pixel(x, y, FOREGROUND);
            }
        }
    }

    #[test]
    fn rectangle_mask_vectorizes_to_four_corners() {
        let mut mask = GrayImage::new(40, 40);
        block(&mut mask, 5, 5, 21, 11);
        let polys = mask_to_polygons(&mask, 10.0);
        assert_eq!(polys.len(), 1);
        assert_eq!(polys[0].vertex_count(), 4);
        assert_eq!(polys[0].bbox().to_array(), [5.0, 5.0, 20.0, 10.0]);
        assert_eq!(polys[0].area(), 200.0);
    }

    #[test]
    fn small_contours_are_rejected() {
        let mut mask = GrayImage::new(20, 20);
        // 4x4 block: contour through pixel centers spans 3x3 = area 9.
        block(&mut mask, 2, 2, 4, 4);
        assert!(mask_to_polygons(&mask, 10.0).is_empty());

        // 5x4 block: area 12.
        let mut mask = GrayImage::new(20, 20);
        block(&mut mask, 2, 2, 5, 4);
        assert_eq!(mask_to_polygons(&mask, 10.0).len(), 1);
    }

    #[test]
    fn separate_blobs_give_separate_polygons() {
        let mut mask = GrayImage::new(60, 20);
        block(&mut mask, 2, 2, 10, 10);
        block(&mut mask, 30, 2, 10, 10);
        assert_eq!(mask_to_polygons(&mask, 10.0).len(), 2);
    }

    #[test]
    fn blobs_on_every_border_are_traced() {
        let mut mask = GrayImage::new(50, 50);
        block(&mut mask, 0, 0, 10, 10);
        block(&mut mask, 0, 20, 10, 10);
        block(&mut mask, 20, 0, 10, 10);
        block(&mut mask, 40, 20, 10, 10);
        block(&mut mask, 20, 40, 10, 10);
        block(&mut mask, 20, 20, 10, 10);
        let mut boxes: Vec<[f64; 4]> = mask_to_polygons(&mask, 10.0)
            .iter()
            .map(|p| p.bbox().to_array())
            .collect();
        boxes.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(
            boxes,
            vec![
                [0.0, 0.0, 9.0, 9.0],
                [0.0, 20.0, 9.0, 9.0],
                [20.0, 0.0, 9.0, 9.0],
                [20.0, 20.0, 9.0, 9.0],
                [20.0, 40.0, 9.0, 9.0],
                [40.0, 20.0, 9.0, 9.0],
            ]
        );
    }

    #[test]
    fn band_cut_through_the_middle_gives_two_pieces() {
        let mut mask = GrayImage::new(200, 100);
        block(&mut mask, 0, 0, 200, 100);
        let mut cut = GrayImage::new(200, 100);
        block(&mut cut, 95, 0, 11, 100);
        let pieces = mask_to_polygons(&subtract(&mask, &cut), 10.0);
        assert_eq!(pieces.len(), 2);
        let mut xs: Vec<f64> = pieces.iter().map(|p| p.bbox().x).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(xs, vec![0.0, 106.0]);
    }

    #[test]
    fn rasterize_then_trace_is_stable() {
        let poly = Polygon::new(vec![10.0, 10.0, 90.0, 10.0, 90.0, 90.0, 10.0, 90.0]).unwrap();
        let mask = rasterize_polygon(&poly, 100, 100);
        assert_eq!(foreground_count(&mask), 81 * 81);
        let traced = mask_to_polygons(&mask, 10.0);
        assert_eq!(traced.len(), 1);
        assert_eq!(traced[0].area(), 6400.0);
        assert_eq!(traced[0].bbox().to_array(), [10.0, 10.0, 80.0, 80.0]);
    }

    #[test]
    fn subtract_and_overlap() {
        let mut a = GrayImage::new(10, 10);
        let mut b = GrayImage::new(10, 10);
        block(&mut a, 0, 0, 6, 6);
        block(&mut b, 4, 4, 6, 6);
        assert!(overlaps(&a, &b));
        let diff = subtract(&a, &b);
        assert_eq!(foreground_count(&diff), 36 - 4);
    }

    #[test]
    fn stroke_covers_the_path() {
        let mut mask = GrayImage::new(100, 30);
        draw_disc(&mut mask, Point::new(10.0, 15.0), 3);
        draw_stroke(&mut mask, Point::new(10.0, 15.0), Point::new(90.0, 15.0), 3);
        for x in 10..=90 {
            assert_eq!(mask.get_pixel(x, 15)[0], 255, "gap at x={x}");
        }
    }

    #[test]
    fn simplify_drops_only_straight_runs() {
        let pts: Vec<Point> = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (2.0, 1.0), (2.0, 2.0), (0.0, 2.0)]
            .iter()
            .map(|&(x, y)| Point::new(x, y))
            .collect();
        let s = simplify_collinear(&pts);
        assert_eq!(s.len(), 4);
    }
}
