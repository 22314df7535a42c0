use crate::geometry::Point;

/// Scroll offset and zoom factor of the canvas.
///
/// `image = (screen + offset) / zoom`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    zoom: f64,
    offset: Point,
    zoom_min: f64,
    zoom_max: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.1, 5.0)
    }
}

impl Viewport {
    pub fn new(zoom_min: f64, zoom_max: f64) -> Self {
        Self {
            zoom: 1.0,
            offset: Point::new(0.0, 0.0),
            zoom_min,
            zoom_max,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn offset(&self) -> Point {
        self.offset
    }

    pub fn to_image(&self, screen: Point) -> Point {
        Point::new(
            (screen.x + self.offset.x) / self.zoom,
            (screen.y + self.offset.y) / self.zoom,
        )
    }

    pub fn to_screen(&self, image: Point) -> Point {
        Point::new(
            image.x * self.zoom - self.offset.x,
            image.y * self.zoom - self.offset.y,
        )
    }

    /// Drags the content by a screen-space delta.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.offset.x -= dx;
        self.offset.y -= dy;
    }

    /// Multiplies the zoom, keeping the image point under `anchor` fixed.
    pub fn zoom_at(&mut self, anchor: Point, factor: f64) {
        let fixed = self.to_image(anchor);
        self.zoom = (self.zoom * factor).clamp(self.zoom_min, self.zoom_max);
        self.offset = Point::new(
            fixed.x * self.zoom - anchor.x,
            fixed.y * self.zoom - anchor.y,
        );
    }

    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.offset = Point::new(0.0, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_is_clamped_and_anchored() {
        let mut vp = Viewport::default();
        let anchor = Point::new(40.0, 30.0);
        vp.zoom_at(anchor, 2.0);
        assert_eq!(vp.zoom(), 2.0);
        let p = vp.to_image(anchor);
        assert!((p.x - 40.0).abs() < 1e-9 && (p.y - 30.0).abs() < 1e-9);

        for _ in 0..20 {
            vp.zoom_at(anchor, 2.0);
        }
        assert_eq!(vp.zoom(), 5.0);
        for _ in 0..40 {
            vp.zoom_at(anchor, 0.5);
        }
        assert_eq!(vp.zoom(), 0.1);
    }

    #[test]
    fn pan_shifts_mapping() {
        let mut vp = Viewport::default();
        vp.pan(10.0, -5.0);
        assert_eq!(vp.to_image(Point::new(10.0, 10.0)), Point::new(0.0, 15.0));
        let round = vp.to_screen(vp.to_image(Point::new(3.0, 4.0)));
        assert_eq!(round, Point::new(3.0, 4.0));
    }
}
