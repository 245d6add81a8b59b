//! Planar geometry shared by the tracker, canvas locator and policy
//!
//! Three coordinate frames appear in the pipeline: camera pixels (what the
//! backend reports), canvas-local pixels (camera minus the canvas bounding
//! box origin, which indexes the draw mask) and the overlay drawn on the
//! stream. Everything here is in camera pixels unless a name says otherwise.

use serde::{Deserialize, Serialize};

/// Sub-pixel point in camera coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Truncate to integer pixel coordinates
    pub fn to_pixel(self) -> PixelPoint {
        PixelPoint::new(self.x as i32, self.y as i32)
    }
}

/// Integer pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: i32,
    pub y: i32,
}

impl PixelPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Squared Euclidean distance to another pixel
    pub fn distance_sq(self, other: PixelPoint) -> i64 {
        let dx = (other.x - self.x) as i64;
        let dy = (other.y - self.y) as i64;
        dx * dx + dy * dy
    }
}

/// Axis-aligned rectangle with inclusive origin and exclusive far edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(&self) -> PixelPoint {
        PixelPoint::new(self.x, self.y)
    }

    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }

    /// Width over height; zero-height rectangles report 0
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0 {
            self.width as f64 / self.height as f64
        } else {
            0.0
        }
    }

    /// Center of the rectangle in floating point
    pub fn center(&self) -> Point2 {
        Point2::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Center rounded down to whole pixels, as blob centroids are reported
    pub fn pixel_center(&self) -> PixelPoint {
        PixelPoint::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Bounding rectangle of integer points, counting both end pixels
    pub fn bounding(points: &[PixelPoint]) -> Option<Rect> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Rect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Corners in clockwise order starting top-left
    pub fn corners(&self) -> [Point2; 4] {
        let (x0, y0) = (self.x as f32, self.y as f32);
        let (x1, y1) = ((self.x + self.width - 1) as f32, (self.y + self.height - 1) as f32);
        [
            Point2::new(x0, y0),
            Point2::new(x1, y0),
            Point2::new(x1, y1),
            Point2::new(x0, y1),
        ]
    }
}

/// A four-cornered canvas outline
///
/// Holding the corners in a fixed-size array keeps a locked canvas from
/// ever carrying a degenerate polygon.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    corners: [Point2; 4],
}

impl Quad {
    pub const fn new(corners: [Point2; 4]) -> Self {
        Self { corners }
    }

    /// Build from a slice, which must hold exactly four points
    pub fn from_slice(points: &[Point2]) -> Option<Self> {
        let corners: [Point2; 4] = points.try_into().ok()?;
        Some(Self { corners })
    }

    pub fn corners(&self) -> &[Point2; 4] {
        &self.corners
    }

    /// Integer bounding box of the corners after truncation
    pub fn bounding_rect(&self) -> Rect {
        let pixels = self.corners.map(Point2::to_pixel);
        // Four points always yield a rectangle
        Rect::bounding(&pixels).unwrap_or_default()
    }

    /// Whether `p` lies inside the outline or on one of its edges
    pub fn contains(&self, p: Point2) -> bool {
        point_in_polygon(&self.corners, p)
    }
}

/// Even-odd containment test that counts boundary points as inside
pub fn point_in_polygon(polygon: &[Point2], p: Point2) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[j];

        if on_segment(a, b, p) {
            return true;
        }

        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn on_segment(a: Point2, b: Point2, p: Point2) -> bool {
    const EPS: f32 = 1e-4;
    let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
    if cross.abs() > EPS * (1.0 + (b.x - a.x).abs() + (b.y - a.y).abs()) {
        return false;
    }
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}
