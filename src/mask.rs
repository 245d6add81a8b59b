//! Boolean "should be drawn" raster in canvas-local coordinates
//!
//! The artwork is resampled to the canvas bounding box every time the box
//! changes size, so mask pixel `(x, y)` corresponds to camera pixel
//! `(box.x + x, box.y + y)`.

use image::RgbaImage;
use tracing::debug;

use crate::artwork::Artwork;
use crate::constants;
use crate::geometry::PixelPoint;

/// Ink mask aligned with the canvas bounding box
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawMask {
    width: u32,
    height: u32,
    cells: Vec<bool>,
}

impl DrawMask {
    /// Resample `artwork` to `width`×`height` and classify each pixel
    ///
    /// A pixel is ink when it is dark (mean RGB below the cutoff) and, for
    /// sources with alpha, also not transparent.
    pub fn from_artwork(artwork: &Artwork, width: u32, height: u32) -> Self {
        Self::classify(&artwork.resampled(width, height), artwork.has_alpha())
    }

    /// Classify already-resampled artwork pixels
    pub fn classify(pixels: &RgbaImage, has_alpha: bool) -> Self {
        let (width, height) = pixels.dimensions();
        let cells = pixels
            .pixels()
            .map(|p| {
                let [r, g, b, a] = p.0;
                let brightness = (r as f32 + g as f32 + b as f32) / 3.0;
                let dark = brightness < constants::mask::DARK_CUTOFF;
                if has_alpha {
                    a > constants::mask::ALPHA_CUTOFF && dark
                } else {
                    dark
                }
            })
            .collect();

        Self {
            width,
            height,
            cells,
        }
    }

    /// Build a mask from a predicate over local pixel coordinates
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut cells = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                cells.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            cells,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of ink pixels
    pub fn ink_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// Whether the local pixel is ink; anything off the mask is not
    pub fn is_draw(&self, p: PixelPoint) -> bool {
        if p.x < 0 || p.y < 0 || p.x >= self.width as i32 || p.y >= self.height as i32 {
            return false;
        }
        self.cells[p.y as usize * self.width as usize + p.x as usize]
    }

    /// Closest ink pixel inside the square window of half-width `radius`
    ///
    /// The window is clipped to the mask. Ties resolve to the first
    /// candidate in row-major order.
    pub fn nearest_draw_pixel(&self, center: PixelPoint, radius: i32) -> Option<PixelPoint> {
        if self.width == 0 || self.height == 0 {
            return None;
        }

        let x0 = (center.x - radius).max(0);
        let x1 = (center.x + radius).min(self.width as i32 - 1);
        let y0 = (center.y - radius).max(0);
        let y1 = (center.y + radius).min(self.height as i32 - 1);
        if x0 > x1 || y0 > y1 {
            return None;
        }

        let mut best: Option<(i64, PixelPoint)> = None;
        for y in y0..=y1 {
            let row = y as usize * self.width as usize;
            for x in x0..=x1 {
                if !self.cells[row + x as usize] {
                    continue;
                }
                let candidate = PixelPoint::new(x, y);
                let d = center.distance_sq(candidate);
                if best.map_or(true, |(best_d, _)| d < best_d) {
                    best = Some((d, candidate));
                }
            }
        }
        best.map(|(_, p)| p)
    }
}

/// Artwork resampled to one canvas size, with its mask
#[derive(Debug)]
struct Resampled {
    pixels: RgbaImage,
    mask: DrawMask,
}

/// Keeps the mask and the resampled artwork in step with the canvas size
#[derive(Debug)]
pub struct DrawMaskCache {
    artwork: Artwork,
    current: Option<Resampled>,
}

impl DrawMaskCache {
    pub fn new(artwork: Artwork) -> Self {
        Self {
            artwork,
            current: None,
        }
    }

    /// Mask for a canvas of the given size, rebuilt only when the size changes
    pub fn refresh(&mut self, width: u32, height: u32) -> &DrawMask {
        if self.current.as_ref().map(|r| r.mask.dimensions()) != Some((width, height)) {
            debug!(width, height, "rebuilding draw mask");
            self.current = None;
        }
        let artwork = &self.artwork;
        let resampled = self.current.get_or_insert_with(|| {
            let pixels = artwork.resampled(width, height);
            let mask = DrawMask::classify(&pixels, artwork.has_alpha());
            Resampled { pixels, mask }
        });
        &resampled.mask
    }

    pub fn current(&self) -> Option<&DrawMask> {
        self.current.as_ref().map(|r| &r.mask)
    }

    /// Artwork at the size of the current mask
    pub fn resampled_artwork(&self) -> Option<&RgbaImage> {
        self.current.as_ref().map(|r| &r.pixels)
    }

    pub fn has_alpha(&self) -> bool {
        self.artwork.has_alpha()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn artwork_2x2(has_alpha: bool) -> Artwork {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(0, 0, Rgba([0, 0, 0, 255])); // dark, opaque
        img.put_pixel(1, 0, Rgba([250, 250, 250, 255])); // bright, opaque
        img.put_pixel(0, 1, Rgba([0, 0, 0, 5])); // dark, transparent
        img.put_pixel(1, 1, Rgba([90, 60, 60, 255])); // mean 70, dark
        Artwork::new(img, has_alpha)
    }

    #[test]
    fn test_classification_with_alpha() {
        let mask = DrawMask::from_artwork(&artwork_2x2(true), 2, 2);
        assert!(mask.is_draw(PixelPoint::new(0, 0)));
        assert!(!mask.is_draw(PixelPoint::new(1, 0)));
        assert!(!mask.is_draw(PixelPoint::new(0, 1)));
        assert!(mask.is_draw(PixelPoint::new(1, 1)));
    }

    #[test]
    fn test_classification_without_alpha_ignores_transparency() {
        let mask = DrawMask::from_artwork(&artwork_2x2(false), 2, 2);
        assert!(mask.is_draw(PixelPoint::new(0, 0)));
        assert!(!mask.is_draw(PixelPoint::new(1, 0)));
        assert!(mask.is_draw(PixelPoint::new(0, 1)));
        assert!(mask.is_draw(PixelPoint::new(1, 1)));
    }

    #[test]
    fn test_resample_matches_canvas_size() {
        let img = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        let mask = DrawMask::from_artwork(&Artwork::new(img, true), 37, 21);
        assert_eq!(mask.dimensions(), (37, 21));
        assert_eq!(mask.ink_count(), 37 * 21);
    }

    #[test]
    fn test_out_of_bounds_is_not_ink() {
        let mask = DrawMask::from_fn(4, 4, |_, _| true);
        assert!(!mask.is_draw(PixelPoint::new(-1, 0)));
        assert!(!mask.is_draw(PixelPoint::new(0, 4)));
        assert!(mask.is_draw(PixelPoint::new(3, 3)));
    }

    #[test]
    fn test_nearest_draw_pixel() {
        let mask = DrawMask::from_fn(100, 100, |x, y| (x, y) == (60, 52) || (x, y) == (45, 45));
        let nearest = mask.nearest_draw_pixel(PixelPoint::new(50, 50), 25);
        assert_eq!(nearest, Some(PixelPoint::new(45, 45)));
    }

    #[test]
    fn test_nearest_respects_radius() {
        let mask = DrawMask::from_fn(100, 100, |x, y| (x, y) == (90, 50));
        assert_eq!(mask.nearest_draw_pixel(PixelPoint::new(50, 50), 30), None);
        assert_eq!(
            mask.nearest_draw_pixel(PixelPoint::new(50, 50), 40),
            Some(PixelPoint::new(90, 50))
        );
    }

    #[test]
    fn test_nearest_from_outside_the_mask() {
        let mask = DrawMask::from_fn(20, 20, |x, y| x == 0 && y == 10);
        assert_eq!(
            mask.nearest_draw_pixel(PixelPoint::new(-5, 10), 10),
            Some(PixelPoint::new(0, 10))
        );
        assert_eq!(mask.nearest_draw_pixel(PixelPoint::new(-50, 10), 10), None);
    }

    #[test]
    fn test_cache_rebuilds_only_on_size_change() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let mut cache = DrawMaskCache::new(Artwork::new(img, false));
        assert!(cache.current().is_none());

        assert_eq!(cache.refresh(20, 10).dimensions(), (20, 10));
        assert_eq!(cache.refresh(20, 10).dimensions(), (20, 10));
        assert_eq!(cache.refresh(21, 10).dimensions(), (21, 10));
        assert_eq!(cache.current().map(DrawMask::dimensions), Some((21, 10)));
        assert_eq!(
            cache.resampled_artwork().map(RgbaImage::dimensions),
            Some((21, 10))
        );
    }
}
