//! Image-processing capabilities the pipeline relies on
//!
//! The detectors and the control loop never touch pixels directly. They ask
//! an [`ImageOps`] backend for blobs, polygon candidates, tracked points and
//! encoded stream frames, and pull frames from a [`FrameSource`]. The
//! OpenCV-backed implementation lives in [`cv_backend`]; tests substitute
//! scripted fakes.

#[cfg(feature = "opencv")]
pub mod cv_backend;

use image::RgbaImage;

use crate::config::{CanvasConfig, MarkerConfig, StreamConfig};
use crate::error::Result;
use crate::geometry::{PixelPoint, Point2, Quad, Rect};
use crate::navigation::PenState;

#[cfg(feature = "opencv")]
pub use cv_backend::{CameraSource, OpenCvOps};

/// Connected region of a binary mask
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Blob {
    /// Contour area in px²
    pub area: f64,
    /// Upright bounding box
    pub bounds: Rect,
}

/// Simplified contour from the edge map
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonCandidate {
    /// Vertices after polygon approximation
    pub vertices: Vec<PixelPoint>,
    /// Area of the contour the polygon was approximated from
    pub area: f64,
}

impl PolygonCandidate {
    /// Bounding box of the approximated vertices
    pub fn bounds(&self) -> Option<Rect> {
        Rect::bounding(&self.vertices)
    }
}

/// Target artwork laid over the canvas bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArtworkLayer<'a> {
    /// Top-left corner of the canvas bounding box in camera pixels
    pub origin: PixelPoint,
    /// Artwork resampled to the bounding box size
    pub pixels: &'a RgbaImage,
    /// Blend by the alpha channel; otherwise the artwork is opaque
    pub has_alpha: bool,
}

impl ArtworkLayer<'_> {
    /// Width and height of the part of the layer inside the frame
    ///
    /// Layers anchored left of or above the frame are not drawn.
    pub fn visible_extent(&self, frame_width: i32, frame_height: i32) -> Option<(i32, i32)> {
        if self.origin.x < 0 || self.origin.y < 0 {
            return None;
        }
        let w = (self.pixels.width() as i32).min(frame_width - self.origin.x);
        let h = (self.pixels.height() as i32).min(frame_height - self.origin.y);
        (w > 0 && h > 0).then_some((w, h))
    }

    /// Blend weight in `[0, 1]` of the local pixel `(x, y)`
    pub fn alpha(&self, x: u32, y: u32) -> f32 {
        if self.has_alpha {
            f32::from(self.pixels.get_pixel(x, y)[3]) / 255.0
        } else {
            1.0
        }
    }
}

/// Annotations drawn onto a streamed frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overlay<'a> {
    pub artwork: Option<ArtworkLayer<'a>>,
    pub canvas: Option<Quad>,
    pub predicted: Option<Point2>,
    pub measured: Option<Rect>,
    /// Steering target in camera pixels
    pub target: Option<PixelPoint>,
    pub pen: Option<PenState>,
    pub connected: bool,
}

impl Overlay<'_> {
    /// Status lines rendered in the top-left corner
    pub fn hud_lines(&self) -> [String; 3] {
        let ws = if self.connected {
            "connected"
        } else {
            "disconnected"
        };
        let canvas = if self.canvas.is_some() { "yes" } else { "no" };
        let pen = match self.pen {
            Some(PenState::Down) => "down",
            _ => "up",
        };
        [
            format!("WS: {ws}"),
            format!("Canvas: {canvas}"),
            format!("Pen: {pen}"),
        ]
    }
}

/// Image-processing primitives over a backend-specific frame type
pub trait ImageOps {
    /// Color camera frame
    type Frame;
    /// Single-channel frame used for optical flow
    type Gray;

    /// Width and height in pixels
    fn frame_size(&self, frame: &Self::Frame) -> (i32, i32);

    fn grayscale(&self, frame: &Self::Frame) -> Result<Self::Gray>;

    /// External contours of the marker color mask
    fn color_blobs(&self, frame: &Self::Frame, config: &MarkerConfig) -> Result<Vec<Blob>>;

    /// Approximated polygons from the enhanced edge map
    fn polygon_candidates(
        &self,
        frame: &Self::Frame,
        config: &CanvasConfig,
    ) -> Result<Vec<PolygonCandidate>>;

    /// External contours of the brightness threshold mask
    fn bright_regions(&self, frame: &Self::Frame, config: &CanvasConfig) -> Result<Vec<Blob>>;

    /// Pyramidal Lucas-Kanade flow; `None` where a point was lost
    fn track_points(
        &self,
        prev: &Self::Gray,
        next: &Self::Gray,
        points: &[Point2],
        config: &CanvasConfig,
    ) -> Result<Vec<Option<Point2>>>;

    /// Draw the overlay, downscale and JPEG-encode a frame for the UI
    fn encode_stream_frame(
        &self,
        frame: &Self::Frame,
        overlay: &Overlay<'_>,
        config: &StreamConfig,
    ) -> Result<Vec<u8>>;
}

/// Sequential frame supplier
pub trait FrameSource {
    type Frame;

    /// Next frame, or `None` once the source is exhausted
    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_candidate_bounds() {
        let candidate = PolygonCandidate {
            vertices: vec![
                PixelPoint::new(10, 10),
                PixelPoint::new(50, 12),
                PixelPoint::new(48, 40),
                PixelPoint::new(11, 39),
            ],
            area: 1100.0,
        };
        assert_eq!(candidate.bounds(), Some(Rect::new(10, 10, 41, 31)));
    }

    #[test]
    fn test_hud_lines() {
        let overlay = Overlay {
            connected: true,
            pen: Some(PenState::Down),
            ..Overlay::default()
        };
        assert_eq!(
            overlay.hud_lines(),
            [
                "WS: connected".to_string(),
                "Canvas: no".to_string(),
                "Pen: down".to_string()
            ]
        );
    }

    #[test]
    fn test_artwork_layer_is_clipped_to_frame() {
        let pixels = RgbaImage::new(300, 200);
        let layer = |x, y| ArtworkLayer {
            origin: PixelPoint::new(x, y),
            pixels: &pixels,
            has_alpha: true,
        };

        assert_eq!(layer(10, 10).visible_extent(640, 480), Some((300, 200)));
        assert_eq!(layer(500, 400).visible_extent(640, 480), Some((140, 80)));
        assert_eq!(layer(640, 10).visible_extent(640, 480), None);
        assert_eq!(layer(-1, 10).visible_extent(640, 480), None);
    }

    #[test]
    fn test_artwork_alpha_weight() {
        let mut pixels = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        pixels.put_pixel(1, 0, Rgba([0, 0, 0, 0]));

        let blended = ArtworkLayer {
            origin: PixelPoint::new(0, 0),
            pixels: &pixels,
            has_alpha: true,
        };
        assert_eq!(blended.alpha(0, 0), 1.0);
        assert_eq!(blended.alpha(1, 0), 0.0);

        let opaque = ArtworkLayer {
            has_alpha: false,
            ..blended
        };
        assert_eq!(opaque.alpha(1, 0), 1.0);
    }
}
