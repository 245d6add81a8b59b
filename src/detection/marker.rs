//! Colored marker detection
//!
//! The robot carries a saturated blue marker. Each frame the backend
//! thresholds the frame in HSV and reports the external contours of the
//! cleaned mask; the largest one above the area floor is the marker, and its
//! bounding-box center is the measurement fed to the position filter.

use crate::config::MarkerConfig;
use crate::error::Result;
use crate::geometry::{PixelPoint, Point2, Quad};
use crate::imaging::{Blob, ImageOps};

/// Marker found in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerDetection {
    /// Bounding-box center, rounded down
    pub center: PixelPoint,
    pub blob: Blob,
}

impl MarkerDetection {
    pub fn measurement(&self) -> Point2 {
        Point2::new(self.center.x as f32, self.center.y as f32)
    }

    /// Whether the marker lies inside or on the canvas outline
    pub fn is_within(&self, canvas: &Quad) -> bool {
        canvas.contains(self.measurement())
    }
}

/// Marker detector over an imaging backend
#[derive(Debug, Clone, Default)]
pub struct MarkerDetector {
    config: MarkerConfig,
}

impl MarkerDetector {
    pub fn new(config: MarkerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarkerConfig {
        &self.config
    }

    /// Find the marker in a frame
    ///
    /// # Errors
    ///
    /// Propagates backend failures; a frame without a marker is `Ok(None)`.
    pub fn detect<O: ImageOps>(&self, ops: &O, frame: &O::Frame) -> Result<Option<MarkerDetection>> {
        let blobs = ops.color_blobs(frame, &self.config)?;
        Ok(self.select(&blobs))
    }

    /// Largest blob, kept only if it clears the minimum area
    pub fn select(&self, blobs: &[Blob]) -> Option<MarkerDetection> {
        let largest = blobs.iter().max_by(|a, b| a.area.total_cmp(&b.area))?;
        if largest.area <= self.config.min_area {
            return None;
        }
        Some(MarkerDetection {
            center: largest.bounds.pixel_center(),
            blob: *largest,
        })
    }
}
