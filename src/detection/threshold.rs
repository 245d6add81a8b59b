//! Per-frame canvas detection from a brightness threshold
//!
//! A lighter alternative to the tracking locator: every frame the largest
//! bright region is taken as the canvas and its upright bounding box becomes
//! the outline. Nothing carries over between frames.

use tracing::debug;

use super::canvas::CanvasStrategy;
use crate::config::CanvasConfig;
use crate::error::Result;
use crate::geometry::Quad;
use crate::imaging::{Blob, ImageOps};

/// Stateless bright-rectangle locator
pub struct ThresholdCanvasLocator {
    config: CanvasConfig,
    current: Option<Quad>,
}

impl ThresholdCanvasLocator {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }

    /// Largest region above the minimum area with an acceptable aspect ratio
    pub fn select_region(&self, regions: &[Blob]) -> Option<Quad> {
        regions
            .iter()
            .filter(|r| r.area >= self.config.min_area)
            .filter(|r| {
                let aspect = r.bounds.aspect_ratio();
                aspect > self.config.min_aspect_ratio && aspect < self.config.max_aspect_ratio
            })
            .max_by(|a, b| a.area.total_cmp(&b.area))
            .map(|r| Quad::new(r.bounds.corners()))
    }
}

impl<O: ImageOps> CanvasStrategy<O> for ThresholdCanvasLocator {
    fn update(&mut self, ops: &O, frame: &O::Frame) -> Result<Option<Quad>> {
        self.current = None;
        let regions = ops.bright_regions(frame, &self.config)?;
        self.current = self.select_region(&regions);
        if self.current.is_none() {
            debug!(regions = regions.len(), "no bright canvas region");
        }
        Ok(self.current)
    }

    fn current(&self) -> Option<&Quad> {
        self.current.as_ref()
    }

    fn name(&self) -> &'static str {
        "threshold"
    }
}
