//! Marker and canvas detection
//!
//! This module turns backend image primitives into the two measurements the
//! loop needs every frame: where the marker is, and where the canvas is.

pub mod canvas;
pub mod marker;
pub mod threshold;

pub use canvas::{select_candidate, CanvasLocator, CanvasState, CanvasStrategy};
pub use marker::{MarkerDetection, MarkerDetector};
pub use threshold::ThresholdCanvasLocator;

use crate::config::{CanvasConfig, CanvasStrategyKind};
use crate::imaging::ImageOps;

/// Build the canvas pipeline selected in configuration
pub fn canvas_strategy<O>(config: &CanvasConfig) -> Box<dyn CanvasStrategy<O>>
where
    O: ImageOps + 'static,
    O::Gray: 'static,
{
    match config.strategy {
        CanvasStrategyKind::Tracking => Box::new(CanvasLocator::<O::Gray>::new(config.clone())),
        CanvasStrategyKind::Threshold => Box::new(ThresholdCanvasLocator::new(config.clone())),
    }
}
