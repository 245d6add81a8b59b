//! Canvas acquisition and frame-to-frame tracking
//!
//! Implements a two-state locator:
//! - SEARCHING: look for a large, roughly rectangular, centered quadrilateral
//!   in the enhanced edge map
//! - LOCKED: follow the four corners with pyramidal optical flow against the
//!   previous grayscale frame, never re-detecting while flow holds
//!
//! Losing any corner drops the lock and the next frame searches again.

use std::mem;

use tracing::{debug, info};

use crate::config::CanvasConfig;
use crate::error::Result;
use crate::geometry::{Point2, Quad};
use crate::imaging::{ImageOps, PolygonCandidate};

/// A canvas acquisition pipeline run once per frame
pub trait CanvasStrategy<O: ImageOps> {
    /// Process a frame and return the canvas outline, if known
    fn update(&mut self, ops: &O, frame: &O::Frame) -> Result<Option<Quad>>;

    /// Outline from the most recent update
    fn current(&self) -> Option<&Quad>;

    fn is_locked(&self) -> bool {
        self.current().is_some()
    }

    fn name(&self) -> &'static str;
}

/// Lock state of the tracking locator
///
/// `G` is the backend's grayscale frame, kept as the optical-flow reference.
#[derive(Debug, Clone)]
pub enum CanvasState<G> {
    Searching,
    Locked { quad: Quad, reference: G },
}

impl<G> CanvasState<G> {
    pub fn quad(&self) -> Option<&Quad> {
        match self {
            CanvasState::Searching => None,
            CanvasState::Locked { quad, .. } => Some(quad),
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, CanvasState::Locked { .. })
    }

    /// SEARCHING → LOCKED when detection produced a quad
    pub fn acquire(detected: Option<Quad>, gray: G) -> Self {
        match detected {
            Some(quad) => CanvasState::Locked {
                quad,
                reference: gray,
            },
            None => CanvasState::Searching,
        }
    }

    /// LOCKED → LOCKED with the flowed corners, or SEARCHING if any was lost
    pub fn track(tracked: &[Option<Point2>], gray: G) -> Self {
        let corners: Option<Vec<Point2>> = tracked.iter().copied().collect();
        match corners.as_deref().and_then(Quad::from_slice) {
            Some(quad) => CanvasState::Locked {
                quad,
                reference: gray,
            },
            None => CanvasState::Searching,
        }
    }
}

/// Pick the quadrilateral to lock onto
///
/// Only 4-vertex candidates with at least the minimum contour area and a
/// bounding-box aspect ratio strictly inside the configured range qualify.
/// The winner maximizes `area - |cx - w/2| - |cy - h/2|` and must score
/// above zero.
pub fn select_candidate(
    candidates: &[PolygonCandidate],
    frame_size: (i32, i32),
    config: &CanvasConfig,
) -> Option<Quad> {
    let half_w = frame_size.0 as f64 / 2.0;
    let half_h = frame_size.1 as f64 / 2.0;

    let mut best: Option<Quad> = None;
    let mut best_score = 0.0;

    for candidate in candidates {
        if candidate.area < config.min_area || candidate.vertices.len() != 4 {
            continue;
        }

        let Some(bounds) = candidate.bounds() else {
            continue;
        };
        let aspect = bounds.aspect_ratio();
        if aspect <= config.min_aspect_ratio || aspect >= config.max_aspect_ratio {
            continue;
        }

        let center = bounds.center();
        let center_dist = (center.x as f64 - half_w).abs() + (center.y as f64 - half_h).abs();
        let score = candidate.area - center_dist;

        if score > best_score {
            let corners: Vec<Point2> = candidate
                .vertices
                .iter()
                .map(|p| Point2::new(p.x as f32, p.y as f32))
                .collect();
            if let Some(quad) = Quad::from_slice(&corners) {
                best_score = score;
                best = Some(quad);
            }
        }
    }
    best
}

/// Detect-once, track-forever canvas locator
pub struct CanvasLocator<G> {
    config: CanvasConfig,
    state: CanvasState<G>,
}

impl<G> CanvasLocator<G> {
    pub fn new(config: CanvasConfig) -> Self {
        Self {
            config,
            state: CanvasState::Searching,
        }
    }
}

impl<O: ImageOps> CanvasStrategy<O> for CanvasLocator<O::Gray> {
    fn update(&mut self, ops: &O, frame: &O::Frame) -> Result<Option<Quad>> {
        let gray = ops.grayscale(frame)?;

        // A failing backend call below leaves the locator searching
        self.state = match mem::replace(&mut self.state, CanvasState::Searching) {
            CanvasState::Searching => {
                let candidates = ops.polygon_candidates(frame, &self.config)?;
                let detected = select_candidate(&candidates, ops.frame_size(frame), &self.config);
                if let Some(quad) = &detected {
                    info!(bounds = ?quad.bounding_rect(), "canvas locked");
                } else {
                    debug!(candidates = candidates.len(), "no canvas candidate");
                }
                CanvasState::acquire(detected, gray)
            }
            CanvasState::Locked { quad, reference } => {
                let tracked = ops.track_points(&reference, &gray, quad.corners(), &self.config)?;
                let next = CanvasState::track(&tracked, gray);
                if !next.is_locked() {
                    let kept = tracked.iter().filter(|p| p.is_some()).count();
                    info!(tracked = kept, "canvas lost, searching");
                }
                next
            }
        };

        Ok(self.state.quad().copied())
    }

    fn current(&self) -> Option<&Quad> {
        self.state.quad()
    }

    fn name(&self) -> &'static str {
        "tracking"
    }
}
