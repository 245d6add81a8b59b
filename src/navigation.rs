//! Reactive steering toward the nearest unpainted ink pixel
//!
//! The policy corrects one axis per cycle. Horizontal error is fixed first
//! with a turn; only once the target is roughly straight ahead does the
//! robot move forward or back. Under coarse pulse actuation this keeps the
//! heading error from compounding while the robot advances.

use serde::{Deserialize, Serialize};

use crate::config::NavigationConfig;
use crate::geometry::PixelPoint;
use crate::mask::DrawMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PenState {
    Up,
    Down,
}

/// What the robot should do, independent of any firmware vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Intent {
    Turn(TurnDirection),
    Move(MoveDirection),
    Pen(PenState),
}

/// Outcome of one steering evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Pen state implied by the marker's current pixel
    pub pen: PenState,
    /// Nearest ink pixel in canvas-local coordinates, if any is in range
    pub target: Option<PixelPoint>,
    /// Motion to perform this cycle; `None` means hold still
    pub motion: Option<Intent>,
}

/// Pure steering function over the draw mask
#[derive(Debug, Clone)]
pub struct NavigationPolicy {
    config: NavigationConfig,
}

impl NavigationPolicy {
    pub fn new(config: NavigationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    /// Pen state for a canvas-local marker position
    pub fn pen_state(&self, local: PixelPoint, mask: &DrawMask) -> PenState {
        if mask.is_draw(local) {
            PenState::Down
        } else {
            PenState::Up
        }
    }

    /// Full decision for a canvas-local marker position
    pub fn decide(&self, local: PixelPoint, mask: &DrawMask) -> Decision {
        let pen = self.pen_state(local, mask);
        let target = mask.nearest_draw_pixel(local, self.config.search_radius);
        let motion = target.and_then(|t| self.steer(t.x - local.x, t.y - local.y));
        Decision {
            pen,
            target,
            motion,
        }
    }

    /// Single-axis correction for an offset `(dx, dy)` to the target
    pub fn steer(&self, dx: i32, dy: i32) -> Option<Intent> {
        if dx.abs() > self.config.turn_threshold {
            let dir = if dx > 0 {
                TurnDirection::Right
            } else {
                TurnDirection::Left
            };
            return Some(Intent::Turn(dir));
        }

        if dy.abs() > self.config.move_threshold {
            let forward = if self.config.forward_is_negative_y {
                dy < 0
            } else {
                dy > 0
            };
            let dir = if forward {
                MoveDirection::Forward
            } else {
                MoveDirection::Backward
            };
            return Some(Intent::Move(dir));
        }

        None
    }
}
