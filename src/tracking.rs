//! Constant-velocity Kalman filter for the marker position
//!
//! State is `[x, y, vx, vy]` in camera pixels with one frame as the time
//! step; only position is observed. The filter starts at the origin with
//! zero covariance and is pulled onto the marker by its first corrections.

use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};
use tracing::warn;

use crate::config::KalmanConfig;
use crate::geometry::Point2;

/// Marker position/velocity estimator
#[derive(Debug, Clone)]
pub struct MarkerTracker {
    state: Vector4<f32>,
    covariance: Matrix4<f32>,
    transition: Matrix4<f32>,
    measurement: Matrix2x4<f32>,
    process_noise: Matrix4<f32>,
    measurement_noise: Matrix2<f32>,
}

impl Default for MarkerTracker {
    fn default() -> Self {
        Self::new(&KalmanConfig::default())
    }
}

impl MarkerTracker {
    pub fn new(config: &KalmanConfig) -> Self {
        #[rustfmt::skip]
        let transition = Matrix4::new(
            1.0, 0.0, 1.0, 0.0,
            0.0, 1.0, 0.0, 1.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );

        #[rustfmt::skip]
        let measurement = Matrix2x4::new(
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
        );

        Self {
            state: Vector4::zeros(),
            covariance: Matrix4::zeros(),
            transition,
            measurement,
            process_noise: Matrix4::identity() * config.process_noise,
            measurement_noise: Matrix2::identity() * config.measurement_noise,
        }
    }

    /// Advance one frame and return the predicted position
    pub fn predict(&mut self) -> Point2 {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
        self.position()
    }

    /// Fuse a measured marker position into the current estimate
    pub fn correct(&mut self, measured: Point2) {
        let z = Vector2::new(measured.x, measured.y);
        let innovation = z - self.measurement * self.state;
        let innovation_cov =
            self.measurement * self.covariance * self.measurement.transpose() + self.measurement_noise;

        let Some(inv) = innovation_cov.try_inverse() else {
            // R is positive definite, so this only happens on NaN input
            warn!("singular innovation covariance, dropping marker measurement");
            return;
        };

        let gain = self.covariance * self.measurement.transpose() * inv;
        self.state += gain * innovation;
        self.covariance = (Matrix4::identity() - gain * self.measurement) * self.covariance;
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.state[0], self.state[1])
    }

    pub fn velocity(&self) -> Point2 {
        Point2::new(self.state[2], self.state[3])
    }
}
