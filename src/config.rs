//! Configuration structures for the sketch_servo control loop.
//!
//! This module defines all tunable parameters, organized into groups that
//! mirror the pipeline stages: marker detection, filtering, canvas
//! acquisition, steering, the command channel and frame streaming.
//!
//! # Configuration Loading
//!
//! Configuration can be loaded from JSON files or constructed programmatically:
//!
//! ```no_run
//! use sketch_servo::ServoConfig;
//! use std::path::Path;
//!
//! // Load from file
//! let config = ServoConfig::from_json_file(Path::new("servo.json"))?;
//!
//! // Or use defaults
//! let config = ServoConfig::default();
//! # Ok::<(), sketch_servo::ServoError>(())
//! ```
//!
//! Every section is `#[serde(default)]`, so a file only needs to name the
//! values it changes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::channel::protocol::ClientRole;
use crate::constants;
use crate::error::{Result, ServoError};

/// Complete configuration for one servo session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// Target artwork the robot should trace
    pub artwork_path: PathBuf,

    /// Camera device index handed to the capture backend
    pub camera_index: i32,

    /// Marker blob detection
    pub marker: MarkerConfig,

    /// Marker position filter
    pub kalman: KalmanConfig,

    /// Canvas acquisition and tracking
    pub canvas: CanvasConfig,

    /// Steering thresholds
    pub navigation: NavigationConfig,

    /// Relay connection and command timing
    pub command: CommandConfig,

    /// Annotated frame streaming
    pub stream: StreamConfig,
}

/// Marker color window and blob filtering.
///
/// Hue is on OpenCV's 0-180 scale; saturation and value on 0-255.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerConfig {
    /// Lower HSV bound (inclusive)
    pub hsv_lower: [u8; 3],

    /// Upper HSV bound (inclusive)
    pub hsv_upper: [u8; 3],

    /// Blobs must exceed this contour area to count as the marker
    pub min_area: f64,

    /// Opening kernel size applied to the color mask
    pub open_kernel_size: i32,

    /// Dilation passes after opening
    pub dilate_iterations: i32,
}

/// Noise variances of the constant-velocity filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    pub process_noise: f32,
    pub measurement_noise: f32,
}

/// Which canvas acquisition pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasStrategyKind {
    /// Detect a quadrilateral once, then follow its corners with optical flow
    Tracking,
    /// Re-detect a bright rectangle from a threshold mask every frame
    Threshold,
}

/// Canvas detection and tracking parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CanvasConfig {
    pub strategy: CanvasStrategyKind,

    /// Minimum contour area for a candidate, in px²
    pub min_area: f64,

    /// Exclusive aspect ratio bounds of the candidate bounding box
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,

    /// Polygon approximation epsilon as fraction of perimeter
    pub poly_approx_epsilon: f64,

    pub clahe_clip_limit: f64,
    pub clahe_tile_size: i32,

    pub canny_low_threshold: f64,
    pub canny_high_threshold: f64,

    /// Kernel used to dilate and close the edge map
    pub edge_kernel_size: i32,
    pub edge_dilate_iterations: i32,

    /// Lucas-Kanade window, pyramid depth and termination criteria
    pub flow_window: i32,
    pub flow_max_level: i32,
    pub flow_max_iterations: i32,
    pub flow_epsilon: f64,

    /// Grayscale cutoff for the threshold strategy
    pub brightness_threshold: f64,
}

/// Steering thresholds in canvas-local pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub search_radius: i32,
    pub turn_threshold: i32,
    pub move_threshold: i32,

    /// When true, moving up the image (decreasing y) is "forward"
    pub forward_is_negative_y: bool,
}

/// Firmware command vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialectConfig {
    /// `left`/`right`/`forward`/`backward` with an explicit pulse length
    TimedPulse { turn_ms: u32, move_ms: u32 },
    /// `*_micro_slow` motion names plus `pen_up`/`pen_down`
    NamedPulse,
}

/// Relay connection and command timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Relay address, `ws://host:port`
    pub url: String,

    /// Role announced in the registration message
    pub role: ClientRole,

    pub dialect: DialectConfig,

    /// Send pen up/down commands when the desired pen state changes
    pub transmit_pen: bool,

    pub command_interval_ms: u64,
    pub ping_interval_ms: u64,
    pub reconnect_backoff_ms: u64,
    pub connect_timeout_ms: u64,
}

/// Annotated frame streaming.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub fps: f64,
    pub max_width: i32,
    pub jpeg_quality: i32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            artwork_path: PathBuf::from("public/sketches/latest.png"),
            camera_index: 0,
            marker: MarkerConfig::default(),
            kalman: KalmanConfig::default(),
            canvas: CanvasConfig::default(),
            navigation: NavigationConfig::default(),
            command: CommandConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            hsv_lower: constants::marker::HSV_LOWER,
            hsv_upper: constants::marker::HSV_UPPER,
            min_area: constants::marker::MIN_BLOB_AREA,
            open_kernel_size: constants::marker::OPEN_KERNEL_SIZE,
            dilate_iterations: constants::marker::DILATE_ITERATIONS,
        }
    }
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: constants::kalman::PROCESS_NOISE,
            measurement_noise: constants::kalman::MEASUREMENT_NOISE,
        }
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        use constants::canvas as c;
        Self {
            strategy: CanvasStrategyKind::Tracking,
            min_area: c::MIN_AREA,
            min_aspect_ratio: c::MIN_ASPECT_RATIO,
            max_aspect_ratio: c::MAX_ASPECT_RATIO,
            poly_approx_epsilon: c::POLY_APPROX_EPSILON,
            clahe_clip_limit: c::CLAHE_CLIP_LIMIT,
            clahe_tile_size: c::CLAHE_TILE_SIZE,
            canny_low_threshold: c::CANNY_LOW_THRESHOLD,
            canny_high_threshold: c::CANNY_HIGH_THRESHOLD,
            edge_kernel_size: c::EDGE_KERNEL_SIZE,
            edge_dilate_iterations: c::EDGE_DILATE_ITERATIONS,
            flow_window: c::FLOW_WINDOW,
            flow_max_level: c::FLOW_MAX_LEVEL,
            flow_max_iterations: c::FLOW_MAX_ITERATIONS,
            flow_epsilon: c::FLOW_EPSILON,
            brightness_threshold: c::BRIGHTNESS_THRESHOLD,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            search_radius: constants::navigation::SEARCH_RADIUS,
            turn_threshold: constants::navigation::TURN_THRESHOLD,
            move_threshold: constants::navigation::MOVE_THRESHOLD,
            forward_is_negative_y: true,
        }
    }
}

impl Default for DialectConfig {
    fn default() -> Self {
        DialectConfig::TimedPulse {
            turn_ms: constants::command::TURN_PULSE_MS,
            move_ms: constants::command::MOVE_PULSE_MS,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        use constants::command as c;
        Self {
            url: c::DEFAULT_URL.to_string(),
            role: ClientRole::Vision,
            dialect: DialectConfig::default(),
            transmit_pen: false,
            command_interval_ms: c::COMMAND_INTERVAL.as_millis() as u64,
            ping_interval_ms: c::PING_INTERVAL.as_millis() as u64,
            reconnect_backoff_ms: c::RECONNECT_BACKOFF.as_millis() as u64,
            connect_timeout_ms: c::CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: constants::stream::FPS,
            max_width: constants::stream::MAX_WIDTH,
            jpeg_quality: constants::stream::JPEG_QUALITY,
        }
    }
}

impl CommandConfig {
    pub fn command_interval(&self) -> Duration {
        Duration::from_millis(self.command_interval_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl StreamConfig {
    /// Minimum spacing between streamed frames
    ///
    /// Rates whose period does not fit a `Duration` (zero, negative, NaN or
    /// vanishingly small) never stream.
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.fps)
            .ok()
            .filter(|period| !period.is_zero())
            .unwrap_or(Duration::MAX)
    }
}

impl ServoConfig {
    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServoError::config(format!("cannot read {}", path.display()), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ServoError::config(format!("cannot parse {}", path.display()), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ServoError::config("cannot serialize configuration", e))?;
        std::fs::write(path, json)
            .map_err(|e| ServoError::config(format!("cannot write {}", path.display()), e))?;
        Ok(())
    }

    /// Reject values that would stall or destabilize the loop
    pub fn validate(&self) -> Result<()> {
        let marker = &self.marker;
        for i in 0..3 {
            if marker.hsv_lower[i] > marker.hsv_upper[i] {
                return Err(ServoError::invalid_parameter(
                    "marker.hsv_lower",
                    format!("{:?} > {:?}", marker.hsv_lower, marker.hsv_upper),
                ));
            }
        }
        if marker.open_kernel_size <= 0 {
            return Err(ServoError::invalid_parameter(
                "marker.open_kernel_size",
                marker.open_kernel_size,
            ));
        }

        if self.kalman.process_noise <= 0.0 || self.kalman.measurement_noise <= 0.0 {
            return Err(ServoError::invalid_parameter(
                "kalman",
                format!(
                    "process_noise={} measurement_noise={}",
                    self.kalman.process_noise, self.kalman.measurement_noise
                ),
            ));
        }

        let canvas = &self.canvas;
        if canvas.min_aspect_ratio >= canvas.max_aspect_ratio {
            return Err(ServoError::invalid_parameter(
                "canvas.min_aspect_ratio",
                format!("{} >= {}", canvas.min_aspect_ratio, canvas.max_aspect_ratio),
            ));
        }
        if canvas.flow_window < 3 || canvas.flow_window % 2 == 0 {
            return Err(ServoError::invalid_parameter("canvas.flow_window", canvas.flow_window));
        }

        let nav = &self.navigation;
        if nav.search_radius <= 0 {
            return Err(ServoError::invalid_parameter("navigation.search_radius", nav.search_radius));
        }
        if nav.turn_threshold < 0 || nav.move_threshold < 0 {
            return Err(ServoError::invalid_parameter(
                "navigation",
                format!("turn_threshold={} move_threshold={}", nav.turn_threshold, nav.move_threshold),
            ));
        }

        let cmd = &self.command;
        if cmd.url.trim().is_empty() {
            return Err(ServoError::invalid_parameter("command.url", &cmd.url));
        }
        if cmd.command_interval_ms == 0 {
            return Err(ServoError::invalid_parameter("command.command_interval_ms", 0));
        }
        if cmd.ping_interval_ms == 0 {
            return Err(ServoError::invalid_parameter("command.ping_interval_ms", 0));
        }
        if cmd.reconnect_backoff_ms == 0 {
            return Err(ServoError::invalid_parameter("command.reconnect_backoff_ms", 0));
        }

        if self.stream.enabled {
            let fps_range = constants::stream::MIN_FPS..=constants::stream::MAX_FPS;
            if !fps_range.contains(&self.stream.fps) {
                return Err(ServoError::invalid_parameter("stream.fps", self.stream.fps));
            }
            if !(1..=100).contains(&self.stream.jpeg_quality) {
                return Err(ServoError::invalid_parameter(
                    "stream.jpeg_quality",
                    self.stream.jpeg_quality,
                ));
            }
            if self.stream.max_width <= 0 {
                return Err(ServoError::invalid_parameter("stream.max_width", self.stream.max_width));
            }
        }

        Ok(())
    }
}
