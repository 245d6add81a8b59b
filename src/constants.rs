//! Default tuning constants for the servo pipeline
//!
//! These values reproduce the behavior the robot was tuned against: a
//! 640×480-class webcam looking down at a sheet of white paper, a blue
//! marker on the robot, and a relay server forwarding commands to the
//! actuator firmware. All of them can be overridden through
//! [`crate::config::ServoConfig`].

/// Marker blob detection
pub mod marker {
    /// Lower HSV bound of the marker color window (OpenCV hue scale 0-180)
    pub const HSV_LOWER: [u8; 3] = [85, 50, 40];

    /// Upper HSV bound of the marker color window
    pub const HSV_UPPER: [u8; 3] = [140, 255, 255];

    /// Blobs at or below this contour area are treated as noise
    pub const MIN_BLOB_AREA: f64 = 300.0;

    /// Morphological opening kernel size for the color mask
    pub const OPEN_KERNEL_SIZE: i32 = 5;

    /// Dilation passes applied after opening
    pub const DILATE_ITERATIONS: i32 = 2;
}

/// Constant-velocity Kalman filter
pub mod kalman {
    /// Process noise variance (trust in the motion model)
    pub const PROCESS_NOISE: f32 = 0.03;

    /// Measurement noise variance (trust in blob centroids)
    pub const MEASUREMENT_NOISE: f32 = 0.5;
}

/// Canvas acquisition and tracking
pub mod canvas {
    /// Minimum contour area for a canvas candidate, in px²
    pub const MIN_AREA: f64 = 30_000.0;

    /// Exclusive lower bound of the bounding-box aspect ratio
    pub const MIN_ASPECT_RATIO: f64 = 0.4;

    /// Exclusive upper bound of the bounding-box aspect ratio
    pub const MAX_ASPECT_RATIO: f64 = 2.5;

    /// Polygon approximation epsilon as fraction of perimeter
    pub const POLY_APPROX_EPSILON: f64 = 0.02;

    /// CLAHE contrast limit
    pub const CLAHE_CLIP_LIMIT: f64 = 4.0;

    /// CLAHE tile grid size
    pub const CLAHE_TILE_SIZE: i32 = 8;

    /// Canny hysteresis thresholds
    pub const CANNY_LOW_THRESHOLD: f64 = 40.0;
    pub const CANNY_HIGH_THRESHOLD: f64 = 120.0;

    /// Edge dilation / closing kernel size
    pub const EDGE_KERNEL_SIZE: i32 = 5;

    /// Edge dilation passes
    pub const EDGE_DILATE_ITERATIONS: i32 = 2;

    /// Lucas-Kanade search window (square)
    pub const FLOW_WINDOW: i32 = 21;

    /// Lucas-Kanade pyramid levels above the base image
    pub const FLOW_MAX_LEVEL: i32 = 3;

    /// Lucas-Kanade termination: iterations
    pub const FLOW_MAX_ITERATIONS: i32 = 30;

    /// Lucas-Kanade termination: epsilon
    pub const FLOW_EPSILON: f64 = 0.01;

    /// Brightness cutoff for the per-frame threshold strategy
    pub const BRIGHTNESS_THRESHOLD: f64 = 170.0;
}

/// Draw mask classification
pub mod mask {
    /// Alpha at or below this value counts as transparent
    pub const ALPHA_CUTOFF: u8 = 10;

    /// Mean RGB below this value counts as ink
    pub const DARK_CUTOFF: f32 = 80.0;
}

/// Steering decisions, in canvas-local pixels
pub mod navigation {
    /// Half-width of the square window searched for the nearest ink pixel
    pub const SEARCH_RADIUS: i32 = 30;

    /// Horizontal error that triggers a turn
    pub const TURN_THRESHOLD: i32 = 14;

    /// Vertical error that triggers a forward/backward move
    pub const MOVE_THRESHOLD: i32 = 14;
}

/// Command channel timing
pub mod command {
    use std::time::Duration;

    /// Relay address the vision client registers with
    pub const DEFAULT_URL: &str = "ws://127.0.0.1:3001";

    /// Minimum spacing between steering decisions
    pub const COMMAND_INTERVAL: Duration = Duration::from_millis(150);

    /// Keepalive period while connected
    pub const PING_INTERVAL: Duration = Duration::from_secs(5);

    /// Minimum spacing between connection attempts
    pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

    /// Upper bound on TCP connect and socket I/O
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Pulse length for turn commands (timed-pulse firmware)
    pub const TURN_PULSE_MS: u32 = 120;

    /// Pulse length for forward/backward commands (timed-pulse firmware)
    pub const MOVE_PULSE_MS: u32 = 140;
}

/// Annotated frame streaming
pub mod stream {
    /// Frames per second pushed to the UI
    pub const FPS: f64 = 8.0;

    /// Accepted stream rate range
    pub const MIN_FPS: f64 = 0.1;
    pub const MAX_FPS: f64 = 60.0;

    /// Frames wider than this are downscaled before encoding
    pub const MAX_WIDTH: i32 = 640;

    /// JPEG quality (0-100)
    pub const JPEG_QUALITY: i32 = 70;
}
