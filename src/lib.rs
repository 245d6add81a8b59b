//! # Sketch Servo
//!
//! Closed-loop visual servoing for a drawing robot.
//!
//! A camera watches a robot carrying a colored marker across a sheet of
//! paper. Each frame this library:
//! - Detects the marker and filters its position with a constant-velocity Kalman filter
//! - Locates the sheet once, then follows its corners with optical flow
//! - Resamples the target artwork onto the sheet as a draw mask
//! - Steers the robot toward the nearest unpainted ink pixel
//! - Sends rate-limited motion commands to a WebSocket relay, reconnecting as needed
//!
//! ## Example
//!
//! ```rust,no_run
//! use sketch_servo::{
//!     load_artwork, ClientRole, CommandChannel, ControlLoop, ServoConfig, WebSocketConnector,
//! };
//! use sketch_servo::imaging::{CameraSource, OpenCvOps};
//!
//! let config = ServoConfig::default();
//! let artwork = load_artwork(&config.artwork_path)?;
//! let connector = WebSocketConnector::new(&config.command.url, config.command.connect_timeout());
//! let channel = CommandChannel::new(connector, ClientRole::Vision, config.command.reconnect_backoff());
//!
//! let camera = CameraSource::open(config.camera_index)?;
//! let mut servo = ControlLoop::new(&config, camera, OpenCvOps::new(), artwork, Some(channel));
//! servo.run()?;
//! # Ok::<(), sketch_servo::ServoError>(())
//! ```

pub mod artwork;
pub mod channel;
pub mod config;
pub mod constants;
pub mod control;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod imaging;
pub mod mask;
pub mod navigation;
pub mod tracking;

pub use artwork::{load_artwork, Artwork};
pub use channel::{ClientRole, CommandChannel, OutboundMessage, WebSocketConnector};
pub use config::ServoConfig;
pub use control::{ControlLoop, LoopStatus};
pub use error::{Result, ServoError};
pub use geometry::{PixelPoint, Point2, Quad, Rect};
pub use mask::DrawMask;
pub use navigation::{Intent, NavigationPolicy, PenState};
pub use tracking::MarkerTracker;
