//! Error types for the sketch_servo library

use thiserror::Error;

/// Result type alias for sketch_servo operations
pub type Result<T> = std::result::Result<T, ServoError>;

/// Error types raised by the servo pipeline
#[derive(Error, Debug)]
pub enum ServoError {
    /// Frame source failed to deliver a frame
    #[error("Frame acquisition failed: {message}")]
    FrameAcquisition {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// An image-processing step failed while detecting the canvas or marker
    #[error("Detection failed: {reason}")]
    Detection { reason: String },

    /// Target artwork could not be loaded or decoded
    #[error("Failed to load artwork: {message}")]
    ArtworkLoad {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Connecting to or talking with the actuator relay failed
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation requires a live connection but none is open
    #[error("Not connected")]
    NotConnected,

    /// Outbound message could not be encoded
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Invalid input parameters
    #[error("Invalid parameter: {parameter} = {value}")]
    InvalidParameter { parameter: String, value: String },

    /// OpenCV operation failed
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {operation}")]
    OpenCv {
        operation: String,
        #[source]
        source: Option<opencv::Error>,
    },
}

impl ServoError {
    /// Create a frame acquisition error with context
    pub fn frame_acquisition<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::FrameAcquisition {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an artwork load error with context
    pub fn artwork_load<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::ArtworkLoad {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a connection error with context
    pub fn connection<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error with context
    pub fn config<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter(parameter: impl Into<String>, value: impl ToString) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.to_string(),
        }
    }

    /// Create an OpenCV error with context
    #[cfg(feature = "opencv")]
    pub fn opencv(operation: impl Into<String>, source: opencv::Error) -> Self {
        Self::OpenCv {
            operation: operation.into(),
            source: Some(source),
        }
    }

    /// Check if this error indicates a condition the control loop survives
    ///
    /// Network and per-frame detection faults are absorbed by the loop;
    /// acquisition and configuration faults end it.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ServoError::Detection { .. }
            | ServoError::Connection { .. }
            | ServoError::NotConnected
            | ServoError::Protocol { .. } => true,
            #[cfg(feature = "opencv")]
            ServoError::OpenCv { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_recoverable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(ServoError::connection("connect failed", io).is_recoverable());
        assert!(ServoError::NotConnected.is_recoverable());
    }

    #[test]
    fn test_acquisition_errors_are_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "camera gone");
        assert!(!ServoError::frame_acquisition("read failed", io).is_recoverable());
        assert!(!ServoError::invalid_parameter("turn_threshold", 0).is_recoverable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = ServoError::invalid_parameter("command.url", "");
        assert_eq!(err.to_string(), "Invalid parameter: command.url = ");
    }
}
