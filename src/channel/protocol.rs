//! JSON messages sent to the relay and the firmware command dialects

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};

use crate::config::DialectConfig;
use crate::error::{Result, ServoError};
use crate::navigation::{Intent, MoveDirection, PenState, TurnDirection};

/// Role announced to the relay on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Vision,
    Ui,
}

/// Identifier sent in the `client` field of the registration message
pub const CLIENT_NAME: &str = "vision";

/// Everything this client ever writes to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    Register {
        role: ClientRole,
        client: String,
    },
    Ping,
    Cmd {
        cmd: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        ms: Option<u32>,
    },
    VisionFrame {
        format: String,
        data: String,
    },
}

impl OutboundMessage {
    pub fn register(role: ClientRole) -> Self {
        OutboundMessage::Register {
            role,
            client: CLIENT_NAME.to_string(),
        }
    }

    pub fn command(cmd: impl Into<String>, ms: Option<u32>) -> Self {
        OutboundMessage::Cmd {
            cmd: cmd.into(),
            ms,
        }
    }

    /// Wrap an encoded JPEG for the UI stream
    pub fn vision_frame(jpeg: &[u8]) -> Self {
        OutboundMessage::VisionFrame {
            format: "jpeg".to_string(),
            data: BASE64.encode(jpeg),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ServoError::Protocol {
            message: format!("cannot encode message: {e}"),
        })
    }
}

/// Maps steering intents onto one firmware's command names
pub trait CommandDialect: Send {
    fn name(&self) -> &'static str;

    /// Encode an intent, or `None` if this firmware has no such command
    fn encode(&self, intent: Intent) -> Option<OutboundMessage>;
}

/// Firmware that takes `left`/`right`/`forward`/`backward` plus a pulse length
///
/// The pen is fixed down on this hardware, so pen intents are not encoded.
#[derive(Debug, Clone)]
pub struct TimedPulseDialect {
    pub turn_ms: u32,
    pub move_ms: u32,
}

impl CommandDialect for TimedPulseDialect {
    fn name(&self) -> &'static str {
        "timed_pulse"
    }

    fn encode(&self, intent: Intent) -> Option<OutboundMessage> {
        let (cmd, ms) = match intent {
            Intent::Turn(TurnDirection::Left) => ("left", self.turn_ms),
            Intent::Turn(TurnDirection::Right) => ("right", self.turn_ms),
            Intent::Move(MoveDirection::Forward) => ("forward", self.move_ms),
            Intent::Move(MoveDirection::Backward) => ("backward", self.move_ms),
            Intent::Pen(_) => return None,
        };
        Some(OutboundMessage::command(cmd, Some(ms)))
    }
}

/// Firmware with fixed micro-pulses and a servo pen
#[derive(Debug, Clone, Default)]
pub struct NamedPulseDialect;

impl CommandDialect for NamedPulseDialect {
    fn name(&self) -> &'static str {
        "named_pulse"
    }

    fn encode(&self, intent: Intent) -> Option<OutboundMessage> {
        let cmd = match intent {
            Intent::Turn(TurnDirection::Left) => "left_micro_slow",
            Intent::Turn(TurnDirection::Right) => "right_micro_slow",
            Intent::Move(MoveDirection::Forward) => "forward_micro_slow",
            Intent::Move(MoveDirection::Backward) => "back_micro_slow",
            Intent::Pen(PenState::Up) => "pen_up",
            Intent::Pen(PenState::Down) => "pen_down",
        };
        Some(OutboundMessage::command(cmd, None))
    }
}

/// Build the dialect selected in configuration
pub fn dialect_for(config: &DialectConfig) -> Box<dyn CommandDialect> {
    match config {
        DialectConfig::TimedPulse { turn_ms, move_ms } => Box::new(TimedPulseDialect {
            turn_ms: *turn_ms,
            move_ms: *move_ms,
        }),
        DialectConfig::NamedPulse => Box::new(NamedPulseDialect),
    }
}
