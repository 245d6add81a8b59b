//! Resilient command channel
//!
//! Holds at most one live transport. Any failed write drops it; the owner
//! reconnects through [`CommandChannel::ensure_connected`], which spaces
//! attempts by the configured backoff. Commands are at-most-once: nothing is
//! queued or retried.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::protocol::{ClientRole, OutboundMessage};
use super::rate::Interval;
use super::transport::{Connector, Transport};
use crate::error::{Result, ServoError};

pub struct CommandChannel<C: Connector> {
    connector: C,
    role: ClientRole,
    handle: Option<C::Transport>,
    attempts: Interval,
}

impl<C: Connector> CommandChannel<C> {
    pub fn new(connector: C, role: ClientRole, backoff: Duration) -> Self {
        Self {
            connector,
            role,
            handle: None,
            attempts: Interval::new(backoff),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn endpoint(&self) -> &str {
        self.connector.endpoint()
    }

    /// Open a fresh transport and register with the relay
    ///
    /// Stamps the attempt time whether or not it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the connector's error, or the send error if registration
    /// could not be written.
    pub fn connect(&mut self, now: Instant) -> Result<()> {
        self.attempts.stamp(now);
        self.disconnect();

        let mut transport = self.connector.connect()?;
        let register = OutboundMessage::register(self.role).to_json()?;
        transport.send_text(&register)?;

        self.handle = Some(transport);
        Ok(())
    }

    /// Connect if disconnected and the backoff has elapsed
    ///
    /// Returns whether a live connection exists afterwards. Failures are
    /// logged, never raised.
    pub fn ensure_connected(&mut self, now: Instant) -> bool {
        if self.handle.is_some() {
            return true;
        }
        if !self.attempts.ready(now) {
            return false;
        }

        match self.connect(now) {
            Ok(()) => {
                info!(endpoint = self.endpoint(), role = ?self.role, "relay connected");
                true
            }
            Err(e) => {
                warn!(
                    endpoint = self.endpoint(),
                    error = %e,
                    retry_in = ?self.attempts.period(),
                    "relay connect failed"
                );
                false
            }
        }
    }

    /// Write one message; a failed write drops the connection
    ///
    /// # Errors
    ///
    /// `ServoError::NotConnected` without a live handle, otherwise the
    /// transport error.
    pub fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        let text = message.to_json()?;
        let transport = self.handle.as_mut().ok_or(ServoError::NotConnected)?;
        if let Err(e) = transport.send_text(&text) {
            self.invalidate(&e);
            return Err(e);
        }
        debug!(%text, "sent");
        Ok(())
    }

    /// Send a keepalive; a failure drops the connection
    pub fn ping(&mut self) -> Result<()> {
        let text = OutboundMessage::Ping.to_json()?;
        let transport = self.handle.as_mut().ok_or(ServoError::NotConnected)?;
        if let Err(e) = transport.keepalive(&text) {
            self.invalidate(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection if one is open
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.handle.take() {
            transport.close();
            debug!(endpoint = self.endpoint(), "relay connection closed");
        }
    }

    fn invalidate(&mut self, cause: &ServoError) {
        warn!(endpoint = self.endpoint(), error = %cause, "relay connection lost");
        self.handle = None;
    }
}

impl<C: Connector> Drop for CommandChannel<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
