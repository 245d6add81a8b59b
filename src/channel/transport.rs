//! Message transport to the relay
//!
//! The channel only needs to push text frames, so the seam is a small pair
//! of traits. The production connector speaks plain `ws://` WebSocket over a
//! blocking `TcpStream` with bounded timeouts.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

use crate::error::{Result, ServoError};

/// An open, writable connection
pub trait Transport {
    fn send_text(&mut self, text: &str) -> Result<()>;

    /// Send a keepalive; transports with protocol-level housekeeping hook in here
    fn keepalive(&mut self, text: &str) -> Result<()> {
        self.send_text(text)
    }

    /// Best-effort orderly shutdown
    fn close(&mut self) {}
}

/// Opens transports to a fixed endpoint
pub trait Connector {
    type Transport: Transport;

    fn endpoint(&self) -> &str;

    fn connect(&mut self) -> Result<Self::Transport>;
}

/// Blocking WebSocket client connector
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
        }
    }

    fn open_stream(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| ServoError::connection(format!("cannot resolve {host}"), e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!(%addr, error = %e, "relay address unreachable");
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => ServoError::connection(format!("cannot reach {}", self.url), e),
            None => ServoError::Connection {
                message: format!("{host} resolved to no address"),
                source: None,
            },
        })
    }
}

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    fn endpoint(&self) -> &str {
        &self.url
    }

    fn connect(&mut self) -> Result<WebSocketTransport> {
        let request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| ServoError::connection(format!("invalid relay url {}", self.url), e))?;

        let uri = request.uri();
        if uri.scheme_str() != Some("ws") {
            return Err(ServoError::invalid_parameter("command.url", &self.url));
        }
        let host = uri
            .host()
            .ok_or_else(|| ServoError::invalid_parameter("command.url", &self.url))?
            .to_string();
        let port = uri.port_u16().unwrap_or(80);

        let stream = self.open_stream(&host, port)?;
        let configure = |s: &TcpStream| -> io::Result<()> {
            s.set_read_timeout(Some(self.timeout))?;
            s.set_write_timeout(Some(self.timeout))?;
            s.set_nodelay(true)
        };
        configure(&stream)
            .map_err(|e| ServoError::connection("cannot configure relay socket", e))?;

        let (socket, _response) =
            tungstenite::client(request, stream).map_err(|e| ServoError::Connection {
                message: format!("handshake with {} failed: {e}", self.url),
                source: None,
            })?;

        Ok(WebSocketTransport { socket })
    }
}

/// Open WebSocket connection
pub struct WebSocketTransport {
    socket: WebSocket<TcpStream>,
}

impl WebSocketTransport {
    /// Read whatever the relay has sent without blocking
    ///
    /// Inbound payloads are discarded; reading lets the socket answer
    /// protocol pings and notice a close frame.
    fn drain_incoming(&mut self) -> Result<()> {
        self.set_nonblocking(true)?;
        let outcome = loop {
            match self.socket.read() {
                Ok(message) => trace!(len = message.len(), "discarding relay message"),
                Err(tungstenite::Error::Io(e)) if e.kind() == io::ErrorKind::WouldBlock => {
                    break Ok(())
                }
                Err(e) => break Err(ServoError::connection("relay connection dropped", e)),
            }
        };
        self.set_nonblocking(false)?;
        outcome
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        self.socket
            .get_mut()
            .set_nonblocking(nonblocking)
            .map_err(|e| ServoError::connection("cannot switch socket mode", e))
    }
}

impl Transport for WebSocketTransport {
    fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket
            .send(Message::Text(text.to_owned()))
            .map_err(|e| ServoError::connection("send to relay failed", e))
    }

    fn keepalive(&mut self, text: &str) -> Result<()> {
        self.drain_incoming()?;
        self.send_text(text)
    }

    fn close(&mut self) {
        if let Err(e) = self.socket.close(None).and_then(|()| self.socket.flush()) {
            debug!(error = %e, "relay close handshake incomplete");
        }
    }
}
