//! Outbound half of a client connection as seen by the game loop.
//!
//! The world never touches sockets directly. Each player holds a
//! [`Connection`], an unbounded channel drained by the connection's writer
//! task, so sending from inside a tick never blocks.

use std::time::Duration;

use log::warn;
use tokio::sync::mpsc;

use realm_shared::ServerPacket;

/// Normal closure
pub const CLOSE_NORMAL: u16 = 1000;

/// Server going away (shutdown)
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Account could not be loaded
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Missing or invalid bearer token
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

/// Another login for the same account replaced this session
pub const CLOSE_SUPERSEDED: u16 = 4002;

/// Item queued for a connection's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Serialized packet
    Text(String),
    /// Close the socket after `delay`
    Close { code: u16, reason: String, delay: Duration },
}

/// Cloneable sender side of a connection
#[derive(Debug, Clone)]
pub struct Connection {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Connection {
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { sender }
    }

    /// Connection plus the receiver its writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// False once the writer task has gone away
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed()
    }

    /// Serialize and queue a packet. Closed connections are skipped.
    pub fn send(&self, packet: &ServerPacket) -> Result<(), serde_json::Error> {
        let text = packet.to_json()?;
        self.send_text(text);
        Ok(())
    }

    /// Queue an already serialized payload. Returns false if the connection
    /// was not open.
    pub fn send_text(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.sender.send(Outbound::Text(text)).is_ok()
    }

    /// Ask the writer task to close the socket after `delay`
    pub fn close(&self, code: u16, reason: impl Into<String>, delay: Duration) {
        let reason = reason.into();
        if self.sender.send(Outbound::Close { code, reason: reason.clone(), delay }).is_err() {
            warn!("Close ({}: {}) requested on a connection that is already gone", code, reason);
        }
    }
}
