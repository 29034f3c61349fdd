//! Message-oriented duplex transport
//!
//! The session talks to the service through two halves: a sink for outbound
//! text frames and a stream of inbound frames. Each half has exactly one
//! owner, so sending and receiving run concurrently without sharing a lock.

mod websocket;

use async_trait::async_trait;

pub use websocket::{TransportConfig, WsSink, WsStream, connect, redact};

use crate::Result;

/// Outbound half of a transport
#[async_trait]
pub trait MessageSink: Send {
    /// Send one text frame
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Transport`] if the connection is gone
    async fn send(&mut self, text: String) -> Result<()>;

    /// Close the connection gracefully
    ///
    /// # Errors
    ///
    /// Returns error if the close frame cannot be sent
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Inbound half of a transport
#[async_trait]
pub trait MessageStream: Send {
    /// Next inbound frame, or `None` once the connection has closed
    ///
    /// Recoverable errors (see [`crate::Error::is_recoverable`]) affect only
    /// the frame they were raised for.
    async fn next_message(&mut self) -> Option<Result<String>>;
}
