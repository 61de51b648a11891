//! Live task update channel
//!
//! A [`LiveTransport`] opens one [`LiveConnection`] per task. The tracker
//! pumps frames out of it and decides on reconnects itself, so connections
//! carry no retry logic.

mod ws;

pub use ws::{live_url, WsTransport};

use async_trait::async_trait;

use crate::error::TransportError;

/// An open live channel for one task.
#[async_trait]
pub trait LiveConnection: Send {
    /// Next text frame. `None` once the peer has closed the channel.
    async fn next_frame(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the channel from our side.
    async fn close(&mut self);
}

/// Opens live channels addressed by task id.
#[async_trait]
pub trait LiveTransport: Send + Sync {
    async fn connect(&self, task_id: &str) -> Result<Box<dyn LiveConnection>, TransportError>;
}
