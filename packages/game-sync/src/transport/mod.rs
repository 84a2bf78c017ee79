//! Bidirectional text-frame transport used by the connection manager.

pub mod tungstenite;

use async_trait::async_trait;

use crate::error::SyncError;

pub use self::tungstenite::TungsteniteTransport;

/// An inbound frame as the connection manager sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Closed { code: Option<u16>, reason: String },
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &str) -> Result<Box<dyn TransportConn>, SyncError>;
}

#[async_trait]
pub trait TransportConn: Send {
    async fn send(&mut self, text: String) -> Result<(), SyncError>;

    /// Next inbound frame, `None` once the stream has ended.
    ///
    /// Must be cancel-safe: it is raced against outbound sends and shutdown.
    async fn recv(&mut self) -> Option<Result<Frame, SyncError>>;

    async fn close(&mut self);
}
