use thiserror::Error;
use zlremote_protocol::{ConnectionId, ServerMessage};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("outbound queue full")]
    Full,

    #[error("connection closed")]
    Closed,

    #[error("unknown connection")]
    Unknown,
}

/// Non-blocking delivery to client connections.
///
/// `try_deliver` must never wait on a socket: it either queues the message
/// or fails immediately. The router calls it while holding its registry lock.
pub trait Outbox: Send + Sync {
    fn try_deliver(&self, to: ConnectionId, message: &ServerMessage) -> Result<(), DeliveryError>;

    /// Close the transport of a connection the router has given up on
    fn evict(&self, id: ConnectionId);
}
