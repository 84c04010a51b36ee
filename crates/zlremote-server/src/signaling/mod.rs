//! Session brokering and handshake relay.
//!
//! - `connection_registry` - live connections and their roles
//! - `session_registry` - active sessions, their host and viewers
//! - `ice_buffer` - candidates waiting for their pair's description
//! - `router` - the state machine tying them together

pub mod connection_registry;
pub mod ice_buffer;
pub mod outbox;
pub mod router;
pub mod session_code;
pub mod session_registry;

pub use outbox::{DeliveryError, Outbox};
pub use router::{RegistryCounts, SignalingRouter};
pub use session_code::{RandomCodes, SessionCodeSource};
