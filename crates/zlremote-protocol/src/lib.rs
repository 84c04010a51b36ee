//! Wire protocol shared by the ZLRemote signaling server and its clients.
//!
//! Every frame is a single JSON object whose `type` field selects the
//! variant. Payloads that belong to the peers (SDP, ICE candidates, input
//! events) are carried as opaque JSON values.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
