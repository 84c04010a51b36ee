//! Background tasks
//!
//! - `liveness` - expires connections that stopped sending anything

pub mod liveness;

pub use liveness::start_liveness_sweeper;
