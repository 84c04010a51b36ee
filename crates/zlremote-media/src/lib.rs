//! Network adaptation for ZLRemote media pipelines.
//!
//! Three stages, each usable on its own:
//! - [`NetworkStatsEstimator`] turns RTT samples into smoothed latency, jitter
//!   and a short history window
//! - [`AdaptiveQualityController`] (driven periodically by a
//!   [`QualityMonitor`]) turns that window into a quality decision
//! - [`FramePacer`] applies the decision to a stream of outgoing units

pub mod error;
pub mod monitor;
pub mod pacer;
pub mod quality;
pub mod stats;

pub use error::ConfigError;
pub use monitor::QualityMonitor;
pub use pacer::{FramePacer, OptimizationLevel, PacerConfig, PacerOutcome, PacerReport};
pub use quality::{
    AdaptationState, AdaptiveQualityController, QualityChange, QualityConfig, QualityDecision,
    TrendPrediction,
};
pub use stats::{HistoryEntry, NetworkSample, NetworkStatsEstimator, StatsSnapshot, StatsUpdate};
