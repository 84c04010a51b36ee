//! Network statistics estimation
//!
//! Folds raw round-trip samples into smoothed latency and jitter figures and
//! keeps a short sliding window of those figures for stability and trend
//! analysis. Every recorded sample publishes a [`StatsUpdate`] on a watch
//! channel so periodic consumers always see the latest state without
//! blocking the sampler.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::watch;
use zlremote_protocol::ConnectionQuality;

/// Weight of a new sample in the latency moving average
pub const LATENCY_WEIGHT: f64 = 0.2;

/// Weight of a new deviation in the jitter moving average
pub const JITTER_WEIGHT: f64 = 0.1;

/// History length that triggers compaction
pub const HISTORY_LIMIT: usize = 100;

/// History length kept after compaction
pub const HISTORY_COMPACTED: usize = 50;

/// A single round-trip measurement
#[derive(Debug, Clone, Copy)]
pub struct NetworkSample {
    pub rtt: Duration,
    pub at: Instant,
}

impl NetworkSample {
    pub fn new(rtt: Duration) -> Self {
        Self {
            rtt,
            at: Instant::now(),
        }
    }

    pub fn from_millis(rtt_ms: u64) -> Self {
        Self::new(Duration::from_millis(rtt_ms))
    }
}

/// Smoothed view of a link at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSnapshot {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    /// Percent, 0.0 to 100.0
    pub packet_loss: f64,
    /// Number of RTT samples folded in so far
    pub samples: u64,
}

impl StatsSnapshot {
    /// Coarse classification shown to users alongside the raw figures
    pub fn connection_quality(&self) -> ConnectionQuality {
        if self.latency_ms < 50.0 && self.jitter_ms < 10.0 && self.packet_loss < 0.1 {
            ConnectionQuality::Excellent
        } else if self.latency_ms < 100.0 && self.jitter_ms < 20.0 && self.packet_loss < 1.0 {
            ConnectionQuality::Good
        } else if self.latency_ms < 200.0 && self.jitter_ms < 50.0 && self.packet_loss < 3.0 {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }
}

/// Smoothed figures recorded after one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub at: Instant,
    pub latency_ms: f64,
    pub jitter_ms: f64,
}

/// Published after every sample: the current snapshot plus the window
#[derive(Debug, Clone, Default)]
pub struct StatsUpdate {
    pub snapshot: StatsSnapshot,
    pub history: Vec<HistoryEntry>,
}

/// Per-connection latency/jitter estimator.
///
/// Latency is an exponential moving average seeded with the first sample;
/// jitter is the moving average of the absolute deviation between each new
/// sample and the updated latency estimate.
pub struct NetworkStatsEstimator {
    snapshot: StatsSnapshot,
    history: VecDeque<HistoryEntry>,
    updates: watch::Sender<StatsUpdate>,
}

impl NetworkStatsEstimator {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(StatsUpdate::default());
        Self {
            snapshot: StatsSnapshot::default(),
            history: VecDeque::with_capacity(HISTORY_LIMIT + 1),
            updates,
        }
    }

    /// Receiver that always holds the latest [`StatsUpdate`]
    pub fn subscribe(&self) -> watch::Receiver<StatsUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot
    }

    pub fn history(&self) -> &VecDeque<HistoryEntry> {
        &self.history
    }

    /// Fold one RTT sample into the estimates and publish the result
    pub fn record(&mut self, sample: NetworkSample) -> StatsSnapshot {
        let sample_ms = sample.rtt.as_secs_f64() * 1000.0;

        if self.snapshot.samples == 0 {
            self.snapshot.latency_ms = sample_ms;
            self.snapshot.jitter_ms = 0.0;
        } else {
            self.snapshot.latency_ms =
                self.snapshot.latency_ms * (1.0 - LATENCY_WEIGHT) + sample_ms * LATENCY_WEIGHT;
            let deviation = (sample_ms - self.snapshot.latency_ms).abs();
            self.snapshot.jitter_ms =
                self.snapshot.jitter_ms * (1.0 - JITTER_WEIGHT) + deviation * JITTER_WEIGHT;
        }
        self.snapshot.samples += 1;

        self.history.push_back(HistoryEntry {
            at: sample.at,
            latency_ms: self.snapshot.latency_ms,
            jitter_ms: self.snapshot.jitter_ms,
        });
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_COMPACTED;
            self.history.drain(..excess);
        }

        tracing::trace!(
            rtt_ms = sample_ms,
            latency_ms = self.snapshot.latency_ms,
            jitter_ms = self.snapshot.jitter_ms,
            "Recorded network sample"
        );

        self.publish();
        self.snapshot
    }

    /// Replace the packet-loss figure reported by the media pipeline
    pub fn record_packet_loss(&mut self, percent: f64) -> StatsSnapshot {
        self.snapshot.packet_loss = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.publish();
        self.snapshot
    }

    fn publish(&self) {
        self.updates.send_replace(StatsUpdate {
            snapshot: self.snapshot,
            history: self.history.iter().copied().collect(),
        });
    }
}

impl Default for NetworkStatsEstimator {
    fn default() -> Self {
        Self::new()
    }
}
