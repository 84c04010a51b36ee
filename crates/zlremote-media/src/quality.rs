//! Adaptive quality control
//!
//! Each evaluation runs three phases over the estimator's history window:
//! stability scoring, trend prediction, and the decision itself (quality
//! tier, frame rate, buffer depth) plus the reason reported with it.

use crate::error::ConfigError;
use crate::stats::{HistoryEntry, StatsUpdate};
use std::time::Duration;
use zlremote_protocol::{AdaptationReason, QualitySettings, QualityTier, Trend};

/// Entries considered when scoring stability
pub const STABILITY_WINDOW: usize = 10;

/// Below this many entries the link is assumed perfectly stable
pub const MIN_STABILITY_ENTRIES: usize = 5;

/// Entries considered when fitting the trend
pub const TREND_WINDOW: usize = 5;

/// Below this many entries the trend is assumed stable
pub const MIN_TREND_ENTRIES: usize = 3;

const MIN_STABILITY: f64 = 0.1;
const MAX_STABILITY: f64 = 1.0;

/// Tuning for [`AdaptiveQualityController`]
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Frame-rate ceiling
    pub target_fps: u32,
    /// Frame-rate floor
    pub min_fps: u32,
    /// Evaluation period used by [`crate::QualityMonitor`]
    pub tick_interval: Duration,
    /// Consecutive evaluations with ultra-grade conditions (and a stable
    /// trend) required before stepping up to `ultra`
    pub ultra_hold_ticks: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            target_fps: 60,
            min_fps: 10,
            tick_interval: Duration::from_millis(100),
            ultra_hold_ticks: 10,
        }
    }
}

impl QualityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_fps == 0 {
            return Err(ConfigError::Invalid("min_fps must be positive".to_string()));
        }
        if self.min_fps > self.target_fps {
            return Err(ConfigError::Invalid(format!(
                "min_fps ({}) exceeds target_fps ({})",
                self.min_fps, self.target_fps
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tick_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Output of the trend phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPrediction {
    pub trend: Trend,
    pub confidence: f64,
    pub latency_slope: f64,
    pub jitter_slope: f64,
}

impl TrendPrediction {
    fn neutral() -> Self {
        Self {
            trend: Trend::Stable,
            confidence: 0.5,
            latency_slope: 0.0,
            jitter_slope: 0.0,
        }
    }
}

/// What the transmitting side should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityDecision {
    pub quality: QualityTier,
    pub fps: u32,
    pub buffer_frames: usize,
}

/// Everything the controller knows after its last evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptationState {
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss: f64,
    pub stability: f64,
    pub prediction: TrendPrediction,
    pub decision: QualityDecision,
}

/// Event emitted to the media pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityChange {
    pub decision: QualityDecision,
    pub reason: AdaptationReason,
    pub settings: QualitySettings,
    pub stability: f64,
    pub trend: Trend,
}

/// Score link stability from the variance of recent latency and jitter.
///
/// Returns 1.0 when fewer than [`MIN_STABILITY_ENTRIES`] entries exist.
pub fn stability(history: &[HistoryEntry]) -> f64 {
    if history.len() < MIN_STABILITY_ENTRIES {
        return MAX_STABILITY;
    }

    let recent = tail(history, STABILITY_WINDOW);
    let latencies: Vec<f64> = recent.iter().map(|h| h.latency_ms).collect();
    let jitters: Vec<f64> = recent.iter().map(|h| h.jitter_ms).collect();

    let score = 1.0 / (1.0 + (variance(&latencies) + variance(&jitters)) / 100.0);
    score.clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Fit least-squares slopes to recent latency and jitter and classify them
pub fn predict_trend(history: &[HistoryEntry]) -> TrendPrediction {
    if history.len() < MIN_TREND_ENTRIES {
        return TrendPrediction::neutral();
    }

    let recent = tail(history, TREND_WINDOW);
    let latencies: Vec<f64> = recent.iter().map(|h| h.latency_ms).collect();
    let jitters: Vec<f64> = recent.iter().map(|h| h.jitter_ms).collect();
    let latency_slope = slope(&latencies);
    let jitter_slope = slope(&jitters);

    let trend = if latency_slope > 5.0 || jitter_slope > 3.0 {
        Trend::Degrading
    } else if latency_slope < -5.0 && jitter_slope < -3.0 {
        Trend::Improving
    } else {
        Trend::Stable
    };

    TrendPrediction {
        trend,
        confidence: (history.len() as f64 / TREND_WINDOW as f64).min(1.0),
        latency_slope,
        jitter_slope,
    }
}

fn tail(history: &[HistoryEntry], n: usize) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(n)..]
}

/// Population variance
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

/// Least-squares slope of `values` against their index
fn slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let sum_x = n * (n - 1.0) / 2.0;
    let sum_x2 = n * (n - 1.0) * (2.0 * n - 1.0) / 6.0;
    let sum_y: f64 = values.iter().sum();
    let sum_xy: f64 = values.iter().enumerate().map(|(x, y)| x as f64 * y).sum();

    (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x * sum_x)
}

/// Turns network statistics into quality decisions.
///
/// The controller is infallible: sparse or empty history falls back to the
/// neutral stability (1.0) and trend (`stable`) defaults.
pub struct AdaptiveQualityController {
    config: QualityConfig,
    state: Option<AdaptationState>,
    ultra_streak: u32,
}

impl AdaptiveQualityController {
    pub fn new(config: QualityConfig) -> Self {
        Self {
            config,
            state: None,
            ultra_streak: 0,
        }
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// State after the most recent evaluation, if any
    pub fn state(&self) -> Option<&AdaptationState> {
        self.state.as_ref()
    }

    /// Run one evaluation tick over the latest statistics
    pub fn evaluate(&mut self, update: &StatsUpdate) -> QualityChange {
        let snapshot = update.snapshot;
        let stability = stability(&update.history);
        let prediction = predict_trend(&update.history);

        let decision = QualityDecision {
            quality: self.select_quality(snapshot.latency_ms, stability, prediction.trend),
            fps: self.select_fps(snapshot.latency_ms, stability, prediction.trend),
            buffer_frames: select_buffer_frames(snapshot.latency_ms, stability, prediction.trend),
        };

        let reason = adaptation_reason(
            snapshot.latency_ms,
            snapshot.jitter_ms,
            snapshot.packet_loss,
            stability,
        );

        self.state = Some(AdaptationState {
            latency_ms: snapshot.latency_ms,
            jitter_ms: snapshot.jitter_ms,
            packet_loss: snapshot.packet_loss,
            stability,
            prediction,
            decision,
        });

        QualityChange {
            decision,
            reason,
            settings: decision.quality.settings(),
            stability,
            trend: prediction.trend,
        }
    }

    fn select_quality(&mut self, latency_ms: f64, stability: f64, trend: Trend) -> QualityTier {
        let mut tier = QualityTier::High;

        if latency_ms > 150.0 || stability < 0.5 {
            tier = QualityTier::Medium;
        }

        if latency_ms > 250.0 || stability < 0.3 || trend == Trend::Degrading {
            tier = QualityTier::Low;
        }

        let ultra_grade = latency_ms < 50.0 && stability > 0.8 && trend != Trend::Degrading;
        if ultra_grade {
            self.ultra_streak = self.ultra_streak.saturating_add(1);
        } else {
            self.ultra_streak = 0;
        }

        if ultra_grade
            && (trend == Trend::Improving || self.ultra_streak >= self.config.ultra_hold_ticks)
        {
            tier = QualityTier::Ultra;
        }

        tier
    }

    fn select_fps(&self, latency_ms: f64, stability: f64, trend: Trend) -> u32 {
        let mut fps = f64::from(self.config.target_fps);

        if latency_ms > 100.0 || stability < 0.6 {
            fps = fps.min(30.0);
        }

        if latency_ms > 200.0 || stability < 0.4 {
            fps = fps.min(15.0);
        }

        if trend == Trend::Degrading {
            fps *= 0.8;
        }

        (fps.round() as u32).max(self.config.min_fps)
    }
}

fn select_buffer_frames(latency_ms: f64, stability: f64, trend: Trend) -> usize {
    let mut frames = 3;

    if stability < 0.5 || trend == Trend::Degrading {
        frames = 5;
    }

    // minimum-latency mode
    if stability > 0.8 && latency_ms < 50.0 {
        frames = 1;
    }

    frames
}

fn adaptation_reason(
    latency_ms: f64,
    jitter_ms: f64,
    packet_loss: f64,
    stability: f64,
) -> AdaptationReason {
    if latency_ms > 200.0 {
        AdaptationReason::HighLatency
    } else if jitter_ms > 50.0 {
        AdaptationReason::HighJitter
    } else if packet_loss > 2.0 {
        AdaptationReason::PacketLoss
    } else if 1.0 - stability > 0.7 {
        AdaptationReason::UnstableNetwork
    } else {
        AdaptationReason::Optimization
    }
}
