//! Frame pacing
//!
//! Decides per incoming unit (a video frame or a control message) whether to
//! forward, buffer or drop it, following the current quality decision. When
//! the pipe is saturated, units that arrive late and too soon after the last
//! accepted unit are dropped instead of queued behind it. With buffering on,
//! accepted units wait in a buffer bounded by the decision's depth and the
//! consumer always pulls the newest one first.

use crate::error::ConfigError;
use crate::quality::QualityDecision;
use std::time::Duration;
use tokio::time::Instant;

/// Fraction of the target frame interval that must elapse between accepted
/// units before a late unit may be forwarded
const PACING_FRACTION: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Latency above which a unit is considered late
    pub max_latency: Duration,
    pub frame_skipping: bool,
    pub buffering: bool,
    /// Frame rate used until the first decision arrives
    pub initial_fps: u32,
    /// Buffer depth used until the first decision arrives
    pub initial_buffer_frames: usize,
}

impl Default for PacerConfig {
    fn default() -> Self {
        Self {
            max_latency: Duration::from_millis(100),
            frame_skipping: true,
            buffering: true,
            initial_fps: 60,
            initial_buffer_frames: 3,
        }
    }
}

impl PacerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_fps == 0 {
            return Err(ConfigError::Invalid("initial_fps must be positive".to_string()));
        }
        if self.initial_buffer_frames == 0 {
            return Err(ConfigError::Invalid(
                "initial_buffer_frames must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// How hard the pipeline should squeeze a unit, by its latency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    Minimal,
    Moderate,
    Aggressive,
    Maximum,
}

impl OptimizationLevel {
    pub fn for_latency(latency: Duration) -> Self {
        match latency.as_millis() {
            0..50 => OptimizationLevel::Minimal,
            50..100 => OptimizationLevel::Moderate,
            100..200 => OptimizationLevel::Aggressive,
            _ => OptimizationLevel::Maximum,
        }
    }
}

#[derive(Debug)]
pub enum PacerOutcome<T> {
    /// Accepted and handed straight back (buffering off)
    Forward(T),
    /// Accepted into the buffer, see [`FramePacer::pop_newest`]
    Buffered,
    Dropped,
}

impl<T> PacerOutcome<T> {
    pub fn is_forward(&self) -> bool {
        matches!(self, PacerOutcome::Forward(_))
    }

    pub fn is_accepted(&self) -> bool {
        !matches!(self, PacerOutcome::Dropped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacerReport {
    /// Percent of submitted units that were dropped
    pub skip_rate: f64,
    pub accepted: u64,
    pub skipped: u64,
    /// Accepted units pushed out of a full buffer
    pub evicted: u64,
    pub buffered: usize,
    pub fps: u32,
    pub buffer_frames: usize,
    pub optimization: OptimizationLevel,
}

struct Buffered<T> {
    payload: T,
    timestamp: Instant,
}

pub struct FramePacer<T> {
    config: PacerConfig,
    fps: u32,
    buffer_frames: usize,
    buffer: Vec<Buffered<T>>,
    last_accepted: Option<Instant>,
    last_latency: Duration,
    accepted: u64,
    skipped: u64,
    evicted: u64,
}

impl<T> FramePacer<T> {
    pub fn new(config: PacerConfig) -> Self {
        let fps = config.initial_fps.max(1);
        let buffer_frames = config.initial_buffer_frames.max(1);
        Self {
            config,
            fps,
            buffer_frames,
            buffer: Vec::with_capacity(buffer_frames + 1),
            last_accepted: None,
            last_latency: Duration::ZERO,
            accepted: 0,
            skipped: 0,
            evicted: 0,
        }
    }

    /// Adopt the frame rate and buffer depth of a new decision
    pub fn apply(&mut self, decision: &QualityDecision) {
        self.fps = decision.fps.max(1);
        self.buffer_frames = decision.buffer_frames.max(1);
        self.trim_buffer();
    }

    /// Target spacing between forwarded units
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps))
    }

    /// Submit a unit stamped at `timestamp` that is being processed at `now`
    pub fn submit(&mut self, payload: T, timestamp: Instant, now: Instant) -> PacerOutcome<T> {
        let latency = now.saturating_duration_since(timestamp);
        self.last_latency = latency;

        if self.should_skip(latency, now) {
            self.skipped += 1;
            tracing::trace!(latency_ms = latency.as_millis() as u64, "Dropped late unit");
            return PacerOutcome::Dropped;
        }

        self.accepted += 1;
        self.last_accepted = Some(now);

        if !self.config.buffering {
            return PacerOutcome::Forward(payload);
        }

        // newest-first; a later arrival goes ahead of units with the same stamp
        let at = self.buffer.partition_point(|b| b.timestamp > timestamp);
        self.buffer.insert(at, Buffered { payload, timestamp });
        self.trim_buffer();

        PacerOutcome::Buffered
    }

    /// Take the most recent buffered unit
    pub fn pop_newest(&mut self) -> Option<T> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.buffer.remove(0).payload)
    }

    pub fn report(&self) -> PacerReport {
        let submitted = self.accepted + self.skipped;
        let skip_rate = if submitted > 0 {
            self.skipped as f64 / submitted as f64 * 100.0
        } else {
            0.0
        };

        PacerReport {
            skip_rate,
            accepted: self.accepted,
            skipped: self.skipped,
            evicted: self.evicted,
            buffered: self.buffer.len(),
            fps: self.fps,
            buffer_frames: self.buffer_frames,
            optimization: OptimizationLevel::for_latency(self.last_latency),
        }
    }

    fn should_skip(&self, latency: Duration, now: Instant) -> bool {
        if !self.config.frame_skipping || latency <= self.config.max_latency {
            return false;
        }

        match self.last_accepted {
            Some(last) => {
                let since_last = now.saturating_duration_since(last);
                since_last < self.frame_interval().mul_f64(PACING_FRACTION)
            }
            None => false,
        }
    }

    // oldest entries go first; the buffer is kept newest-first
    fn trim_buffer(&mut self) {
        if self.buffer.len() > self.buffer_frames {
            self.evicted += (self.buffer.len() - self.buffer_frames) as u64;
            self.buffer.truncate(self.buffer_frames);
        }
    }
}
