//! Server-side round-trip probing.
//!
//! Each socket sends a WebSocket ping carrying an 8-byte nonce on a fixed
//! period; the matching pong yields one RTT sample. A probe that is still
//! unanswered when the next one starts is abandoned.

use axum::body::Bytes;
use tokio::time::Instant;
use tokio::sync::watch;
use zlremote_media::{NetworkSample, NetworkStatsEstimator, QualityChange, StatsSnapshot, StatsUpdate};
use zlremote_protocol::ServerMessage;

pub struct RttProbe {
    estimator: NetworkStatsEstimator,
    next_nonce: u64,
    outstanding: Option<(u64, Instant)>,
}

impl RttProbe {
    pub fn new() -> Self {
        Self {
            estimator: NetworkStatsEstimator::new(),
            next_nonce: 0,
            outstanding: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsUpdate> {
        self.estimator.subscribe()
    }

    /// Ping payload for a probe sent at `now`
    pub fn start(&mut self, now: Instant) -> Bytes {
        let nonce = self.next_nonce;
        self.next_nonce = self.next_nonce.wrapping_add(1);
        self.outstanding = Some((nonce, now));
        Bytes::copy_from_slice(&nonce.to_be_bytes())
    }

    /// Match a pong against the outstanding probe and fold in its RTT
    pub fn complete(&mut self, payload: &[u8], now: Instant) -> Option<StatsSnapshot> {
        let nonce = u64::from_be_bytes(payload.try_into().ok()?);
        let (expected, sent_at) = self.outstanding?;
        if nonce != expected {
            return None;
        }
        self.outstanding = None;

        let sample = NetworkSample {
            rtt: now.saturating_duration_since(sent_at),
            at: now,
        };
        Some(self.estimator.record(sample))
    }

    pub fn record_packet_loss(&mut self, percent: f64) -> StatsSnapshot {
        self.estimator.record_packet_loss(percent)
    }
}

impl Default for RttProbe {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stats_message(snapshot: &StatsSnapshot) -> ServerMessage {
    ServerMessage::NetworkStats {
        latency: snapshot.latency_ms.round() as u64,
        jitter: snapshot.jitter_ms.round() as u64,
        packet_loss: snapshot.packet_loss,
        quality: snapshot.connection_quality(),
    }
}

pub fn quality_message(change: &QualityChange) -> ServerMessage {
    ServerMessage::QualityChange {
        quality: change.decision.quality,
        fps: change.decision.fps,
        buffer_frames: change.decision.buffer_frames,
        reason: change.reason,
        settings: change.settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use zlremote_protocol::ConnectionQuality;

    #[test]
    fn test_matching_pong_yields_sample() {
        let mut probe = RttProbe::new();
        let sent = Instant::now();
        let payload = probe.start(sent);

        let snapshot = probe
            .complete(&payload, sent + Duration::from_millis(42))
            .unwrap();
        assert_eq!(snapshot.samples, 1);
        assert!((snapshot.latency_ms - 42.0).abs() < 1e-6);

        // answered probes are not counted twice
        assert!(probe.complete(&payload, sent + Duration::from_millis(50)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rtt_follows_runtime_clock() {
        let mut probe = RttProbe::new();
        let payload = probe.start(Instant::now());

        tokio::time::advance(Duration::from_millis(35)).await;

        let snapshot = probe.complete(&payload, Instant::now()).unwrap();
        assert!((snapshot.latency_ms - 35.0).abs() < 1e-6);
    }

    #[test]
    fn test_stale_or_foreign_pongs_are_ignored() {
        let mut probe = RttProbe::new();
        let sent = Instant::now();
        let first = probe.start(sent);
        let second = probe.start(sent + Duration::from_secs(5));

        assert!(probe.complete(&first, sent + Duration::from_secs(6)).is_none());
        assert!(probe.complete(b"junk", sent + Duration::from_secs(6)).is_none());
        assert!(probe.complete(&second, sent + Duration::from_secs(6)).is_some());
    }

    #[test]
    fn test_stats_message_rounds_and_classifies() {
        let snapshot = StatsSnapshot {
            latency_ms: 41.6,
            jitter_ms: 3.2,
            packet_loss: 0.0,
            samples: 4,
        };
        assert_eq!(
            stats_message(&snapshot),
            ServerMessage::NetworkStats {
                latency: 42,
                jitter: 3,
                packet_loss: 0.0,
                quality: ConnectionQuality::Excellent,
            }
        );
    }
}
