//! Periodic quality evaluation
//!
//! Runs an [`AdaptiveQualityController`] on a fixed tick, independent of
//! sample arrival. Decision changes are delivered in order on a bounded
//! channel; the latest decision is also kept on a watch channel for readers
//! that only care about current state (e.g. a [`crate::FramePacer`]).

use crate::quality::{AdaptiveQualityController, QualityChange, QualityConfig, QualityDecision};
use crate::stats::StatsUpdate;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Pending change events before the tick loop waits on the consumer
const EVENT_CAPACITY: usize = 16;

pub struct QualityMonitor {
    handle: JoinHandle<()>,
    events: mpsc::Receiver<QualityChange>,
    current: watch::Receiver<Option<QualityChange>>,
}

impl QualityMonitor {
    /// Spawn the tick loop over a stats subscription.
    ///
    /// Ticks before the first sample are skipped. The loop ends when the
    /// estimator is dropped or the monitor is dropped.
    pub fn spawn(config: QualityConfig, stats: watch::Receiver<StatsUpdate>) -> Self {
        let (events_tx, events) = mpsc::channel(EVENT_CAPACITY);
        let (current_tx, current) = watch::channel(None);

        let handle = tokio::spawn(run(config, stats, events_tx, current_tx));

        Self {
            handle,
            events,
            current,
        }
    }

    /// Next decision change, in evaluation order
    pub async fn next_change(&mut self) -> Option<QualityChange> {
        self.events.recv().await
    }

    /// Latest evaluation, changed or not
    pub fn current(&self) -> watch::Receiver<Option<QualityChange>> {
        self.current.clone()
    }
}

impl Drop for QualityMonitor {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn run(
    config: QualityConfig,
    mut stats: watch::Receiver<StatsUpdate>,
    events: mpsc::Sender<QualityChange>,
    current: watch::Sender<Option<QualityChange>>,
) {
    let mut interval = tokio::time::interval(config.tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut controller = AdaptiveQualityController::new(config);
    let mut last_decision: Option<QualityDecision> = None;

    loop {
        interval.tick().await;

        if stats.has_changed().is_err() {
            tracing::debug!("Stats source closed, stopping quality monitor");
            break;
        }

        let update = stats.borrow_and_update().clone();
        if update.snapshot.samples == 0 {
            continue;
        }

        let change = controller.evaluate(&update);
        current.send_replace(Some(change));

        if last_decision == Some(change.decision) {
            continue;
        }
        last_decision = Some(change.decision);

        tracing::debug!(
            quality = %change.decision.quality,
            fps = change.decision.fps,
            buffer_frames = change.decision.buffer_frames,
            reason = ?change.reason,
            "Quality decision changed"
        );

        if events.send(change).await.is_err() {
            break;
        }
    }
}
