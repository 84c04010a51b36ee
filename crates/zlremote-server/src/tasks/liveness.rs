//! Liveness sweeper background task.
//!
//! Periodically expires connections that have sent nothing within the
//! configured window. Expiry runs the same cleanup as a transport close and
//! then closes the socket.
//!
//! The task exits when its cancellation token is triggered.

use crate::signaling::SignalingRouter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Start the liveness sweeper.
///
/// Returns when the cancellation token is triggered.
pub async fn start_liveness_sweeper(
    router: Arc<SignalingRouter>,
    sweep_interval: Duration,
    liveness_timeout: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        sweep_interval_ms = sweep_interval.as_millis() as u64,
        liveness_timeout_ms = liveness_timeout.as_millis() as u64,
        "Starting liveness sweeper"
    );

    let mut interval = tokio::time::interval(sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let expired = router.expire_stale(liveness_timeout).await;
                if !expired.is_empty() {
                    warn!(expired = expired.len(), "Expired silent connections");
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Liveness sweeper received shutdown signal, exiting");
                break;
            }
        }
    }

    info!("Liveness sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::RandomCodes;
    use crate::ws::connections::ConnectionManager;
    use uuid::Uuid;

    fn router() -> Arc<SignalingRouter> {
        Arc::new(SignalingRouter::new(
            Arc::new(ConnectionManager::new()),
            Box::new(RandomCodes),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connections_are_expired() {
        let router = router();
        let silent = Uuid::new_v4();
        let chatty = Uuid::new_v4();
        router.connect(silent).await;
        router.connect(chatty).await;

        let token = CancellationToken::new();
        let task = tokio::spawn(start_liveness_sweeper(
            router.clone(),
            Duration::from_secs(1),
            Duration::from_secs(5),
            token.clone(),
        ));

        for _ in 0..7 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            router.touch(chatty).await;
        }

        assert_eq!(router.counts().await.connections, 1);
        assert!(!router.touch(silent).await);

        token.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_stops_task() {
        let token = CancellationToken::new();
        token.cancel();

        tokio::time::timeout(
            Duration::from_secs(1),
            start_liveness_sweeper(router(), Duration::from_secs(60), Duration::from_secs(60), token),
        )
        .await
        .expect("sweeper should exit once cancelled");
    }
}
