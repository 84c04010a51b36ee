use crate::error::SignalingError;
use crate::state::AppState;
use crate::ws::probe::{self, RttProbe};
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;
use zlremote_media::{QualityChange, QualityMonitor};
use zlremote_protocol::{ClientMessage, ConnectionId};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let connection_id = Uuid::new_v4();

    // Bounded queue for outbound frames; the manager holds the only strong sender
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.outbound_queue_capacity);
    let probe_tx = tx.downgrade();
    state.connections.add_connection(connection_id, tx);
    state.router.connect(connection_id).await;

    // Spawn task to forward frames from the queue to the WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut rtt = RttProbe::new();
    let mut quality = state
        .config
        .adaptive_quality
        .then(|| QualityMonitor::spawn(state.config.quality.clone(), rtt.subscribe()));

    let period = state.config.probe_interval;
    let mut probe_timer = tokio::time::interval_at(Instant::now() + period, period);
    probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            incoming = receiver.next() => {
                let Some(incoming) = incoming else {
                    break;
                };
                match incoming {
                    Ok(Message::Text(text)) => {
                        state.router.touch(connection_id).await;
                        handle_text(&state, connection_id, &mut rtt, text.as_str()).await;
                    }
                    Ok(Message::Pong(payload)) => {
                        state.router.touch(connection_id).await;
                        if let Some(snapshot) = rtt.complete(&payload, Instant::now()) {
                            let stats = probe::stats_message(&snapshot);
                            if !state.connections.send_or_evict(connection_id, &stats) {
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) => {
                        state.router.touch(connection_id).await;
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::debug!("Ignoring binary frame from {}", connection_id);
                    }
                    Ok(Message::Close(_)) => break,
                    Err(e) => {
                        tracing::warn!("WebSocket error for {}: {}", connection_id, e);
                        break;
                    }
                }
            }
            _ = probe_timer.tick() => {
                let Some(tx) = probe_tx.upgrade() else {
                    break;
                };
                if tx.try_send(Message::Ping(rtt.start(Instant::now()))).is_err() {
                    tracing::debug!("Outbound queue busy, skipping probe for {}", connection_id);
                }
            }
            change = next_quality_change(&mut quality) => {
                match change {
                    Some(change) => {
                        if !state.connections.send_or_evict(connection_id, &probe::quality_message(&change)) {
                            break;
                        }
                    }
                    None => quality = None,
                }
            }
            _ = &mut send_task => break,
        }
    }

    // Cleanup
    state.router.disconnect(connection_id).await;
    state.connections.remove_connection(connection_id);
    send_task.abort();
}

async fn handle_text(state: &AppState, connection_id: ConnectionId, rtt: &mut RttProbe, text: &str) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(
                connection_id = %connection_id,
                error = %SignalingError::MalformedMessage(e.to_string()),
                "Dropping frame"
            );
            return;
        }
    };

    match message {
        ClientMessage::NetworkFeedback { packet_loss } => {
            let snapshot = rtt.record_packet_loss(packet_loss);
            tracing::debug!(
                connection_id = %connection_id,
                packet_loss = snapshot.packet_loss,
                "Packet loss reported"
            );
        }
        other => state.router.dispatch(connection_id, other).await,
    }
}

/// Pending forever when adaptive quality is off
async fn next_quality_change(monitor: &mut Option<QualityMonitor>) -> Option<QualityChange> {
    match monitor {
        Some(monitor) => monitor.next_change().await,
        None => std::future::pending().await,
    }
}
