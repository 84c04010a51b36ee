use crate::signaling::{DeliveryError, Outbox};
use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc::{self, error::TrySendError};
use zlremote_protocol::{ConnectionId, ServerMessage};

/// Outbound frame queues of every open socket.
///
/// Each socket task owns the receiving end and drains it into the socket, so
/// removing a sender here ends that task and closes the socket.
pub struct ConnectionManager {
    /// Map from connection ID to its bounded outbound queue
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<Message>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_connection(&self, connection_id: ConnectionId, sender: mpsc::Sender<Message>) {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id, sender);

        tracing::debug!("Socket {} registered", connection_id);
    }

    pub fn remove_connection(&self, connection_id: ConnectionId) -> bool {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&connection_id)
            .is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue a message without waiting; fails if the queue is full or gone
    pub fn send_to_connection(
        &self,
        connection_id: ConnectionId,
        message: &ServerMessage,
    ) -> Result<(), DeliveryError> {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return Ok(());
            }
        };

        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let sender = senders.get(&connection_id).ok_or(DeliveryError::Unknown)?;

        sender
            .try_send(Message::Text(json.into()))
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Queue a message for a socket, evicting it if the queue is full or
    /// closed. Returns false once the connection is gone.
    pub fn send_or_evict(&self, connection_id: ConnectionId, message: &ServerMessage) -> bool {
        match self.send_to_connection(connection_id, message) {
            Ok(()) => true,
            Err(DeliveryError::Unknown) => false,
            Err(e) => {
                tracing::warn!("Dropping socket {} after failed send: {}", connection_id, e);
                self.remove_connection(connection_id);
                false
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox for ConnectionManager {
    fn try_deliver(&self, to: ConnectionId, message: &ServerMessage) -> Result<(), DeliveryError> {
        self.send_to_connection(to, message)
    }

    fn evict(&self, id: ConnectionId) {
        if self.remove_connection(id) {
            tracing::debug!("Socket {} evicted", id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn decode(frame: Message) -> ServerMessage {
        match frame {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("Expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_delivers_json_text_frames() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);
        manager.add_connection(id, tx);

        manager
            .send_to_connection(id, &ServerMessage::HostDisconnected)
            .unwrap();

        assert_eq!(decode(rx.recv().await.unwrap()), ServerMessage::HostDisconnected);
    }

    #[tokio::test]
    async fn test_full_queue_is_reported() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        manager.add_connection(id, tx);

        assert!(manager.try_deliver(id, &ServerMessage::Pong).is_ok());
        assert_eq!(
            manager.try_deliver(id, &ServerMessage::Pong),
            Err(DeliveryError::Full)
        );
    }

    #[tokio::test]
    async fn test_closed_and_unknown() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(1);
        manager.add_connection(id, tx);
        drop(rx);

        assert_eq!(
            manager.try_deliver(id, &ServerMessage::Pong),
            Err(DeliveryError::Closed)
        );
        assert_eq!(
            manager.try_deliver(Uuid::new_v4(), &ServerMessage::Pong),
            Err(DeliveryError::Unknown)
        );
    }

    #[tokio::test]
    async fn test_send_or_evict_drops_saturated_socket() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);
        manager.add_connection(id, tx);

        assert!(manager.send_or_evict(id, &ServerMessage::Pong));
        assert!(!manager.send_or_evict(id, &ServerMessage::Pong));
        assert_eq!(manager.connection_count(), 0);

        // the queued frame drains, then the queue ends
        assert_eq!(decode(rx.recv().await.unwrap()), ServerMessage::Pong);
        assert!(rx.recv().await.is_none());
        assert!(!manager.send_or_evict(id, &ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_evict_ends_the_queue() {
        let manager = ConnectionManager::new();
        let id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);
        manager.add_connection(id, tx);
        assert_eq!(manager.connection_count(), 1);

        manager.evict(id);

        assert_eq!(manager.connection_count(), 0);
        assert!(rx.recv().await.is_none());
        assert_eq!(
            manager.try_deliver(id, &ServerMessage::Pong),
            Err(DeliveryError::Unknown)
        );
    }
}
