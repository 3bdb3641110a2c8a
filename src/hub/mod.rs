//! The two connection hubs: one registry of live operator channels, one of
//! live client-PC channels. Generalizes the teacher's `SessionHashMap`
//! (a `Mutex<HashMap<String, Connection>>` threaded through every handler)
//! into an async registry keyed by domain id, with a bounded outbound queue
//! per channel instead of a direct blocking socket write.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::error::{DomainError, DomainResult};
use crate::protocol::Envelope;

/// The sending half of one live channel. A reader/writer task pair owns the
/// socket itself; this is the only handle the rest of the server touches.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::Sender<Envelope>,
}

impl ChannelHandle {
    pub fn new(outbound: mpsc::Sender<Envelope>) -> Self {
        ChannelHandle { outbound }
    }

    /// Queues one frame for delivery. Fails with `UNAVAILABLE` if the
    /// outbound queue is full or the channel has already closed — callers
    /// treat this the same as "target not connected", since a queue that
    /// never drains means the socket is effectively dead.
    pub async fn send(&self, kind: &str, payload: impl Serialize) -> DomainResult<()> {
        let envelope = Envelope::new(kind, payload);
        self.outbound
            .try_send(envelope)
            .map_err(|_| DomainError::Unavailable("outbound channel queue is full or closed".to_string()))
    }
}

/// A registry of live channels keyed by domain id (user id or client PC
/// id). Generic over the key so operator and client hubs share one
/// implementation instead of duplicating the `RwLock<HashMap<...>>` dance.
pub struct ChannelHub {
    channels: RwLock<HashMap<Uuid, ChannelHandle>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        ChannelHub {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: Uuid, handle: ChannelHandle) {
        self.channels.write().await.insert(id, handle);
    }

    pub async fn unregister(&self, id: Uuid) {
        self.channels.write().await.remove(&id);
    }

    pub async fn is_connected(&self, id: Uuid) -> bool {
        self.channels.read().await.contains_key(&id)
    }

    /// Queues `payload` for `id`'s channel. A full or closed outbound queue
    /// means the socket can't keep up (or is already gone); per the duplex
    /// outbound protocol, that channel is evicted rather than left around to
    /// fail every subsequent send the same way.
    pub async fn send_to(&self, id: Uuid, kind: &str, payload: impl Serialize) -> DomainResult<()> {
        let handle = {
            let channels = self.channels.read().await;
            channels.get(&id).cloned()
        };
        match handle {
            Some(handle) => {
                let result = handle.send(kind, payload).await;
                if result.is_err() {
                    self.unregister(id).await;
                }
                result
            }
            None => Err(DomainError::Unavailable(format!("no live channel for {id}"))),
        }
    }

    pub async fn broadcast(&self, kind: &str, payload: impl Serialize + Clone) {
        let snapshot: Vec<(Uuid, ChannelHandle)> = {
            let channels = self.channels.read().await;
            channels.iter().map(|(id, handle)| (*id, handle.clone())).collect()
        };
        let mut dead = Vec::new();
        for (id, handle) in snapshot {
            if handle.send(kind, payload.clone()).await.is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut channels = self.channels.write().await;
            for id in dead {
                channels.remove(&id);
            }
        }
    }

    pub async fn connected_ids(&self) -> Vec<Uuid> {
        self.channels.read().await.keys().copied().collect()
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Channels from authenticated operators (administrators watching/driving
/// sessions), keyed by `user_id`.
pub type OperatorHub = ChannelHub;

/// Channels from authenticated client PCs, keyed by `pc_id`.
pub type ClientHub = ChannelHub;

/// Shared handle to both hubs, passed to the router and session service
/// wiring at startup.
#[derive(Clone)]
pub struct Hubs {
    pub operators: Arc<OperatorHub>,
    pub clients: Arc<ClientHub>,
}

impl Hubs {
    pub fn new() -> Self {
        Hubs {
            operators: Arc::new(OperatorHub::new()),
            clients: Arc::new(ClientHub::new()),
        }
    }
}

impl Default for Hubs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle_with_capacity(capacity: usize) -> (ChannelHandle, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ChannelHandle::new(tx), rx)
    }

    #[tokio::test]
    async fn send_to_unregistered_id_is_unavailable() {
        let hub = ChannelHub::new();
        let err = hub.send_to(Uuid::new_v4(), "PING", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn register_then_send_delivers_envelope() {
        let hub = ChannelHub::new();
        let id = Uuid::new_v4();
        let (handle, mut rx) = handle_with_capacity(4);
        hub.register(id, handle).await;

        hub.send_to(id, "HEARTBEAT_RESPONSE", json!({"ok": true})).await.unwrap();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.kind, "HEARTBEAT_RESPONSE");
    }

    #[tokio::test]
    async fn full_queue_surfaces_as_unavailable_not_a_panic() {
        let hub = ChannelHub::new();
        let id = Uuid::new_v4();
        let (handle, _rx) = handle_with_capacity(1);
        hub.register(id, handle).await;

        hub.send_to(id, "A", json!({})).await.unwrap();
        let err = hub.send_to(id, "B", json!({})).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn full_queue_evicts_the_channel() {
        let hub = ChannelHub::new();
        let id = Uuid::new_v4();
        let (handle, _rx) = handle_with_capacity(1);
        hub.register(id, handle).await;

        hub.send_to(id, "A", json!({})).await.unwrap();
        let _ = hub.send_to(id, "B", json!({})).await;
        assert!(!hub.is_connected(id).await);
    }

    #[tokio::test]
    async fn broadcast_evicts_channels_whose_queue_is_full() {
        let hub = ChannelHub::new();
        let alive_id = Uuid::new_v4();
        let dead_id = Uuid::new_v4();
        let (alive, mut alive_rx) = handle_with_capacity(4);
        let (dead, _dead_rx) = handle_with_capacity(1);
        hub.register(alive_id, alive).await;
        hub.register(dead_id, dead).await;

        hub.send_to(dead_id, "FILL", json!({})).await.unwrap();
        hub.broadcast("NOTICE", json!({})).await;

        assert!(hub.is_connected(alive_id).await);
        assert!(!hub.is_connected(dead_id).await);
        let mut kinds = Vec::new();
        while let Ok(env) = alive_rx.try_recv() {
            kinds.push(env.kind);
        }
        assert!(kinds.contains(&"NOTICE".to_string()));
    }

    #[tokio::test]
    async fn unregister_removes_the_channel() {
        let hub = ChannelHub::new();
        let id = Uuid::new_v4();
        let (handle, _rx) = handle_with_capacity(4);
        hub.register(id, handle).await;
        assert!(hub.is_connected(id).await);

        hub.unregister(id).await;
        assert!(!hub.is_connected(id).await);
    }
}
