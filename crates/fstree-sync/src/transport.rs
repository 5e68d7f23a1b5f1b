//! Transport abstraction for the replication protocol.
//!
//! The transport handles message delivery between the primary and its
//! replicas. Implementations may use any byte stream; messages cross it in
//! their CBOR wire form.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::messages::{NodeId, SyncMessage};

/// Sending and receiving protocol messages.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to a specific peer.
    async fn send(&self, peer: &NodeId, message: SyncMessage) -> Result<()>;

    /// Receive the next message from any peer.
    ///
    /// Blocks until a message is available or the transport closes.
    async fn recv(&self) -> Result<(NodeId, SyncMessage)>;

    /// Receive with timeout. `None` when the timeout expires first.
    async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, SyncMessage)>>;

    /// Send a message to every connected peer.
    async fn broadcast(&self, message: SyncMessage) -> Result<()>;

    /// The local node's identity.
    fn local_node_id(&self) -> NodeId;

    /// Currently connected peers.
    async fn connected_peers(&self) -> Result<Vec<NodeId>>;

    async fn is_connected(&self, peer: &NodeId) -> bool;
}

/// Channel-backed transport for tests and in-process deployments.
///
/// Messages are encoded on send and decoded on receipt, so the wire codec
/// and its size limits are exercised exactly as over a real link.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use bytes::Bytes;
    use tokio::sync::{mpsc, Mutex, RwLock};

    use crate::error::SyncError;
    use crate::messages::{decode_message, encode_message};

    const CHANNEL_CAPACITY: usize = 1024;

    #[derive(Debug)]
    struct Envelope {
        from: NodeId,
        payload: Bytes,
    }

    /// Shared routing table for a set of in-memory transports.
    #[derive(Default)]
    pub struct MemoryNetwork {
        senders: RwLock<HashMap<NodeId, mpsc::Sender<Envelope>>>,
    }

    impl MemoryNetwork {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Attach a node to this network.
        pub async fn create_transport(self: &Arc<Self>, node_id: NodeId) -> MemoryTransport {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            self.senders.write().await.insert(node_id, tx);

            MemoryTransport {
                node_id,
                network: Arc::clone(self),
                receiver: Mutex::new(rx),
            }
        }

        /// Detach a node. Its transport sees the channel close.
        pub async fn disconnect(&self, node_id: &NodeId) -> bool {
            self.senders.write().await.remove(node_id).is_some()
        }
    }

    /// One node's endpoint on a [`MemoryNetwork`].
    pub struct MemoryTransport {
        node_id: NodeId,
        network: Arc<MemoryNetwork>,
        receiver: Mutex<mpsc::Receiver<Envelope>>,
    }

    impl MemoryTransport {
        fn open(envelope: Envelope) -> Result<(NodeId, SyncMessage)> {
            Ok((envelope.from, decode_message(&envelope.payload)?))
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&self, peer: &NodeId, message: SyncMessage) -> Result<()> {
            let payload = encode_message(&message)?;
            let sender = self
                .network
                .senders
                .read()
                .await
                .get(peer)
                .cloned()
                .ok_or_else(|| SyncError::TransportError("peer not found".into()))?;

            sender
                .send(Envelope {
                    from: self.node_id,
                    payload,
                })
                .await
                .map_err(|_| SyncError::TransportError("peer disconnected".into()))
        }

        async fn recv(&self) -> Result<(NodeId, SyncMessage)> {
            let mut rx = self.receiver.lock().await;
            match rx.recv().await {
                Some(envelope) => Self::open(envelope),
                None => Err(SyncError::TransportError("channel closed".into())),
            }
        }

        async fn recv_timeout(&self, timeout: Duration) -> Result<Option<(NodeId, SyncMessage)>> {
            let mut rx = self.receiver.lock().await;
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(envelope)) => Self::open(envelope).map(Some),
                Ok(None) => Err(SyncError::TransportError("channel closed".into())),
                Err(_) => Ok(None),
            }
        }

        async fn broadcast(&self, message: SyncMessage) -> Result<()> {
            let payload = encode_message(&message)?;
            let senders = self.network.senders.read().await;
            for (peer_id, sender) in senders.iter() {
                if peer_id != &self.node_id {
                    // A peer that went away is not a broadcast failure
                    let _ = sender
                        .send(Envelope {
                            from: self.node_id,
                            payload: payload.clone(),
                        })
                        .await;
                }
            }
            Ok(())
        }

        fn local_node_id(&self) -> NodeId {
            self.node_id
        }

        async fn connected_peers(&self) -> Result<Vec<NodeId>> {
            let senders = self.network.senders.read().await;
            Ok(senders
                .keys()
                .filter(|id| *id != &self.node_id)
                .copied()
                .collect())
        }

        async fn is_connected(&self, peer: &NodeId) -> bool {
            self.network.senders.read().await.contains_key(peer)
        }
    }
}
