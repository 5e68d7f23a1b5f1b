//! Request dispatch loop for the primary.
//!
//! Receives requests from the transport, answers each through the
//! [`SyncService`], and forwards purge notices to every connected peer.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use crate::error::Result;
use crate::messages::{NodeId, SyncErrorCode, SyncMessage};
use crate::service::{PurgeNotice, SyncService};
use crate::transport::Transport;

/// Serves one transport endpoint.
pub struct SyncServer<T: Transport> {
    service: Arc<SyncService>,
    transport: Arc<T>,
}

impl<T: Transport + 'static> SyncServer<T> {
    pub fn new(service: Arc<SyncService>, transport: T) -> Self {
        Self {
            service,
            transport: Arc::new(transport),
        }
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    pub fn local_node_id(&self) -> NodeId {
        self.transport.local_node_id()
    }

    /// Serve until `shutdown` flips to true or the transport closes.
    ///
    /// Each request runs on its own task, so a slow request for one user
    /// never delays another user's.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut purges = self.service.subscribe_purges();
        let mut forwarding = true;
        tracing::info!(node = ?self.local_node_id(), "sync server started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("sync server stopping");
                        return Ok(());
                    }
                }

                notice = purges.recv(), if forwarding => match notice {
                    Ok(notice) => self.forward_purge(notice).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "purge notices dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => forwarding = false,
                },

                received = self.transport.recv() => match received {
                    Ok((peer, message)) => self.dispatch(peer, message),
                    Err(e) if e.is_frame_error() => {
                        tracing::warn!(error = %e, code = ?e.code(), "dropping undecodable message");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "transport failed");
                        return Err(e);
                    }
                },
            }
        }
    }

    fn dispatch(&self, peer: NodeId, message: SyncMessage) {
        let service = Arc::clone(&self.service);
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            let reply = match message.validate_limits() {
                Ok(()) => service.handle(message).await,
                Err(reason) => {
                    tracing::warn!(peer = ?peer, reason, "request rejected");
                    SyncMessage::Error {
                        code: SyncErrorCode::InvalidMessage,
                        message: reason.to_string(),
                    }
                }
            };
            if let Err(e) = transport.send(&peer, reply).await {
                tracing::warn!(peer = ?peer, error = %e, "failed to deliver reply");
            }
        });
    }

    async fn forward_purge(&self, notice: PurgeNotice) {
        let message = SyncMessage::PurgeReplica {
            user_id: notice.user_id,
            reason: notice.reason,
        };
        if let Err(e) = self.transport.broadcast(message).await {
            tracing::warn!(user = %notice.user_id, error = %e, "failed to forward purge");
        }
    }
}
