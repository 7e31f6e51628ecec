//! Role-keyed map of established peer connections.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use mpc_types::RoleId;

use crate::error::{NetworkError, NetworkResult};
use crate::peer::PeerConnection;
use crate::settings::PeerSettings;

/// Registry of the connections belonging to one transport.
///
/// Registration happens under the write lock, so an accept and a dial racing
/// for the same role cannot both succeed. Lookups take the read lock.
pub struct PeerRegistry {
    self_role: RoleId,
    party_count: usize,
    settings: PeerSettings,
    scope: CancellationToken,
    peers: RwLock<HashMap<RoleId, Arc<PeerConnection>>>,
    registered: watch::Sender<usize>,
}

impl PeerRegistry {
    /// Create an empty registry.
    ///
    /// # Arguments
    /// * `self_role` - Our role (never registered)
    /// * `party_count` - Cluster size; valid roles are `0..party_count`
    /// * `settings` - Queue and frame limits for spawned connections
    /// * `scope` - Parent cancellation scope for every connection
    pub fn new(
        self_role: RoleId,
        party_count: usize,
        settings: PeerSettings,
        scope: CancellationToken,
    ) -> Self {
        let (registered, _) = watch::channel(0);
        Self {
            self_role,
            party_count,
            settings,
            scope,
            peers: RwLock::new(HashMap::new()),
            registered,
        }
    }

    /// Validate `role` and, if it is free, start a connection over `stream`.
    ///
    /// On rejection the stream is dropped, which closes it.
    pub fn register<S>(&self, role: RoleId, stream: S) -> NetworkResult<Arc<PeerConnection>>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.check_claim(role)?;

        let mut peers = self.peers.write().unwrap_or_else(PoisonError::into_inner);
        if peers.contains_key(&role) {
            return Err(NetworkError::DuplicateConnection(role));
        }
        if self.scope.is_cancelled() {
            return Err(NetworkError::TransportClosed);
        }

        let peer = PeerConnection::spawn(role, stream, self.settings, &self.scope);
        peers.insert(role, Arc::clone(&peer));
        let count = peers.len();
        drop(peers);

        self.registered.send_replace(count);
        info!(peer = %role, registered = count, expected = self.expected(), "Peer registered");
        Ok(peer)
    }

    /// Range and self checks for a role claimed by a remote party.
    pub fn check_claim(&self, role: RoleId) -> NetworkResult<()> {
        if role == self.self_role {
            return Err(NetworkError::SelfConnection(role));
        }
        if role.index() >= self.party_count {
            return Err(NetworkError::RoleOutOfRange {
                role,
                count: self.party_count,
            });
        }
        Ok(())
    }

    pub fn get(&self, role: RoleId) -> Option<Arc<PeerConnection>> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&role)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of connections needed for a complete mesh.
    pub fn expected(&self) -> usize {
        self.party_count.saturating_sub(1)
    }

    /// Roles that have no connection yet.
    pub fn missing(&self) -> Vec<RoleId> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        (0..self.party_count as u32)
            .map(RoleId)
            .filter(|role| *role != self.self_role && !peers.contains_key(role))
            .collect()
    }

    /// Wait until every peer is registered.
    pub async fn wait_complete(&self) {
        let expected = self.expected();
        let mut rx = self.registered.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count >= expected).await;
    }

    pub fn close_all(&self) {
        let peers: Vec<_> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for peer in &peers {
            peer.close();
        }
        debug!(closed = peers.len(), "Closed all peer connections");
    }

    /// Close every connection and wait for their tasks to finish.
    pub async fn shutdown_all(&self) {
        let peers: Vec<_> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for peer in peers {
            peer.shutdown().await;
        }
    }
}
