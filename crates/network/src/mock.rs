//! In-memory transport for tests and local simulation.
//!
//! Every directed pair of roles gets its own FIFO queue, so per-peer
//! ordering matches a real connection and no ordering exists across peers.

use async_trait::async_trait;
use mpc_types::RoleId;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{NetworkError, NetworkResult, PeerFailure};
use crate::transport::{validate_receive_source, validate_send_target, Transport};

/// Builds a fully connected set of in-memory endpoints.
pub struct MockNetwork;

impl MockNetwork {
    /// One endpoint per role `0..party_count`, in role order.
    pub fn new(party_count: usize) -> Vec<MockTransport> {
        let mut senders: Vec<HashMap<RoleId, mpsc::UnboundedSender<Vec<u8>>>> =
            (0..party_count).map(|_| HashMap::new()).collect();
        let mut receivers: Vec<HashMap<RoleId, AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>>> =
            (0..party_count).map(|_| HashMap::new()).collect();

        for from in 0..party_count {
            for to in 0..party_count {
                if from == to {
                    continue;
                }
                let (tx, rx) = mpsc::unbounded_channel();
                senders[from].insert(RoleId(to as u32), tx);
                receivers[to].insert(RoleId(from as u32), AsyncMutex::new(rx));
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(index, (outbound, inbound))| MockTransport {
                self_role: RoleId(index as u32),
                party_count,
                outbound: Mutex::new(outbound),
                inbound,
                scope: CancellationToken::new(),
            })
            .collect()
    }

    /// Two endpoints, for two-party jobs.
    pub fn pair() -> (MockTransport, MockTransport) {
        let mut endpoints = Self::new(2);
        let b = endpoints.remove(1);
        let a = endpoints.remove(0);
        (a, b)
    }
}

pub struct MockTransport {
    self_role: RoleId,
    party_count: usize,
    outbound: Mutex<HashMap<RoleId, mpsc::UnboundedSender<Vec<u8>>>>,
    inbound: HashMap<RoleId, AsyncMutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    scope: CancellationToken,
}

impl MockTransport {
    fn known(&self, role: RoleId) -> NetworkResult<()> {
        if role.index() >= self.party_count {
            return Err(NetworkError::UnknownPeer(role));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn self_role(&self) -> RoleId {
        self.self_role
    }

    fn party_count(&self) -> usize {
        self.party_count
    }

    async fn send(&self, to: RoleId, msg: Vec<u8>, cancel: &CancellationToken) -> NetworkResult<()> {
        validate_send_target(self.self_role, to)?;
        self.known(to)?;
        if cancel.is_cancelled() {
            return Err(NetworkError::Cancelled);
        }
        if self.scope.is_cancelled() {
            return Err(NetworkError::TransportClosed);
        }

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = outbound.get(&to).ok_or(NetworkError::TransportClosed)?;
        tx.send(msg).map_err(|_| NetworkError::PeerFailed {
            role: to,
            failure: PeerFailure::EndOfStream,
        })
    }

    async fn receive(&self, from: RoleId, cancel: &CancellationToken) -> NetworkResult<Vec<u8>> {
        validate_receive_source(self.self_role, from)?;
        self.known(from)?;
        let queue = self.inbound.get(&from).ok_or(NetworkError::UnknownPeer(from))?;

        tokio::select! {
            msg = async { queue.lock().await.recv().await } => msg.ok_or(NetworkError::PeerFailed {
                role: from,
                failure: PeerFailure::EndOfStream,
            }),
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            _ = self.scope.cancelled() => Err(NetworkError::TransportClosed),
        }
    }

    fn close(&self) {
        if self.scope.is_cancelled() {
            return;
        }
        self.scope.cancel();
        // Peers see end-of-stream once they drain what we already sent.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(role = %self.self_role, "Mock transport closed");
    }
}
