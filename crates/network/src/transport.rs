//! The byte-moving contract shared by every transport implementation.

use async_trait::async_trait;
use futures::future::try_join_all;
use mpc_types::RoleId;
use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::error::{NetworkError, NetworkResult};

/// Role-addressed message exchange for one job's cluster.
///
/// Every blocking call takes the caller's cancellation scope; closing the
/// transport unblocks pending calls as well.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Our own role.
    fn self_role(&self) -> RoleId;

    /// Number of parties in the cluster, including us.
    fn party_count(&self) -> usize;

    /// Queue `msg` for delivery to `to`.
    async fn send(&self, to: RoleId, msg: Vec<u8>, cancel: &CancellationToken) -> NetworkResult<()>;

    /// Wait for the next message from `from`.
    async fn receive(&self, from: RoleId, cancel: &CancellationToken) -> NetworkResult<Vec<u8>>;

    /// Receive one message from each role in `from`, concurrently.
    ///
    /// Fails as a whole if any single receive fails.
    async fn receive_all(
        &self,
        from: &[RoleId],
        cancel: &CancellationToken,
    ) -> NetworkResult<HashMap<RoleId, Vec<u8>>> {
        validate_receive_set(self.self_role(), from)?;

        let receives = from.iter().map(|&role| async move {
            self.receive(role, cancel).await.map(|msg| (role, msg))
        });
        Ok(try_join_all(receives).await?.into_iter().collect())
    }

    /// Tear down every connection. Idempotent.
    fn close(&self);
}

pub fn validate_send_target(self_role: RoleId, to: RoleId) -> NetworkResult<()> {
    if to == self_role {
        return Err(NetworkError::SendToSelf(to));
    }
    Ok(())
}

pub fn validate_receive_source(self_role: RoleId, from: RoleId) -> NetworkResult<()> {
    if from == self_role {
        return Err(NetworkError::ReceiveFromSelf(from));
    }
    Ok(())
}

/// Rejects our own role and repeated roles.
pub fn validate_receive_set(self_role: RoleId, from: &[RoleId]) -> NetworkResult<()> {
    let mut seen = HashSet::with_capacity(from.len());
    for &role in from {
        validate_receive_source(self_role, role)?;
        if !seen.insert(role) {
            return Err(NetworkError::DuplicateRole(role));
        }
    }
    Ok(())
}
