//! The engine-facing side of a job: role-addressed send and receive.

use mpc_network::{NetworkError, Transport};
use mpc_types::RoleId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{JobError, JobResult};

/// What protocol code sees of a job.
///
/// Every call runs under the job's cancellation scope. Once the job is closed
/// new calls fail with [`JobError::Closed`] and pending ones return promptly.
pub struct JobChannel {
    job_id: Uuid,
    self_role: RoleId,
    party_count: usize,
    transport: Arc<dyn Transport>,
    scope: CancellationToken,
    closed: AtomicBool,
}

impl JobChannel {
    pub(crate) fn new(job_id: Uuid, transport: Arc<dyn Transport>, scope: CancellationToken) -> Self {
        Self {
            job_id,
            self_role: transport.self_role(),
            party_count: transport.party_count(),
            transport,
            scope,
            closed: AtomicBool::new(false),
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn self_role(&self) -> RoleId {
        self.self_role
    }

    pub fn party_count(&self) -> usize {
        self.party_count
    }

    /// Every role except ours, ascending.
    pub fn peers(&self) -> Vec<RoleId> {
        (0..self.party_count as u32)
            .map(RoleId)
            .filter(|role| *role != self.self_role)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub async fn send(&self, to: RoleId, msg: Vec<u8>) -> JobResult<()> {
        self.ensure_open()?;
        let result = self.transport.send(to, msg, &self.scope).await;
        self.map_result(result)
    }

    pub async fn receive(&self, from: RoleId) -> JobResult<Vec<u8>> {
        self.ensure_open()?;
        let result = self.transport.receive(from, &self.scope).await;
        self.map_result(result)
    }

    /// One message from each role in `from`; any single failure fails the batch.
    pub async fn receive_all(&self, from: &[RoleId]) -> JobResult<HashMap<RoleId, Vec<u8>>> {
        self.ensure_open()?;
        let result = self.transport.receive_all(from, &self.scope).await;
        self.map_result(result)
    }

    /// Returns false if the channel was already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.scope.cancel();
        true
    }

    fn ensure_open(&self) -> JobResult<()> {
        if self.is_closed() {
            return Err(JobError::Closed);
        }
        Ok(())
    }

    // A cancellation caused by our own close reads as Closed; anything else
    // passes through untouched.
    fn map_result<T>(&self, result: Result<T, NetworkError>) -> JobResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_cancellation() && self.is_closed() => Err(JobError::Closed),
            Err(err) => Err(JobError::Network(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpc_network::MockNetwork;
    use std::time::Duration;

    fn channel(transport: Arc<dyn Transport>) -> Arc<JobChannel> {
        Arc::new(JobChannel::new(Uuid::new_v4(), transport, CancellationToken::new()))
    }

    fn channels() -> (Arc<JobChannel>, Arc<JobChannel>) {
        let (a, b) = MockNetwork::pair();
        (channel(Arc::new(a)), channel(Arc::new(b)))
    }

    #[tokio::test]
    async fn test_roundtrip_and_peers() {
        let (a, b) = channels();
        assert_eq!(a.peers(), vec![RoleId(1)]);
        assert_eq!(b.peers(), vec![RoleId(0)]);

        a.send(RoleId(1), b"hello".to_vec()).await.unwrap();
        assert_eq!(b.receive(RoleId(0)).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_receive() {
        let (a, _b) = channels();
        let pending = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.receive(RoleId(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(a.mark_closed());
        assert!(!a.mark_closed());

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(JobError::Closed)));
        assert!(matches!(a.send(RoleId(1), vec![1]).await, Err(JobError::Closed)));
    }

    #[tokio::test]
    async fn test_transport_errors_are_not_rewritten() {
        let (a, _b) = channels();
        assert!(matches!(
            a.send(RoleId(0), vec![]).await,
            Err(JobError::Network(NetworkError::SendToSelf(RoleId(0))))
        ));
        assert!(matches!(
            a.receive_all(&[RoleId(1), RoleId(1)]).await,
            Err(JobError::Network(NetworkError::DuplicateRole(RoleId(1))))
        ));
    }
}
