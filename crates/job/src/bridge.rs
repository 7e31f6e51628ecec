//! Handle-addressed dispatch for engine code that cannot hold Rust references.
//!
//! An engine adapter keeps only the integer [`Handle`] and routes every
//! send/receive back through the bridge. Released handles fail with
//! [`JobError::UnknownHandle`], never with a different job's channel.

use mpc_network::NetworkError;
use mpc_types::RoleId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::channel::JobChannel;
use crate::error::{JobError, JobResult};
use crate::registry::{Handle, HandleRegistry};

/// Status codes reported across the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallbackStatus {
    Ok = 0,
    Closed = 1,
    Cancelled = 2,
    PeerFailed = 3,
    InvalidArgument = 4,
    UnknownHandle = 5,
    Failed = 6,
}

impl CallbackStatus {
    pub fn of<T>(result: &JobResult<T>) -> Self {
        let err = match result {
            Ok(_) => return CallbackStatus::Ok,
            Err(err) => err,
        };
        match err {
            JobError::Closed => CallbackStatus::Closed,
            JobError::UnknownHandle(_) => CallbackStatus::UnknownHandle,
            JobError::Network(err) => match err {
                NetworkError::Cancelled | NetworkError::TransportClosed => CallbackStatus::Cancelled,
                NetworkError::PeerFailed { .. } | NetworkError::Injected(_) => {
                    CallbackStatus::PeerFailed
                }
                NetworkError::SendToSelf(_)
                | NetworkError::ReceiveFromSelf(_)
                | NetworkError::DuplicateRole(_)
                | NetworkError::UnknownPeer(_)
                | NetworkError::FrameTooLarge { .. } => CallbackStatus::InvalidArgument,
                _ => CallbackStatus::Failed,
            },
            JobError::InvalidBits(_) => CallbackStatus::InvalidArgument,
            _ => CallbackStatus::Failed,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Default)]
pub struct CallbackBridge {
    channels: Mutex<HandleRegistry<Arc<JobChannel>>>,
}

impl CallbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, channel: Arc<JobChannel>) -> Handle {
        let job_id = channel.job_id();
        let handle = self.lock().insert(channel);
        debug!(job_id = %job_id, handle = %handle, "Channel attached");
        handle
    }

    pub fn detach(&self, handle: Handle) -> JobResult<()> {
        let channel = self.lock().remove(handle).ok_or(JobError::UnknownHandle(handle))?;
        debug!(job_id = %channel.job_id(), handle = %handle, "Channel detached");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn send(&self, handle: Handle, to: RoleId, msg: Vec<u8>) -> JobResult<()> {
        self.lookup(handle)?.send(to, msg).await
    }

    pub async fn receive(&self, handle: Handle, from: RoleId) -> JobResult<Vec<u8>> {
        self.lookup(handle)?.receive(from).await
    }

    pub async fn receive_all(
        &self,
        handle: Handle,
        from: &[RoleId],
    ) -> JobResult<HashMap<RoleId, Vec<u8>>> {
        self.lookup(handle)?.receive_all(from).await
    }

    // The lock is never held across an await.
    fn lookup(&self, handle: Handle) -> JobResult<Arc<JobChannel>> {
        self.lock()
            .get(handle)
            .cloned()
            .ok_or(JobError::UnknownHandle(handle))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HandleRegistry<Arc<JobChannel>>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
