use mpc_network::NetworkError;
use mpc_types::{RoleId, TopologyError};
use std::error::Error as StdError;
use thiserror::Error;

use crate::registry::Handle;

/// Errors surfaced by job construction, the engine channel and protocols.
#[derive(Debug, Error)]
pub enum JobError {
    /// Party names or self role are unusable.
    #[error("invalid peers/self configuration: {0}")]
    BadPeers(#[from] TopologyError),

    /// The transport was built for a different role than the job.
    #[error("transport belongs to role {transport}, job was created for role {job}")]
    RoleMismatch { transport: RoleId, job: RoleId },

    /// The transport and the job disagree about the cluster size.
    #[error("transport connects {transport} parties, job names {names}")]
    PartyCountMismatch { transport: usize, names: usize },

    /// The job was closed.
    #[error("job has been closed")]
    Closed,

    /// Requested output length is unusable.
    #[error("bitlen must be >= 8 and a multiple of 8, got {0}")]
    InvalidBits(usize),

    /// No channel is attached under this handle.
    #[error("unknown or released handle {0}")]
    UnknownHandle(Handle),

    /// Transport failure, passed through unchanged.
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// The protocol itself rejected what it received.
    #[error("protocol failed: {0}")]
    Protocol(#[source] Box<dyn StdError + Send + Sync>),
}

impl JobError {
    pub fn protocol<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        JobError::Protocol(Box::new(err))
    }

    /// True for local shutdown or cancellation, as opposed to peer faults.
    pub fn is_cancellation(&self) -> bool {
        match self {
            JobError::Closed => true,
            JobError::Network(err) => err.is_cancellation(),
            _ => false,
        }
    }
}

pub type JobResult<T> = Result<T, JobError>;
