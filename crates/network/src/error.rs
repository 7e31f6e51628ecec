//! Error types for the MPC transport layer.

use mpc_types::{RoleId, TopologyError};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Why a peer connection stopped. Recorded once; every later operation on
/// that peer reports the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerFailure {
    /// The stream ended, or the connection was closed locally.
    #[error("end of stream")]
    EndOfStream,

    /// Read or write on the stream failed.
    #[error("{kind:?}: {message}")]
    Io { kind: io::ErrorKind, message: String },
}

impl From<&io::Error> for PeerFailure {
    fn from(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => PeerFailure::EndOfStream,
            kind => PeerFailure::Io {
                kind,
                message: err.to_string(),
            },
        }
    }
}

/// Errors that can occur during transport construction and messaging.
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Destination is our own role.
    #[error("cannot send to self (role {0})")]
    SendToSelf(RoleId),

    /// Source is our own role.
    #[error("cannot receive from self (role {0})")]
    ReceiveFromSelf(RoleId),

    /// The same role appears twice in a receive-all request.
    #[error("role {0} requested more than once")]
    DuplicateRole(RoleId),

    /// No connection is registered for this role.
    #[error("unknown peer role {0}")]
    UnknownPeer(RoleId),

    /// Outgoing message larger than the peer would accept. The connection
    /// is unaffected.
    #[error("message of {len} bytes for peer {role} exceeds frame limit of {max}")]
    FrameTooLarge { role: RoleId, len: usize, max: usize },

    /// The peer connection has a terminal error.
    #[error("peer {role} failed: {failure}")]
    PeerFailed { role: RoleId, failure: PeerFailure },

    /// The caller's cancellation scope fired.
    #[error("operation cancelled")]
    Cancelled,

    /// The transport was closed while the operation was pending.
    #[error("transport closed")]
    TransportClosed,

    /// Invalid topology or self role.
    #[error("invalid configuration: {0}")]
    Config(#[from] TopologyError),

    /// Listener bind failed.
    #[error("failed to bind listener on {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: io::Error,
    },

    /// TLS or role handshake failed for one connection attempt.
    #[error("handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },

    /// A second connection claimed an already registered role.
    #[error("role {0} already has a registered connection")]
    DuplicateConnection(RoleId),

    /// A connection claimed a role outside the topology.
    #[error("claimed role {role} out of range for {count} parties")]
    RoleOutOfRange { role: RoleId, count: usize },

    /// A connection claimed our own role.
    #[error("peer claimed our own role {0}")]
    SelfConnection(RoleId),

    /// The certificate does not belong to the claimed role.
    #[error("identity mismatch for role {role}: {reason}")]
    IdentityMismatch { role: RoleId, reason: String },

    /// Not every peer connected before the deadline.
    #[error("timed out after {timeout:?} waiting for peers {missing:?}")]
    ConnectTimeout {
        timeout: Duration,
        missing: Vec<RoleId>,
    },

    /// Certificate error.
    #[error("certificate error: {0}")]
    CertificateError(String),

    /// TLS configuration error.
    #[error("TLS configuration error: {0}")]
    TlsConfigError(String),

    /// Fault deliberately injected by a test wrapper.
    #[error("injected fault: {0}")]
    Injected(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl NetworkError {
    /// True when the error means the operation was cancelled or the
    /// transport shut down, rather than a peer or protocol failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, NetworkError::Cancelled | NetworkError::TransportClosed)
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eof_maps_to_end_of_stream() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "early eof");
        assert_eq!(PeerFailure::from(&eof), PeerFailure::EndOfStream);

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(matches!(
            PeerFailure::from(&reset),
            PeerFailure::Io { kind: io::ErrorKind::ConnectionReset, .. }
        ));
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(NetworkError::Cancelled.is_cancellation());
        assert!(NetworkError::TransportClosed.is_cancellation());
        assert!(!NetworkError::UnknownPeer(RoleId(3)).is_cancellation());
    }
}
