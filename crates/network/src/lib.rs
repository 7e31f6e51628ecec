//! Role-addressed, length-prefixed messaging between MPC parties.
//!
//! [`TlsTransport`] connects a static cluster over mutual TLS;
//! [`MockNetwork`] provides the same [`Transport`] contract in memory.

pub mod codec;
pub mod error;
pub mod faulty;
pub mod mock;
pub mod peer;
pub mod registry;
pub mod settings;
pub mod tls_transport;
pub mod transport;

pub use error::{NetworkError, NetworkResult, PeerFailure};
pub use faulty::{Fault, FaultyTransport};
pub use mock::{MockNetwork, MockTransport};
pub use peer::PeerConnection;
pub use registry::PeerRegistry;
pub use settings::{IdentityPolicy, PeerSettings, TransportSettings};
pub use tls_transport::{TlsTransport, TlsTransportConfig};
pub use transport::Transport;
