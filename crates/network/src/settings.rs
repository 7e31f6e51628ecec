use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an accepted connection's certificate is tied to the role it claims.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityPolicy {
    /// Any certificate chained to the cluster CA may claim any role.
    CaOnly,
    /// The certificate's primary name (CN, else first DNS SAN) must equal
    /// the claimed role's party name.
    #[default]
    BindPartyName,
}

/// Tunables for connection establishment and per-peer buffering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransportSettings {
    pub dial_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub close_linger_ms: u64,
    pub queue_depth: usize,
    pub max_frame_len: usize,
    pub tls13_only: bool,
    pub identity_policy: IdentityPolicy,
    /// Listener answers an accepted role announcement with one ack byte, and
    /// the dialer waits for it before registering. Every party must agree.
    pub confirm_registration: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            dial_backoff_ms: 200,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 5_000,
            close_linger_ms: 1_000,
            queue_depth: 16,
            max_frame_len: 64 * 1024 * 1024,
            tls13_only: false,
            identity_policy: IdentityPolicy::BindPartyName,
            confirm_registration: false,
        }
    }
}

impl TransportSettings {
    pub fn dial_backoff(&self) -> Duration {
        Duration::from_millis(self.dial_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn peer_settings(&self) -> PeerSettings {
        PeerSettings {
            queue_depth: self.queue_depth.max(1),
            max_frame_len: self.max_frame_len,
            close_linger: Duration::from_millis(self.close_linger_ms),
        }
    }
}

/// Per-connection limits handed to every [`crate::PeerConnection`].
#[derive(Debug, Clone, Copy)]
pub struct PeerSettings {
    pub queue_depth: usize,
    pub max_frame_len: usize,
    pub close_linger: Duration,
}

impl Default for PeerSettings {
    fn default() -> Self {
        TransportSettings::default().peer_settings()
    }
}
