//! Transport wrapper that misbehaves on purpose, for robustness tests.

use async_trait::async_trait;
use mpc_types::RoleId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{NetworkError, NetworkResult};
use crate::transport::Transport;

/// What the wrapped party does wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Report success but deliver nothing.
    DropSends,
    /// Every receive fails.
    FailReceives,
    /// Flip every bit of the first byte.
    CorruptFirstByte,
    /// Flip the low bit of the middle byte of messages longer than 4 bytes.
    FlipMiddleBit,
    /// Send zero-length messages.
    SendEmpty,
    /// Send 0xFF bytes of the original length.
    SendGarbage,
    /// Send only the first half of each message.
    Truncate,
    /// Keep re-sending the first message ever sent.
    ReplayFirst,
    /// Sends beyond the first `n` fail.
    FailAfterSends(usize),
    /// Receives beyond the first `n` fail.
    FailAfterReceives(usize),
}

pub struct FaultyTransport {
    inner: Arc<dyn Transport>,
    fault: Fault,
    sends: AtomicUsize,
    receives: AtomicUsize,
    first_message: Mutex<Option<Vec<u8>>>,
}

impl FaultyTransport {
    pub fn new(inner: Arc<dyn Transport>, fault: Fault) -> Self {
        Self {
            inner,
            fault,
            sends: AtomicUsize::new(0),
            receives: AtomicUsize::new(0),
            first_message: Mutex::new(None),
        }
    }

    fn tamper(&self, msg: Vec<u8>) -> Option<Vec<u8>> {
        match &self.fault {
            Fault::DropSends => None,
            Fault::SendEmpty => Some(Vec::new()),
            Fault::SendGarbage => Some(vec![0xFF; msg.len()]),
            Fault::CorruptFirstByte => {
                let mut msg = msg;
                if let Some(first) = msg.first_mut() {
                    *first ^= 0xFF;
                }
                Some(msg)
            }
            Fault::FlipMiddleBit => {
                let mut msg = msg;
                if msg.len() > 4 {
                    let mid = msg.len() / 2;
                    msg[mid] ^= 0x01;
                }
                Some(msg)
            }
            Fault::Truncate => {
                let half = msg.len() / 2;
                Some(msg[..half].to_vec())
            }
            Fault::ReplayFirst => {
                let mut first = self
                    .first_message
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                Some(first.get_or_insert(msg).clone())
            }
            Fault::FailReceives | Fault::FailAfterSends(_) | Fault::FailAfterReceives(_) => Some(msg),
        }
    }
}

#[async_trait]
impl Transport for FaultyTransport {
    fn self_role(&self) -> RoleId {
        self.inner.self_role()
    }

    fn party_count(&self) -> usize {
        self.inner.party_count()
    }

    async fn send(&self, to: RoleId, msg: Vec<u8>, cancel: &CancellationToken) -> NetworkResult<()> {
        let count = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        if let Fault::FailAfterSends(limit) = self.fault {
            if count > limit {
                return Err(NetworkError::Injected(format!("send #{} refused", count)));
            }
        }

        match self.tamper(msg) {
            Some(msg) => self.inner.send(to, msg, cancel).await,
            None => {
                debug!(to = %to, "Dropping outbound message");
                Ok(())
            }
        }
    }

    async fn receive(&self, from: RoleId, cancel: &CancellationToken) -> NetworkResult<Vec<u8>> {
        let count = self.receives.fetch_add(1, Ordering::SeqCst) + 1;
        match self.fault {
            Fault::FailReceives => {
                return Err(NetworkError::Injected("receive refused".to_string()));
            }
            Fault::FailAfterReceives(limit) if count > limit => {
                return Err(NetworkError::Injected(format!("receive #{} refused", count)));
            }
            _ => {}
        }
        self.inner.receive(from, cancel).await
    }

    fn close(&self) {
        self.inner.close();
    }
}
