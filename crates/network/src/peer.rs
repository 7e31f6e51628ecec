//! One authenticated stream to one remote role.
//!
//! A reader task moves frames from the wire into the inbound queue and a
//! writer task moves queued messages onto the wire. Callers only touch the
//! two bounded queues.

use mpc_types::RoleId;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{read_frame, write_frame};
use crate::error::{NetworkError, NetworkResult, PeerFailure};
use crate::settings::PeerSettings;

pub struct PeerConnection {
    role: RoleId,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    failure: Arc<OnceLock<PeerFailure>>,
    closing: CancellationToken,
    max_frame_len: usize,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PeerConnection {
    /// Take ownership of `stream` and start its reader and writer tasks.
    ///
    /// `parent` is the owning transport's scope: cancelling it closes this
    /// connection too.
    pub fn spawn<S>(
        role: RoleId,
        stream: S,
        settings: PeerSettings,
        parent: &CancellationToken,
    ) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(settings.queue_depth);
        let (inbound_tx, inbound_rx) = mpsc::channel(settings.queue_depth);
        let failure = Arc::new(OnceLock::new());
        let closing = parent.child_token();

        let reader_task = tokio::spawn(reader_loop(
            role,
            reader,
            inbound_tx,
            settings,
            Arc::clone(&failure),
            closing.clone(),
        ));
        let writer_task = tokio::spawn(writer_loop(
            role,
            writer,
            outbound_rx,
            settings,
            Arc::clone(&failure),
            closing.clone(),
        ));

        debug!(peer = %role, "Peer connection started");

        Arc::new(Self {
            role,
            outbound: outbound_tx,
            inbound: AsyncMutex::new(inbound_rx),
            failure,
            closing,
            max_frame_len: settings.max_frame_len,
            tasks: Mutex::new(vec![reader_task, writer_task]),
        })
    }

    pub fn role(&self) -> RoleId {
        self.role
    }

    /// The terminal error, if the connection has stopped.
    pub fn failure(&self) -> Option<PeerFailure> {
        self.failure.get().cloned()
    }

    /// Queue `msg` for the writer, waiting for space if the queue is full.
    ///
    /// Messages over `max_frame_len` are refused here, since the remote
    /// reader would treat them as a protocol violation.
    pub async fn send(&self, msg: Vec<u8>, cancel: &CancellationToken) -> NetworkResult<()> {
        if self.failure.get().is_some() {
            return Err(self.failure_error());
        }
        if msg.len() > self.max_frame_len {
            return Err(NetworkError::FrameTooLarge {
                role: self.role,
                len: msg.len(),
                max: self.max_frame_len,
            });
        }

        tokio::select! {
            sent = self.outbound.send(msg) => sent.map_err(|_| self.failure_error()),
            _ = self.closing.cancelled() => Err(self.failure_error()),
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
        }
    }

    /// Take the next message from this peer.
    ///
    /// Messages that arrived before the connection failed are still
    /// delivered; once the queue is drained the terminal error is returned.
    pub async fn receive(&self, cancel: &CancellationToken) -> NetworkResult<Vec<u8>> {
        let mut inbound = tokio::select! {
            guard = self.inbound.lock() => guard,
            _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
        };

        tokio::select! {
            msg = inbound.recv() => msg.ok_or_else(|| self.failure_error()),
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
        }
    }

    /// Stop both loops. Messages already queued for sending are flushed,
    /// bounded by the linger time. Safe to call more than once.
    pub fn close(&self) {
        record_failure(&self.failure, PeerFailure::EndOfStream);
        self.closing.cancel();
    }

    /// Close and wait for both loops to exit.
    pub async fn shutdown(&self) {
        self.close();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn failure_error(&self) -> NetworkError {
        NetworkError::PeerFailed {
            role: self.role,
            failure: self.failure().unwrap_or(PeerFailure::EndOfStream),
        }
    }
}

fn record_failure(slot: &OnceLock<PeerFailure>, failure: PeerFailure) {
    // First failure wins.
    let _ = slot.set(failure);
}

async fn reader_loop<S>(
    role: RoleId,
    mut reader: ReadHalf<S>,
    inbound: mpsc::Sender<Vec<u8>>,
    settings: PeerSettings,
    failure: Arc<OnceLock<PeerFailure>>,
    closing: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader, settings.max_frame_len) => frame,
            _ = closing.cancelled() => break,
        };

        match frame {
            Ok(payload) => {
                debug!(peer = %role, bytes = payload.len(), "Frame received");
                tokio::select! {
                    queued = inbound.send(payload) => {
                        if queued.is_err() {
                            break;
                        }
                    }
                    _ = closing.cancelled() => break,
                }
            }
            Err(e) => {
                let observed = PeerFailure::from(&e);
                if observed == PeerFailure::EndOfStream {
                    debug!(peer = %role, "Peer closed the stream");
                } else {
                    warn!(peer = %role, "Read failed: {}", e);
                }
                record_failure(&failure, observed);
                break;
            }
        }
    }
    // Dropping `inbound` releases receivers once the queue drains.
}

async fn writer_loop<S>(
    role: RoleId,
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    settings: PeerSettings,
    failure: Arc<OnceLock<PeerFailure>>,
    closing: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    let mut draining = false;

    loop {
        let next = tokio::select! {
            biased;
            msg = outbound.recv() => msg,
            _ = closing.cancelled(), if !draining => {
                draining = true;
                outbound.close();
                continue;
            }
        };
        let Some(msg) = next else { break };

        let written = tokio::select! {
            written = write_frame(&mut writer, &msg) => written,
            _ = linger_after(&closing, settings) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write still pending after close",
            )),
        };

        if let Err(e) = written {
            warn!(peer = %role, "Write failed: {}", e);
            record_failure(&failure, PeerFailure::from(&e));
            closing.cancel();
            return;
        }
        debug!(peer = %role, bytes = msg.len(), "Frame sent");
    }

    let _ = tokio::time::timeout(settings.close_linger, writer.shutdown()).await;
    debug!(peer = %role, "Writer stopped");
}

async fn linger_after(closing: &CancellationToken, settings: PeerSettings) {
    closing.cancelled().await;
    tokio::time::sleep(settings.close_linger).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_frame, write_frame};
    use std::time::Duration;

    fn settings() -> PeerSettings {
        PeerSettings {
            queue_depth: 4,
            max_frame_len: 1 << 16,
            close_linger: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways_in_order() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);
        let cancel = CancellationToken::new();

        for i in 0u8..10 {
            peer.send(vec![i, i], &cancel).await.unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(read_frame(&mut remote, 1024).await.unwrap(), vec![i, i]);
        }

        for i in 0u8..10 {
            write_frame(&mut remote, &[i]).await.unwrap();
        }
        for i in 0u8..10 {
            assert_eq!(peer.receive(&cancel).await.unwrap(), vec![i]);
        }
    }

    #[tokio::test]
    async fn test_buffered_messages_survive_remote_close() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(2), local, settings(), &root);
        let cancel = CancellationToken::new();

        write_frame(&mut remote, b"last words").await.unwrap();
        drop(remote);

        assert_eq!(peer.receive(&cancel).await.unwrap(), b"last words");
        let err = peer.receive(&cancel).await.unwrap_err();
        assert!(matches!(
            err,
            NetworkError::PeerFailed { role: RoleId(2), failure: PeerFailure::EndOfStream }
        ));

        // Sends now report the same terminal error.
        let err = peer.send(vec![1], &cancel).await.unwrap_err();
        assert!(matches!(err, NetworkError::PeerFailed { failure: PeerFailure::EndOfStream, .. }));
    }

    #[tokio::test]
    async fn test_receive_unblocks_on_cancel() {
        let (local, _remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), peer.receive(&cancel)).await;
        assert!(matches!(result, Ok(Err(NetworkError::Cancelled))));
    }

    #[tokio::test]
    async fn test_send_blocks_when_queue_full_until_cancelled() {
        // Tiny duplex buffer and nobody reading the remote side.
        let (local, _remote) = tokio::io::duplex(8);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);
        let cancel = CancellationToken::new();

        let mut blocked = false;
        for _ in 0..64 {
            let attempt = tokio::time::timeout(
                Duration::from_millis(50),
                peer.send(vec![0u8; 64], &cancel),
            )
            .await;
            if attempt.is_err() {
                blocked = true;
                break;
            }
        }
        assert!(blocked, "bounded queue never applied backpressure");

        cancel.cancel();
        let err = peer.send(vec![1], &cancel).await.unwrap_err();
        assert!(matches!(err, NetworkError::Cancelled));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_flushes() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);
        let cancel = CancellationToken::new();

        peer.send(b"queued".to_vec(), &cancel).await.unwrap();
        peer.close();
        peer.close();

        assert_eq!(read_frame(&mut remote, 1024).await.unwrap(), b"queued");
        peer.shutdown().await;

        assert_eq!(peer.failure(), Some(PeerFailure::EndOfStream));
        assert!(peer.receive(&cancel).await.is_err());
        assert!(peer.send(vec![], &cancel).await.is_err());
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes_peer() {
        let (local, _remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(3), local, settings(), &root);

        root.cancel();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            peer.receive(&CancellationToken::new()),
        )
        .await;
        assert!(matches!(result, Ok(Err(NetworkError::PeerFailed { .. }))));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_terminal() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);

        use tokio::io::AsyncWriteExt;
        remote.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let err = peer.receive(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            NetworkError::PeerFailed {
                failure: PeerFailure::Io { kind: std::io::ErrorKind::InvalidData, .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_locally() {
        let (local, mut remote) = tokio::io::duplex(1024);
        let root = CancellationToken::new();
        let peer = PeerConnection::spawn(RoleId(1), local, settings(), &root);
        let cancel = CancellationToken::new();

        let err = peer.send(vec![0u8; (1 << 16) + 1], &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            NetworkError::FrameTooLarge { role: RoleId(1), len: 65537, max: 65536 }
        ));

        // The connection stays usable and nothing oversized hit the wire.
        assert_eq!(peer.failure(), None);
        peer.send(b"fits".to_vec(), &cancel).await.unwrap();
        assert_eq!(read_frame(&mut remote, 1 << 16).await.unwrap(), b"fits");
    }
}
