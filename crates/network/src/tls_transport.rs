//! Mutual-TLS transport over TCP.
//!
//! Every party dials each higher-indexed peer and accepts from each
//! lower-indexed one. After the TLS handshake the dialer announces its role
//! as a big-endian `u32`; the listener checks the claim against the
//! topology (and, under [`IdentityPolicy::BindPartyName`], against the
//! client certificate) before registering the connection.
//!
//! With [`TransportSettings::confirm_registration`] the listener answers an
//! accepted claim with a single ack byte, so a dialer whose certificate or
//! claim was refused retries instead of registering a dead stream.

use async_trait::async_trait;
use mpc_security::{verify_peer_binding, MtlsConfig};
use mpc_types::{ClusterTopology, PartyEntry, RoleId};
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::{read_registration_ack, read_role_id, write_registration_ack, write_role_id};
use crate::error::{NetworkError, NetworkResult};
use crate::registry::PeerRegistry;
use crate::settings::{IdentityPolicy, TransportSettings};
use crate::transport::{validate_receive_source, validate_send_target, Transport};

/// Everything a party needs to join the mesh.
#[derive(Clone)]
pub struct TlsTransportConfig {
    pub topology: ClusterTopology,
    pub self_role: RoleId,
    pub mtls: MtlsConfig,
    pub settings: TransportSettings,
}

pub struct TlsTransport {
    self_role: RoleId,
    party_count: usize,
    local_addr: Option<SocketAddr>,
    registry: Arc<PeerRegistry>,
    scope: CancellationToken,
    closed: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

/// State shared by the accept loop and the dial tasks.
struct Establishment {
    topology: ClusterTopology,
    self_role: RoleId,
    settings: TransportSettings,
    registry: Arc<PeerRegistry>,
    scope: CancellationToken,
}

impl TlsTransport {
    /// Connect to every peer in the topology.
    ///
    /// Returns once all `n - 1` connections are registered. Fails if the
    /// listener cannot bind, if a registration is refused, or if the connect
    /// timeout elapses; in every failure case all partial connections and
    /// background tasks are torn down before returning.
    pub async fn connect(config: TlsTransportConfig) -> NetworkResult<Self> {
        let TlsTransportConfig {
            topology,
            self_role,
            mtls,
            settings,
        } = config;
        topology.validate_self(self_role)?;

        let party_count = topology.len();
        let scope = CancellationToken::new();
        let registry = Arc::new(PeerRegistry::new(
            self_role,
            party_count,
            settings.peer_settings(),
            scope.clone(),
        ));
        let ctx = Arc::new(Establishment {
            topology: topology.clone(),
            self_role,
            settings: settings.clone(),
            registry: Arc::clone(&registry),
            scope: scope.clone(),
        });

        info!(
            role = %self_role,
            parties = party_count,
            "Establishing mTLS transport"
        );

        // Lower roles dial us, so only a non-zero role needs a listener.
        let (listener, local_addr) = if self_role.0 > 0 {
            let address = topology
                .entry(self_role)
                .map(|entry| entry.address.clone())
                .unwrap_or_default();
            let listener = TcpListener::bind(&address)
                .await
                .map_err(|source| NetworkError::BindFailed { address: address.clone(), source })?;
            let local_addr = listener.local_addr().ok();
            info!(role = %self_role, "Listening for lower-indexed peers on {}", address);

            let acceptor = TlsAcceptor::from(Arc::clone(&mtls.server));
            let task = tokio::spawn(accept_loop(listener, acceptor, Arc::clone(&ctx)));
            (Some(task), local_addr)
        } else {
            (None, None)
        };

        let (fatal_tx, mut fatal_rx) = mpsc::channel::<NetworkError>(party_count);
        let connector = TlsConnector::from(Arc::clone(&mtls.client));
        let mut dialers = Vec::new();
        for entry in topology.parties().iter().filter(|e| e.role > self_role) {
            let ctx = Arc::clone(&ctx);
            let connector = connector.clone();
            let entry = entry.clone();
            let fatal_tx = fatal_tx.clone();
            dialers.push(tokio::spawn(async move {
                if let Err(e) = dial_peer(&ctx, connector, &entry).await {
                    if !e.is_cancellation() {
                        let _ = fatal_tx.send(e).await;
                    }
                }
            }));
        }
        drop(fatal_tx);

        let timeout = settings.connect_timeout();
        let outcome = tokio::time::timeout(timeout, async {
            tokio::select! {
                _ = registry.wait_complete() => Ok(()),
                Some(err) = fatal_rx.recv() => Err(err),
            }
        })
        .await
        .unwrap_or_else(|_| {
            Err(NetworkError::ConnectTimeout {
                timeout,
                missing: registry.missing(),
            })
        });

        let transport = Self {
            self_role,
            party_count,
            local_addr,
            registry,
            scope,
            closed: AtomicBool::new(false),
            listener: Mutex::new(listener),
        };

        match outcome {
            Ok(()) => {
                info!(role = %self_role, peers = party_count - 1, "mTLS transport established");
                Ok(transport)
            }
            Err(e) => {
                error!(role = %self_role, "Transport establishment failed: {}", e);
                for dialer in &dialers {
                    dialer.abort();
                }
                transport.close();
                transport.registry.shutdown_all().await;
                Err(e)
            }
        }
    }

    /// Address the listener is bound to, if this party listens.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Close and wait for every connection's tasks to exit.
    pub async fn shutdown(&self) {
        self.close();
        self.registry.shutdown_all().await;
    }
}

#[async_trait]
impl Transport for TlsTransport {
    fn self_role(&self) -> RoleId {
        self.self_role
    }

    fn party_count(&self) -> usize {
        self.party_count
    }

    async fn send(&self, to: RoleId, msg: Vec<u8>, cancel: &CancellationToken) -> NetworkResult<()> {
        validate_send_target(self.self_role, to)?;
        if self.scope.is_cancelled() {
            return Err(NetworkError::TransportClosed);
        }
        let peer = self.registry.get(to).ok_or(NetworkError::UnknownPeer(to))?;

        tokio::select! {
            sent = peer.send(msg, cancel) => sent,
            _ = self.scope.cancelled() => Err(NetworkError::TransportClosed),
        }
    }

    async fn receive(&self, from: RoleId, cancel: &CancellationToken) -> NetworkResult<Vec<u8>> {
        validate_receive_source(self.self_role, from)?;
        if self.scope.is_cancelled() {
            return Err(NetworkError::TransportClosed);
        }
        let peer = self.registry.get(from).ok_or(NetworkError::UnknownPeer(from))?;

        tokio::select! {
            msg = peer.receive(cancel) => msg,
            _ = self.scope.cancelled() => Err(NetworkError::TransportClosed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(role = %self.self_role, "Closing mTLS transport");
        self.scope.cancel();
        if let Some(listener) = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            listener.abort();
        }
        self.registry.close_all();
    }
}

impl Drop for TlsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_loop(listener: TcpListener, acceptor: TlsAcceptor, ctx: Arc<Establishment>) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.scope.cancelled() => return,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((socket, addr)) => {
                let acceptor = acceptor.clone();
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    let scope = ctx.scope.clone();
                    tokio::select! {
                        _ = scope.cancelled() => {}
                        result = accept_peer(socket, addr, acceptor, &ctx) => {
                            if let Err(e) = result {
                                warn!(role = %ctx.self_role, "Rejected connection from {}: {}", addr, e);
                            }
                        }
                    }
                });
            }
            Err(e) => {
                warn!(role = %ctx.self_role, "Accept failed: {}", e);
                tokio::select! {
                    _ = ctx.scope.cancelled() => return,
                    _ = tokio::time::sleep(ctx.settings.dial_backoff()) => {}
                }
            }
        }
    }
}

/// TLS accept, role announcement, identity check, registration.
async fn accept_peer(
    socket: TcpStream,
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    ctx: &Establishment,
) -> NetworkResult<()> {
    let handshake_timeout = ctx.settings.handshake_timeout();
    let handshake_failed = |reason: String| NetworkError::Handshake {
        peer: addr.to_string(),
        reason,
    };

    socket.set_nodelay(true)?;
    let mut tls = tokio::time::timeout(handshake_timeout, acceptor.accept(socket))
        .await
        .map_err(|_| handshake_failed("TLS handshake timed out".to_string()))?
        .map_err(|e| handshake_failed(format!("TLS handshake failed: {}", e)))?;

    let claimed = tokio::time::timeout(handshake_timeout, read_role_id(&mut tls))
        .await
        .map_err(|_| handshake_failed("role announcement timed out".to_string()))?
        .map_err(|e| handshake_failed(format!("malformed role announcement: {}", e)))?;

    ctx.registry.check_claim(claimed)?;

    if ctx.settings.identity_policy == IdentityPolicy::BindPartyName {
        let expected = ctx
            .topology
            .entry(claimed)
            .ok_or(NetworkError::RoleOutOfRange {
                role: claimed,
                count: ctx.topology.len(),
            })?;
        let peer_certs = tls.get_ref().1.peer_certificates().unwrap_or_default();
        verify_peer_binding(peer_certs, &expected.name).map_err(|e| {
            NetworkError::IdentityMismatch {
                role: claimed,
                reason: e.to_string(),
            }
        })?;
    }

    if ctx.settings.confirm_registration {
        // Registration below can still lose a race for the same role; the
        // dialer then sees the stream end on its first receive.
        if ctx.registry.get(claimed).is_some() {
            return Err(NetworkError::DuplicateConnection(claimed));
        }
        tokio::time::timeout(handshake_timeout, write_registration_ack(&mut tls))
            .await
            .map_err(|_| handshake_failed("registration ack timed out".to_string()))??;
    }

    ctx.registry.register(claimed, tls)?;
    debug!(role = %ctx.self_role, peer = %claimed, "Accepted peer from {}", addr);
    Ok(())
}

/// Dial `entry` until it answers, then announce our role and register.
async fn dial_peer(
    ctx: &Establishment,
    connector: TlsConnector,
    entry: &PartyEntry,
) -> NetworkResult<()> {
    let server_name = ServerName::try_from(entry.name.clone()).map_err(|e| {
        NetworkError::TlsConfigError(format!("party name {:?} is not a valid TLS name: {}", entry.name, e))
    })?;

    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let dialed = tokio::select! {
            _ = ctx.scope.cancelled() => return Err(NetworkError::Cancelled),
            dialed = dial_once(ctx, &connector, entry, server_name.clone()) => dialed,
        };

        match dialed {
            Ok(stream) => {
                ctx.registry.register(entry.role, stream)?;
                debug!(role = %ctx.self_role, peer = %entry.role, attempt, "Dialed peer");
                return Ok(());
            }
            Err(e) => {
                debug!(
                    role = %ctx.self_role,
                    peer = %entry.role,
                    attempt,
                    "Dial to {} failed, retrying: {}",
                    entry.address,
                    e
                );
            }
        }

        tokio::select! {
            _ = ctx.scope.cancelled() => return Err(NetworkError::Cancelled),
            _ = tokio::time::sleep(ctx.settings.dial_backoff()) => {}
        }
    }
}

async fn dial_once(
    ctx: &Establishment,
    connector: &TlsConnector,
    entry: &PartyEntry,
    server_name: ServerName<'static>,
) -> NetworkResult<tokio_rustls::client::TlsStream<TcpStream>> {
    let handshake_failed = |reason: String| NetworkError::Handshake {
        peer: entry.address.clone(),
        reason,
    };

    let socket = TcpStream::connect(&entry.address).await?;
    socket.set_nodelay(true)?;

    let mut tls = tokio::time::timeout(ctx.settings.handshake_timeout(), connector.connect(server_name, socket))
        .await
        .map_err(|_| handshake_failed("TLS handshake timed out".to_string()))?
        .map_err(|e| handshake_failed(format!("TLS handshake failed: {}", e)))?;

    write_role_id(&mut tls, ctx.self_role).await?;

    if ctx.settings.confirm_registration {
        tokio::time::timeout(ctx.settings.handshake_timeout(), read_registration_ack(&mut tls))
            .await
            .map_err(|_| handshake_failed("registration ack timed out".to_string()))?
            .map_err(|e| handshake_failed(format!("registration refused: {}", e)))?;
    }
    Ok(tls)
}
